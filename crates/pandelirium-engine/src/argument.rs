//! Operator arguments: constants or per-frame callables.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::ParameterEvaluationError;

/// Zero-argument value source evaluated once per frame.
pub type DynamicFn = Arc<dyn Fn() -> Result<f64, String> + Send + Sync>;

/// A value at one argument position of an operator call.
#[derive(Clone)]
pub enum Argument {
    Constant(f64),
    Dynamic(DynamicFn),
}

impl Argument {
    /// Wrap an infallible callable.
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        Argument::Dynamic(Arc::new(move || Ok(f())))
    }

    /// Wrap a callable that can report failure.
    pub fn try_dynamic<F>(f: F) -> Self
    where
        F: Fn() -> Result<f64, String> + Send + Sync + 'static,
    {
        Argument::Dynamic(Arc::new(f))
    }
}

impl fmt::Debug for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Constant(v) => write!(f, "Constant({v})"),
            Argument::Dynamic(_) => write!(f, "Dynamic(<fn>)"),
        }
    }
}

impl From<f64> for Argument {
    fn from(v: f64) -> Self {
        Argument::Constant(v)
    }
}

impl From<f32> for Argument {
    fn from(v: f32) -> Self {
        Argument::Constant(v as f64)
    }
}

impl From<i32> for Argument {
    fn from(v: i32) -> Self {
        Argument::Constant(v as f64)
    }
}

/// Resolve one argument for the current frame. Dynamic sources are invoked every call;
/// nothing is memoized. Panics inside the source are contained and reported, but the
/// process panic hook still runs for each one.
pub fn resolve(argument: &Argument) -> Result<f64, ParameterEvaluationError> {
    match argument {
        Argument::Constant(v) => Ok(*v),
        Argument::Dynamic(f) => {
            let out = panic::catch_unwind(AssertUnwindSafe(|| f()))
                .map_err(|payload| ParameterEvaluationError::Panicked(panic_message(&payload)))?;
            let v = out.map_err(ParameterEvaluationError::Failed)?;
            if v.is_finite() {
                Ok(v)
            } else {
                Err(ParameterEvaluationError::NonFinite(v))
            }
        }
    }
}

/// Resolve every argument in declaration order. One failure does not stop the others.
pub fn resolve_all(arguments: &[Argument]) -> Vec<Result<f64, ParameterEvaluationError>> {
    arguments.iter().map(resolve).collect()
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn constant_resolves_to_itself() {
        assert_eq!(resolve(&Argument::Constant(5.0)), Ok(5.0));
        assert_eq!(resolve(&5.0f64.into()), Ok(5.0));
    }

    #[test]
    fn dynamic_is_invoked_each_time() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let arg = Argument::dynamic(move || {
            c.fetch_add(1, Ordering::SeqCst);
            42.0
        });

        assert_eq!(resolve(&arg), Ok(42.0));
        assert_eq!(resolve(&arg), Ok(42.0));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failing_dynamic_is_an_error_not_a_crash() {
        let arg = Argument::try_dynamic(|| Err("device gone".into()));
        assert_eq!(
            resolve(&arg),
            Err(ParameterEvaluationError::Failed("device gone".into()))
        );
    }

    #[test]
    fn panicking_dynamic_is_contained() {
        let arg = Argument::dynamic(|| panic!("boom"));
        assert_eq!(resolve(&arg), Err(ParameterEvaluationError::Panicked("boom".into())));
    }

    #[test]
    fn nan_is_rejected() {
        let arg = Argument::dynamic(|| f64::NAN);
        assert!(matches!(resolve(&arg), Err(ParameterEvaluationError::NonFinite(_))));
    }

    #[test]
    fn resolve_all_keeps_declaration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let args: Vec<Argument> = (0..3)
            .map(|i| {
                let log = log.clone();
                Argument::dynamic(move || {
                    log.lock().unwrap().push(i);
                    i as f64
                })
            })
            .collect();

        let out = resolve_all(&args);
        assert_eq!(out, vec![Ok(0.0), Ok(1.0), Ok(2.0)]);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }
}
