//! Control-driven animation engine.
//!
//! One [`AnimationSession`] per performance owns every animated parameter. A fixed-period
//! clock calls [`AnimationSession::tick`], which in order:
//!
//! 1. samples each trigger's controller and decides whether it fires,
//! 2. applies the retarget action of every firing trigger,
//! 3. moves every parameter toward its target: `current += (target - current) * rate`.
//!
//! The render side reads live values through [`AnimatedHandle`]s. The session sits behind a
//! mutex and a whole tick runs under one lock, so a multi-channel retarget (RGB) is never
//! observed half-applied.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::argument::Argument;
use crate::control::{sample_or_zero, ControlSource};
use crate::error::SessionError;
use crate::retarget::RetargetAction;

/// Sample level above which a trigger fires.
pub const DEFAULT_THRESHOLD: f32 = 0.7;

/// Animation clock period.
pub const DEFAULT_TICK_MS: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimatedParameter {
    current: f32,
    target: f32,
    rate: f32,
}

impl AnimatedParameter {
    /// `rate` is the fraction of the remaining distance covered per tick, in (0, 1].
    pub fn new(initial: f32, rate: f32) -> Option<Self> {
        if !(rate > 0.0 && rate <= 1.0) || !initial.is_finite() {
            return None;
        }
        Some(Self {
            current: initial,
            target: initial,
            rate,
        })
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn is_idle(&self) -> bool {
        self.current == self.target
    }

    /// Re-aim immediately; there is no queue of pending transitions.
    pub fn set_target(&mut self, target: f32) {
        if target.is_finite() {
            self.target = target;
        }
    }

    pub fn step(&mut self) {
        self.current += (self.target - self.current) * self.rate;
    }
}

/// When a held control re-fires its trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FiringMode {
    /// Fire on every tick the sample is above threshold.
    #[default]
    Level,
    /// Fire only on the tick the sample crosses from at-or-below to above threshold.
    Edge,
}

#[derive(Debug, Clone)]
pub struct Trigger {
    pub cc: u8,
    pub action: RetargetAction,
    above: bool,
}

/// One trigger that fired during a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Fired {
    pub cc: u8,
    pub sample: f32,
    pub kind: &'static str,
    pub targets: Vec<(String, f32)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub fired: Vec<Fired>,
}

#[derive(Debug)]
pub struct AnimationSession {
    params: BTreeMap<String, AnimatedParameter>,
    triggers: Vec<Trigger>,
    threshold: f32,
    firing: FiringMode,
    rng: StdRng,
    ticks: u64,
}

impl AnimationSession {
    pub fn new(threshold: f32, firing: FiringMode) -> Result<Self, SessionError> {
        Self::with_rng(threshold, firing, StdRng::from_entropy())
    }

    /// Deterministic construction for tests and replays.
    pub fn with_rng(threshold: f32, firing: FiringMode, rng: StdRng) -> Result<Self, SessionError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(SessionError::InvalidThreshold { threshold });
        }
        Ok(Self {
            params: BTreeMap::new(),
            triggers: Vec::new(),
            threshold,
            firing,
            rng,
            ticks: 0,
        })
    }

    pub fn add_param(&mut self, name: &str, initial: f32, rate: f32) -> Result<(), SessionError> {
        if self.params.contains_key(name) {
            return Err(SessionError::DuplicateParam { param: name.to_string() });
        }
        let p = AnimatedParameter::new(initial, rate).ok_or_else(|| SessionError::InvalidRate {
            param: name.to_string(),
            rate,
        })?;
        self.params.insert(name.to_string(), p);
        Ok(())
    }

    /// Register a trigger. Every parameter the action writes must already exist.
    pub fn add_trigger(&mut self, cc: u8, action: RetargetAction) -> Result<(), SessionError> {
        for t in action.targets() {
            if !self.params.contains_key(t) {
                return Err(SessionError::UnknownTarget { param: t.to_string() });
            }
        }
        if let RetargetAction::IntRange { target, min, max } = &action {
            if min > max {
                return Err(SessionError::EmptyRange {
                    param: target.clone(),
                    min: *min,
                    max: *max,
                });
            }
        }
        self.triggers.push(Trigger {
            cc,
            action,
            above: false,
        });
        Ok(())
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn get(&self, name: &str) -> Option<&AnimatedParameter> {
        self.params.get(name)
    }

    pub fn current(&self, name: &str) -> Option<f32> {
        self.params.get(name).map(|p| p.current)
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &AnimatedParameter)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    pub fn set_target(&mut self, name: &str, target: f32) -> bool {
        match self.params.get_mut(name) {
            Some(p) => {
                p.set_target(target);
                true
            }
            None => false,
        }
    }

    /// Keep the live state of parameters that survive a session rebuild, and whether each
    /// controller was already above threshold so a held control does not re-fire in edge mode.
    pub fn carry_over(&mut self, old: &AnimationSession) {
        for (name, p) in self.params.iter_mut() {
            if let Some(prev) = old.params.get(name) {
                p.current = prev.current;
                p.target = prev.target;
            }
        }
        for trig in self.triggers.iter_mut() {
            trig.above = old.triggers.iter().any(|t| t.cc == trig.cc && t.above);
        }
    }

    /// Run one trigger's action regardless of its controller (manual fire).
    pub fn fire(&mut self, cc: u8) -> Vec<Fired> {
        let mut fired = Vec::new();
        for i in 0..self.triggers.len() {
            if self.triggers[i].cc == cc {
                fired.push(self.apply(i, 1.0));
            }
        }
        fired
    }

    pub fn tick(&mut self, source: &dyn ControlSource) -> TickReport {
        self.ticks += 1;

        let mut fire = Vec::new();
        for (i, trig) in self.triggers.iter_mut().enumerate() {
            let sample = sample_or_zero(source, trig.cc);
            let above = sample > self.threshold;
            let should_fire = match self.firing {
                FiringMode::Level => above,
                FiringMode::Edge => above && !trig.above,
            };
            trig.above = above;
            if should_fire {
                fire.push((i, sample));
            }
        }

        let fired = fire
            .into_iter()
            .map(|(i, sample)| self.apply(i, sample))
            .collect();

        for p in self.params.values_mut() {
            p.step();
        }

        TickReport {
            tick: self.ticks,
            fired,
        }
    }

    fn apply(&mut self, trigger: usize, sample: f32) -> Fired {
        let trig = &self.triggers[trigger];
        let params = &self.params;
        let targets = trig.action.draw(
            |name| params.get(name).map(|p| p.target).unwrap_or(0.0),
            &mut self.rng,
        );
        let fired = Fired {
            cc: trig.cc,
            sample,
            kind: trig.action.kind(),
            targets,
        };
        for (name, v) in &fired.targets {
            if let Some(p) = self.params.get_mut(name) {
                p.set_target(*v);
            }
        }
        fired
    }
}

/// Session shared between the animation clock and the render side.
pub type SharedSession = Arc<Mutex<AnimationSession>>;

pub fn shared(session: AnimationSession) -> SharedSession {
    Arc::new(Mutex::new(session))
}

/// Live accessor for one animated parameter's current value.
#[derive(Debug, Clone)]
pub struct AnimatedHandle {
    session: SharedSession,
    name: String,
}

impl AnimatedHandle {
    pub fn new(session: &SharedSession, name: impl Into<String>) -> Self {
        Self {
            session: session.clone(),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Result<f32, String> {
        let s = self
            .session
            .lock()
            .map_err(|_| "animation session lock poisoned".to_string())?;
        s.current(&self.name)
            .ok_or_else(|| format!("unknown animated param {}", self.name))
    }

    /// Derived argument, e.g. `0.5 + 0.5 * v`.
    pub fn map<F>(self, f: F) -> Argument
    where
        F: Fn(f32) -> f32 + Send + Sync + 'static,
    {
        Argument::try_dynamic(move || self.value().map(|v| f(v) as f64))
    }
}

impl From<AnimatedHandle> for Argument {
    fn from(h: AnimatedHandle) -> Self {
        Argument::try_dynamic(move || h.value().map(|v| v as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argument::resolve;
    use crate::retarget::NonRepeatingChoice;

    /// Replays a fixed sample sequence for one controller, one value per tick.
    struct Scripted {
        cc: u8,
        samples: Vec<f32>,
        pos: Mutex<usize>,
    }

    impl Scripted {
        fn new(cc: u8, samples: Vec<f32>) -> Self {
            Self { cc, samples, pos: Mutex::new(0) }
        }
    }

    impl ControlSource for Scripted {
        fn sample(&self, cc: u8) -> Option<f32> {
            if cc != self.cc {
                return None;
            }
            let mut pos = self.pos.lock().unwrap();
            let v = self.samples.get(*pos).copied();
            *pos += 1;
            v
        }
    }

    struct Silent;

    impl ControlSource for Silent {
        fn sample(&self, _cc: u8) -> Option<f32> {
            None
        }
    }

    fn session(firing: FiringMode) -> AnimationSession {
        AnimationSession::with_rng(DEFAULT_THRESHOLD, firing, StdRng::seed_from_u64(42)).unwrap()
    }

    fn scale_session(firing: FiringMode) -> AnimationSession {
        let mut s = session(firing);
        s.add_param("scale", 1.0, 0.1).unwrap();
        let choice = NonRepeatingChoice::new(vec![0.05, 0.2, 1.0, 5.0]).unwrap();
        s.add_trigger(6, RetargetAction::Choice { target: "scale".into(), choice })
            .unwrap();
        s
    }

    #[test]
    fn rate_must_be_in_unit_interval() {
        assert!(AnimatedParameter::new(0.0, 0.0).is_none());
        assert!(AnimatedParameter::new(0.0, 1.5).is_none());
        assert!(AnimatedParameter::new(0.0, f32::NAN).is_none());
        assert!(AnimatedParameter::new(0.0, 1.0).is_some());
    }

    #[test]
    fn convergence_is_geometric() {
        let (c0, t, r) = (2.0f32, -3.0f32, 0.2f32);
        let mut p = AnimatedParameter::new(c0, r).unwrap();
        p.set_target(t);
        for n in 1..=40 {
            p.step();
            let expected = t - (t - c0) * (1.0 - r).powi(n);
            assert!((p.current() - expected).abs() < 1e-5, "n={n}");
        }
    }

    #[test]
    fn never_overshoots() {
        let mut p = AnimatedParameter::new(0.0, 1.0).unwrap();
        p.set_target(1.0);
        p.step();
        assert_eq!(p.current(), 1.0);
        assert!(p.is_idle());

        let mut q = AnimatedParameter::new(10.0, 0.3).unwrap();
        q.set_target(0.0);
        let mut last = q.current();
        for _ in 0..200 {
            q.step();
            assert!(q.current() <= last && q.current() >= 0.0);
            last = q.current();
        }
    }

    #[test]
    fn level_trigger_fires_while_held() {
        let mut s = scale_session(FiringMode::Level);
        let src = Scripted::new(6, vec![0.5, 0.8, 0.8, 0.3]);
        let fired: Vec<bool> = (0..4).map(|_| !s.tick(&src).fired.is_empty()).collect();
        assert_eq!(fired, vec![false, true, true, false]);
    }

    #[test]
    fn edge_trigger_fires_on_crossing_only() {
        let mut s = scale_session(FiringMode::Edge);
        let src = Scripted::new(6, vec![0.5, 0.8, 0.8, 0.3, 0.9]);
        let fired: Vec<bool> = (0..5).map(|_| !s.tick(&src).fired.is_empty()).collect();
        assert_eq!(fired, vec![false, true, false, false, true]);
    }

    #[test]
    fn threshold_is_exclusive() {
        let mut s = scale_session(FiringMode::Level);
        let src = Scripted::new(6, vec![DEFAULT_THRESHOLD]);
        assert!(s.tick(&src).fired.is_empty());
    }

    #[test]
    fn missing_control_keeps_targets_static() {
        let mut s = scale_session(FiringMode::Level);
        for _ in 0..100 {
            assert!(s.tick(&Silent).fired.is_empty());
        }
        assert_eq!(s.get("scale").unwrap().target(), 1.0);
        assert_eq!(s.current("scale"), Some(1.0));
    }

    #[test]
    fn retarget_starts_converging_on_the_same_tick() {
        let mut s = scale_session(FiringMode::Level);
        let src = Scripted::new(6, vec![1.0]);
        let report = s.tick(&src);
        let new_target = report.fired[0].targets[0].1;
        assert_ne!(new_target, 1.0);

        let p = s.get("scale").unwrap();
        assert_eq!(p.target(), new_target);
        let expected = 1.0 + (new_target - 1.0) * 0.1;
        assert!((p.current() - expected).abs() < 1e-6);
    }

    #[test]
    fn color_retarget_is_atomic() {
        let mut s = session(FiringMode::Level);
        for ch in ["r", "g", "b"] {
            s.add_param(ch, 1.0, 0.05).unwrap();
        }
        s.add_trigger(
            4,
            RetargetAction::VibrantColor {
                targets: ["r".into(), "g".into(), "b".into()],
                saturation: 1.0,
                lightness: 0.5,
            },
        )
        .unwrap();

        let report = s.tick(&Scripted::new(4, vec![0.9]));
        let fired = &report.fired[0];
        assert_eq!(fired.kind, "vibrant_color");
        assert_eq!(fired.targets.len(), 3);
        for (name, v) in &fired.targets {
            assert_eq!(s.get(name).unwrap().target(), *v);
            assert!((0.0..=1.0).contains(v));
        }
    }

    #[test]
    fn setup_rejects_bad_triggers() {
        let mut s = session(FiringMode::Level);
        s.add_param("k", 3.0, 0.1).unwrap();
        assert_eq!(
            s.add_trigger(5, RetargetAction::IntRange { target: "nope".into(), min: 3, max: 11 }),
            Err(SessionError::UnknownTarget { param: "nope".into() })
        );
        assert!(matches!(
            s.add_trigger(5, RetargetAction::IntRange { target: "k".into(), min: 4, max: 3 }),
            Err(SessionError::EmptyRange { .. })
        ));
        assert!(matches!(s.add_param("k", 0.0, 0.5), Err(SessionError::DuplicateParam { .. })));
        assert!(matches!(s.add_param("z", 0.0, 0.0), Err(SessionError::InvalidRate { .. })));
        assert!(matches!(
            AnimationSession::new(1.5, FiringMode::Level),
            Err(SessionError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn manual_fire_runs_matching_triggers() {
        let mut s = scale_session(FiringMode::Level);
        let fired = s.fire(6);
        assert_eq!(fired.len(), 1);
        assert!(s.fire(99).is_empty());
    }

    #[test]
    fn carry_over_keeps_live_values() {
        let mut old = scale_session(FiringMode::Level);
        old.set_target("scale", 5.0);
        old.tick(&Silent);
        let live = old.current("scale").unwrap();

        let mut new = scale_session(FiringMode::Edge);
        new.add_param("extra", 0.0, 0.5).unwrap();
        new.carry_over(&old);
        assert_eq!(new.current("scale"), Some(live));
        assert_eq!(new.get("scale").unwrap().target(), 5.0);
        assert_eq!(new.current("extra"), Some(0.0));
    }

    #[test]
    fn carry_over_keeps_held_control_from_refiring_in_edge_mode() {
        let mut old = scale_session(FiringMode::Edge);
        assert_eq!(old.tick(&Scripted::new(6, vec![0.9])).fired.len(), 1);

        let mut new = scale_session(FiringMode::Edge);
        new.carry_over(&old);
        let held = Scripted::new(6, vec![0.9, 0.9, 0.2, 0.9]);
        let fired: Vec<bool> = (0..4).map(|_| !new.tick(&held).fired.is_empty()).collect();
        assert_eq!(fired, vec![false, false, false, true]);
    }

    #[test]
    fn handles_read_live_values() {
        let shared = shared(scale_session(FiringMode::Level));
        let arg: Argument = AnimatedHandle::new(&shared, "scale").into();
        let doubled = AnimatedHandle::new(&shared, "scale").map(|v| v * 2.0);
        assert_eq!(resolve(&arg), Ok(1.0));
        assert_eq!(resolve(&doubled), Ok(2.0));

        {
            let mut s = shared.lock().unwrap();
            s.set_target("scale", 0.0);
            s.tick(&Silent);
        }
        assert!((resolve(&arg).unwrap() - 0.9).abs() < 1e-6);

        let missing: Argument = AnimatedHandle::new(&shared, "gone").into();
        assert!(resolve(&missing).is_err());
    }

    #[test]
    fn tick_counter_advances() {
        let mut s = session(FiringMode::Level);
        let last = (0..3).map(|_| s.tick(&Silent).tick).last();
        assert_eq!(last, Some(3));
        assert_eq!(s.ticks(), 3);
    }
}
