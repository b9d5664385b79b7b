use std::{fmt, path::PathBuf};

#[derive(Debug)]
pub enum EngineError {
    /// The `assets/` folder could not be found or was invalid.
    AssetsNotFound { start_dir: PathBuf },
    /// I/O error reading a file.
    Io { path: PathBuf, source: std::io::Error },
    /// JSON parse error for a file.
    Json { path: PathBuf, source: serde_json::Error },

    /// Config is syntactically valid but semantically invalid.
    InvalidConfig { path: PathBuf, msg: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::AssetsNotFound { start_dir } => {
                write!(f, "Could not locate assets/ starting from {}", start_dir.display())
            }
            EngineError::Io { path, source } => {
                write!(f, "I/O error for {}: {}", path.display(), source)
            }
            EngineError::Json { path, source } => {
                write!(f, "JSON parse error for {}: {}", path.display(), source)
            }
            EngineError::InvalidConfig { path, msg } => {
                write!(f, "Invalid config {}: {}", path.display(), msg)
            }
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io { source, .. } => Some(source),
            EngineError::Json { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// A malformed operator definition, rejected before it reaches the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// Name is empty or not a GLSL-compatible identifier.
    InvalidName { name: String },
    /// Name collides with an operator the render pipeline already provides.
    BuiltinCollision { name: String },
    /// Two parameters share a name.
    DuplicateParameter { operator: String, param: String },
    /// A parameter default is NaN or infinite.
    NonFiniteDefault { operator: String, param: String },
    /// The body references names that are not declared, or declares parameters it never uses.
    FreeVariableMismatch {
        operator: String,
        undeclared: Vec<String>,
        unused: Vec<String>,
    },
    /// `name(...)` was called with more arguments than the operator declares.
    Arity { operator: String, expected: usize, got: usize },
    /// `name(...)` was called for a name nobody registered.
    UnknownOperator { name: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::InvalidName { name } => {
                write!(f, "invalid operator name {name:?}")
            }
            RegistryError::BuiltinCollision { name } => {
                write!(f, "operator name {name:?} is reserved by a built-in")
            }
            RegistryError::DuplicateParameter { operator, param } => {
                write!(f, "operator {operator}: duplicate parameter {param:?}")
            }
            RegistryError::NonFiniteDefault { operator, param } => {
                write!(f, "operator {operator}: parameter {param:?} has a non-finite default")
            }
            RegistryError::FreeVariableMismatch { operator, undeclared, unused } => {
                write!(
                    f,
                    "operator {operator}: body/parameter mismatch (undeclared={undeclared:?} unused={unused:?})"
                )
            }
            RegistryError::Arity { operator, expected, got } => {
                write!(f, "operator {operator}: expected at most {expected} arguments, got {got}")
            }
            RegistryError::UnknownOperator { name } => {
                write!(f, "unknown operator {name:?}")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// A dynamic argument failed to produce a number for this frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterEvaluationError {
    /// The callable reported a failure.
    Failed(String),
    /// The callable panicked.
    Panicked(String),
    /// The callable returned NaN or an infinity.
    NonFinite(f64),
}

impl fmt::Display for ParameterEvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterEvaluationError::Failed(msg) => write!(f, "dynamic argument failed: {msg}"),
            ParameterEvaluationError::Panicked(msg) => {
                write!(f, "dynamic argument panicked: {msg}")
            }
            ParameterEvaluationError::NonFinite(v) => write!(f, "dynamic argument returned {v}"),
        }
    }
}

impl std::error::Error for ParameterEvaluationError {}

/// A non-repeating choice was configured with fewer than two distinct options.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidOptionSet {
    pub options: Vec<f32>,
}

impl fmt::Display for InvalidOptionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "non-repeating choice needs at least two distinct options, got {:?}",
            self.options
        )
    }
}

impl std::error::Error for InvalidOptionSet {}

/// Session setup defect (parameters, triggers, retarget actions).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Smoothing rate outside (0, 1].
    InvalidRate { param: String, rate: f32 },
    /// Two parameters share a name.
    DuplicateParam { param: String },
    /// A retarget action names a parameter the session does not own.
    UnknownTarget { param: String },
    /// Integer range with `min > max`.
    EmptyRange { param: String, min: i32, max: i32 },
    /// Option set rejected at setup.
    OptionSet { param: String, source: InvalidOptionSet },
    /// Threshold outside [0, 1].
    InvalidThreshold { threshold: f32 },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::InvalidRate { param, rate } => {
                write!(f, "param {param}: rate {rate} must be in (0, 1]")
            }
            SessionError::DuplicateParam { param } => write!(f, "duplicate param {param}"),
            SessionError::UnknownTarget { param } => {
                write!(f, "trigger targets unknown param {param}")
            }
            SessionError::EmptyRange { param, min, max } => {
                write!(f, "param {param}: empty integer range {min}..={max}")
            }
            SessionError::OptionSet { param, source } => write!(f, "param {param}: {source}"),
            SessionError::InvalidThreshold { threshold } => {
                write!(f, "threshold {threshold} must be in [0, 1]")
            }
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::OptionSet { source, .. } => Some(source),
            _ => None,
        }
    }
}
