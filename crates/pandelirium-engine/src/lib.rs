//! Renderer-independent core of pandelirium: the custom operator registry, argument resolution,
//! the control-driven animation engine, and the glue the render pipeline consumes.

pub mod animation;
pub mod argument;
pub mod assets;
pub mod config;
pub mod control;
pub mod error;
pub mod operator;
pub mod pipeline;
pub mod retarget;
pub mod shader;

pub use animation::{AnimatedHandle, AnimatedParameter, AnimationSession, FiringMode, SharedSession};
pub use argument::{resolve, Argument};
pub use control::{ChannelFilter, ControlSource, ControlTable};
pub use error::{EngineError, ParameterEvaluationError, RegistryError, SessionError};
pub use operator::{
    OperatorCategory, OperatorDefinition, OperatorRegistry, ParameterSpec, Registration,
};
pub use pipeline::{Chain, FallbackPolicy, OutputBuffer, Program};
