use thiserror::Error;

use super::instance::EffectId;
use super::param::ParamType;

/// Shader source or schema rejected while building a program.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("invalid parameter schema for '{program}': {reason}")]
    InvalidSchema { program: String, reason: String },

    #[error("failed to parse '{program}':\n{message}")]
    Parse { program: String, message: String },

    #[error("'{program}' failed validation: {message}")]
    Validation { program: String, message: String },

    #[error("'{program}' has no {stage} entry point named '{entry}'")]
    MissingEntryPoint {
        program: String,
        stage: &'static str,
        entry: &'static str,
    },

    #[error("{backend} backend rejected '{program}': {message}")]
    Backend {
        backend: &'static str,
        program: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParameterError {
    #[error("'{effect}' has no parameter named '{name}'")]
    Unknown { effect: String, name: String },

    #[error("parameter '{name}' expects {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: ParamType,
        found: ParamType,
    },

    #[error("parameter '{name}' = {value} is outside [{min}, {max}]")]
    OutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("cannot read '{raw}' as {expected} for parameter '{name}'")]
    Unparsable {
        name: String,
        expected: ParamType,
        raw: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainStateError {
    #[error("effect {0} is already attached")]
    AlreadyAttached(EffectId),

    #[error("effect {0} is not attached")]
    NotAttached(EffectId),

    #[error("index {index} is out of range for a chain of {len} effects")]
    IndexOutOfRange { index: usize, len: usize },
}

/// A single pass (or frame transfer) failed on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PassError {
    #[error("frame size mismatch: input {input:?}, output {output:?}")]
    SizeMismatch { input: (u32, u32), output: (u32, u32) },

    #[error("frame size {size:?} exceeds the backend limit of {max} pixels per side")]
    FrameTooLarge { size: (u32, u32), max: u32 },

    #[error("{0}")]
    Backend(String),
}

/// Anything that can go wrong while building an effect from configuration.
#[derive(Debug, Error)]
pub enum EffectError {
    #[error("unknown effect '{0}'")]
    UnknownEffect(String),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Parameter(#[from] ParameterError),
}
