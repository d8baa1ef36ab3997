use std::fmt::Display;

use thiserror::Error;

use crate::tools::ToolError;

/// Errors produced by the data generation pipeline.
///
/// Errors raised while detecting triggers or expanding candidates abort the
/// whole [`DataGenerator::generate`](crate::DataGenerator::generate) call.
/// Errors raised while scoring a single candidate never surface here; the
/// filter turns them into a rejection instead.
#[derive(Error, Debug)]
pub enum ToolformerError {
    /// A special-token literal, template or configuration value is unusable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A candidate outgrew the maximum width, or generation hit the step ceiling.
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// Trigger positions were computed against a different sequence.
    #[error("trigger position {index} is out of range for a sequence of length {len}")]
    InvalidTriggerPosition { index: usize, len: usize },

    /// Trigger positions must be strictly increasing.
    #[error("trigger position {index} does not follow the previous position {previous}")]
    UnorderedTriggerPositions { previous: usize, index: usize },

    #[error("tool invocation failed: {0}")]
    ToolInvocation(#[from] ToolError),

    /// Any failure of the model or tokenizer oracle. Never retried.
    #[error("model oracle error: {0}")]
    ModelOracle(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl ToolformerError {
    pub(crate) fn oracle(err: impl Display) -> Self {
        Self::ModelOracle(err.to_string())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

impl From<candle_core::Error> for ToolformerError {
    fn from(err: candle_core::Error) -> Self {
        Self::oracle(err)
    }
}

pub type Result<T> = std::result::Result<T, ToolformerError>;
