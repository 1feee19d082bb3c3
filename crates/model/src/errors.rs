//! Error taxonomy for model construction, forward passes and generation.

use attention::AttentionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    /// Rejected hyperparameters; raised before any tensor work.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// Tensor shapes or dtypes that do not fit the model.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    /// Non-finite attention weights or sampling probabilities.
    #[error("numerical instability: {0}")]
    NumericalInstability(String),
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ConfigFormat(String),
    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
}

impl ModelError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    pub fn shape(message: impl Into<String>) -> Self {
        Self::ShapeMismatch(message.into())
    }
}

impl From<AttentionError> for ModelError {
    fn from(err: AttentionError) -> Self {
        match err {
            AttentionError::InvalidConfiguration(msg) => Self::InvalidConfiguration(msg),
            AttentionError::ShapeMismatch(msg) => Self::ShapeMismatch(msg),
            AttentionError::NumericalInstability(msg) => Self::NumericalInstability(msg),
            AttentionError::Tensor(err) => Self::Tensor(err),
        }
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        Self::ConfigFormat(err.to_string())
    }
}

impl From<toml::de::Error> for ModelError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigFormat(err.to_string())
    }
}
