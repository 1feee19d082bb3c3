//! Error types emitted by attention implementations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AttentionError {
    /// Rejected construction or call parameters; raised before any tensor work.
    #[error("invalid attention configuration: {0}")]
    InvalidConfiguration(String),
    /// The supplied tensor shapes or dtypes do not align with the contract.
    #[error("attention shape mismatch: {0}")]
    ShapeMismatch(String),
    /// Attention weights came out non-finite.
    #[error("attention numerically unstable: {0}")]
    NumericalInstability(String),
    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
}
