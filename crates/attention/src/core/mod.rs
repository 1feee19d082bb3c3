//! Core traits and types shared across attention implementations.

pub mod config;
pub mod errors;

use candle_core::Tensor;

pub use config::Config;
pub use errors::AttentionError;

/// Unified interface for attention kernels.
///
/// * `q [*, q_len, d]`, `k [*, k_len, d]` and `v [*, k_len, d_v]` share their
///   leading dimensions.
/// * The returned tensor is shaped `[*, q_len, d_v]`.
/// * Masks, when present, have dtype `u8` and broadcast to `[*, q_len, k_len]`.
/// * Dropout is controlled via [`Config::dropout_p`] and only applies when
///   `train` is set.
pub trait Attention: Send + Sync {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
        train: bool,
    ) -> Result<Tensor, AttentionError>;
}
