//! Masked scaled dot-product attention and the multi-head wrapper built on it.
//!
//! The kernel accepts `q [*, q_len, d]`, `k [*, k_len, d]` and
//! `v [*, k_len, d_v]` with identical leading dimensions and returns
//! `[*, q_len, d_v]`. Masks are `u8` tensors (`1` = may attend) that broadcast
//! against the `[*, q_len, k_len]` score matrix; suppressed positions are
//! filled with [`masks::MASK_FILL`] before the temperature division and
//! softmax.
//!
//! Dropout on the attention weights is a train-only concern controlled via
//! [`Config::dropout_p`] and the `train` flag. Callers should leave it off for
//! inference or when deterministic outputs are required.

pub mod core;
pub mod masks;
pub mod multihead;
pub mod reference;

pub use crate::core::{Attention, AttentionError, Config};
pub use multihead::{MultiHeadAttention, MultiHeadAttentionConfig, ProjectionKind};
pub use reference::ScaledDotProductAttention;
