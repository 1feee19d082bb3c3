//! Mask utilities shared by attention implementations.
//!
//! Masks are `u8` tensors: `1` keeps a query/key pair, `0` suppresses it.
//! Suppressed scores are replaced with [`MASK_FILL`], a large finite negative
//! value, so a row with every key suppressed degrades to a uniform
//! distribution instead of NaN.

pub mod causal;

use candle_core::DType;

/// Dtype shared by all masks.
pub const MASK_DTYPE: DType = DType::U8;

/// Score written into suppressed positions.
pub const MASK_FILL: f32 = -1e9;

pub use causal::build_causal_mask;
