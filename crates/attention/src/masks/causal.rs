//! Builders for causal attention masks.
//!
//! The resulting tensors have dtype [`MASK_DTYPE`](super::MASK_DTYPE) and shape
//! `[batch, q_len, k_len]`. Entries are `1` where attention is permitted and
//! `0` otherwise; the diagonal is always kept.

use candle_core::{Device, Result, Tensor};

/// Construct a causal mask for the supplied sequence dimensions.
///
/// When `k_len > q_len`, queries are assumed to align with the most recent
/// `q_len` keys, allowing access to the extended prefix. Generation uses
/// `batch = 1` and lets the mask broadcast over the batch.
pub fn build_causal_mask(
    device: &Device,
    batch: usize,
    q_len: usize,
    k_len: usize,
) -> Result<Tensor> {
    let mut data = vec![0u8; batch * q_len * k_len];
    if k_len == 0 {
        return Tensor::from_vec(data, (batch, q_len, k_len), device);
    }
    let offset = k_len.saturating_sub(q_len);

    for b in 0..batch {
        for q in 0..q_len {
            let row_start = (b * q_len + q) * k_len;
            let max_k = (q + offset).min(k_len - 1);
            for k in 0..=max_k {
                data[row_start + k] = 1;
            }
        }
    }

    Tensor::from_vec(data, (batch, q_len, k_len), device)
}
