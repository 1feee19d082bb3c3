//! Reference scaled dot-product attention.
//!
//! `softmax(mask_fill(q·kᵗ / √d) / temperature) · v`, evaluated in `f32` with
//! the leading dimensions flattened into one batch axis.

use candle_core::{DType, Tensor, D};
use candle_nn::ops::{dropout, softmax_last_dim};

use crate::core::{Attention, AttentionError, Config};
use crate::masks::{MASK_DTYPE, MASK_FILL};

/// Stateless masked attention kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScaledDotProductAttention;

/// Validated operand layout for one call.
#[derive(Debug)]
struct Operands {
    lead: Vec<usize>,
    merged: usize,
    q_len: usize,
    k_len: usize,
    head_dim: usize,
}

impl Operands {
    fn scores_shape(&self) -> Vec<usize> {
        let mut dims = self.lead.clone();
        dims.extend([self.q_len, self.k_len]);
        dims
    }
}

impl ScaledDotProductAttention {
    pub fn new() -> Self {
        Self
    }

    /// Attention probabilities `[*, q_len, k_len]` before dropout.
    pub fn weights(
        &self,
        q: &Tensor,
        k: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
    ) -> Result<Tensor, AttentionError> {
        config.validate()?;
        let ops = check_operands(q, k, None)?;
        let probs = self.probabilities(q, k, mask, config, &ops)?;
        Ok(probs.reshape(ops.scores_shape())?)
    }

    /// Returns `[merged, q_len, k_len]` probabilities.
    fn probabilities(
        &self,
        q: &Tensor,
        k: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
        ops: &Operands,
    ) -> Result<Tensor, AttentionError> {
        let q_view = q.to_dtype(DType::F32)?.reshape((ops.merged, ops.q_len, ops.head_dim))?;
        let k_view = k.to_dtype(DType::F32)?.reshape((ops.merged, ops.k_len, ops.head_dim))?;
        let k_t = k_view.transpose(1, 2)?.contiguous()?;
        let scale = 1.0 / (ops.head_dim as f64).sqrt();
        let mut scores = q_view.matmul(&k_t)?.affine(scale, 0.0)?;

        if let Some(mask) = mask {
            scores = apply_mask(&scores, mask, ops)?;
        }

        // Shift each row to a zero maximum before dividing so tiny
        // temperatures saturate to -inf instead of producing inf - inf.
        let row_max = scores.max_keepdim(D::Minus1)?;
        let inverse = (1.0 / config.temperature).min(f64::from(f32::MAX));
        let scores = scores.broadcast_sub(&row_max)?.affine(inverse, 0.0)?;
        let probs = softmax_last_dim(&scores.contiguous()?)?;

        let total = probs.sum_all()?.to_vec0::<f32>()?;
        if !total.is_finite() {
            return Err(AttentionError::NumericalInstability(format!(
                "attention weights are not finite (sum = {total})"
            )));
        }
        Ok(probs)
    }
}

impl Attention for ScaledDotProductAttention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
        train: bool,
    ) -> Result<Tensor, AttentionError> {
        config.validate()?;
        let ops = check_operands(q, k, Some(v))?;
        let d_v = v.dims()[v.rank() - 1];

        let mut probs = self.probabilities(q, k, mask, config, &ops)?;
        if train {
            if let Some(p) = config.dropout_p.filter(|p| *p > 0.0) {
                probs = dropout(&probs, p)?;
            }
        }

        let v_view = v.to_dtype(DType::F32)?.reshape((ops.merged, ops.k_len, d_v))?;
        let output = probs.matmul(&v_view)?;

        let mut out_dims = ops.lead.clone();
        out_dims.extend([ops.q_len, d_v]);
        Ok(output.reshape(out_dims)?)
    }
}

fn check_operands(q: &Tensor, k: &Tensor, v: Option<&Tensor>) -> Result<Operands, AttentionError> {
    let rank = q.rank();
    if rank < 2 {
        return Err(AttentionError::ShapeMismatch(format!(
            "q must have shape [*, q_len, d], got {:?}",
            q.dims()
        )));
    }
    if k.rank() != rank {
        return Err(AttentionError::ShapeMismatch(format!(
            "q and k ranks differ: {:?} vs {:?}",
            q.dims(),
            k.dims()
        )));
    }
    let lead = q.dims()[..rank - 2].to_vec();
    if k.dims()[..rank - 2] != lead[..] {
        return Err(AttentionError::ShapeMismatch(format!(
            "q and k leading dimensions differ: {:?} vs {:?}",
            q.dims(),
            k.dims()
        )));
    }
    let (q_len, head_dim) = (q.dims()[rank - 2], q.dims()[rank - 1]);
    let (k_len, k_dim) = (k.dims()[rank - 2], k.dims()[rank - 1]);
    if k_dim != head_dim {
        return Err(AttentionError::ShapeMismatch(format!(
            "q feature dim {head_dim} differs from k feature dim {k_dim}"
        )));
    }
    if head_dim == 0 || q_len == 0 || k_len == 0 {
        return Err(AttentionError::ShapeMismatch(format!(
            "attention operands must be non-empty, got q {:?} and k {:?}",
            q.dims(),
            k.dims()
        )));
    }
    if let Some(v) = v {
        if v.rank() != rank || v.dims()[..rank - 2] != lead[..] || v.dims()[rank - 2] != k_len {
            return Err(AttentionError::ShapeMismatch(format!(
                "v must have shape [{lead:?}.., {k_len}, d_v], got {:?}",
                v.dims()
            )));
        }
    }

    let merged = lead.iter().product();
    Ok(Operands {
        lead,
        merged,
        q_len,
        k_len,
        head_dim,
    })
}

/// Replaces suppressed scores with [`MASK_FILL`] and warns about rows that
/// ended up with no visible key.
fn apply_mask(scores: &Tensor, mask: &Tensor, ops: &Operands) -> Result<Tensor, AttentionError> {
    if mask.dtype() != MASK_DTYPE {
        return Err(AttentionError::ShapeMismatch(format!(
            "mask expects dtype {MASK_DTYPE:?}, got {:?}",
            mask.dtype()
        )));
    }
    let target = ops.scores_shape();
    let expanded = mask.broadcast_as(target.clone()).map_err(|_| {
        AttentionError::ShapeMismatch(format!(
            "mask shape {:?} does not broadcast to scores {:?}",
            mask.dims(),
            target
        ))
    })?;
    let expanded = expanded
        .contiguous()?
        .reshape((ops.merged, ops.q_len, ops.k_len))?;

    let visible = expanded.to_dtype(DType::F32)?.sum(D::Minus1)?;
    let blind_rows = visible
        .flatten_all()?
        .to_vec1::<f32>()?
        .iter()
        .filter(|&&count| count == 0.0)
        .count();
    if blind_rows > 0 {
        log::warn!(
            "attention mask hides every key for {blind_rows} query row(s); weights fall back to uniform"
        );
    }

    let fill = Tensor::full(MASK_FILL, scores.shape(), scores.device())?;
    Ok(expanded.where_cond(scores, &fill)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masks::build_causal_mask;
    use candle_core::{Device, Result as CandleResult};

    fn build_inputs(device: &Device) -> CandleResult<(Tensor, Tensor, Tensor)> {
        let data: Vec<f32> = (0..64).map(|i| ((i * 7) % 13) as f32 * 0.1 - 0.6).collect();
        let q = Tensor::from_vec(data.clone(), (1, 2, 4, 8), device)?;
        let k = q.affine(0.5, 0.1)?;
        let v = Tensor::from_vec(data, (1, 2, 4, 8), device)?;
        Ok((q, k, v))
    }

    /// Row-by-row softmax attention on host vectors.
    fn naive_attention(
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&[Vec<u8>]>,
        temperature: f32,
    ) -> CandleResult<Vec<f32>> {
        let (batch, heads, q_len, head_dim) = q.dims4()?;
        let k_len = k.dims4()?.2;
        let q_vec = q.flatten_all()?.to_vec1::<f32>()?;
        let k_vec = k.flatten_all()?.to_vec1::<f32>()?;
        let v_vec = v.flatten_all()?.to_vec1::<f32>()?;
        let scale = 1.0 / (head_dim as f32).sqrt();
        let mut output = vec![0f32; batch * heads * q_len * head_dim];

        for bh in 0..batch * heads {
            for qi in 0..q_len {
                let mut row = vec![0f32; k_len];
                for ki in 0..k_len {
                    let mut dot = 0f32;
                    for d in 0..head_dim {
                        dot += q_vec[(bh * q_len + qi) * head_dim + d]
                            * k_vec[(bh * k_len + ki) * head_dim + d];
                    }
                    let mut score = dot * scale;
                    if let Some(mask) = mask {
                        if mask[qi][ki] == 0 {
                            score = MASK_FILL;
                        }
                    }
                    row[ki] = score / temperature;
                }
                let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                let exps: Vec<f32> = row.iter().map(|s| (s - max).exp()).collect();
                let denom: f32 = exps.iter().sum();
                for d in 0..head_dim {
                    let mut acc = 0f32;
                    for ki in 0..k_len {
                        acc += exps[ki] / denom * v_vec[(bh * k_len + ki) * head_dim + d];
                    }
                    output[(bh * q_len + qi) * head_dim + d] = acc;
                }
            }
        }
        Ok(output)
    }

    fn assert_close(a: &[f32], b: &[f32], tol: f32) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() <= tol, "{x} vs {y}");
        }
    }

    #[test]
    fn matches_naive_without_mask() -> std::result::Result<(), AttentionError> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let out = ScaledDotProductAttention::new().attend(&q, &k, &v, None, &Config::default(), false)?;
        assert_eq!(out.dims(), &[1, 2, 4, 8]);
        let expected = naive_attention(&q, &k, &v, None, 1.0)?;
        assert_close(&out.flatten_all()?.to_vec1::<f32>()?, &expected, 1e-5);
        Ok(())
    }

    #[test]
    fn matches_naive_with_causal_mask_and_temperature() -> std::result::Result<(), AttentionError> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let mask = build_causal_mask(&device, 1, 4, 4)?;
        let rows = mask.squeeze(0)?.to_vec2::<u8>()?;
        let config = Config {
            temperature: 2.0,
            ..Config::default()
        };
        let out = ScaledDotProductAttention::new().attend(&q, &k, &v, Some(&mask), &config, false)?;
        let expected = naive_attention(&q, &k, &v, Some(rows.as_slice()), 2.0)?;
        assert_close(&out.flatten_all()?.to_vec1::<f32>()?, &expected, 1e-5);
        Ok(())
    }

    #[test]
    fn weights_rows_sum_to_one_and_respect_mask() -> std::result::Result<(), AttentionError> {
        let device = Device::Cpu;
        let (q, k, _) = build_inputs(&device)?;
        let mask = build_causal_mask(&device, 1, 4, 4)?;
        let weights = ScaledDotProductAttention::new().weights(&q, &k, Some(&mask), &Config::default())?;
        assert_eq!(weights.dims(), &[1, 2, 4, 4]);

        let sums = weights.sum(D::Minus1)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-5));

        let head0 = weights.narrow(1, 0, 1)?.reshape((4, 4))?.to_vec2::<f32>()?;
        for (qi, row) in head0.iter().enumerate() {
            for (ki, w) in row.iter().enumerate() {
                if ki > qi {
                    assert!(*w < 1e-6, "future key {ki} visible to query {qi}");
                }
            }
        }
        Ok(())
    }

    #[test]
    fn all_masked_row_is_uniform() -> std::result::Result<(), AttentionError> {
        let device = Device::Cpu;
        let q = Tensor::new(&[[1f32, 0.], [0., 1.]], &device)?;
        let k = Tensor::new(&[[3f32, 0.], [0., -2.], [1., 1.]], &device)?;
        let mask = Tensor::new(&[[0u8, 0, 0], [1, 1, 0]], &device)?;
        let weights = ScaledDotProductAttention::new().weights(&q, &k, Some(&mask), &Config::default())?;
        let rows = weights.to_vec2::<f32>()?;
        assert!(rows[0].iter().all(|w| (w - 1.0 / 3.0).abs() < 1e-6));
        assert!(rows[1][2] < 1e-6);
        Ok(())
    }

    #[test]
    fn vanishing_temperature_collapses_to_arg_max() -> std::result::Result<(), AttentionError> {
        let device = Device::Cpu;
        let q = Tensor::new(&[[1f32, 0.], [0., 1.]], &device)?;
        let k = Tensor::new(&[[3f32, 0.], [0., -2.], [1., 1.]], &device)?;
        let mask = Tensor::new(&[[1u8, 1, 1], [0, 0, 0]], &device)?;
        let config = Config {
            temperature: 1e-39,
            ..Config::default()
        };
        let weights = ScaledDotProductAttention::new().weights(&q, &k, Some(&mask), &config)?;
        let rows = weights.to_vec2::<f32>()?;
        assert_eq!(rows[0], vec![1.0, 0.0, 0.0]);
        assert!(rows[1].iter().all(|w| (w - 1.0 / 3.0).abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn rejects_invalid_configuration_and_masks() -> CandleResult<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let kernel = ScaledDotProductAttention::new();

        for temperature in [0.0, -1.0, f64::NAN] {
            let config = Config {
                temperature,
                ..Config::default()
            };
            let err = kernel.attend(&q, &k, &v, None, &config, false).unwrap_err();
            assert!(matches!(err, AttentionError::InvalidConfiguration(_)));
        }

        let float_mask = Tensor::ones((4, 4), DType::F32, &device)?;
        let err = kernel.attend(&q, &k, &v, Some(&float_mask), &Config::default(), false).unwrap_err();
        assert!(matches!(err, AttentionError::ShapeMismatch(_)));

        let wrong = Tensor::ones((3, 4), DType::U8, &device)?;
        let err = kernel.attend(&q, &k, &v, Some(&wrong), &Config::default(), false).unwrap_err();
        assert!(matches!(err, AttentionError::ShapeMismatch(_)));

        let short_v = v.narrow(2, 0, 3)?;
        let err = kernel.attend(&q, &k, &short_v, None, &Config::default(), false).unwrap_err();
        assert!(matches!(err, AttentionError::ShapeMismatch(_)));
        Ok(())
    }

    #[test]
    fn non_finite_inputs_are_reported() -> CandleResult<()> {
        let device = Device::Cpu;
        let q = Tensor::new(&[[f32::NAN, 1.0]], &device)?;
        let k = Tensor::new(&[[1f32, 1.0], [0.5, 0.5]], &device)?;
        let err = ScaledDotProductAttention::new()
            .weights(&q, &k, None, &Config::default())
            .unwrap_err();
        assert!(matches!(err, AttentionError::NumericalInstability(_)));
        Ok(())
    }

    #[test]
    fn dropout_only_applies_in_training() -> std::result::Result<(), AttentionError> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let kernel = ScaledDotProductAttention::new();
        let config = Config {
            dropout_p: Some(0.5),
            ..Config::default()
        };
        let a = kernel.attend(&q, &k, &v, None, &config, false)?;
        let b = kernel.attend(&q, &k, &v, None, &Config::default(), false)?;
        let diff = a.sub(&b)?.abs()?.flatten_all()?.max(0)?.to_vec0::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }
}
