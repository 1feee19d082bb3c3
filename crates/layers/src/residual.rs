//! Pre-norm residual wrapper.
//!
//! A residual branch computes `input + dropout(sublayer(norm(input)))` on
//! tensors shaped `(batch, seq, hidden)`. The wrapped computation is anything
//! implementing [`Sublayer`], so attention and feed-forward share the same
//! wiring and the mask only reaches sublayers that ask for it.

use candle_core::{Device, Result, Tensor};

use crate::{
    checks,
    norm::{LayerNorm, NormConfig},
};

/// Per-call state handed to a [`Sublayer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SublayerContext<'a> {
    /// Attention mask, `1` where attending is allowed.
    pub mask: Option<&'a Tensor>,
    /// Enables dropout.
    pub train: bool,
}

impl<'a> SublayerContext<'a> {
    pub fn new(mask: Option<&'a Tensor>, train: bool) -> Self {
        Self { mask, train }
    }

    /// Same training flag, mask removed.
    pub fn unmasked(&self) -> Self {
        Self {
            mask: None,
            train: self.train,
        }
    }
}

/// A shape-preserving transformation that can sit inside a [`Residual`].
pub trait Sublayer: Send + Sync {
    /// Error type of the wrapped computation; tensor errors from the wrapper
    /// itself convert into it.
    type Error: From<candle_core::Error>;

    fn forward(&self, hidden: &Tensor, ctx: &SublayerContext<'_>) -> std::result::Result<Tensor, Self::Error>;
}

/// Configuration describing how a residual branch is wired.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidualConfig {
    pub hidden_size: usize,
    /// Dropout probability applied to the sublayer output during training.
    pub dropout_p: f32,
    /// Epsilon of the pre-norm.
    pub norm_eps: f64,
}

impl ResidualConfig {
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            dropout_p: 0.0,
            norm_eps: 1e-5,
        }
    }
}

/// Pre-norm residual: `input + dropout(sublayer(norm(input)))`.
#[derive(Debug, Clone)]
pub struct Residual {
    config: ResidualConfig,
    norm: LayerNorm,
}

impl Residual {
    pub fn new(config: ResidualConfig, device: &Device) -> Result<Self> {
        checks::expect_probability("residual.dropout", config.dropout_p)?;
        let norm = LayerNorm::identity(
            NormConfig::new(config.hidden_size).with_epsilon(config.norm_eps),
            device,
        )?;
        Ok(Self { config, norm })
    }

    pub fn config(&self) -> &ResidualConfig {
        &self.config
    }

    pub fn norm(&self) -> &LayerNorm {
        &self.norm
    }

    /// Runs `sublayer` on the normalised input and adds the result back.
    pub fn forward<S: Sublayer + ?Sized>(
        &self,
        input: &Tensor,
        sublayer: &S,
        ctx: &SublayerContext<'_>,
    ) -> std::result::Result<Tensor, S::Error> {
        let normed = self.norm.forward(input)?;
        let branch = sublayer.forward(&normed, ctx)?;
        Ok(self.add(&branch, input, ctx.train)?)
    }

    /// Adds `branch` to `residual`, with dropout on the branch in training.
    pub fn add(&self, branch: &Tensor, residual: &Tensor, train: bool) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("residual.input", residual, self.config.hidden_size)?;
        checks::expect_shape("residual.branch", branch, residual.dims())?;

        if train && self.config.dropout_p > 0.0 {
            residual + candle_nn::ops::dropout(branch, self.config.dropout_p)?
        } else {
            residual + branch
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    struct Doubler;

    impl Sublayer for Doubler {
        type Error = candle_core::Error;

        fn forward(&self, hidden: &Tensor, _ctx: &SublayerContext<'_>) -> Result<Tensor> {
            hidden.affine(2.0, 0.0)
        }
    }

    struct MaskProbe;

    impl Sublayer for MaskProbe {
        type Error = candle_core::Error;

        fn forward(&self, hidden: &Tensor, ctx: &SublayerContext<'_>) -> Result<Tensor> {
            match ctx.mask {
                Some(_) => hidden.ones_like(),
                None => hidden.zeros_like(),
            }
        }
    }

    #[test]
    fn adds_sublayer_of_normalised_input() -> Result<()> {
        let device = Device::Cpu;
        let residual = Residual::new(ResidualConfig::new(4), &device)?;
        let input = Tensor::new(&[[[1f32, 2., 3., 4.]]], &device)?;
        let output = residual.forward(&input, &Doubler, &SublayerContext::default())?;

        let expected = (input.clone() + residual.norm().forward(&input)?.affine(2.0, 0.0)?)?;
        let diff = output.sub(&expected)?.abs()?.flatten_all()?.max(0)?.to_vec0::<f32>()?;
        assert!(diff < 1e-6);
        Ok(())
    }

    #[test]
    fn unmasked_context_drops_mask() -> Result<()> {
        let device = Device::Cpu;
        let residual = Residual::new(ResidualConfig::new(2), &device)?;
        let input = Tensor::zeros((1, 1, 2), DType::F32, &device)?;
        let mask = Tensor::ones((1, 1, 1), DType::U8, &device)?;
        let ctx = SublayerContext::new(Some(&mask), false);

        let masked = residual.forward(&input, &MaskProbe, &ctx)?;
        let unmasked = residual.forward(&input, &MaskProbe, &ctx.unmasked())?;
        assert_eq!(masked.flatten_all()?.to_vec1::<f32>()?, vec![1.0, 1.0]);
        assert_eq!(unmasked.flatten_all()?.to_vec1::<f32>()?, vec![0.0, 0.0]);
        Ok(())
    }

    #[test]
    fn dropout_only_active_in_training() -> Result<()> {
        let device = Device::Cpu;
        let mut config = ResidualConfig::new(8);
        config.dropout_p = 0.5;
        let residual = Residual::new(config, &device)?;
        let base = Tensor::zeros((2, 4, 8), DType::F32, &device)?;
        let branch = Tensor::ones((2, 4, 8), DType::F32, &device)?;

        let eval = residual.add(&branch, &base, false)?;
        assert_eq!(eval.sum_all()?.to_vec0::<f32>()?, 64.0);

        let train = residual.add(&branch, &base, true)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(train.iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn rejects_branch_shape_mismatch() -> Result<()> {
        let device = Device::Cpu;
        let residual = Residual::new(ResidualConfig::new(4), &device)?;
        let base = Tensor::zeros((1, 2, 4), DType::F32, &device)?;
        let branch = Tensor::zeros((1, 3, 4), DType::F32, &device)?;
        assert!(residual.add(&branch, &base, false).is_err());
        Ok(())
    }
}
