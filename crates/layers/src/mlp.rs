//! Position-wise feed-forward block.
//!
//! Operates on hidden states shaped `(batch, seq, hidden)` and returns the same
//! layout: expand to `intermediate_size`, activate, optionally drop out, then
//! contract back to the model width.

use candle_core::{Device, Error, Result, Tensor};

use crate::{
    activations::ActivationKind,
    checks,
    linear::{Linear, LinearConfig, LinearInit},
    residual::{Sublayer, SublayerContext},
};

/// Configuration for [`FeedForward`].
#[derive(Debug, Clone, PartialEq)]
pub struct FeedForwardConfig {
    /// Model hidden size.
    pub hidden_size: usize,
    /// Width of the activation space.
    pub intermediate_size: usize,
    /// Activation applied between projections.
    pub activation: ActivationKind,
    /// Dropout applied to the activations while training.
    pub dropout_p: f32,
}

impl FeedForwardConfig {
    pub fn new(hidden_size: usize, intermediate_size: usize) -> Self {
        Self {
            hidden_size,
            intermediate_size,
            activation: ActivationKind::Relu,
            dropout_p: 0.0,
        }
    }
}

/// Two-layer MLP `Linear → activation → dropout → Linear`.
#[derive(Debug, Clone)]
pub struct FeedForward {
    config: FeedForwardConfig,
    up: Linear,
    down: Linear,
}

impl FeedForward {
    /// Builds the block from explicit projections.
    pub fn new(config: FeedForwardConfig, up: Linear, down: Linear) -> Result<Self> {
        checks::expect_probability("mlp.dropout", config.dropout_p)?;
        let up_cfg = up.config();
        let down_cfg = down.config();
        if up_cfg.input_dim != config.hidden_size
            || up_cfg.total_output_dim() != config.intermediate_size
            || down_cfg.input_dim != config.intermediate_size
            || down_cfg.total_output_dim() != config.hidden_size
        {
            return Err(Error::Msg(format!(
                "mlp: projections do not match {} -> {} -> {}",
                config.hidden_size, config.intermediate_size, config.hidden_size
            )));
        }
        Ok(Self { config, up, down })
    }

    /// Builds the block with freshly initialised projections.
    pub fn with_init(config: FeedForwardConfig, init: &LinearInit, device: &Device) -> Result<Self> {
        let up = Linear::with_init(
            LinearConfig::new(config.hidden_size, config.intermediate_size),
            init,
            device,
        )?;
        let down = Linear::with_init(
            LinearConfig::new(config.intermediate_size, config.hidden_size),
            init,
            device,
        )?;
        Self::new(config, up, down)
    }

    pub fn config(&self) -> &FeedForwardConfig {
        &self.config
    }

    pub fn forward_t(&self, hidden: &Tensor, train: bool) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("mlp.input", hidden, self.config.hidden_size)?;
        let mut inner = self.config.activation.forward(&self.up.forward(hidden)?)?;
        if train && self.config.dropout_p > 0.0 {
            inner = candle_nn::ops::dropout(&inner, self.config.dropout_p)?;
        }
        self.down.forward(&inner)
    }
}

impl Sublayer for FeedForward {
    type Error = Error;

    fn forward(&self, hidden: &Tensor, ctx: &SublayerContext<'_>) -> Result<Tensor> {
        self.forward_t(hidden, ctx.train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    #[test]
    fn preserves_shape_and_applies_relu() -> Result<()> {
        let device = Device::Cpu;
        let config = FeedForwardConfig::new(2, 3);
        // up: identity-ish on first two units, third unit = -(x0 + x1)
        let up_w = Tensor::new(&[[1f32, 0.], [0., 1.], [-1., -1.]], &device)?;
        let down_w = Tensor::new(&[[1f32, 0., 1.], [0., 1., 1.]], &device)?;
        let up = Linear::new(
            LinearConfig::new(2, 3),
            up_w,
            Some(Tensor::zeros(3, DType::F32, &device)?),
        )?;
        let down = Linear::new(
            LinearConfig::new(3, 2),
            down_w,
            Some(Tensor::zeros(2, DType::F32, &device)?),
        )?;
        let ff = FeedForward::new(config, up, down)?;

        let input = Tensor::new(&[[[1f32, -2.]]], &device)?;
        let output = ff.forward_t(&input, false)?;
        assert_eq!(output.dims(), &[1, 1, 2]);
        // hidden = relu([1, -2, 1]) = [1, 0, 1]
        assert_eq!(output.flatten_all()?.to_vec1::<f32>()?, vec![2.0, 1.0]);
        Ok(())
    }

    #[test]
    fn rejects_mismatched_projections() -> Result<()> {
        let device = Device::Cpu;
        let up = Linear::with_init(LinearConfig::new(4, 8), &LinearInit::default(), &device)?;
        let down = Linear::with_init(LinearConfig::new(6, 4), &LinearInit::default(), &device)?;
        assert!(FeedForward::new(FeedForwardConfig::new(4, 8), up, down).is_err());
        Ok(())
    }
}
