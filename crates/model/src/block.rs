use attention::{MultiHeadAttention, MultiHeadAttentionConfig};
use candle_core::{Device, Tensor};
use layers::{
    linear::LinearInit,
    mlp::{FeedForward, FeedForwardConfig},
    residual::{Residual, ResidualConfig, SublayerContext},
};

use crate::{config::SequenceModelConfig, errors::ModelError};

/// Decoder block: masked self-attention then feed-forward, each wrapped in a
/// pre-norm residual.
///
/// `x1 = x + dropout(attention(norm(x), mask))`,
/// `x2 = x1 + dropout(ffn(norm(x1)))`. The mask only reaches attention.
#[derive(Debug, Clone)]
pub struct DecoderBlock {
    self_attention: MultiHeadAttention,
    feed_forward: FeedForward,
    attention_residual: Residual,
    feed_forward_residual: Residual,
}

impl DecoderBlock {
    /// Construct a decoder block from the shared [`SequenceModelConfig`].
    pub fn new(config: &SequenceModelConfig, device: &Device) -> Result<Self, ModelError> {
        let attention_config = MultiHeadAttentionConfig {
            num_heads: config.num_heads,
            d_model: config.d_model,
            dropout: config.dropout,
            temperature: config.temperature,
        };
        let self_attention = MultiHeadAttention::new(attention_config, device)?;

        let mut ff_config = FeedForwardConfig::new(config.d_model, config.d_mlp);
        ff_config.dropout_p = config.dropout;
        ff_config.activation = config.activation;
        let feed_forward = FeedForward::with_init(ff_config, &LinearInit::XavierUniform, device)?;

        let mut residual_config = ResidualConfig::new(config.d_model);
        residual_config.dropout_p = config.dropout;
        residual_config.norm_eps = config.norm_eps;

        Ok(Self {
            self_attention,
            feed_forward,
            attention_residual: Residual::new(residual_config.clone(), device)?,
            feed_forward_residual: Residual::new(residual_config, device)?,
        })
    }

    pub fn self_attention(&self) -> &MultiHeadAttention {
        &self.self_attention
    }

    pub fn feed_forward(&self) -> &FeedForward {
        &self.feed_forward
    }

    pub fn forward(&self, hidden: &Tensor, mask: Option<&Tensor>) -> Result<Tensor, ModelError> {
        self.forward_t(hidden, mask, false)
    }

    pub fn forward_t(
        &self,
        hidden: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor, ModelError> {
        let ctx = SublayerContext::new(mask, train);
        let attended = self
            .attention_residual
            .forward(hidden, &self.self_attention, &ctx)?;
        let output = self
            .feed_forward_residual
            .forward(&attended, &self.feed_forward, &ctx.unmasked())?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attention::masks::build_causal_mask;
    use layers::activations::ActivationKind;

    #[test]
    fn preserves_hidden_shape() -> Result<(), ModelError> {
        let device = Device::Cpu;
        let config = SequenceModelConfig::new(10, 8, 16, 2, 1, 16);
        let block = DecoderBlock::new(&config, &device)?;
        let hidden = Tensor::randn(0f32, 1.0, (2, 5, 8), &device)?;
        let mask = build_causal_mask(&device, 1, 5, 5)?;
        assert_eq!(block.forward(&hidden, Some(&mask))?.dims(), &[2, 5, 8]);
        Ok(())
    }

    #[test]
    fn feed_forward_uses_configured_activation() -> Result<(), ModelError> {
        let device = Device::Cpu;
        let mut config = SequenceModelConfig::new(10, 8, 16, 2, 1, 16);
        config.activation = ActivationKind::Silu;
        let block = DecoderBlock::new(&config, &device)?;
        assert_eq!(block.feed_forward().config().activation, ActivationKind::Silu);

        let hidden = Tensor::randn(0f32, 1.0, (1, 3, 8), &device)?;
        assert_eq!(block.forward(&hidden, None)?.dims(), &[1, 3, 8]);
        Ok(())
    }

    #[test]
    fn surfaces_attention_configuration_errors() {
        let device = Device::Cpu;
        let config = SequenceModelConfig::new(10, 10, 16, 3, 1, 16);
        let err = DecoderBlock::new(&config, &device).unwrap_err();
        assert!(matches!(err, ModelError::InvalidConfiguration(_)));
    }
}
