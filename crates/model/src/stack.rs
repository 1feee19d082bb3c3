use candle_core::{Device, Tensor};
use layers::norm::{LayerNorm, NormConfig};

use crate::{block::DecoderBlock, config::SequenceModelConfig, errors::ModelError};

/// `num_blocks` independent decoder blocks sharing one mask, followed by a
/// final LayerNorm.
#[derive(Debug, Clone)]
pub struct DecoderStack {
    blocks: Vec<DecoderBlock>,
    norm: LayerNorm,
}

impl DecoderStack {
    pub fn new(config: &SequenceModelConfig, device: &Device) -> Result<Self, ModelError> {
        let blocks = (0..config.num_blocks)
            .map(|_| DecoderBlock::new(config, device))
            .collect::<Result<Vec<_>, _>>()?;
        let norm = LayerNorm::identity(
            NormConfig::new(config.d_model).with_epsilon(config.norm_eps),
            device,
        )?;
        Ok(Self { blocks, norm })
    }

    pub fn blocks(&self) -> &[DecoderBlock] {
        &self.blocks
    }

    pub fn forward_t(
        &self,
        hidden: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor, ModelError> {
        let mut hidden = hidden.clone();
        for block in &self.blocks {
            hidden = block.forward_t(&hidden, mask, train)?;
        }
        Ok(self.norm.forward(&hidden)?)
    }
}
