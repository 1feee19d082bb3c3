use candle_core::{DType, Device, Tensor};
use embedding::{
    SinusoidalConfig, SinusoidalPositionalEncoding, TokenEmbedding, TokenEmbeddingConfig,
};
use layers::linear::{Linear, LinearConfig, LinearInit};

use crate::{
    config::SequenceModelConfig,
    errors::ModelError,
    generation::{GenerationConfig, Generator},
    stack::DecoderStack,
};

/// Decoder-only transformer: token ids in, next-token logits out.
///
/// `logits = projection(stack(positional(embedding(ids)), mask))`. Weights are
/// created at construction and never mutated, so one model can serve several
/// threads, each driving its own [`Generator`].
#[derive(Debug, Clone)]
pub struct SequenceModel {
    config: SequenceModelConfig,
    device: Device,
    embedding: TokenEmbedding,
    positional: SinusoidalPositionalEncoding,
    stack: DecoderStack,
    projection: Linear,
}

impl SequenceModel {
    /// Builds the model and its component blocks according to `config`.
    pub fn new(config: SequenceModelConfig, device: &Device) -> Result<Self, ModelError> {
        config.validate()?;

        let mut embed_config = TokenEmbeddingConfig::new(config.vocab_size, config.d_model, device);
        embed_config.scale_by_sqrt_dim = config.scale_embeddings;
        let embedding = TokenEmbedding::new(embed_config)?;

        let mut positional_config = SinusoidalConfig::new(config.max_length, config.d_model);
        positional_config.dropout_p = config.dropout;
        let positional = SinusoidalPositionalEncoding::new(positional_config, device)?;

        let stack = DecoderStack::new(&config, device)?;
        let projection = Linear::with_init(
            LinearConfig::new(config.d_model, config.vocab_size),
            &LinearInit::XavierUniform,
            device,
        )?;

        log::info!(
            "built sequence model vocab={} d_model={} heads={} blocks={} max_length={} params={}",
            config.vocab_size,
            config.d_model,
            config.num_heads,
            config.num_blocks,
            config.max_length,
            config.parameter_count()
        );

        Ok(Self {
            config,
            device: device.clone(),
            embedding,
            positional,
            stack,
            projection,
        })
    }

    /// Returns the model configuration.
    pub fn config(&self) -> &SequenceModelConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn stack(&self) -> &DecoderStack {
        &self.stack
    }

    /// Inference forward pass producing `[batch, seq_len, vocab_size]` logits.
    pub fn forward(&self, token_ids: &Tensor, mask: Option<&Tensor>) -> Result<Tensor, ModelError> {
        self.forward_t(token_ids, mask, false)
    }

    /// Forward pass with an explicit dropout switch.
    pub fn forward_t(
        &self,
        token_ids: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor, ModelError> {
        self.validate_token_ids(token_ids)?;
        let embedded = self.embedding.forward(token_ids)?;
        let hidden = self.positional.forward_t(&embedded, train)?;
        let hidden = self.stack.forward_t(&hidden, mask, train)?;
        Ok(self.projection.forward(&hidden)?)
    }

    /// Extends `prompt` to `max_length` tokens by multinomial sampling at
    /// `temperature`.
    pub fn generate(
        &self,
        prompt: &Tensor,
        max_length: usize,
        temperature: f64,
    ) -> Result<Tensor, ModelError> {
        let mut config = GenerationConfig::new(max_length);
        config.temperature = temperature;
        self.generate_with(prompt, &config)
    }

    /// Runs a [`Generator`] to completion.
    pub fn generate_with(&self, prompt: &Tensor, config: &GenerationConfig) -> Result<Tensor, ModelError> {
        Generator::new(self, prompt, config.clone())?.run()
    }

    fn validate_token_ids(&self, token_ids: &Tensor) -> Result<(), ModelError> {
        let (batch, seq) = token_ids.dims2().map_err(|_| {
            ModelError::shape(format!(
                "token ids must be shaped [batch, seq_len], got {:?}",
                token_ids.dims()
            ))
        })?;
        if batch == 0 || seq == 0 {
            return Err(ModelError::shape("token ids must be non-empty"));
        }
        if !token_ids.dtype().is_int() {
            return Err(ModelError::shape(format!(
                "token ids must have an integer dtype, got {:?}",
                token_ids.dtype()
            )));
        }
        if seq > self.config.max_length {
            return Err(ModelError::shape(format!(
                "sequence length {} exceeds max_length {}",
                seq, self.config.max_length
            )));
        }
        self.validate_token_range(token_ids)
    }

    /// Every id must index the vocabulary; signed ids are checked before any
    /// cast can wrap them.
    pub(crate) fn validate_token_range(&self, token_ids: &Tensor) -> Result<(), ModelError> {
        let flat = token_ids.flatten_all()?.to_dtype(DType::I64)?;
        let lowest = flat.min(0)?.to_scalar::<i64>()?;
        let highest = flat.max(0)?.to_scalar::<i64>()?;
        if lowest < 0 || highest >= self.config.vocab_size as i64 {
            let offender = if lowest < 0 { lowest } else { highest };
            return Err(ModelError::shape(format!(
                "token id {} outside vocabulary of {}",
                offender, self.config.vocab_size
            )));
        }
        Ok(())
    }
}
