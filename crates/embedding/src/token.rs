//! Token embedding table.

use candle_core::{bail, DType, Device, Error, Result, Tensor};
use layers::checks;

/// Configuration for building a token embedding table.
#[derive(Debug, Clone)]
pub struct TokenEmbeddingConfig {
    /// Size of the vocabulary (number of distinct tokens).
    pub vocab_size: usize,
    /// Dimensionality of each embedding vector.
    pub hidden_dim: usize,
    /// Multiply looked-up vectors by `sqrt(hidden_dim)`.
    pub scale_by_sqrt_dim: bool,
    /// Device hosting the parameters.
    pub device: Device,
}

impl TokenEmbeddingConfig {
    pub fn new(vocab_size: usize, hidden_dim: usize, device: &Device) -> Self {
        Self {
            vocab_size,
            hidden_dim,
            scale_by_sqrt_dim: true,
            device: device.clone(),
        }
    }
}

/// Token embedding table mapping ids to `hidden_dim` vectors.
#[derive(Debug, Clone)]
pub struct TokenEmbedding {
    config: TokenEmbeddingConfig,
    weight: Tensor,
}

impl TokenEmbedding {
    /// Builds a new table with parameters sampled from `N(0, 1)`.
    pub fn new(config: TokenEmbeddingConfig) -> Result<Self> {
        Self::validate_config(&config)?;
        let weight = Tensor::randn(
            0f32,
            1f32,
            (config.vocab_size, config.hidden_dim),
            &config.device,
        )?;
        Ok(Self { config, weight })
    }

    /// Wraps an existing `[vocab_size, hidden_dim]` table.
    pub fn from_weight(config: TokenEmbeddingConfig, weight: Tensor) -> Result<Self> {
        Self::validate_config(&config)?;
        checks::expect_shape(
            "embedding.weight",
            &weight,
            &[config.vocab_size, config.hidden_dim],
        )?;
        checks::expect_dtype_in("embedding.weight", &weight, &[DType::F32])?;
        Ok(Self { config, weight })
    }

    /// Returns the embedding configuration.
    pub fn config(&self) -> &TokenEmbeddingConfig {
        &self.config
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Looks up embeddings for the provided token ids.
    ///
    /// Inputs must be shaped `(batch, seq)` with an integer dtype. Outputs follow
    /// the `(batch, seq, hidden)` layout in `f32`.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        self.validate_token_ids(token_ids)?;
        let (batch, seq) = token_ids.dims2()?;

        let flat = token_ids.to_dtype(DType::I64)?.flatten_all()?;
        self.ensure_id_range(&flat)?;

        let gathered = self.weight.index_select(&flat, 0)?;
        let output = gathered.reshape((batch, seq, self.config.hidden_dim))?;
        if self.config.scale_by_sqrt_dim {
            output.affine((self.config.hidden_dim as f64).sqrt(), 0.0)
        } else {
            Ok(output)
        }
    }

    fn validate_config(config: &TokenEmbeddingConfig) -> Result<()> {
        if config.vocab_size == 0 {
            bail!("token embedding requires vocab_size > 0");
        }
        if config.hidden_dim == 0 {
            bail!("token embedding requires hidden_dim > 0");
        }
        Ok(())
    }

    fn validate_token_ids(&self, token_ids: &Tensor) -> Result<()> {
        match token_ids.dims() {
            [batch, seq] if *batch == 0 || *seq == 0 => {
                return Err(Error::Msg(
                    "token_ids must have non-zero batch and seq dimensions".into(),
                ))
            }
            [_, _] => {}
            _ => return Err(Error::Msg("token_ids must be shaped [batch, seq]".into())),
        }

        if token_ids.dtype().is_int() {
            Ok(())
        } else {
            Err(Error::Msg(format!(
                "token_ids expected integer dtype but received {:?}",
                token_ids.dtype()
            )))
        }
    }

    fn ensure_id_range(&self, flat_ids: &Tensor) -> Result<()> {
        let min_id = flat_ids.min(0)?.to_scalar::<i64>()?;
        if min_id < 0 {
            return Err(Error::Msg(format!(
                "encountered negative token id {} (minimum)",
                min_id
            )));
        }

        let max_id = flat_ids.max(0)?.to_scalar::<i64>()?;
        let vocab = self.config.vocab_size as i64;
        if max_id >= vocab {
            return Err(Error::Msg(format!(
                "token id {} exceeds vocab size {}",
                max_id, vocab
            )));
        }
        Ok(())
    }
}
