//! Layer normalisation over the feature axis.
//!
//! Inputs follow the `(batch, seq, hidden)` convention. Statistics are taken
//! along the last axis and the original layout is preserved.

use candle_core::{DType, Device, Error, Result, Tensor, D};

use crate::checks;

/// Configuration for [`LayerNorm`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormConfig {
    /// Size of the hidden dimension being normalised.
    pub hidden_size: usize,
    /// Numeric stabiliser added to the variance.
    pub epsilon: f64,
}

impl NormConfig {
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            epsilon: 1e-5,
        }
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }
}

/// Standard LayerNorm with learnable scale and shift.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    config: NormConfig,
    weight: Tensor,
    bias: Tensor,
}

impl LayerNorm {
    /// Constructs a LayerNorm from explicit scale and bias parameters.
    pub fn new(weight: Tensor, bias: Tensor, config: NormConfig) -> Result<Self> {
        if config.hidden_size == 0 {
            return Err(Error::Msg("norm: hidden size must be non-zero".into()));
        }
        if !(config.epsilon > 0.0) {
            return Err(Error::Msg(format!(
                "norm: epsilon must be positive, got {}",
                config.epsilon
            )));
        }
        checks::expect_shape("norm.weight", &weight, &[config.hidden_size])?;
        checks::expect_shape("norm.bias", &bias, &[config.hidden_size])?;
        checks::expect_dtype_in("norm.weight", &weight, &[DType::F32])?;
        checks::expect_dtype_in("norm.bias", &bias, &[DType::F32])?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Identity-initialised norm: scale of one, shift of zero.
    pub fn identity(config: NormConfig, device: &Device) -> Result<Self> {
        let weight = Tensor::ones(config.hidden_size, DType::F32, device)?;
        let bias = Tensor::zeros(config.hidden_size, DType::F32, device)?;
        Self::new(weight, bias, config)
    }

    pub fn config(&self) -> &NormConfig {
        &self.config
    }

    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("norm.input", hidden, self.config.hidden_size)?;

        let hidden_size = self.config.hidden_size as f64;
        let mean = (hidden.sum_keepdim(D::Minus1)? / hidden_size)?;
        let centered = hidden.broadcast_sub(&mean)?;
        let variance = (centered.sqr()?.sum_keepdim(D::Minus1)? / hidden_size)?;
        let denom = (variance + self.config.epsilon)?.sqrt()?;

        centered
            .broadcast_div(&denom)?
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)
    }
}
