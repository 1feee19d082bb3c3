//! Fixed sin/cos position table.
//!
//! Column `j` of position `pos` holds `sin(pos / base^(2i/d))` for even `j` and
//! `cos(pos / base^(2i/d))` for odd `j`, with `i = j / 2`. The table is built
//! once for `max_len` positions and added to `(batch, seq, hidden)` inputs.

use candle_core::{Device, Error, Result, Tensor};
use layers::checks;

#[derive(Debug, Clone, PartialEq)]
pub struct SinusoidalConfig {
    /// Longest sequence the table covers.
    pub max_len: usize,
    pub hidden_dim: usize,
    /// Frequency base, `10_000` in the usual formulation.
    pub base: f64,
    /// Dropout applied after the addition while training.
    pub dropout_p: f32,
}

impl SinusoidalConfig {
    pub fn new(max_len: usize, hidden_dim: usize) -> Self {
        Self {
            max_len,
            hidden_dim,
            base: 10_000.0,
            dropout_p: 0.0,
        }
    }
}

/// Additive sinusoidal positional encoding.
#[derive(Debug, Clone)]
pub struct SinusoidalPositionalEncoding {
    config: SinusoidalConfig,
    table: Tensor,
}

impl SinusoidalPositionalEncoding {
    pub fn new(config: SinusoidalConfig, device: &Device) -> Result<Self> {
        if config.max_len == 0 || config.hidden_dim == 0 {
            return Err(Error::Msg(format!(
                "positional encoding requires non-zero sizes, got max_len={} hidden_dim={}",
                config.max_len, config.hidden_dim
            )));
        }
        checks::expect_probability("positional.dropout", config.dropout_p)?;

        let dim = config.hidden_dim;
        let mut values = Vec::with_capacity(config.max_len * dim);
        for pos in 0..config.max_len {
            for col in 0..dim {
                let exponent = (2 * (col / 2)) as f64 / dim as f64;
                let angle = pos as f64 / config.base.powf(exponent);
                let value = if col % 2 == 0 { angle.sin() } else { angle.cos() };
                values.push(value as f32);
            }
        }
        let table = Tensor::from_vec(values, (config.max_len, dim), device)?;
        Ok(Self { config, table })
    }

    pub fn config(&self) -> &SinusoidalConfig {
        &self.config
    }

    /// The full `[max_len, hidden_dim]` table.
    pub fn table(&self) -> &Tensor {
        &self.table
    }

    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        self.forward_t(hidden, false)
    }

    /// Adds the first `seq` rows of the table; sequences longer than
    /// `max_len` are rejected.
    pub fn forward_t(&self, hidden: &Tensor, train: bool) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("positional.input", hidden, self.config.hidden_dim)?;
        let seq = hidden.dim(1)?;
        if seq > self.config.max_len {
            return Err(Error::Msg(format!(
                "sequence length {} exceeds positional capacity {}",
                seq, self.config.max_len
            )));
        }
        let positions = self.table.narrow(0, 0, seq)?;
        let output = hidden.broadcast_add(&positions)?;
        if train && self.config.dropout_p > 0.0 {
            candle_nn::ops::dropout(&output, self.config.dropout_p)
        } else {
            Ok(output)
        }
    }
}
