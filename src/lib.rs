//! Decoder-only causal transformer with autoregressive sampling.
//!
//! The workspace crates are re-exported here together with the prompt parsing
//! used by the `decoder` binary.

pub use attention;
pub use embedding;
pub use layers;
pub use model;

use std::str::FromStr;

use anyhow::{bail, Context, Result};
use candle_core::{Device, Tensor};

/// Rectangular batch of prompt token ids, written as `"1,2,3;4,5,6"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    rows: Vec<Vec<u32>>,
}

impl Prompt {
    pub fn rows(&self) -> &[Vec<u32>] {
        &self.rows
    }

    /// `[batch, len]` `u32` tensor on `device`.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        let batch = self.rows.len();
        let len = self.rows[0].len();
        let flat: Vec<u32> = self.rows.iter().flatten().copied().collect();
        Ok(Tensor::from_vec(flat, (batch, len), device)?)
    }
}

impl FromStr for Prompt {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let rows = s
            .split(';')
            .map(|row| {
                row.split(',')
                    .map(|tok| {
                        tok.trim()
                            .parse::<u32>()
                            .with_context(|| format!("invalid token id '{}'", tok.trim()))
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        let width = rows.first().map(Vec::len).unwrap_or(0);
        if width == 0 {
            bail!("prompt must contain at least one token");
        }
        if rows.iter().any(|row| row.len() != width) {
            bail!("every prompt row must have the same length");
        }
        Ok(Self { rows })
    }
}

/// Picks the compute device; only the CPU backend is compiled in.
pub fn setup_device() -> Device {
    Device::Cpu
}
