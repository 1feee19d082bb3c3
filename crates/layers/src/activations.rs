//! Activation catalogue for feed-forward stacks.
//!
//! Activations are element-wise and return tensors with the input layout.
//!
//! * **ReLU** zeroes negative values (the feed-forward default).
//! * **GELU** uses the erf form `0.5 * x * (1 + erf(x / sqrt(2)))`.
//! * **SiLU** computes `x * sigmoid(x)`.

use candle_core::{Result, Tensor};
use serde::{Deserialize, Serialize};

/// Non-linearity applied between feed-forward projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationKind {
    /// Identity function, useful for debugging or wiring custom stacks.
    Identity,
    #[default]
    Relu,
    Gelu,
    Silu,
}

impl ActivationKind {
    /// Applies the activation to `input`.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        match self {
            ActivationKind::Identity => Ok(input.clone()),
            ActivationKind::Relu => input.relu(),
            ActivationKind::Gelu => input.gelu_erf(),
            ActivationKind::Silu => input.silu(),
        }
    }
}
