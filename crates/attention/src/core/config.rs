//! Configuration options shared by all attention implementations.
//!
//! The [`Config`] struct captures run-time knobs such as dropout and the
//! softmax temperature that callers can tune without swapping implementations.

use super::AttentionError;

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Probability for dropout applied to attention weights during training.
    ///
    /// When `None`, dropout is disabled and the computation is deterministic.
    pub dropout_p: Option<f32>,
    /// Divisor applied to the masked scores before the softmax.
    pub temperature: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dropout_p: None,
            temperature: 1.0,
        }
    }
}

impl Config {
    /// Rejects temperatures that are not finite and positive and dropout
    /// probabilities outside `[0, 1)`.
    pub fn validate(&self) -> Result<(), AttentionError> {
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            return Err(AttentionError::InvalidConfiguration(format!(
                "temperature must be finite and > 0, got {}",
                self.temperature
            )));
        }
        if let Some(p) = self.dropout_p {
            if !(0.0..1.0).contains(&p) {
                return Err(AttentionError::InvalidConfiguration(format!(
                    "dropout probability must be in [0, 1), got {p}"
                )));
            }
        }
        Ok(())
    }
}
