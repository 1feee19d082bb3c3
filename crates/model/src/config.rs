use std::{fs, path::Path};

use layers::activations::ActivationKind;
use serde::{Deserialize, Serialize};

use crate::errors::ModelError;

fn default_dropout() -> f32 {
    0.1
}

fn default_temperature() -> f64 {
    1.0
}

fn default_norm_eps() -> f64 {
    1e-5
}

fn default_scale_embeddings() -> bool {
    true
}

/// Hyperparameters of the decoder-only sequence model.
///
/// Fixed at construction; every layer is sized from this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceModelConfig {
    pub vocab_size: usize,
    pub d_model: usize,
    /// Hidden width of the feed-forward block.
    pub d_mlp: usize,
    /// Non-linearity between the feed-forward projections.
    #[serde(default)]
    pub activation: ActivationKind,
    pub num_heads: usize,
    pub num_blocks: usize,
    /// Positional capacity; longest sequence the model accepts.
    pub max_length: usize,
    /// Dropout used by attention, residual branches and the embedding sum.
    /// Only active in training mode.
    #[serde(default = "default_dropout")]
    pub dropout: f32,
    /// Attention softmax temperature, shared by every head of every block.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_norm_eps")]
    pub norm_eps: f64,
    /// Multiply token embeddings by `sqrt(d_model)`.
    #[serde(default = "default_scale_embeddings")]
    pub scale_embeddings: bool,
}

impl SequenceModelConfig {
    pub fn new(
        vocab_size: usize,
        d_model: usize,
        d_mlp: usize,
        num_heads: usize,
        num_blocks: usize,
        max_length: usize,
    ) -> Self {
        Self {
            vocab_size,
            d_model,
            d_mlp,
            activation: ActivationKind::default(),
            num_heads,
            num_blocks,
            max_length,
            dropout: default_dropout(),
            temperature: default_temperature(),
            norm_eps: default_norm_eps(),
            scale_embeddings: default_scale_embeddings(),
        }
    }

    /// Ten-token toy model used by the CLI when no config file is given.
    pub fn tiny() -> Self {
        Self::new(10, 10, 24, 5, 2, 50)
    }

    /// Width of one attention head.
    pub fn d_head(&self) -> usize {
        self.d_model / self.num_heads.max(1)
    }

    /// Loads a `.toml` or `.json` file and validates it.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: SequenceModelConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(ModelError::ConfigFormat(format!(
                    "unsupported configuration extension '{}'",
                    other
                )));
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants; every problem found is reported.
    pub fn validate(&self) -> Result<(), ModelError> {
        let mut errors = Vec::new();

        for (name, value) in [
            ("vocab_size", self.vocab_size),
            ("d_model", self.d_model),
            ("d_mlp", self.d_mlp),
            ("num_heads", self.num_heads),
            ("num_blocks", self.num_blocks),
            ("max_length", self.max_length),
        ] {
            if value == 0 {
                errors.push(format!("{name} must be greater than zero"));
            }
        }
        if self.num_heads > 0 && self.d_model % self.num_heads != 0 {
            errors.push(format!(
                "d_model ({}) must be divisible by num_heads ({})",
                self.d_model, self.num_heads
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            errors.push(format!("dropout must be in [0, 1), got {}", self.dropout));
        }
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            errors.push(format!(
                "temperature must be finite and > 0, got {}",
                self.temperature
            ));
        }
        if !(self.norm_eps > 0.0) {
            errors.push(format!("norm_eps must be > 0, got {}", self.norm_eps));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ModelError::InvalidConfiguration(errors.join("; ")))
        }
    }

    /// Number of scalar weights a model built from this config holds.
    pub fn parameter_count(&self) -> usize {
        let (v, d, m) = (self.vocab_size, self.d_model, self.d_mlp);
        let embedding = v * d;
        // W_Q, W_K, W_V, W_O plus the three fused per-head maps
        let attention = 7 * d * d;
        let feed_forward = d * m + m + m * d + d;
        let norms = 2 * 2 * d;
        let block = attention + feed_forward + norms;
        let final_norm = 2 * d;
        let projection = d * v + v;
        embedding + self.num_blocks * block + final_norm + projection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_indivisible_heads_and_bad_knobs() {
        let mut config = SequenceModelConfig::new(10, 10, 24, 3, 1, 8);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ModelError::InvalidConfiguration(ref msg) if msg.contains("divisible")));

        config.num_heads = 5;
        assert!(config.validate().is_ok());

        config.temperature = 0.0;
        config.dropout = 1.0;
        let msg = config.validate().unwrap_err().to_string();
        assert!(msg.contains("temperature"));
        assert!(msg.contains("dropout"));
    }

    #[test]
    fn parses_toml_with_defaults() {
        let config: SequenceModelConfig = toml::from_str(
            r#"
            vocab_size = 32
            d_model = 16
            d_mlp = 64
            num_heads = 4
            num_blocks = 2
            max_length = 128
            "#,
        )
        .unwrap();
        assert_eq!(config.dropout, 0.1);
        assert_eq!(config.temperature, 1.0);
        assert_eq!(config.activation, ActivationKind::Relu);
        assert!(config.scale_embeddings);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn activation_is_selectable_by_name() {
        let config: SequenceModelConfig = toml::from_str(
            r#"
            vocab_size = 32
            d_model = 16
            d_mlp = 64
            activation = "gelu"
            num_heads = 4
            num_blocks = 2
            max_length = 128
            "#,
        )
        .unwrap();
        assert_eq!(config.activation, ActivationKind::Gelu);
        assert!(toml::from_str::<SequenceModelConfig>(
            "vocab_size = 1\nd_model = 1\nd_mlp = 1\nactivation = \"tanh\"\nnum_heads = 1\nnum_blocks = 1\nmax_length = 1\n"
        )
        .is_err());
    }

    #[test]
    fn loads_json_from_disk() {
        let config = SequenceModelConfig::tiny();
        let path = std::env::temp_dir().join(format!("decoder-config-{}.json", std::process::id()));
        fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();
        let loaded = SequenceModelConfig::from_path(&path).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(loaded, config);

        let err = SequenceModelConfig::from_path("model.yaml").unwrap_err();
        assert!(matches!(err, ModelError::Io(_) | ModelError::ConfigFormat(_)));
    }
}
