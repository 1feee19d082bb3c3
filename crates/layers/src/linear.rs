//! Dense projection helpers.
//!
//! Linear layers accept `(batch, seq, in_dim)` or `(rows, in_dim)` inputs and
//! return the same leading layout with `out_dim` features. Fused variants pack
//! several projections of width `output_dim` side by side so callers can split
//! the result per shard (one shard per attention head, for example). The
//! weight is stored as `[total_output_dim, input_dim]`, rows grouped by shard.
//! Initialisation policies mirror common transformer recipes.

use candle_core::{DType, Device, Error, Result, Tensor};

use crate::checks;

/// Configuration shared by dense projection layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    /// Output feature dimension per projection shard.
    pub output_dim: usize,
    /// Whether a learnable bias vector should be applied.
    pub bias: bool,
    /// Number of projections fused together (1 for standard linear).
    pub fused_projections: usize,
}

impl LinearConfig {
    /// Creates a configuration for a single projection layer with bias.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: true,
            fused_projections: 1,
        }
    }

    /// Same as [`LinearConfig::new`] but without a bias vector.
    pub fn without_bias(input_dim: usize, output_dim: usize) -> Self {
        Self {
            bias: false,
            ..Self::new(input_dim, output_dim)
        }
    }

    /// Packs `shards` independent projections of width `output_dim`.
    pub fn fused(mut self, shards: usize) -> Self {
        self.fused_projections = shards;
        self
    }

    /// Total number of output features produced by the layer.
    pub fn total_output_dim(&self) -> usize {
        self.output_dim * self.fused_projections
    }

    fn validate(&self) -> Result<()> {
        if self.input_dim == 0 || self.output_dim == 0 || self.fused_projections == 0 {
            return Err(Error::Msg(format!(
                "linear: dimensions must be non-zero, got {:?}",
                self
            )));
        }
        Ok(())
    }
}

/// Supported weight initialisation policies for transformer projections.
#[derive(Debug, Clone)]
pub enum LinearInit {
    /// Xavier/Glorot uniform initialisation.
    XavierUniform,
    /// Xavier/Glorot normal initialisation.
    XavierNormal,
    /// Kaiming/He uniform initialisation.
    KaimingUniform { negative_slope: f64 },
    /// Kaiming/He normal initialisation.
    KaimingNormal { negative_slope: f64 },
    /// Scales another policy, used to damp deep residual branches.
    Scaled { base: Box<LinearInit>, scale: f64 },
}

impl Default for LinearInit {
    fn default() -> Self {
        LinearInit::XavierUniform
    }
}

impl LinearInit {
    /// Convenience helper to scale an existing policy.
    pub fn scaled(base: LinearInit, scale: f64) -> Self {
        Self::Scaled {
            base: Box::new(base),
            scale,
        }
    }

    /// Samples a `(out_dim, in_dim)` weight matrix in `f32`.
    ///
    /// Fan-in and fan-out are taken from `fans` so fused layers can be
    /// initialised as if every shard were its own projection.
    fn sample(&self, shape: (usize, usize), fans: (usize, usize), device: &Device) -> Result<Tensor> {
        let (fan_in, fan_out) = (fans.0 as f64, fans.1 as f64);
        match self {
            LinearInit::XavierUniform => {
                let bound = (6.0f64 / (fan_in + fan_out)).sqrt();
                Tensor::rand(-bound as f32, bound as f32, shape, device)
            }
            LinearInit::XavierNormal => {
                let std = (2.0f64 / (fan_in + fan_out)).sqrt();
                Tensor::randn(0f32, std as f32, shape, device)
            }
            LinearInit::KaimingUniform { negative_slope } => {
                let gain = (2.0f64 / (1.0 + negative_slope.powi(2))).sqrt();
                let bound = 3.0f64.sqrt() * gain / fan_in.sqrt();
                Tensor::rand(-bound as f32, bound as f32, shape, device)
            }
            LinearInit::KaimingNormal { negative_slope } => {
                let gain = (2.0f64 / (1.0 + negative_slope.powi(2))).sqrt();
                let std = gain / fan_in.sqrt();
                Tensor::randn(0f32, std as f32, shape, device)
            }
            LinearInit::Scaled { base, scale } => base.sample(shape, fans, device)?.affine(*scale, 0.0),
        }
    }
}

/// Dense affine projection `y = x·Wᵗ + b`.
///
/// Parameters are plain tensors fixed at construction; `forward` only reads
/// them, so a `Linear` can be shared across threads.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Tensor,
    bias: Option<Tensor>,
}

impl Linear {
    /// Constructs a linear layer from pre-existing parameters.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        config.validate()?;
        Self::validate_weight(&config, &weight)?;
        Self::validate_bias(&config, bias.as_ref())?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    /// Builds a linear layer with randomly initialised weights following `init`.
    /// Bias vectors start at zero.
    pub fn with_init(config: LinearConfig, init: &LinearInit, device: &Device) -> Result<Self> {
        config.validate()?;
        let weight = init.sample(
            (config.total_output_dim(), config.input_dim),
            (config.input_dim, config.output_dim),
            device,
        )?;
        let bias = if config.bias {
            Some(Tensor::zeros(config.total_output_dim(), DType::F32, device)?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    /// Static configuration of this layer.
    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    /// The `[total_output_dim, input_dim]` weight matrix.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    /// Weight rows belonging to projection shard `index`, shaped
    /// `[output_dim, input_dim]`.
    pub fn shard(&self, index: usize) -> Result<Tensor> {
        if index >= self.config.fused_projections {
            return Err(Error::Msg(format!(
                "linear: shard {index} out of range for {} fused projections",
                self.config.fused_projections
            )));
        }
        let width = self.config.output_dim;
        self.weight.narrow(0, index * width, width)
    }

    /// Applies the projection to `[B, T, in]` or `[rows, in]` inputs.
    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        self.validate_input(hidden)?;
        let weight_t = self.weight.t()?;
        let out_dim = self.config.total_output_dim();

        let mut output = match hidden.dims() {
            &[batch, seq, _] => {
                let flat = hidden.reshape((batch * seq, self.config.input_dim))?;
                flat.matmul(&weight_t)?.reshape((batch, seq, out_dim))?
            }
            &[rows, _] => hidden.matmul(&weight_t)?.reshape((rows, out_dim))?,
            dims => {
                return Err(Error::Msg(format!(
                    "linear.input: unsupported layout {:?}",
                    dims
                )))
            }
        };

        if let Some(bias) = &self.bias {
            output = output.broadcast_add(bias)?;
        }
        Ok(output)
    }

    fn validate_weight(config: &LinearConfig, weight: &Tensor) -> Result<()> {
        checks::expect_shape(
            "linear.weight",
            weight,
            &[config.total_output_dim(), config.input_dim],
        )?;
        checks::expect_dtype_in("linear.weight", weight, &[DType::F32])
    }

    fn validate_bias(config: &LinearConfig, bias: Option<&Tensor>) -> Result<()> {
        match (config.bias, bias) {
            (true, Some(tensor)) => {
                checks::expect_shape("linear.bias", tensor, &[config.total_output_dim()])?;
                checks::expect_dtype_in("linear.bias", tensor, &[DType::F32])
            }
            (false, Some(_)) => Err(Error::Msg("bias provided but config disables bias".into())),
            (true, None) => Err(Error::Msg("config expects bias but none supplied".into())),
            (false, None) => Ok(()),
        }
    }

    fn validate_input(&self, hidden: &Tensor) -> Result<()> {
        match hidden.dims() {
            [batch, seq, _] => {
                checks::expect_batch_seq_hidden("linear.input", hidden, self.config.input_dim)?;
                if *batch == 0 || *seq == 0 {
                    return Err(Error::Msg("batch/seq dimensions must be non-zero".into()));
                }
                Ok(())
            }
            [_, _] => checks::expect_last_dim("linear.input", hidden, self.config.input_dim),
            _ => Err(Error::Msg(
                "linear expects input shaped [B, T, H_in] or [T, H_in]".into(),
            )),
        }
    }
}
