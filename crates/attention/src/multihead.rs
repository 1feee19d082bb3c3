//! Multi-head self-attention.
//!
//! The input `E [batch, seq, d_model]` is mapped through full-width `W_Q`,
//! `W_K`, `W_V` projections, then re-projected per head down to
//! `d_head = d_model / num_heads`. The per-head maps are stored fused: one
//! `[num_heads * d_head, d_model]` matrix per role whose rows are grouped by
//! head index, so head `i` reads rows `i * d_head .. (i + 1) * d_head`. Heads
//! run through the shared kernel with one mask and temperature, are
//! concatenated in head order and mixed by `W_O`. No projection carries a bias.

use candle_core::{Device, Tensor};
use layers::{
    linear::{Linear, LinearConfig, LinearInit},
    residual::{Sublayer, SublayerContext},
};

use crate::core::{Attention, AttentionError, Config};
use crate::reference::ScaledDotProductAttention;

/// Construction parameters for [`MultiHeadAttention`].
#[derive(Debug, Clone, PartialEq)]
pub struct MultiHeadAttentionConfig {
    pub num_heads: usize,
    pub d_model: usize,
    /// Dropout on attention weights, train mode only.
    pub dropout: f32,
    /// Softmax temperature shared by every head.
    pub temperature: f64,
}

impl MultiHeadAttentionConfig {
    pub fn new(num_heads: usize, d_model: usize) -> Self {
        Self {
            num_heads,
            d_model,
            dropout: 0.0,
            temperature: 1.0,
        }
    }

    /// Width of a single head.
    pub fn d_head(&self) -> usize {
        self.d_model / self.num_heads.max(1)
    }

    pub fn validate(&self) -> Result<(), AttentionError> {
        if self.num_heads == 0 || self.d_model == 0 {
            return Err(AttentionError::InvalidConfiguration(format!(
                "num_heads and d_model must be non-zero, got {} and {}",
                self.num_heads, self.d_model
            )));
        }
        if self.d_model % self.num_heads != 0 {
            return Err(AttentionError::InvalidConfiguration(format!(
                "d_model {} must be divisible by num_heads {}",
                self.d_model, self.num_heads
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(AttentionError::InvalidConfiguration(format!(
                "dropout probability must be in [0, 1), got {}",
                self.dropout
            )));
        }
        self.kernel_config().validate()
    }

    fn kernel_config(&self) -> Config {
        Config {
            dropout_p: (self.dropout > 0.0).then_some(self.dropout),
            temperature: self.temperature,
        }
    }
}

/// Selects one of the three per-head projection families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionKind {
    Query,
    Key,
    Value,
}

#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    config: MultiHeadAttentionConfig,
    kernel_config: Config,
    kernel: ScaledDotProductAttention,
    w_q: Linear,
    w_k: Linear,
    w_v: Linear,
    w_o: Linear,
    head_q: Linear,
    head_k: Linear,
    head_v: Linear,
}

impl MultiHeadAttention {
    /// Builds the layer with Xavier-uniform weights.
    pub fn new(config: MultiHeadAttentionConfig, device: &Device) -> Result<Self, AttentionError> {
        Self::with_init(config, &LinearInit::XavierUniform, device)
    }

    pub fn with_init(
        config: MultiHeadAttentionConfig,
        init: &LinearInit,
        device: &Device,
    ) -> Result<Self, AttentionError> {
        config.validate()?;
        let d_model = config.d_model;
        let full = LinearConfig::without_bias(d_model, d_model);
        let per_head = LinearConfig::without_bias(d_model, config.d_head()).fused(config.num_heads);

        Ok(Self {
            kernel_config: config.kernel_config(),
            kernel: ScaledDotProductAttention::new(),
            w_q: Linear::with_init(full.clone(), init, device)?,
            w_k: Linear::with_init(full.clone(), init, device)?,
            w_v: Linear::with_init(full.clone(), init, device)?,
            w_o: Linear::with_init(full, init, device)?,
            head_q: Linear::with_init(per_head.clone(), init, device)?,
            head_k: Linear::with_init(per_head.clone(), init, device)?,
            head_v: Linear::with_init(per_head, init, device)?,
            config,
        })
    }

    pub fn config(&self) -> &MultiHeadAttentionConfig {
        &self.config
    }

    /// Weight `[d_head, d_model]` of head `index` for the given role.
    pub fn head_projection(&self, kind: ProjectionKind, index: usize) -> Result<Tensor, AttentionError> {
        if index >= self.config.num_heads {
            return Err(AttentionError::InvalidConfiguration(format!(
                "head index {index} out of range for {} heads",
                self.config.num_heads
            )));
        }
        let fused = match kind {
            ProjectionKind::Query => &self.head_q,
            ProjectionKind::Key => &self.head_k,
            ProjectionKind::Value => &self.head_v,
        };
        Ok(fused.shard(index)?)
    }

    /// Full-width input projection `[d_model, d_model]` for the given role.
    pub fn input_projection(&self, kind: ProjectionKind) -> &Tensor {
        match kind {
            ProjectionKind::Query => self.w_q.weight(),
            ProjectionKind::Key => self.w_k.weight(),
            ProjectionKind::Value => self.w_v.weight(),
        }
    }

    pub fn output_projection(&self) -> &Tensor {
        self.w_o.weight()
    }

    /// Inference forward pass.
    pub fn forward(&self, hidden: &Tensor, mask: Option<&Tensor>) -> Result<Tensor, AttentionError> {
        self.forward_t(hidden, mask, false)
    }

    /// Self-attention over `hidden [batch, seq, d_model]`.
    ///
    /// `mask` may be `[seq, seq]`, `[1 | batch, seq, seq]` or already carry a
    /// head axis; rank-3 masks are broadcast over heads.
    pub fn forward_t(
        &self,
        hidden: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor, AttentionError> {
        let (batch, seq, width) = hidden.dims3().map_err(|_| {
            AttentionError::ShapeMismatch(format!(
                "attention input must be [batch, seq, d_model], got {:?}",
                hidden.dims()
            ))
        })?;
        if width != self.config.d_model {
            return Err(AttentionError::ShapeMismatch(format!(
                "attention input width {width} differs from d_model {}",
                self.config.d_model
            )));
        }

        let q = self.split_heads(&self.head_q.forward(&self.w_q.forward(hidden)?)?, batch, seq)?;
        let k = self.split_heads(&self.head_k.forward(&self.w_k.forward(hidden)?)?, batch, seq)?;
        let v = self.split_heads(&self.head_v.forward(&self.w_v.forward(hidden)?)?, batch, seq)?;

        let head_mask = match mask {
            Some(mask) if mask.rank() == 3 => Some(mask.unsqueeze(1)?),
            Some(mask) => Some(mask.clone()),
            None => None,
        };

        let heads = self
            .kernel
            .attend(&q, &k, &v, head_mask.as_ref(), &self.kernel_config, train)?;

        let merged = heads
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq, self.config.d_model))?;
        Ok(self.w_o.forward(&merged)?)
    }

    /// `[B, T, H * d_head]` → `[B, H, T, d_head]`.
    fn split_heads(&self, packed: &Tensor, batch: usize, seq: usize) -> Result<Tensor, AttentionError> {
        Ok(packed
            .reshape((batch, seq, self.config.num_heads, self.config.d_head()))?
            .transpose(1, 2)?
            .contiguous()?)
    }
}

impl Sublayer for MultiHeadAttention {
    type Error = AttentionError;

    fn forward(&self, hidden: &Tensor, ctx: &SublayerContext<'_>) -> Result<Tensor, AttentionError> {
        self.forward_t(hidden, ctx.mask, ctx.train)
    }
}
