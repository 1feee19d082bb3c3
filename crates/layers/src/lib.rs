//! Building blocks for decoder layers.
//!
//! Dense projections, layer normalisation, the feed-forward block, and the
//! pre-norm residual wrapper, all assembled from Candle primitives and working
//! in `f32` on `(batch, seq, hidden)` tensors.

pub mod activations;
pub mod checks;
pub mod linear;
pub mod mlp;
pub mod norm;
pub mod residual;

pub use activations::ActivationKind;
pub use linear::{Linear, LinearConfig, LinearInit};
pub use mlp::{FeedForward, FeedForwardConfig};
pub use norm::{LayerNorm, NormConfig};
pub use residual::{Residual, ResidualConfig, Sublayer, SublayerContext};
