//! Positional encodings added to token embeddings.

pub mod sinusoidal;

pub use sinusoidal::{SinusoidalConfig, SinusoidalPositionalEncoding};
