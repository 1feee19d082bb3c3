//! Embedding crate
//!
//! Token lookup tables and the additive sinusoidal position table that feed
//! the decoder stack.

pub mod positional;
pub mod token;

pub use positional::*;
pub use token::*;
