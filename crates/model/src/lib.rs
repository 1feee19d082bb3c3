//! Decoder-only sequence model and its autoregressive generation loop.

pub mod block;
pub mod config;
pub mod errors;
pub mod generation;
pub mod model;
pub mod sampling;
pub mod stack;

pub use block::DecoderBlock;
pub use config::SequenceModelConfig;
pub use errors::ModelError;
pub use generation::{GenerationConfig, GenerationState, Generator};
pub use model::SequenceModel;
pub use sampling::{Sampler, SamplingStrategy};
pub use stack::DecoderStack;
