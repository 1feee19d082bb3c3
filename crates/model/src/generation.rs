//! Autoregressive generation.
//!
//! Each step rebuilds a `[1, len, len]` causal mask, runs the full forward pass
//! over the whole sequence (nothing is cached between steps), samples one
//! token per batch row from the last position and appends it. The loop is
//! [`GenerationState::Extending`] until the sequence reaches `max_length`, or
//! until every row has emitted the stop token.

use attention::masks::build_causal_mask;
use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};

use crate::{
    errors::ModelError,
    model::SequenceModel,
    sampling::{Sampler, SamplingStrategy},
};

/// Knobs for one generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Total length of the returned sequences, prompt included.
    pub max_length: usize,
    /// Divisor applied to the logits before the softmax.
    pub temperature: f64,
    pub strategy: SamplingStrategy,
    pub top_k: Option<usize>,
    pub top_p: Option<f64>,
    /// Rows that emit this token stop; later positions repeat it.
    pub stop_token: Option<u32>,
    /// Seed for a reproducible RNG; entropy-seeded when absent.
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_length: 50,
            temperature: 1.0,
            strategy: SamplingStrategy::Multinomial,
            top_k: None,
            top_p: None,
            stop_token: None,
            seed: None,
        }
    }
}

impl GenerationConfig {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            ..Self::default()
        }
    }

    pub fn greedy(max_length: usize) -> Self {
        Self {
            strategy: SamplingStrategy::Greedy,
            ..Self::new(max_length)
        }
    }

    /// Checks the knobs against the model they will drive.
    pub fn validate(&self, model_max_length: usize) -> Result<(), ModelError> {
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            return Err(ModelError::invalid(format!(
                "sampling temperature must be finite and > 0, got {}",
                self.temperature
            )));
        }
        if self.max_length > model_max_length {
            return Err(ModelError::invalid(format!(
                "max_length {} exceeds the model's positional capacity {}",
                self.max_length, model_max_length
            )));
        }
        if self.top_k == Some(0) {
            return Err(ModelError::invalid("top_k must be at least 1"));
        }
        if let Some(p) = self.top_p {
            if !(p > 0.0 && p <= 1.0) {
                return Err(ModelError::invalid(format!("top_p must be in (0, 1], got {p}")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Extending,
    Done,
}

/// Step-wise driver owning the growing sequence.
///
/// Stepping is the cancellation point: callers may stop calling
/// [`Generator::step`] at any time and keep the tokens produced so far.
#[derive(Debug)]
pub struct Generator<'m> {
    model: &'m SequenceModel,
    config: GenerationConfig,
    sampler: Sampler,
    sequence: Tensor,
    finished: Vec<bool>,
    state: GenerationState,
}

impl<'m> Generator<'m> {
    /// Validates the configuration and prompt before any forward pass.
    pub fn new(
        model: &'m SequenceModel,
        prompt: &Tensor,
        config: GenerationConfig,
    ) -> Result<Self, ModelError> {
        config.validate(model.config().max_length)?;

        let (batch, prompt_len) = prompt.dims2().map_err(|_| {
            ModelError::shape(format!(
                "prompt must be shaped [batch, seq_len], got {:?}",
                prompt.dims()
            ))
        })?;
        if batch == 0 || prompt_len == 0 {
            return Err(ModelError::shape("prompt must be non-empty"));
        }
        if !prompt.dtype().is_int() {
            return Err(ModelError::shape(format!(
                "prompt must have an integer dtype, got {:?}",
                prompt.dtype()
            )));
        }
        model.validate_token_range(prompt)?;

        let state = if prompt_len >= config.max_length {
            GenerationState::Done
        } else {
            GenerationState::Extending
        };
        let sampler = Sampler::new(
            config.strategy,
            config.temperature,
            config.top_k,
            config.top_p,
            config.seed,
        );

        Ok(Self {
            model,
            sampler,
            sequence: prompt.to_dtype(DType::U32)?,
            finished: vec![false; batch],
            state,
            config,
        })
    }

    pub fn state(&self) -> GenerationState {
        self.state
    }

    /// Current `[batch, len]` token ids (`u32`).
    pub fn sequence(&self) -> &Tensor {
        &self.sequence
    }

    pub fn len(&self) -> usize {
        self.sequence.dims()[1]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends one token per row unless generation is already done.
    pub fn step(&mut self) -> Result<GenerationState, ModelError> {
        if self.state == GenerationState::Done {
            return Ok(self.state);
        }

        let len = self.len();
        let device = self.model.device();
        let mask = build_causal_mask(device, 1, len, len)?;
        let logits = self.model.forward(&self.sequence, Some(&mask))?;
        let last = logits.narrow(1, len - 1, 1)?.squeeze(1)?;

        let mut next = self.sampler.sample(&last)?;
        if let Some(stop) = self.config.stop_token {
            for (token, done) in next.iter_mut().zip(self.finished.iter_mut()) {
                if *done {
                    *token = stop;
                } else if *token == stop {
                    *done = true;
                }
            }
        }

        let batch = next.len();
        let column = Tensor::from_vec(next, (batch, 1), device)?;
        self.sequence = Tensor::cat(&[&self.sequence, &column], 1)?;
        log::debug!("generation step: length {} of {}", len + 1, self.config.max_length);

        let all_stopped = self.config.stop_token.is_some() && self.finished.iter().all(|&f| f);
        if len + 1 >= self.config.max_length || all_stopped {
            self.state = GenerationState::Done;
        }
        Ok(self.state)
    }

    /// Steps until done and returns the sequence.
    pub fn run(mut self) -> Result<Tensor, ModelError> {
        while self.step()? == GenerationState::Extending {}
        Ok(self.sequence)
    }
}
