//! Turning last-position logits into token ids.
//!
//! Multinomial draws go through `rand`'s `WeightedIndex` over the
//! temperature-scaled softmax, optionally narrowed by top-k and nucleus
//! (top-p) filtering. Greedy decoding takes the arg-max and ignores the RNG.

use candle_core::{Tensor, D};
use candle_nn::ops::softmax_last_dim;
use rand::{distributions::WeightedIndex, prelude::Distribution, rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::errors::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    /// Draw from the temperature-scaled distribution.
    #[default]
    Multinomial,
    /// Always pick the most likely token.
    Greedy,
}

/// `softmax(logits / temperature)` along the vocabulary axis.
///
/// Logits are shifted to a zero row maximum before the division, so any
/// positive temperature is accepted and the result tends to the arg-max as the
/// temperature goes to zero.
pub fn scaled_probabilities(logits: &Tensor, temperature: f64) -> Result<Tensor, ModelError> {
    if !(temperature.is_finite() && temperature > 0.0) {
        return Err(ModelError::invalid(format!(
            "sampling temperature must be finite and > 0, got {temperature}"
        )));
    }
    let row_max = logits.max_keepdim(D::Minus1)?;
    let inverse = (1.0 / temperature).min(f64::from(f32::MAX));
    let scaled = logits.broadcast_sub(&row_max)?.affine(inverse, 0.0)?;
    Ok(softmax_last_dim(&scaled.contiguous()?)?)
}

/// Per-generation sampling state.
#[derive(Debug)]
pub struct Sampler {
    strategy: SamplingStrategy,
    temperature: f64,
    top_k: Option<usize>,
    top_p: Option<f64>,
    rng: StdRng,
}

impl Sampler {
    pub fn new(
        strategy: SamplingStrategy,
        temperature: f64,
        top_k: Option<usize>,
        top_p: Option<f64>,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            strategy,
            temperature,
            top_k,
            top_p,
            rng,
        }
    }

    /// Picks one token per row of `logits [batch, vocab]`.
    pub fn sample(&mut self, logits: &Tensor) -> Result<Vec<u32>, ModelError> {
        let (_batch, vocab) = logits.dims2().map_err(|_| {
            ModelError::shape(format!(
                "expected [batch, vocab] logits, got {:?}",
                logits.dims()
            ))
        })?;
        if vocab == 0 {
            return Err(ModelError::shape("vocabulary axis is empty"));
        }

        match self.strategy {
            SamplingStrategy::Greedy => Ok(logits.argmax(D::Minus1)?.to_vec1::<u32>()?),
            SamplingStrategy::Multinomial => {
                let probs = scaled_probabilities(logits, self.temperature)?.to_vec2::<f32>()?;
                probs.iter().map(|row| self.sample_row(row)).collect()
            }
        }
    }

    fn sample_row(&mut self, probs: &[f32]) -> Result<u32, ModelError> {
        if probs.iter().any(|p| !p.is_finite()) {
            return Err(ModelError::NumericalInstability(
                "sampling distribution contains non-finite values".into(),
            ));
        }
        let mut weights = probs.to_vec();
        if let Some(k) = self.top_k {
            keep_top_k(&mut weights, k);
        }
        if let Some(p) = self.top_p {
            keep_nucleus(&mut weights, p);
        }
        let dist = WeightedIndex::new(&weights).map_err(|err| {
            ModelError::NumericalInstability(format!("cannot sample from distribution: {err}"))
        })?;
        Ok(dist.sample(&mut self.rng) as u32)
    }
}

fn descending(weights: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..weights.len()).collect();
    order.sort_by(|&a, &b| {
        weights[b]
            .partial_cmp(&weights[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order
}

/// Zeroes everything outside the `k` most likely tokens.
fn keep_top_k(weights: &mut [f32], k: usize) {
    let k = k.max(1);
    if k >= weights.len() {
        return;
    }
    for idx in descending(weights).into_iter().skip(k) {
        weights[idx] = 0.0;
    }
}

/// Keeps the smallest set of most likely tokens whose mass reaches `p`.
fn keep_nucleus(weights: &mut [f32], p: f64) {
    let total: f32 = weights.iter().sum();
    if total <= 0.0 {
        return;
    }
    let mut cumulative = 0.0f32;
    let mut allowed = vec![false; weights.len()];
    for idx in descending(weights) {
        cumulative += weights[idx] / total;
        allowed[idx] = true;
        if cumulative >= p as f32 {
            break;
        }
    }
    for (weight, keep) in weights.iter_mut().zip(allowed) {
        if !keep {
            *weight = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn entropy(probs: &[f32]) -> f32 {
        probs
            .iter()
            .filter(|&&p| p > 0.0)
            .map(|&p| -p * p.ln())
            .sum()
    }

    #[test]
    fn low_temperature_concentrates_mass() -> Result<(), ModelError> {
        let logits = Tensor::new(&[[0.5f32, 2.0, -1.0, 1.0]], &Device::Cpu)?;
        let cold = scaled_probabilities(&logits, 0.01)?.squeeze(0)?.to_vec1::<f32>()?;
        let hot = scaled_probabilities(&logits, 100.0)?.squeeze(0)?.to_vec1::<f32>()?;
        assert!(entropy(&cold) < entropy(&hot));
        assert!(cold[1] > 0.99);
        assert!(scaled_probabilities(&logits, 0.0).is_err());
        Ok(())
    }

    fn empirical_entropy(draws: &[u32], vocab: usize) -> f32 {
        let mut counts = vec![0usize; vocab];
        for &token in draws {
            counts[token as usize] += 1;
        }
        let freqs: Vec<f32> = counts
            .iter()
            .map(|&c| c as f32 / draws.len() as f32)
            .collect();
        entropy(&freqs)
    }

    #[test]
    fn drawn_tokens_concentrate_at_low_temperature() -> Result<(), ModelError> {
        let logits = Tensor::new(&[[0.5f32, 2.0, -1.0, 1.0, 0.0]], &Device::Cpu)?;
        let draw = |temperature| -> Result<Vec<u32>, ModelError> {
            let mut sampler =
                Sampler::new(SamplingStrategy::Multinomial, temperature, None, None, Some(11));
            (0..2000).map(|_| sampler.sample(&logits).map(|t| t[0])).collect()
        };
        let cold = draw(0.01)?;
        let hot = draw(100.0)?;
        assert!(empirical_entropy(&cold, 5) < empirical_entropy(&hot, 5));
        assert!(cold.iter().all(|&t| t == 1));
        Ok(())
    }

    #[test]
    fn vanishing_temperature_samples_arg_max() -> Result<(), ModelError> {
        let logits = Tensor::new(&[[0.5f32, 20.0, -10.0, 1.0]], &Device::Cpu)?;
        for temperature in [1e-3, 1e-20, 1e-37, 1e-39, 1e-300] {
            let mut sampler =
                Sampler::new(SamplingStrategy::Multinomial, temperature, None, None, Some(5));
            assert_eq!(sampler.sample(&logits)?, vec![1]);
        }
        Ok(())
    }

    #[test]
    fn greedy_picks_arg_max_per_row() -> Result<(), ModelError> {
        let logits = Tensor::new(&[[0.1f32, 3.0, 0.2], [5.0, 1.0, 4.9]], &Device::Cpu)?;
        let mut sampler = Sampler::new(SamplingStrategy::Greedy, 1.0, None, None, None);
        assert_eq!(sampler.sample(&logits)?, vec![1, 0]);
        Ok(())
    }

    #[test]
    fn seeded_sampling_is_reproducible() -> Result<(), ModelError> {
        let logits = Tensor::new(&[[0.3f32, 0.1, 0.2, 0.4, 0.0]], &Device::Cpu)?;
        let draw = |seed| -> Result<Vec<u32>, ModelError> {
            let mut sampler = Sampler::new(SamplingStrategy::Multinomial, 1.0, None, None, Some(seed));
            (0..16).map(|_| sampler.sample(&logits).map(|t| t[0])).collect()
        };
        assert_eq!(draw(7)?, draw(7)?);
        Ok(())
    }

    #[test]
    fn top_k_and_top_p_restrict_support() {
        let mut weights = vec![0.1f32, 0.4, 0.2, 0.3];
        keep_top_k(&mut weights, 2);
        assert_eq!(weights, vec![0.0, 0.4, 0.0, 0.3]);

        let mut weights = vec![0.05f32, 0.6, 0.25, 0.1];
        keep_nucleus(&mut weights, 0.8);
        assert_eq!(weights, vec![0.0, 0.6, 0.25, 0.0]);
    }

    #[test]
    fn top_k_one_behaves_like_greedy() -> Result<(), ModelError> {
        let logits = Tensor::new(&[[0.1f32, 0.2, 2.5, 0.3]], &Device::Cpu)?;
        let mut sampler = Sampler::new(SamplingStrategy::Multinomial, 1.0, Some(1), None, Some(3));
        for _ in 0..8 {
            assert_eq!(sampler.sample(&logits)?, vec![2]);
        }
        Ok(())
    }
}
