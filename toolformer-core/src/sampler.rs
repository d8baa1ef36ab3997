#![allow(clippy::cast_possible_truncation)]

use candle_core::{DType, Tensor, D};
use rand::{
    distributions::{Distribution, WeightedIndex},
    SeedableRng,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ToolformerError};

/// Probabilities below this are clamped before taking a logarithm.
pub const MIN_PROBABILITY: f32 = 1e-10;

/// A probability vector over the vocabulary for the next token.
#[derive(Clone, Debug, PartialEq)]
pub struct TokenDistribution {
    probs: Vec<f32>,
}

impl TokenDistribution {
    pub fn new(probs: Vec<f32>) -> Result<Self> {
        if probs.is_empty() {
            return Err(ToolformerError::oracle("received an empty distribution"));
        }
        if probs.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(ToolformerError::oracle(
                "distribution contains negative or non-finite probabilities",
            ));
        }
        Ok(Self { probs })
    }

    /// Apply a softmax over the last dimension of a rank-1 logits tensor.
    pub fn from_logits(logits: &Tensor) -> Result<Self> {
        let logits = logits.to_dtype(DType::F32)?;
        let probs = candle_nn::ops::softmax(&logits, D::Minus1)?;
        Self::new(probs.to_vec1::<f32>()?)
    }

    pub fn len(&self) -> usize {
        self.probs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probs.is_empty()
    }

    pub fn probs(&self) -> &[f32] {
        &self.probs
    }

    /// Probability of `token`, or zero if it is outside the vocabulary.
    pub fn prob(&self, token: u32) -> f32 {
        self.probs.get(token as usize).copied().unwrap_or(0.0)
    }

    /// Natural log probability of `token`, floored at [`MIN_PROBABILITY`].
    pub fn log_prob(&self, token: u32) -> f32 {
        self.prob(token).max(MIN_PROBABILITY).ln()
    }

    /// The most probable token. Ties resolve to the lowest id.
    pub fn argmax(&self) -> u32 {
        let mut best = 0;
        for (i, p) in self.probs.iter().enumerate() {
            if *p > self.probs[best] {
                best = i;
            }
        }
        best as u32
    }

    /// The `k` most probable tokens in descending order. Ties resolve to the lowest id.
    pub fn top_k(&self, k: usize) -> Vec<u32> {
        let mut argsort_indices = (0..self.probs.len()).collect::<Vec<_>>();
        // Sort by descending probability, stable so equal probabilities keep id order.
        argsort_indices.sort_by(|&i, &j| self.probs[j].total_cmp(&self.probs[i]));
        argsort_indices
            .into_iter()
            .take(k)
            .map(|i| i as u32)
            .collect()
    }
}

/// How the next token is chosen during trigger-gated generation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum DecodingStrategy {
    /// Pure argmax over the full distribution.
    #[default]
    Greedy,
    /// Sample among tokens whose probability reaches the sampling threshold.
    Sampling { seed: u64 },
}

/// Chooses tokens from a [`TokenDistribution`].
///
/// A sampler is created per generation so seeded sampling is reproducible
/// across calls with identical inputs.
pub struct Sampler {
    rng: Option<rand::rngs::StdRng>,
    threshold: f32,
}

impl Sampler {
    pub fn new(strategy: &DecodingStrategy, sampling_threshold: f32) -> Self {
        let rng = match strategy {
            DecodingStrategy::Greedy => None,
            DecodingStrategy::Sampling { seed } => Some(rand::rngs::StdRng::seed_from_u64(*seed)),
        };
        Self {
            rng,
            threshold: sampling_threshold,
        }
    }

    /// Sample the next token.
    ///
    /// Without a seed, argmax sampling is used. Otherwise every probability
    /// below the threshold is clamped to zero and the rest is sampled
    /// multinomially. If nothing survives the clamp, argmax is used.
    pub fn sample(&mut self, dist: &TokenDistribution) -> Result<u32> {
        match self.rng {
            None => Ok(dist.argmax()),
            Some(_) => self.sample_thresholded(dist),
        }
    }

    fn sample_thresholded(&mut self, dist: &TokenDistribution) -> Result<u32> {
        let probs = dist
            .probs()
            .iter()
            .map(|p| if *p < self.threshold { 0.0 } else { *p })
            .collect::<Vec<_>>();
        if probs.iter().all(|p| *p == 0.0) {
            return Ok(dist.argmax());
        }
        let Some(rng) = self.rng.as_mut() else {
            return Ok(dist.argmax());
        };
        let distr = WeightedIndex::new(&probs).map_err(ToolformerError::oracle)?;
        Ok(distr.sample(rng) as u32)
    }
}
