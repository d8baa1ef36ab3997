//! Stub oracles for exercising the pipeline without a real model.
//!
//! Available when the `test-utils` feature is enabled, and compiled during
//! `#[cfg(test)]` for this crate's own tests.

use crate::{
    error::{Result, ToolformerError},
    model::ModelOracle,
    sampler::TokenDistribution,
    tokenizer::TokenizerOracle,
};

pub const PAD: u32 = 0;
/// `" ["` with the default configuration.
pub const START: u32 = 1000;
/// `" ->"` with the default configuration.
pub const OUTPUT: u32 = 1001;
/// `".\n\n"` with the default configuration.
pub const EOS: u32 = 1002;
/// `"]"` is a plain character token.
pub const END: u32 = ']' as u32;
pub const VOCAB_SIZE: usize = 1024;

const MARKERS: [(&str, u32); 3] = [(" [", START), (" ->", OUTPUT), (".\n\n", EOS)];

/// Character-level tokenizer that merges the default marker literals into single ids.
pub struct MarkerTokenizer {
    pad: Option<u32>,
}

impl MarkerTokenizer {
    pub fn new(pad: u32) -> Self {
        Self { pad: Some(pad) }
    }

    pub fn without_pad() -> Self {
        Self { pad: None }
    }
}

impl TokenizerOracle for MarkerTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let mut ids = Vec::new();
        let mut rest = text;
        'outer: while let Some(c) = rest.chars().next() {
            for (literal, id) in MARKERS {
                if let Some(tail) = rest.strip_prefix(literal) {
                    ids.push(id);
                    rest = tail;
                    continue 'outer;
                }
            }
            if c as usize >= START as usize {
                return Err(ToolformerError::oracle(format!(
                    "unsupported character {c:?}"
                )));
            }
            ids.push(c as u32);
            rest = &rest[c.len_utf8()..];
        }
        Ok(ids)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let mut text = String::new();
        for id in ids {
            if let Some((literal, _)) = MARKERS.iter().find(|(_, m)| m == id) {
                text.push_str(literal);
            } else if *id == PAD {
                continue;
            } else {
                let c = char::from_u32(*id)
                    .ok_or_else(|| ToolformerError::oracle(format!("unknown id {id}")))?;
                text.push(c);
            }
        }
        Ok(text)
    }

    fn pad_token_id(&self) -> Option<u32> {
        self.pad
    }
}

/// A distribution ranking `ranked` first, in the given order, with a small
/// floor of probability mass on every other token.
pub fn ranked_distribution(ranked: &[u32]) -> TokenDistribution {
    let mut probs = vec![1e-4f32; VOCAB_SIZE];
    for (i, id) in ranked.iter().enumerate() {
        probs[*id as usize] = (ranked.len() - i) as f32;
    }
    let total: f32 = probs.iter().sum();
    for p in &mut probs {
        *p /= total;
    }
    TokenDistribution::new(probs).expect("ranked distribution is valid")
}

/// A model whose next-token ranking is computed by a closure over the context.
pub struct ScriptedModel<F> {
    script: F,
    calls: usize,
}

impl<F> ScriptedModel<F>
where
    F: FnMut(&[u32]) -> Vec<u32>,
{
    pub fn new(script: F) -> Self {
        Self { script, calls: 0 }
    }

    /// Number of distribution requests served so far.
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl<F> ModelOracle for ScriptedModel<F>
where
    F: FnMut(&[u32]) -> Vec<u32>,
{
    fn next_token_distribution(&mut self, tokens: &[u32]) -> Result<TokenDistribution> {
        self.calls += 1;
        Ok(ranked_distribution(&(self.script)(tokens)))
    }
}

/// A model whose every call fails.
pub struct FailingModel;

impl ModelOracle for FailingModel {
    fn next_token_distribution(&mut self, _tokens: &[u32]) -> Result<TokenDistribution> {
        Err(ToolformerError::oracle("the model is unavailable"))
    }
}
