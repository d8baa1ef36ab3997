mod llama;

pub use llama::{LlamaOracle, LlamaPaths};

use crate::{error::Result, sampler::TokenDistribution};

/// Black-box access to a language model.
///
/// Every call is blocking and may be slow. Failures are fatal to the
/// current generation and are never retried.
pub trait ModelOracle {
    /// Distribution over the next token given the full sequence so far.
    fn next_token_distribution(&mut self, tokens: &[u32]) -> Result<TokenDistribution>;

    /// Greedily extend `seed` until `stop_token` is produced or
    /// `max_new_tokens` tokens were added. Returns the seed followed by the
    /// generated tokens, including the stop token if one was produced.
    fn constrained_generate(
        &mut self,
        seed: &[u32],
        stop_token: u32,
        max_new_tokens: usize,
    ) -> Result<Vec<u32>> {
        let mut tokens = seed.to_vec();
        for _ in 0..max_new_tokens {
            let next = self.next_token_distribution(&tokens)?.argmax();
            tokens.push(next);
            if next == stop_token {
                break;
            }
        }
        Ok(tokens)
    }
}

impl<M: ModelOracle + ?Sized> ModelOracle for Box<M> {
    fn next_token_distribution(&mut self, tokens: &[u32]) -> Result<TokenDistribution> {
        (**self).next_token_distribution(tokens)
    }

    fn constrained_generate(
        &mut self,
        seed: &[u32],
        stop_token: u32,
        max_new_tokens: usize,
    ) -> Result<Vec<u32>> {
        (**self).constrained_generate(seed, stop_token, max_new_tokens)
    }
}
