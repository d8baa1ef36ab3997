use serde::Serialize;
use tracing::debug;

use crate::{
    config::DataGeneratorConfig,
    error::{Result, ToolformerError},
    model::ModelOracle,
    sampler::{DecodingStrategy, Sampler},
    special_tokens::SpecialTokens,
};

/// A place where the model signalled it may want to call a tool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TriggerPosition {
    /// Index in the generated sequence where the start marker would be spliced.
    pub index: usize,
    /// Generation step (0-based) at which the trigger was detected.
    pub step: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GenerationState {
    Generating,
    Done,
}

/// Output of [`TriggerGenerator::generate_with_triggers`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Generation {
    tokens: Vec<u32>,
    trigger_positions: Vec<TriggerPosition>,
    prompt_len: usize,
}

impl Generation {
    /// Prompt followed by every generated token, ending with the eos token.
    pub fn tokens(&self) -> &[u32] {
        &self.tokens
    }

    /// Strictly increasing, each `index <= tokens().len()`.
    pub fn trigger_positions(&self) -> &[TriggerPosition] {
        &self.trigger_positions
    }

    pub fn prompt_len(&self) -> usize {
        self.prompt_len
    }

    pub fn generated(&self) -> &[u32] {
        &self.tokens[self.prompt_len..]
    }

    pub fn steps(&self) -> usize {
        self.tokens.len() - self.prompt_len
    }
}

/// Step-by-step decoding that records where the start marker ranks among
/// the top-K next tokens.
#[derive(Clone, Debug)]
pub struct TriggerGenerator {
    start_token: u32,
    eos_token: u32,
    top_k: usize,
    max_steps: usize,
    strategy: DecodingStrategy,
    sampling_threshold: f32,
}

impl TriggerGenerator {
    pub fn new(config: &DataGeneratorConfig, special: &SpecialTokens) -> Self {
        Self {
            start_token: special.start(),
            eos_token: special.eos(),
            top_k: config.top_k,
            max_steps: config.max_generation_steps,
            strategy: config.decoding.clone(),
            sampling_threshold: config.sampling_threshold,
        }
    }

    /// Generate from a single prompt until the eos token.
    ///
    /// One model call is made per generated token. Reaching the step ceiling
    /// without eos is a capacity error, and model errors are propagated as is.
    pub fn generate_with_triggers(
        &self,
        model: &mut dyn ModelOracle,
        prompt_ids: &[u32],
    ) -> Result<Generation> {
        if prompt_ids.is_empty() {
            return Err(ToolformerError::config("the prompt encodes to no tokens"));
        }
        let mut tokens = prompt_ids.to_vec();
        let mut trigger_positions = Vec::new();
        let mut sampler = Sampler::new(&self.strategy, self.sampling_threshold);
        let mut state = GenerationState::Generating;
        let mut step = 0;

        while state == GenerationState::Generating {
            if step == self.max_steps {
                return Err(ToolformerError::Capacity(format!(
                    "generation reached the ceiling of {} steps without the end-of-generation token",
                    self.max_steps
                )));
            }
            let dist = model.next_token_distribution(&tokens)?;
            if dist.top_k(self.top_k).contains(&self.start_token) {
                debug!("Trigger at index {} (step {step}).", tokens.len());
                trigger_positions.push(TriggerPosition {
                    index: tokens.len(),
                    step,
                });
            }
            let next = sampler.sample(&dist)?;
            tokens.push(next);
            step += 1;
            if next == self.eos_token {
                state = GenerationState::Done;
            }
        }

        Ok(Generation {
            tokens,
            trigger_positions,
            prompt_len: prompt_ids.len(),
        })
    }
}
