use serde::Serialize;
use tracing::debug;

use crate::{
    config::DataGeneratorConfig,
    error::{Result, ToolformerError},
    generation::TriggerPosition,
    model::ModelOracle,
    special_tokens::SpecialTokens,
};

/// One materialized tool-call continuation.
///
/// `tokens` holds the prefix up to the trigger position, the start marker and
/// the generated continuation, right-padded to a fixed width.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Candidate {
    position: TriggerPosition,
    tokens: Vec<u32>,
    content_len: usize,
}

impl Candidate {
    pub fn position(&self) -> TriggerPosition {
        self.position
    }

    /// All tokens, padding included.
    pub fn tokens(&self) -> &[u32] {
        &self.tokens
    }

    pub fn width(&self) -> usize {
        self.tokens.len()
    }

    /// Tokens without padding.
    pub fn content(&self) -> &[u32] {
        &self.tokens[..self.content_len]
    }

    pub fn padding(&self) -> &[u32] {
        &self.tokens[self.content_len..]
    }

    /// The full sequence up to the trigger position.
    pub fn prefix(&self) -> &[u32] {
        &self.tokens[..self.position.index]
    }

    /// The start marker and everything generated after it.
    pub fn call_tokens(&self) -> &[u32] {
        &self.content()[self.position.index..]
    }

    /// Tokens between the start marker and the first end or eos marker.
    pub fn call_body(&self, end: u32, eos: u32) -> &[u32] {
        let after_start = &self.call_tokens()[1..];
        let stop = after_start
            .iter()
            .position(|t| *t == end || *t == eos)
            .unwrap_or(after_start.len());
        &after_start[..stop]
    }
}

/// Re-generates from each trigger position to produce candidate calls.
#[derive(Clone, Debug)]
pub struct CandidateExpander {
    start_token: u32,
    eos_token: u32,
    pad_token: u32,
    max_new_tokens: usize,
    max_width: usize,
}

impl CandidateExpander {
    pub fn new(config: &DataGeneratorConfig, special: &SpecialTokens, pad_token: u32) -> Self {
        Self {
            start_token: special.start(),
            eos_token: special.eos(),
            pad_token,
            max_new_tokens: config.max_new_tokens,
            max_width: config.max_candidate_width,
        }
    }

    /// Produce one candidate per trigger position, in order.
    ///
    /// `positions` must come from the generation that produced
    /// `full_sequence`; they are validated before any model call.
    pub fn expand(
        &self,
        model: &mut dyn ModelOracle,
        positions: &[TriggerPosition],
        full_sequence: &[u32],
    ) -> Result<Vec<Candidate>> {
        validate_positions(positions, full_sequence.len())?;

        let mut candidates = Vec::with_capacity(positions.len());
        for position in positions {
            let mut seed = Vec::with_capacity(position.index + 1);
            seed.extend_from_slice(&full_sequence[..position.index]);
            seed.push(self.start_token);

            let output = model.constrained_generate(&seed, self.eos_token, self.max_new_tokens)?;
            if !output.starts_with(&seed) {
                return Err(ToolformerError::oracle(format!(
                    "constrained generation at index {} did not extend its seed",
                    position.index
                )));
            }
            if output.len() > self.max_width {
                return Err(ToolformerError::Capacity(format!(
                    "candidate at index {} has {} tokens, more than the maximum width of {}",
                    position.index,
                    output.len(),
                    self.max_width
                )));
            }
            debug!(
                "Expanded index {} into {} new tokens.",
                position.index,
                output.len() - seed.len()
            );

            let content_len = output.len();
            let mut tokens = output;
            tokens.resize(self.max_width, self.pad_token);
            candidates.push(Candidate {
                position: *position,
                tokens,
                content_len,
            });
        }
        Ok(candidates)
    }
}

fn validate_positions(positions: &[TriggerPosition], len: usize) -> Result<()> {
    let mut previous: Option<usize> = None;
    for position in positions {
        if position.index > len {
            return Err(ToolformerError::InvalidTriggerPosition {
                index: position.index,
                len,
            });
        }
        if let Some(previous) = previous {
            if position.index <= previous {
                return Err(ToolformerError::UnorderedTriggerPositions {
                    previous,
                    index: position.index,
                });
            }
        }
        previous = Some(position.index);
    }
    Ok(())
}
