//! Self-supervised generation of tool-use training data.
//!
//! A language model continues a prompt while the positions where it would
//! likely open a tool call are recorded. Each such position is re-generated
//! into a candidate call, and a [`CandidateFilter`] keeps the calls whose
//! results make the rest of the text easier to predict.

use std::sync::atomic::AtomicBool;

mod call;
mod config;
mod data_generator;
mod error;
mod expansion;
mod filter;
mod generation;
pub mod model;
mod prompt;
mod sampler;
mod special_tokens;
mod tokenizer;
pub mod tools;
mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use call::ToolCall;
pub use config::DataGeneratorConfig;
pub use data_generator::{DataGenerator, ScoredCandidate};
pub use error::{Result, ToolformerError};
pub use expansion::{Candidate, CandidateExpander};
pub use filter::{
    AcceptAll, AcceptanceDecision, CandidateFilter, LossReductionFilter, LossScores,
    RejectionReason, ScoringContext, WEIGHT_HORIZON,
};
pub use generation::{Generation, TriggerGenerator, TriggerPosition};
pub use model::{LlamaOracle, LlamaPaths, ModelOracle};
pub use prompt::{PromptTemplate, CALCULATOR_PROMPT};
pub use sampler::{DecodingStrategy, Sampler, TokenDistribution, MIN_PROBABILITY};
pub use special_tokens::SpecialTokens;
pub use tokenizer::{HfTokenizer, TokenizerOracle};
pub use tools::{Calculator, Calendar, FnTool, ToolAdapter, ToolError, ToolRegistry};
pub use utils::log::initialize_logging;

/// `true` if `TOOLFORMER_DEBUG=1`
pub(crate) static DEBUG: AtomicBool = AtomicBool::new(false);
