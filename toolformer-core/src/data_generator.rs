use std::sync::atomic::Ordering;

use serde::Serialize;
use tracing::{debug, info};

use crate::{
    config::DataGeneratorConfig,
    error::{Result, ToolformerError},
    expansion::{Candidate, CandidateExpander},
    filter::{AcceptanceDecision, CandidateFilter, LossReductionFilter, ScoringContext},
    generation::TriggerGenerator,
    model::ModelOracle,
    prompt::PromptTemplate,
    special_tokens::SpecialTokens,
    tokenizer::TokenizerOracle,
    tools::ToolRegistry,
    DEBUG,
};

/// A candidate together with the filter's verdict on it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub decision: AcceptanceDecision,
}

/// Drives prompt formatting, trigger-gated generation, candidate expansion
/// and filtering for one document at a time.
///
/// Filtering defaults to [`LossReductionFilter`] and tools to
/// [`ToolRegistry::with_defaults`], which holds no clock-dependent tool.
pub struct DataGenerator {
    config: DataGeneratorConfig,
    special: SpecialTokens,
    model: Box<dyn ModelOracle>,
    tokenizer: Box<dyn TokenizerOracle>,
    tools: ToolRegistry,
    filter: Box<dyn CandidateFilter>,
    generator: TriggerGenerator,
    expander: CandidateExpander,
}

impl DataGenerator {
    /// Fails with [`ToolformerError::Configuration`] on invalid options, an
    /// unencodable marker literal or a tokenizer without a pad token.
    pub fn new(
        config: DataGeneratorConfig,
        model: Box<dyn ModelOracle>,
        tokenizer: Box<dyn TokenizerOracle>,
    ) -> Result<Self> {
        config.validate()?;
        let special = SpecialTokens::resolve(&config, tokenizer.as_ref())?;
        let pad_token = tokenizer.pad_token_id().ok_or_else(|| {
            ToolformerError::config(
                "the tokenizer has no pad token; one is required to pad candidates",
            )
        })?;
        debug!(
            "Special tokens: start={}, end={}, output={}, eos={}, pad={pad_token}",
            special.start(),
            special.end(),
            special.output(),
            special.eos()
        );

        Ok(Self {
            generator: TriggerGenerator::new(&config, &special),
            expander: CandidateExpander::new(&config, &special, pad_token),
            filter: Box::new(LossReductionFilter::from_config(&config)),
            tools: ToolRegistry::with_defaults(),
            config,
            special,
            model,
            tokenizer,
        })
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_filter<F: CandidateFilter + 'static>(mut self, filter: F) -> Self {
        self.filter = Box::new(filter);
        self
    }

    pub fn config(&self) -> &DataGeneratorConfig {
        &self.config
    }

    pub fn special_tokens(&self) -> &SpecialTokens {
        &self.special
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Candidates the filter accepted, in trigger order.
    pub fn generate(
        &mut self,
        template: &PromptTemplate,
        input: &str,
    ) -> Result<Vec<ScoredCandidate>> {
        let mut scored = self.generate_scored(template, input)?;
        scored.retain(|c| c.decision.accepted);
        Ok(scored)
    }

    /// Every candidate with its decision, in trigger order.
    ///
    /// Errors before filtering abort the call; filtering itself never fails.
    pub fn generate_scored(
        &mut self,
        template: &PromptTemplate,
        input: &str,
    ) -> Result<Vec<ScoredCandidate>> {
        let prompt = template.format(input)?;
        let prompt_ids = self.tokenizer.encode(&prompt)?;

        let generation = self
            .generator
            .generate_with_triggers(self.model.as_mut(), &prompt_ids)?;
        info!(
            "Generated {} tokens after a {}-token prompt, {} trigger positions.",
            generation.steps(),
            generation.prompt_len(),
            generation.trigger_positions().len()
        );

        let candidates = self.expander.expand(
            self.model.as_mut(),
            generation.trigger_positions(),
            generation.tokens(),
        )?;

        let mut scored = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if DEBUG.load(Ordering::Relaxed) {
                let index = candidate.position().index;
                match self.tokenizer.decode(candidate.content()) {
                    Ok(text) => debug!("Candidate at index {index}: {text:?}"),
                    Err(e) => debug!("Candidate at index {index} could not be decoded: {e}"),
                }
            }
            let mut ctx = ScoringContext {
                model: self.model.as_mut(),
                tokenizer: self.tokenizer.as_ref(),
                tools: &self.tools,
                special: &self.special,
                full_sequence: generation.tokens(),
            };
            let decision = self.filter.decide(&mut ctx, &candidate);
            scored.push(ScoredCandidate {
                candidate,
                decision,
            });
        }

        info!(
            "Accepted {} of {} candidates.",
            scored.iter().filter(|c| c.decision.accepted).count(),
            scored.len()
        );
        Ok(scored)
    }

    /// The candidate's content, padding excluded, as text.
    pub fn decode_candidate(&self, candidate: &Candidate) -> Result<String> {
        self.tokenizer.decode(candidate.content())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        filter::AcceptAll,
        test_utils::{MarkerTokenizer, ScriptedModel, EOS, PAD, START},
    };

    fn eos_model() -> Box<dyn ModelOracle> {
        Box::new(ScriptedModel::new(|_: &[u32]| vec![EOS]))
    }

    // Encodes like `MarkerTokenizer` but cannot decode anything.
    struct EncodeOnlyTokenizer(MarkerTokenizer);

    impl TokenizerOracle for EncodeOnlyTokenizer {
        fn encode(&self, text: &str) -> Result<Vec<u32>> {
            self.0.encode(text)
        }

        fn decode(&self, _ids: &[u32]) -> Result<String> {
            Err(ToolformerError::oracle("decoding is unsupported"))
        }

        fn pad_token_id(&self) -> Option<u32> {
            self.0.pad_token_id()
        }
    }

    #[test]
    fn test_requires_pad_token() {
        let err = DataGenerator::new(
            DataGeneratorConfig::default(),
            eos_model(),
            Box::new(MarkerTokenizer::without_pad()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ToolformerError::Configuration(_)));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = DataGeneratorConfig {
            top_k: 0,
            ..Default::default()
        };
        let err = DataGenerator::new(config, eos_model(), Box::new(MarkerTokenizer::new(PAD)))
            .err()
            .unwrap();
        assert!(matches!(err, ToolformerError::Configuration(_)));
    }

    #[test]
    fn test_no_triggers_no_candidates() {
        let mut generator = DataGenerator::new(
            DataGeneratorConfig::default(),
            eos_model(),
            Box::new(MarkerTokenizer::new(PAD)),
        )
        .unwrap();
        let names: Vec<_> = generator.tools().names().collect();
        assert_eq!(names, ["Calculator"]);
        let template = PromptTemplate::new("Q: {input}").unwrap();
        let scored = generator.generate_scored(&template, "hello").unwrap();
        assert!(scored.is_empty());
    }

    #[test]
    fn test_encoding_errors_abort() {
        let mut generator = DataGenerator::new(
            DataGeneratorConfig::default(),
            eos_model(),
            Box::new(MarkerTokenizer::new(PAD)),
        )
        .unwrap();
        let template = PromptTemplate::new("Q: {input}").unwrap();
        let err = generator.generate(&template, "5 \u{20ac}").unwrap_err();
        assert!(matches!(err, ToolformerError::ModelOracle(_)));
    }

    #[test]
    fn test_debug_decode_failure_is_not_fatal() {
        // "Q: hello" is eight tokens.
        let model = ScriptedModel::new(|ctx: &[u32]| match ctx.len() {
            8 => vec![START, '4' as u32],
            9 => vec!['4' as u32],
            _ => vec![EOS],
        });
        let mut generator = DataGenerator::new(
            DataGeneratorConfig::default(),
            Box::new(model),
            Box::new(EncodeOnlyTokenizer(MarkerTokenizer::new(PAD))),
        )
        .unwrap()
        .with_filter(AcceptAll);
        DEBUG.store(true, Ordering::Relaxed);
        let template = PromptTemplate::new("Q: {input}").unwrap();
        let scored = generator.generate_scored(&template, "hello").unwrap();
        assert_eq!(scored.len(), 1);
        assert!(scored[0].decision.accepted);
        assert!(generator.decode_candidate(&scored[0].candidate).is_err());
    }
}
