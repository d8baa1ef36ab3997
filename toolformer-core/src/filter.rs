use serde::Serialize;
use tracing::debug;

use crate::{
    call::ToolCall,
    config::DataGeneratorConfig,
    error::{Result, ToolformerError},
    expansion::Candidate,
    model::ModelOracle,
    special_tokens::SpecialTokens,
    tokenizer::TokenizerOracle,
    tools::{ToolError, ToolRegistry},
};

/// Number of continuation tokens whose likelihood is scored.
pub const WEIGHT_HORIZON: usize = 5;
const WEIGHT_DECAY: f32 = 0.2;

/// Everything a filter may consult while judging one candidate.
pub struct ScoringContext<'a> {
    pub model: &'a mut dyn ModelOracle,
    pub tokenizer: &'a dyn TokenizerOracle,
    pub tools: &'a ToolRegistry,
    pub special: &'a SpecialTokens,
    /// The generated sequence the candidate was expanded from.
    pub full_sequence: &'a [u32],
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RejectionReason {
    MalformedCall(String),
    UnknownTool(String),
    BelowSamplingThreshold { relevance: f32, threshold: f32 },
    ToolFailed(ToolError),
    NothingToPredict,
    InsufficientLossReduction { reduction: f32, threshold: f32 },
    ScoringFailed(String),
}

impl From<ToolformerError> for RejectionReason {
    fn from(err: ToolformerError) -> Self {
        Self::ScoringFailed(err.to_string())
    }
}

/// Weighted negative log-likelihoods of the continuation under the three contexts.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LossScores {
    pub without_call: f32,
    pub with_call: f32,
    pub with_result: f32,
}

impl LossScores {
    pub fn reduction(&self) -> f32 {
        self.without_call.min(self.with_call) - self.with_result
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AcceptanceDecision {
    pub accepted: bool,
    pub call: Option<ToolCall>,
    pub result: Option<String>,
    /// Probability of the start marker right after the prefix.
    pub relevance: Option<f32>,
    pub scores: Option<LossScores>,
    pub rejection: Option<RejectionReason>,
}

impl AcceptanceDecision {
    fn reject(mut self, reason: RejectionReason) -> Self {
        self.accepted = false;
        self.rejection = Some(reason);
        self
    }
}

/// Decides whether a candidate call is worth keeping.
///
/// Deciding never fails: any error while scoring rejects the candidate.
pub trait CandidateFilter {
    fn decide(&self, ctx: &mut ScoringContext<'_>, candidate: &Candidate) -> AcceptanceDecision;
}

impl<F: CandidateFilter + ?Sized> CandidateFilter for Box<F> {
    fn decide(&self, ctx: &mut ScoringContext<'_>, candidate: &Candidate) -> AcceptanceDecision {
        (**self).decide(ctx, candidate)
    }
}

/// Keeps a call only if its result makes the following tokens noticeably more likely.
///
/// The continuation after the trigger position is scored three times: after
/// the bare prefix, after the prefix and the call with an empty result, and
/// after the prefix and the call with its actual result. The call is accepted
/// when the last loss undercuts the better of the first two by at least the
/// filtering threshold.
#[derive(Clone, Debug)]
pub struct LossReductionFilter {
    sampling_threshold: f32,
    filtering_threshold: f32,
}

impl LossReductionFilter {
    pub fn new(sampling_threshold: f32, filtering_threshold: f32) -> Self {
        Self {
            sampling_threshold,
            filtering_threshold,
        }
    }

    pub fn from_config(config: &DataGeneratorConfig) -> Self {
        Self::new(config.sampling_threshold, config.filtering_threshold)
    }

    fn try_decide(
        &self,
        ctx: &mut ScoringContext<'_>,
        candidate: &Candidate,
        decision: &mut AcceptanceDecision,
    ) -> std::result::Result<(), RejectionReason> {
        let special = ctx.special;
        let call = parse_call(ctx.tokenizer, special, candidate)?;
        decision.call = Some(call.clone());

        if ctx.tools.get(&call.tool).is_none() {
            return Err(RejectionReason::UnknownTool(call.tool));
        }

        let prefix = candidate.prefix();
        let relevance = ctx.model.next_token_distribution(prefix)?.prob(special.start());
        decision.relevance = Some(relevance);
        if relevance < self.sampling_threshold {
            return Err(RejectionReason::BelowSamplingThreshold {
                relevance,
                threshold: self.sampling_threshold,
            });
        }

        let result = ctx.tools.invoke(&call).map_err(RejectionReason::ToolFailed)?;
        decision.result = Some(result.clone());

        let index = candidate.position().index;
        let rest = ctx.full_sequence.get(index..).unwrap_or_default();
        let continuation = &rest[..rest.len().min(WEIGHT_HORIZON)];
        if continuation.is_empty() {
            return Err(RejectionReason::NothingToPredict);
        }

        let call_ids = ctx.tokenizer.encode(&call.render())?;
        let result_ids = ctx.tokenizer.encode(&format!(" {result}"))?;

        let mut with_call = prefix.to_vec();
        with_call.push(special.start());
        with_call.extend_from_slice(&call_ids);
        with_call.push(special.output());
        let mut with_result = with_call.clone();
        with_result.extend_from_slice(&result_ids);
        with_call.push(special.end());
        with_result.push(special.end());

        let scores = LossScores {
            without_call: weighted_loss(ctx.model, prefix, continuation)?,
            with_call: weighted_loss(ctx.model, &with_call, continuation)?,
            with_result: weighted_loss(ctx.model, &with_result, continuation)?,
        };
        decision.scores = Some(scores);

        let reduction = scores.reduction();
        if reduction < self.filtering_threshold {
            return Err(RejectionReason::InsufficientLossReduction {
                reduction,
                threshold: self.filtering_threshold,
            });
        }
        Ok(())
    }
}

impl CandidateFilter for LossReductionFilter {
    fn decide(&self, ctx: &mut ScoringContext<'_>, candidate: &Candidate) -> AcceptanceDecision {
        let mut decision = AcceptanceDecision::default();
        match self.try_decide(ctx, candidate, &mut decision) {
            Ok(()) => {
                decision.accepted = true;
                decision
            }
            Err(reason) => {
                debug!(
                    "Rejected candidate at index {}: {reason:?}",
                    candidate.position().index
                );
                decision.reject(reason)
            }
        }
    }
}

/// Accepts every candidate without invoking any tool.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl CandidateFilter for AcceptAll {
    fn decide(&self, ctx: &mut ScoringContext<'_>, candidate: &Candidate) -> AcceptanceDecision {
        AcceptanceDecision {
            accepted: true,
            call: parse_call(ctx.tokenizer, ctx.special, candidate).ok(),
            ..Default::default()
        }
    }
}

fn parse_call(
    tokenizer: &dyn TokenizerOracle,
    special: &SpecialTokens,
    candidate: &Candidate,
) -> std::result::Result<ToolCall, RejectionReason> {
    let body = candidate.call_body(special.end(), special.eos());
    let text = tokenizer.decode(body)?;
    ToolCall::parse(&text, special.end_literal()).map_err(|e| match e {
        ToolError::MalformedCall(msg) => RejectionReason::MalformedCall(msg),
        other => RejectionReason::ToolFailed(other),
    })
}

fn loss_weight(t: usize) -> f32 {
    (1.0 - WEIGHT_DECAY * t as f32).max(0.0)
}

/// Weighted mean negative log-likelihood of `continuation` following `context`.
/// `continuation` must not be empty.
fn weighted_loss(
    model: &mut dyn ModelOracle,
    context: &[u32],
    continuation: &[u32],
) -> Result<f32> {
    let mut tokens = context.to_vec();
    let mut loss = 0.0;
    let mut total_weight = 0.0;
    for (t, token) in continuation.iter().enumerate() {
        let weight = loss_weight(t);
        if weight == 0.0 {
            break;
        }
        let dist = model.next_token_distribution(&tokens)?;
        loss -= weight * dist.log_prob(*token);
        total_weight += weight;
        tokens.push(*token);
    }
    Ok(loss / total_weight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        expansion::CandidateExpander,
        generation::TriggerPosition,
        test_utils::{FailingModel, MarkerTokenizer, ScriptedModel, END, EOS, OUTPUT, PAD, START},
    };

    const PREFIX: &str = "2+2=";

    fn special() -> SpecialTokens {
        let tokenizer = MarkerTokenizer::new(PAD);
        SpecialTokens::resolve(&DataGeneratorConfig::default(), &tokenizer).unwrap()
    }

    fn full_sequence() -> Vec<u32> {
        let mut full = MarkerTokenizer::new(PAD).encode(PREFIX).unwrap();
        full.push('4' as u32);
        full.push(EOS);
        full
    }

    /// Expands a candidate at the end of `PREFIX` whose call body is `call`.
    fn candidate(call: &str) -> Candidate {
        let config = DataGeneratorConfig {
            max_candidate_width: 64,
            ..Default::default()
        };
        let index = PREFIX.len();
        let body = call
            .chars()
            .map(|c| c as u32)
            .chain([END])
            .collect::<Vec<_>>();
        let mut writer = ScriptedModel::new(move |ctx: &[u32]| {
            vec![body.get(ctx.len() - index - 1).copied().unwrap_or(EOS)]
        });
        CandidateExpander::new(&config, &special(), PAD)
            .expand(
                &mut writer,
                &[TriggerPosition { index, step: 0 }],
                &full_sequence(),
            )
            .unwrap()
            .remove(0)
    }

    // Ranks the start marker first after the bare prefix and predicts the
    // continuation well only once the result " 4" has been seen.
    fn scoring_script(ctx: &[u32]) -> Vec<u32> {
        let helped = ctx.windows(3).any(|w| w == [OUTPUT, ' ' as u32, '4' as u32]);
        match ctx.last() {
            Some(&END) if helped => vec!['4' as u32],
            Some(&last) if helped && last == '4' as u32 => vec![EOS],
            _ if ctx.len() == PREFIX.len() => vec![START],
            _ => vec!['x' as u32],
        }
    }

    fn decide(
        filter: &dyn CandidateFilter,
        model: &mut dyn ModelOracle,
        candidate: &Candidate,
    ) -> AcceptanceDecision {
        let tokenizer = MarkerTokenizer::new(PAD);
        let tools = ToolRegistry::with_defaults();
        let special = special();
        let full = full_sequence();
        let mut ctx = ScoringContext {
            model,
            tokenizer: &tokenizer,
            tools: &tools,
            special: &special,
            full_sequence: &full,
        };
        filter.decide(&mut ctx, candidate)
    }

    fn default_filter() -> LossReductionFilter {
        LossReductionFilter::from_config(&DataGeneratorConfig::default())
    }

    #[test]
    fn test_accepts_when_result_helps() {
        let mut model = ScriptedModel::new(scoring_script);
        let decision = decide(&default_filter(), &mut model, &candidate("Calculator(2+2)"));
        assert!(decision.accepted, "{decision:?}");
        assert_eq!(decision.call, Some(ToolCall::new("Calculator", "2+2")));
        assert_eq!(decision.result.as_deref(), Some("4"));
        assert!(decision.relevance.unwrap() > 0.5);
        let scores = decision.scores.unwrap();
        assert!(scores.with_result < scores.with_call);
        assert!(scores.reduction() >= 1.0);
        assert!(decision.rejection.is_none());
    }

    #[test]
    fn test_rejects_when_result_does_not_help() {
        let mut model = ScriptedModel::new(|ctx: &[u32]| {
            if ctx.len() == PREFIX.len() {
                vec![START]
            } else {
                vec!['x' as u32]
            }
        });
        let decision = decide(&default_filter(), &mut model, &candidate("Calculator(2+2)"));
        assert!(!decision.accepted);
        assert!(matches!(
            decision.rejection,
            Some(RejectionReason::InsufficientLossReduction { .. })
        ));
        assert!(decision.scores.is_some());
    }

    #[test]
    fn test_rejects_below_sampling_threshold() {
        let mut model = ScriptedModel::new(|_: &[u32]| vec!['x' as u32]);
        let decision = decide(&default_filter(), &mut model, &candidate("Calculator(2+2)"));
        assert!(matches!(
            decision.rejection,
            Some(RejectionReason::BelowSamplingThreshold { .. })
        ));
        // The tool is never invoked for irrelevant positions.
        assert!(decision.result.is_none());
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn test_fails_closed() {
        let filter = default_filter();
        let cases = [
            ("Calculator 2+2", "malformed"),
            ("Search(rust)", "unknown"),
            ("Calculator(1/0)", "tool"),
        ];
        for (call, kind) in cases {
            let mut model = ScriptedModel::new(scoring_script);
            let decision = decide(&filter, &mut model, &candidate(call));
            assert!(!decision.accepted, "{call:?} was accepted");
            let rejection = decision.rejection.unwrap();
            match kind {
                "malformed" => assert!(matches!(rejection, RejectionReason::MalformedCall(_))),
                "unknown" => assert_eq!(rejection, RejectionReason::UnknownTool("Search".into())),
                _ => assert!(matches!(
                    rejection,
                    RejectionReason::ToolFailed(ToolError::Execution { .. })
                )),
            }
        }
    }

    #[test]
    fn test_model_errors_become_rejections() {
        let candidate = candidate("Calculator(2+2)");
        let decision = decide(&default_filter(), &mut FailingModel, &candidate);
        assert!(!decision.accepted);
        assert!(matches!(
            decision.rejection,
            Some(RejectionReason::ScoringFailed(_))
        ));
    }

    #[test]
    fn test_accept_all_never_consults_the_model() {
        let mut model = ScriptedModel::new(scoring_script);
        let decision = decide(&AcceptAll, &mut model, &candidate("Search(rust)"));
        assert!(decision.accepted);
        assert_eq!(decision.call, Some(ToolCall::new("Search", "rust")));
        assert!(decision.result.is_none());
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn test_loss_weights_decay_to_zero() {
        assert_eq!(loss_weight(0), 1.0);
        assert!((loss_weight(1) - 0.8).abs() < 1e-6);
        assert!((loss_weight(4) - 0.2).abs() < 1e-6);
        assert_eq!(loss_weight(5), 0.0);
        assert_eq!(loss_weight(9), 0.0);
    }

    #[test]
    fn test_rejection_serializes_with_kind() {
        let json = serde_json::to_value(RejectionReason::UnknownTool("Search".into())).unwrap();
        assert_eq!(json["kind"], "unknown_tool");
        assert_eq!(json["detail"], "Search");
    }
}
