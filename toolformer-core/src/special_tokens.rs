use serde::Serialize;
use tracing::warn;

use crate::{
    config::DataGeneratorConfig,
    error::{Result, ToolformerError},
    tokenizer::TokenizerOracle,
};

/// Ids of the tool-call markers and the end-of-generation marker.
///
/// Resolved once from the configured literals. The start and output literals
/// are encoded with a leading space because models usually emit them as a
/// word-leading token; the end and eos literals are encoded as is.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SpecialTokens {
    start: u32,
    end: u32,
    output: u32,
    eos: u32,
    start_literal: String,
    end_literal: String,
    output_literal: String,
    eos_literal: String,
}

impl SpecialTokens {
    pub fn resolve(config: &DataGeneratorConfig, tokenizer: &dyn TokenizerOracle) -> Result<Self> {
        let start = resolve_literal(
            tokenizer,
            "api_start_character",
            &config.api_start_character,
            true,
        )?;
        let end = resolve_literal(
            tokenizer,
            "api_end_character",
            &config.api_end_character,
            false,
        )?;
        let output = resolve_literal(
            tokenizer,
            "api_output_character",
            &config.api_output_character,
            true,
        )?;
        let eos = resolve_literal(tokenizer, "eos_literal", &config.eos_literal, false)?;
        Ok(Self {
            start,
            end,
            output,
            eos,
            start_literal: config.api_start_character.clone(),
            end_literal: config.api_end_character.clone(),
            output_literal: config.api_output_character.clone(),
            eos_literal: config.eos_literal.clone(),
        })
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn output(&self) -> u32 {
        self.output
    }

    pub fn eos(&self) -> u32 {
        self.eos
    }

    pub fn start_literal(&self) -> &str {
        &self.start_literal
    }

    pub fn end_literal(&self) -> &str {
        &self.end_literal
    }

    pub fn output_literal(&self) -> &str {
        &self.output_literal
    }

    pub fn eos_literal(&self) -> &str {
        &self.eos_literal
    }
}

fn resolve_literal(
    tokenizer: &dyn TokenizerOracle,
    name: &str,
    literal: &str,
    leading_space: bool,
) -> Result<u32> {
    if literal.is_empty() {
        return Err(ToolformerError::config(format!(
            "`{name}` must not be empty"
        )));
    }
    let text = if leading_space {
        format!(" {literal}")
    } else {
        literal.to_string()
    };
    let ids = tokenizer.encode(&text).map_err(|e| {
        ToolformerError::config(format!("`{name}` ({text:?}) could not be encoded: {e}"))
    })?;
    match ids.as_slice() {
        [] => Err(ToolformerError::config(format!(
            "`{name}` ({text:?}) encodes to no tokens"
        ))),
        [id] => Ok(*id),
        [id, ..] => {
            warn!(
                "`{name}` ({text:?}) encodes to {} tokens {ids:?}, using the first one ({id}).",
                ids.len()
            );
            Ok(*id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MarkerTokenizer, END, EOS, OUTPUT, PAD, START};

    #[test]
    fn test_resolves_markers() {
        let special =
            SpecialTokens::resolve(&DataGeneratorConfig::default(), &MarkerTokenizer::new(PAD))
                .unwrap();
        assert_eq!(special.start(), START);
        assert_eq!(special.end(), END);
        assert_eq!(special.output(), OUTPUT);
        assert_eq!(special.eos(), EOS);
        assert_eq!(special.start_literal(), "[");
    }

    #[test]
    fn test_start_literal_gets_a_leading_space() {
        // Without the space "[" would be a plain character token.
        let tok = MarkerTokenizer::new(PAD);
        assert_eq!(tok.encode("[").unwrap(), vec!['[' as u32]);
        let special = SpecialTokens::resolve(&DataGeneratorConfig::default(), &tok).unwrap();
        assert_ne!(special.start(), '[' as u32);
        assert_eq!(special.end(), ']' as u32);
    }

    #[test]
    fn test_multi_token_literal_takes_first_id() {
        let config = DataGeneratorConfig {
            api_end_character: "]]".to_string(),
            ..Default::default()
        };
        let special = SpecialTokens::resolve(&config, &MarkerTokenizer::new(PAD)).unwrap();
        assert_eq!(special.end(), ']' as u32);
    }

    #[test]
    fn test_empty_literal_is_rejected() {
        let config = DataGeneratorConfig {
            api_output_character: String::new(),
            ..Default::default()
        };
        let err = SpecialTokens::resolve(&config, &MarkerTokenizer::new(PAD)).unwrap_err();
        assert!(matches!(err, ToolformerError::Configuration(_)));
    }
}
