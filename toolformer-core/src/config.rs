use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, ToolformerError},
    sampler::DecodingStrategy,
};

fn default_api_start_character() -> String {
    "[".to_string()
}

fn default_api_end_character() -> String {
    "]".to_string()
}

fn default_api_output_character() -> String {
    "->".to_string()
}

fn default_eos_literal() -> String {
    ".\n\n".to_string()
}

fn default_top_k() -> usize {
    DataGeneratorConfig::DEFAULT_TOP_K
}

fn default_sampling_threshold() -> f32 {
    0.05
}

fn default_filtering_threshold() -> f32 {
    1.0
}

fn default_max_new_tokens() -> usize {
    DataGeneratorConfig::DEFAULT_MAX_NEW_TOKENS
}

fn default_max_candidate_width() -> usize {
    DataGeneratorConfig::DEFAULT_MAX_CANDIDATE_WIDTH
}

fn default_max_generation_steps() -> usize {
    DataGeneratorConfig::DEFAULT_MAX_GENERATION_STEPS
}

/// Options recognized by the data generator.
///
/// Every field has a default, so an empty `[data_generator]` table is valid.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct DataGeneratorConfig {
    /// Literal marking the start of a tool call. Encoded with a leading space.
    #[serde(default = "default_api_start_character")]
    pub api_start_character: String,

    /// Literal marking the end of a tool call. Encoded as is.
    #[serde(default = "default_api_end_character")]
    pub api_end_character: String,

    /// Literal separating a call from its result. Encoded with a leading space.
    #[serde(default = "default_api_output_character")]
    pub api_output_character: String,

    /// Literal whose first token ends generation.
    #[serde(default = "default_eos_literal")]
    pub eos_literal: String,

    /// Number of most probable next tokens inspected for the start marker.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Minimum start-marker probability for a candidate to be considered, and the
    /// clamp applied when sampling.
    #[serde(default = "default_sampling_threshold")]
    pub sampling_threshold: f32,

    /// Minimum weighted loss reduction for a candidate to be accepted.
    #[serde(default = "default_filtering_threshold")]
    pub filtering_threshold: f32,

    /// Budget of new tokens when expanding a candidate call.
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,

    /// Width every candidate is padded to.
    #[serde(default = "default_max_candidate_width")]
    pub max_candidate_width: usize,

    /// Hard ceiling on trigger-gated generation steps.
    #[serde(default = "default_max_generation_steps")]
    pub max_generation_steps: usize,

    #[serde(default)]
    pub decoding: DecodingStrategy,
}

#[derive(Deserialize)]
struct ConfigFile {
    data_generator: DataGeneratorConfig,
}

impl Default for DataGeneratorConfig {
    fn default() -> Self {
        Self {
            api_start_character: default_api_start_character(),
            api_end_character: default_api_end_character(),
            api_output_character: default_api_output_character(),
            eos_literal: default_eos_literal(),
            top_k: default_top_k(),
            sampling_threshold: default_sampling_threshold(),
            filtering_threshold: default_filtering_threshold(),
            max_new_tokens: default_max_new_tokens(),
            max_candidate_width: default_max_candidate_width(),
            max_generation_steps: default_max_generation_steps(),
            decoding: DecodingStrategy::default(),
        }
    }
}

impl DataGeneratorConfig {
    pub const DEFAULT_TOP_K: usize = 5;
    pub const DEFAULT_MAX_NEW_TOKENS: usize = 100;
    pub const DEFAULT_MAX_CANDIDATE_WIDTH: usize = 1000;
    pub const DEFAULT_MAX_GENERATION_STEPS: usize = 512;

    /// Parse a TOML document with a `[data_generator]` table.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(s)?;
        file.data_generator.validate()?;
        Ok(file.data_generator)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(ToolformerError::config("`top_k` must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.sampling_threshold) {
            return Err(ToolformerError::config(format!(
                "`sampling_threshold` must be within [0, 1], got {}",
                self.sampling_threshold
            )));
        }
        if !self.filtering_threshold.is_finite() {
            return Err(ToolformerError::config(
                "`filtering_threshold` must be finite",
            ));
        }
        for (name, value) in [
            ("max_new_tokens", self.max_new_tokens),
            ("max_candidate_width", self.max_candidate_width),
            ("max_generation_steps", self.max_generation_steps),
        ] {
            if value == 0 {
                return Err(ToolformerError::config(format!(
                    "`{name}` must be at least 1"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_table_uses_defaults() {
        let cfg = DataGeneratorConfig::from_toml_str("[data_generator]\n").unwrap();
        assert_eq!(cfg, DataGeneratorConfig::default());
        assert_eq!(cfg.top_k, 5);
        assert_eq!(cfg.max_candidate_width, 1000);
        assert_eq!(cfg.decoding, DecodingStrategy::Greedy);
    }

    #[test]
    fn test_parse_full_table() {
        let cfg = DataGeneratorConfig::from_toml_str(
            r#"
            [data_generator]
            api_start_character = "<"
            api_end_character = ">"
            api_output_character = "=>"
            top_k = 3
            sampling_threshold = 0.2
            filtering_threshold = 0.5
            max_new_tokens = 20
            max_candidate_width = 64
            max_generation_steps = 32
            decoding = { strategy = "sampling", seed = 42 }
            "#,
        )
        .unwrap();
        assert_eq!(cfg.api_start_character, "<");
        assert_eq!(cfg.api_output_character, "=>");
        assert_eq!(cfg.top_k, 3);
        assert_eq!(cfg.max_candidate_width, 64);
        assert_eq!(cfg.decoding, DecodingStrategy::Sampling { seed: 42 });
        assert_eq!(cfg.eos_literal, ".\n\n");
    }

    #[test]
    fn test_rejects_invalid_values() {
        let err = DataGeneratorConfig::from_toml_str("[data_generator]\ntop_k = 0\n").unwrap_err();
        assert!(matches!(err, ToolformerError::Configuration(_)));

        let err =
            DataGeneratorConfig::from_toml_str("[data_generator]\nsampling_threshold = 1.5\n")
                .unwrap_err();
        assert!(matches!(err, ToolformerError::Configuration(_)));

        let err =
            DataGeneratorConfig::from_toml_str("[data_generator]\nmax_generation_steps = 0\n")
                .unwrap_err();
        assert!(matches!(err, ToolformerError::Configuration(_)));
    }

    #[test]
    fn test_missing_table_is_a_toml_error() {
        let err = DataGeneratorConfig::from_toml_str("top_k = 3\n").unwrap_err();
        assert!(matches!(err, ToolformerError::Toml(_)));
    }
}
