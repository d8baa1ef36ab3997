use std::path::Path;

use tokenizers::Tokenizer;

use crate::error::{Result, ToolformerError};

/// Text to token id conversion used by every stage.
pub trait TokenizerOracle {
    /// Encode `text` without adding special tokens.
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Decode `ids`, keeping special tokens so tool markers survive.
    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// Id used to right-pad candidates. Required by the data generator.
    fn pad_token_id(&self) -> Option<u32>;
}

impl<T: TokenizerOracle + ?Sized> TokenizerOracle for Box<T> {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        (**self).encode(text)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        (**self).decode(ids)
    }

    fn pad_token_id(&self) -> Option<u32> {
        (**self).pad_token_id()
    }
}

/// HuggingFace tokenizer (from tokenizer.json) with an explicit pad id.
#[derive(Clone)]
pub struct HfTokenizer {
    tokenizer: Tokenizer,
    pad_token_id: Option<u32>,
}

impl HfTokenizer {
    /// Wrap a tokenizer, taking the pad id from its padding parameters if set.
    pub fn new(tokenizer: Tokenizer) -> Self {
        let pad_token_id = tokenizer.get_padding().map(|p| p.pad_id);
        Self {
            tokenizer,
            pad_token_id,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = Tokenizer::from_file(path).map_err(|e| {
            ToolformerError::config(format!(
                "could not load tokenizer from `{}`: {e}",
                path.display()
            ))
        })?;
        Ok(Self::new(tokenizer))
    }

    /// Use the id of `token` for padding. Fails if the token is not in the vocabulary.
    pub fn with_pad_token(mut self, token: &str) -> Result<Self> {
        let id = self.tokenizer.token_to_id(token).ok_or_else(|| {
            ToolformerError::config(format!("pad token `{token}` is not in the vocabulary"))
        })?;
        self.pad_token_id = Some(id);
        Ok(self)
    }

    pub fn with_pad_token_id(mut self, id: u32) -> Self {
        self.pad_token_id = Some(id);
        self
    }

    /// Get the underlying tokenizer
    pub fn inner(&self) -> &Tokenizer {
        &self.tokenizer
    }
}

impl TokenizerOracle for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(ToolformerError::oracle)?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(ids, false)
            .map_err(ToolformerError::oracle)
    }

    fn pad_token_id(&self) -> Option<u32> {
        self.pad_token_id
    }
}
