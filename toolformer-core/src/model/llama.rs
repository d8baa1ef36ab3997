use std::path::PathBuf;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::llama::{Cache, Config, Llama, LlamaConfig};
use hf_hub::{api::sync::ApiBuilder, Repo, RepoType};
use tracing::{debug, info};

use super::ModelOracle;
use crate::{
    error::{Result, ToolformerError},
    sampler::TokenDistribution,
};

/// Local files making up a Llama-family model.
#[derive(Clone, Debug)]
pub struct LlamaPaths {
    pub tokenizer_filename: PathBuf,
    pub config_filename: PathBuf,
    pub weight_filenames: Vec<PathBuf>,
}

impl LlamaPaths {
    /// Fetch `tokenizer.json`, `config.json` and every `.safetensors` shard from the hub.
    /// If `revision` is None, then it defaults to `main`.
    pub fn download(model_id: &str, revision: Option<String>) -> Result<Self> {
        let api = ApiBuilder::new()
            .with_progress(true)
            .build()
            .map_err(ToolformerError::oracle)?;
        let revision = revision.unwrap_or("main".to_string());
        let api = api.repo(Repo::with_revision(
            model_id.to_string(),
            RepoType::Model,
            revision,
        ));

        let tokenizer_filename = api.get("tokenizer.json").map_err(ToolformerError::oracle)?;
        let config_filename = api.get("config.json").map_err(ToolformerError::oracle)?;

        let mut weight_filenames = vec![];
        for rfilename in api
            .info()
            .map_err(ToolformerError::oracle)?
            .siblings
            .iter()
            .map(|x| x.rfilename.clone())
            .filter(|x| x.ends_with(".safetensors"))
        {
            let filename = api.get(&rfilename).map_err(ToolformerError::oracle)?;
            weight_filenames.push(filename);
        }
        if weight_filenames.is_empty() {
            return Err(ToolformerError::oracle(format!(
                "`{model_id}` has no .safetensors weights"
            )));
        }

        Ok(Self {
            tokenizer_filename,
            config_filename,
            weight_filenames,
        })
    }
}

/// A candle Llama model answering next-token queries.
///
/// The KV cache is kept between calls: when a request extends the cached
/// sequence by exactly one token only that token is run, otherwise the cache
/// is rebuilt from the full sequence.
pub struct LlamaOracle {
    model: Llama,
    cache: Cache,
    config: Config,
    dtype: DType,
    device: Device,
    cached: Vec<u32>,
}

impl LlamaOracle {
    pub fn load(paths: &LlamaPaths, device: &Device) -> Result<Self> {
        let raw_config = std::fs::read(&paths.config_filename)?;
        let llama_config: LlamaConfig = serde_json::from_slice(&raw_config).map_err(|e| {
            ToolformerError::config(format!(
                "`{}` is not a Llama config: {e}",
                paths.config_filename.display()
            ))
        })?;
        let config = llama_config.into_config(false);

        let dtype = if device.is_cpu() {
            DType::F32
        } else {
            DType::F16
        };

        // SAFETY: the weight files are not modified while mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(paths.weight_filenames.as_slice(), dtype, device)?
        };
        let model = Llama::load(vb, &config)?;
        let cache = Cache::new(true, dtype, &config, device)?;
        info!(
            "Loaded Llama model with {} layers on {device:?}.",
            config.num_hidden_layers
        );

        Ok(Self {
            model,
            cache,
            config,
            dtype,
            device: device.clone(),
            cached: Vec::new(),
        })
    }

    fn reset_cache(&mut self) -> Result<()> {
        self.cache = Cache::new(true, self.dtype, &self.config, &self.device)?;
        self.cached.clear();
        Ok(())
    }
}

impl ModelOracle for LlamaOracle {
    fn next_token_distribution(&mut self, tokens: &[u32]) -> Result<TokenDistribution> {
        if tokens.is_empty() {
            return Err(ToolformerError::oracle(
                "cannot predict a token from an empty sequence",
            ));
        }
        if tokens.len() > self.config.max_position_embeddings {
            return Err(ToolformerError::oracle(format!(
                "sequence of {} tokens exceeds the model context of {}",
                tokens.len(),
                self.config.max_position_embeddings
            )));
        }

        let extends_cache = !self.cached.is_empty()
            && self.cached.len() + 1 == tokens.len()
            && tokens.starts_with(&self.cached);
        if !extends_cache {
            debug!("Re-priming the KV cache with {} tokens.", tokens.len());
            self.reset_cache()?;
        }
        let new = &tokens[self.cached.len()..];
        let input = Tensor::new(new, &self.device)?.unsqueeze(0)?;
        let logits = match self.model.forward(&input, self.cached.len(), &mut self.cache) {
            Ok(logits) => logits,
            Err(e) => {
                // The cache may hold a partial step now.
                self.cached.clear();
                return Err(e.into());
            }
        };
        self.cached.extend_from_slice(new);

        TokenDistribution::from_logits(&logits.squeeze(0)?)
    }
}
