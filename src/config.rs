use std::fs::File;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{PredictError, Result};
use crate::llm::models::SpecialTokens;
use crate::predictor::PredictorConfig;

/// The subset of a checkpoint's `config.json` the decoding loop reads.
#[derive(Deserialize, Debug, Clone)]
pub struct CheckpointConfig {
    pub pad_token_id: u32,
    pub eos_token_id: u32,
    pub decoder_start_token_id: Option<u32>,
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
}

fn default_use_cache() -> bool {
    true
}

impl CheckpointConfig {
    pub fn special_tokens(&self) -> SpecialTokens {
        SpecialTokens {
            decoder_start: self.decoder_start_token_id.unwrap_or(self.pad_token_id),
            eos: self.eos_token_id,
            pad: self.pad_token_id,
        }
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| PredictError::load(path.display(), e))?;
    serde_json::from_reader::<File, T>(file).map_err(|e| PredictError::load(path.display(), e))
}

/// Process configuration, defaults overridden by `FLAN_T5_*` environment variables.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub bind_addr: String,
    pub port: u16,
    pub predictor: PredictorConfig,
    pub force_cpu: bool,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 5000,
            predictor: PredictorConfig::default(),
            force_cpu: false,
        }
    }
}

impl ServeConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = lookup("FLAN_T5_BIND_ADDR") {
            config.bind_addr = addr;
        }

        if let Some(port) = lookup("FLAN_T5_PORT") {
            config.port = port.parse().map_err(|_| {
                PredictError::Configuration(format!("FLAN_T5_PORT is not a port: `{port}`"))
            })?;
        }

        if let Some(weights) = lookup("FLAN_T5_WEIGHTS") {
            config.predictor.weights = weights;
        }

        if let Some(loader) = lookup("FLAN_T5_LOADER") {
            config.predictor.loader = loader.parse()?;
        }

        if let Some(tokenizer) = lookup("FLAN_T5_TOKENIZER") {
            config.predictor.tokenizer = tokenizer.parse()?;
        }

        if let Some(dir) = lookup("FLAN_T5_CACHE_DIR") {
            config.predictor.cache_dir = PathBuf::from(dir);
        }

        if let Some(model) = lookup("FLAN_T5_BASE_MODEL") {
            config.predictor.base_model = model;
        }

        if let Some(file) = lookup("FLAN_T5_QUANTIZED_FILE") {
            config.predictor.quantized_file = file;
        }

        if let Some(cpu) = lookup("FLAN_T5_CPU") {
            config.force_cpu = matches!(cpu.as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}
