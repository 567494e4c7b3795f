use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use candle_core::safetensors::MmapedSafetensors;
use candle_nn::VarBuilder;
use candle_transformers::models::{quantized_t5, t5};
use candle_transformers::quantized_var_builder::VarBuilder as QuantizedVarBuilder;
use hf_hub::Cache;
use serde::Deserialize;
use tokenizers::Tokenizer;

use crate::config::{read_json, CheckpointConfig};
use crate::error::{PredictError, Result};
use crate::llm::device::ComputeDevice;
use crate::llm::models::{LoadedModel, T5Model};
use crate::llm::quantize;
use crate::llm::resolver::ResolvedModel;

pub const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";

/// How weights reach the device. Chosen explicitly, never sniffed from the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoaderStrategy {
    /// Cached checkpoint at reduced precision.
    #[default]
    Pretrained,
    /// Model shell filled straight from a safetensors snapshot.
    Streamed,
    /// Cached checkpoint with 8-bit weights.
    Quantized,
}

impl LoaderStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoaderStrategy::Pretrained => "pretrained",
            LoaderStrategy::Streamed => "streamed",
            LoaderStrategy::Quantized => "quantized",
        }
    }
}

impl FromStr for LoaderStrategy {
    type Err = PredictError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretrained" => Ok(LoaderStrategy::Pretrained),
            "streamed" => Ok(LoaderStrategy::Streamed),
            "quantized" | "8bit" => Ok(LoaderStrategy::Quantized),
            other => Err(PredictError::Configuration(format!(
                "unknown loader strategy `{other}`"
            ))),
        }
    }
}

impl fmt::Display for LoaderStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the tokenizer comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenizerSource {
    /// The base model's tokenizer, whatever checkpoint is loaded.
    #[default]
    Shared,
    /// The tokenizer shipped with the resolved checkpoint.
    Named,
}

impl FromStr for TokenizerSource {
    type Err = PredictError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(TokenizerSource::Shared),
            "named" => Ok(TokenizerSource::Named),
            other => Err(PredictError::Configuration(format!(
                "unknown tokenizer source `{other}`"
            ))),
        }
    }
}

#[derive(Deserialize)]
struct WeightsIndex {
    weight_map: HashMap<String, String>,
}

/// Read-only view of a hub-layout cache directory. Never touches the network.
pub struct CheckpointCache {
    root: PathBuf,
    cache: Cache,
}

impl CheckpointCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            cache: Cache::new(root.clone()),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn try_file(&self, model_id: &str, filename: &str) -> Option<PathBuf> {
        self.cache.model(model_id.to_string()).get(filename)
    }

    pub fn file(&self, model_id: &str, filename: &str) -> Result<PathBuf> {
        self.try_file(model_id, filename).ok_or_else(|| {
            PredictError::Load(format!(
                "{filename} for {model_id} is not in cache {}",
                self.root.display()
            ))
        })
    }

    /// `model.safetensors`, or every shard named by its index file.
    pub fn weight_files(&self, model_id: &str) -> Result<Vec<PathBuf>> {
        if let Some(single) = self.try_file(model_id, WEIGHTS_FILE) {
            return Ok(vec![single]);
        }

        let index_path = self.file(model_id, WEIGHTS_INDEX_FILE)?;
        let index: WeightsIndex = read_json(&index_path)?;
        index
            .weight_map
            .values()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|shard| self.file(model_id, shard))
            .collect()
    }
}

pub struct WeightLoader {
    cache: CheckpointCache,
    quantized_file: String,
}

impl WeightLoader {
    pub fn new(cache: CheckpointCache, quantized_file: impl Into<String>) -> Self {
        Self {
            cache,
            quantized_file: quantized_file.into(),
        }
    }

    pub fn load(
        &self,
        resolved: &ResolvedModel,
        strategy: LoaderStrategy,
        device: &ComputeDevice,
    ) -> Result<LoadedModel> {
        let config_path = self.cache.file(&resolved.model_id, CONFIG_FILE)?;
        let checkpoint: CheckpointConfig = read_json(&config_path)?;

        tracing::info!(
            model = %resolved.model_id,
            strategy = %strategy,
            device = ?device.device(),
            "loading weights"
        );

        let model = match strategy {
            LoaderStrategy::Pretrained => self.load_pretrained(resolved, &config_path, device)?,
            LoaderStrategy::Streamed => self.load_streamed(resolved, &config_path, device)?,
            LoaderStrategy::Quantized => self.load_quantized(resolved, &config_path, device)?,
        };

        Ok(LoadedModel::new(
            model,
            checkpoint.special_tokens(),
            checkpoint.use_cache,
            device.device().clone(),
            strategy,
        ))
    }

    fn load_pretrained(
        &self,
        resolved: &ResolvedModel,
        config_path: &Path,
        device: &ComputeDevice,
    ) -> Result<T5Model> {
        let config: t5::Config = read_json(config_path)?;
        let weights = self.cache.weight_files(&resolved.model_id)?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&weights, device.reduced_precision(), device.device())
        }
        .map_err(|e| PredictError::load(&resolved.model_id, e))?;

        let model = t5::T5ForConditionalGeneration::load(vb, &config)
            .map_err(|e| PredictError::load(&resolved.model_id, e))?;
        Ok(T5Model::Full(model))
    }

    fn load_streamed(
        &self,
        resolved: &ResolvedModel,
        config_path: &Path,
        device: &ComputeDevice,
    ) -> Result<T5Model> {
        let snapshot = resolved.snapshot.as_deref().ok_or_else(|| {
            PredictError::Configuration("streamed loading needs a snapshot path".to_string())
        })?;
        if !snapshot.is_file() {
            return Err(PredictError::Load(format!(
                "snapshot {} does not exist",
                snapshot.display()
            )));
        }

        let config: t5::Config = read_json(config_path)?;

        // Header and offsets are checked here, a truncated file fails before any tensor is read.
        let tensors = unsafe { MmapedSafetensors::new(snapshot) }
            .map_err(|e| PredictError::load(snapshot.display(), e))?;

        // Every parameter slot is read from the snapshot on construction, nothing is
        // randomly initialised. Missing tensors and shape mismatches surface here.
        let vb = VarBuilder::from_backend(
            Box::new(tensors),
            device.reduced_precision(),
            device.device().clone(),
        );
        let model = t5::T5ForConditionalGeneration::load(vb, &config)
            .map_err(|e| PredictError::load(snapshot.display(), e))?;

        tracing::info!(snapshot = %snapshot.display(), "snapshot streamed into model");
        Ok(T5Model::Full(model))
    }

    fn load_quantized(
        &self,
        resolved: &ResolvedModel,
        config_path: &Path,
        device: &ComputeDevice,
    ) -> Result<T5Model> {
        let config: quantized_t5::Config = read_json(config_path)?;

        let vb = match self.cache.try_file(&resolved.model_id, &self.quantized_file) {
            Some(gguf) => {
                tracing::info!(file = %gguf.display(), "using pre-quantized weights");
                QuantizedVarBuilder::from_gguf(&gguf, device.device())
                    .map_err(|e| PredictError::load(gguf.display(), e))?
            }
            None => {
                let weights = self.cache.weight_files(&resolved.model_id)?;
                let image = quantize::quantize_checkpoint(&weights)?;
                QuantizedVarBuilder::from_gguf_buffer(&image, device.device())
                    .map_err(|e| PredictError::load(&resolved.model_id, e))?
            }
        };

        let model = quantized_t5::T5ForConditionalGeneration::load(vb, &config)
            .map_err(|e| PredictError::load(&resolved.model_id, e))?;
        Ok(T5Model::Quantized(model))
    }

    pub fn tokenizer(
        &self,
        source: TokenizerSource,
        resolved: &ResolvedModel,
        base_model: &str,
    ) -> Result<Tokenizer> {
        let model_id = match source {
            TokenizerSource::Shared => base_model,
            TokenizerSource::Named => resolved.model_id.as_str(),
        };
        let path = self.cache.file(model_id, TOKENIZER_FILE)?;
        Tokenizer::from_file(&path).map_err(|e| PredictError::load(path.display(), e))
    }
}
