//! The generation service: one-time setup, then validated predictions.

use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use tokenizers::Tokenizer;

use crate::error::{PredictError, Result};
use crate::llm::device::{ComputeDevice, MemoryObserver, TracingMemoryObserver};
use crate::llm::inference::{self, DecodeLimits};
use crate::llm::loader::{CheckpointCache, LoaderStrategy, TokenizerSource, WeightLoader};
use crate::llm::models::LoadedModel;
use crate::llm::resolver::{ModelResolver, ResolvedModel, DEFAULT_SENTINEL};
use crate::llm::sampling::SamplingParams;

const N_RANGE: RangeInclusive<usize> = 1..=5;
const TEMPERATURE_RANGE: RangeInclusive<f64> = 0.01..=5.0;
const TOP_P_RANGE: RangeInclusive<f64> = 0.01..=1.0;
const REPETITION_PENALTY_RANGE: RangeInclusive<f64> = 0.01..=5.0;

#[derive(Debug, Clone)]
pub struct PredictorConfig {
    pub weights: String,
    pub loader: LoaderStrategy,
    pub tokenizer: TokenizerSource,
    pub cache_dir: PathBuf,
    pub base_model: String,
    pub quantized_file: String,
}

impl PredictorConfig {
    pub fn new(weights: impl Into<String>, loader: LoaderStrategy) -> Self {
        Self {
            weights: weights.into(),
            loader,
            ..Self::default()
        }
    }

    /// 8-bit weights paired with the checkpoint's own tokenizer.
    pub fn eight_bit(weights: impl Into<String>) -> Self {
        Self {
            weights: weights.into(),
            loader: LoaderStrategy::Quantized,
            tokenizer: TokenizerSource::Named,
            ..Self::default()
        }
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn with_base_model(mut self, base_model: impl Into<String>) -> Self {
        self.base_model = base_model.into();
        self
    }
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            weights: DEFAULT_SENTINEL.to_string(),
            loader: LoaderStrategy::Pretrained,
            tokenizer: TokenizerSource::Shared,
            cache_dir: PathBuf::from("pretrained_weights"),
            base_model: "google/flan-t5-xl".to_string(),
            quantized_file: "model-q8_0.gguf".to_string(),
        }
    }
}

/// One prediction call. `prompt` is required, the other fields default to the
/// public endpoint's defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default = "default_n")]
    pub n: usize,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f64,
    #[serde(default)]
    pub debug: bool,
    /// Fixes the sampling stream; a fresh random seed is drawn when unset.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_n() -> usize {
    1
}

fn default_max_length() -> usize {
    50
}

fn default_temperature() -> f64 {
    0.75
}

fn default_top_p() -> f64 {
    1.0
}

fn default_repetition_penalty() -> f64 {
    1.0
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            n: default_n(),
            max_length: default_max_length(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            repetition_penalty: default_repetition_penalty(),
            debug: false,
            seed: None,
        }
    }

    /// Rejects out-of-range values. Nothing is clamped.
    pub fn validate(&self) -> Result<()> {
        if !N_RANGE.contains(&self.n) {
            return Err(out_of_range("n", self.n, "[1, 5]"));
        }
        if self.max_length < 1 {
            return Err(out_of_range("max_length", self.max_length, "[1, inf)"));
        }
        if !TEMPERATURE_RANGE.contains(&self.temperature) {
            return Err(out_of_range("temperature", self.temperature, "[0.01, 5]"));
        }
        if !TOP_P_RANGE.contains(&self.top_p) {
            return Err(out_of_range("top_p", self.top_p, "[0.01, 1]"));
        }
        if !REPETITION_PENALTY_RANGE.contains(&self.repetition_penalty) {
            return Err(out_of_range(
                "repetition_penalty",
                self.repetition_penalty,
                "[0.01, 5]",
            ));
        }
        Ok(())
    }

    fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_p: self.top_p,
            repetition_penalty: self.repetition_penalty as f32,
        }
    }
}

fn out_of_range(field: &'static str, value: impl ToString, range: &'static str) -> PredictError {
    PredictError::Validation {
        field,
        value: value.to_string(),
        range,
    }
}

/// Holds the model and tokenizer for the life of the process.
///
/// A `Predictor` only exists once setup has fully succeeded, so every call to
/// [`Predictor::predict`] runs against loaded weights.
pub struct Predictor {
    model: LoadedModel,
    tokenizer: Tokenizer,
    device: ComputeDevice,
    resolved: ResolvedModel,
    observer: Arc<dyn MemoryObserver>,
}

impl Predictor {
    pub fn setup(config: PredictorConfig, device: ComputeDevice) -> Result<Self> {
        let start = Instant::now();

        // Resolution touches neither the filesystem nor the device.
        let resolver = ModelResolver::new(config.base_model.clone());
        let resolved = resolver.resolve(&config.weights, config.loader)?;

        let loader = WeightLoader::new(
            CheckpointCache::new(config.cache_dir.clone()),
            config.quantized_file.clone(),
        );
        let model = loader.load(&resolved, config.loader, &device)?;
        let tokenizer = loader.tokenizer(config.tokenizer, &resolved, resolver.base_model())?;

        tracing::info!(
            model = %resolved.model_id,
            strategy = %config.loader,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "predictor ready"
        );

        Ok(Self {
            model,
            tokenizer,
            device,
            resolved,
            observer: Arc::new(TracingMemoryObserver),
        })
    }

    /// Replaces the sink that receives memory reports of `debug` requests.
    pub fn with_memory_observer(mut self, observer: Arc<dyn MemoryObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn model_id(&self) -> &str {
        &self.resolved.model_id
    }

    pub fn strategy(&self) -> LoaderStrategy {
        self.model.strategy()
    }

    pub fn predict(&self, request: &GenerationRequest) -> Result<Vec<String>> {
        request.validate()?;

        let seed = request.seed.unwrap_or_else(rand::random::<u64>);
        let start = Instant::now();

        let outputs = inference::generate(
            &request.prompt,
            DecodeLimits {
                num_sequences: request.n,
                max_length: request.max_length,
            },
            request.sampling(),
            seed,
            &self.tokenizer,
            &self.model,
        )?;

        if request.debug {
            match self.device.memory_usage() {
                Some(usage) => self.observer.observe(&usage),
                None => tracing::debug!("memory usage unavailable on this platform"),
            }
        }

        tracing::info!(
            n = request.n,
            max_length = request.max_length,
            seed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "prediction complete"
        );

        Ok(outputs)
    }
}
