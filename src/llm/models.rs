use std::fmt;
use std::sync::Mutex;

use candle_core::{Device, Result as CandleResult, Tensor};
use candle_transformers::models::{quantized_t5, t5};

use crate::error::Result;
use crate::llm::loader::LoaderStrategy;

/// Token ids the decoding loop needs from the checkpoint configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokens {
    pub decoder_start: u32,
    pub eos: u32,
    pub pad: u32,
}

impl SpecialTokens {
    pub fn is_special(&self, id: u32) -> bool {
        id == self.decoder_start || id == self.eos || id == self.pad
    }
}

/// Either precision of the encoder-decoder network.
pub enum T5Model {
    Full(t5::T5ForConditionalGeneration),
    Quantized(quantized_t5::T5ForConditionalGeneration),
}

impl T5Model {
    pub fn encode(&mut self, input_ids: &Tensor) -> CandleResult<Tensor> {
        match self {
            T5Model::Full(model) => model.encode(input_ids),
            T5Model::Quantized(model) => model.encode(input_ids),
        }
    }

    /// Logits of the last decoder position, shape `(batch, vocab)`.
    pub fn decode(&mut self, decoder_input_ids: &Tensor, encoder_output: &Tensor) -> CandleResult<Tensor> {
        match self {
            T5Model::Full(model) => model.decode(decoder_input_ids, encoder_output),
            T5Model::Quantized(model) => model.decode(decoder_input_ids, encoder_output),
        }
    }

    pub fn clear_kv_cache(&mut self) {
        match self {
            T5Model::Full(model) => model.clear_kv_cache(),
            T5Model::Quantized(model) => model.clear_kv_cache(),
        }
    }
}

/// Weights resident on the device for the lifetime of the process.
///
/// Weights are never written after load. The only mutable part of the network is its
/// key/value cache, which a session starts and ends empty.
pub struct LoadedModel {
    model: Mutex<T5Model>,
    tokens: SpecialTokens,
    use_cache: bool,
    device: Device,
    strategy: LoaderStrategy,
}

impl LoadedModel {
    pub fn new(
        model: T5Model,
        tokens: SpecialTokens,
        use_cache: bool,
        device: Device,
        strategy: LoaderStrategy,
    ) -> Self {
        Self {
            model: Mutex::new(model),
            tokens,
            use_cache,
            device,
            strategy,
        }
    }

    /// Runs `f` with exclusive use of the network and a clean key/value cache.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut T5Model) -> Result<R>) -> Result<R> {
        // A panic mid-request leaves only a stale cache behind, which is cleared here.
        let mut model = self.model.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        model.clear_kv_cache();
        let out = f(&mut model);
        model.clear_kv_cache();
        out
    }

    pub fn special_tokens(&self) -> SpecialTokens {
        self.tokens
    }

    pub fn use_cache(&self) -> bool {
        self.use_cache
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn strategy(&self) -> LoaderStrategy {
        self.strategy
    }
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel")
            .field("tokens", &self.tokens)
            .field("use_cache", &self.use_cache)
            .field("device", &self.device)
            .field("strategy", &self.strategy)
            .finish()
    }
}
