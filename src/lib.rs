//! FLAN-T5 inference behind a single prediction endpoint.
//!
//! Weights are loaded once, by one of three explicit strategies, from a local
//! hub-layout cache. Every request is validated, tokenized, sampled and decoded
//! against that single immutable model.

pub mod api;
pub mod app_state;
pub mod config;
pub mod error;
pub mod llm;
pub mod predictor;

pub use app_state::AppState;
pub use config::ServeConfig;
pub use error::{PredictError, Result};
pub use llm::device::{ComputeDevice, MemoryObserver, MemoryProbe, MemoryScope, MemoryUsage};
pub use llm::loader::{LoaderStrategy, TokenizerSource};
pub use predictor::{GenerationRequest, Predictor, PredictorConfig};
