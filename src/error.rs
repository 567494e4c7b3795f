//! Error taxonomy shared by setup and prediction.

use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PredictError>;

#[derive(Debug, Error)]
pub enum PredictError {
    /// The weights reference or strategy combination cannot be resolved.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A checkpoint, snapshot, config or tokenizer is missing or unreadable.
    #[error("load error: {0}")]
    Load(String),

    #[error("validation error: {field} = {value} is outside the allowed range {range}")]
    Validation {
        field: &'static str,
        value: String,
        range: &'static str,
    },

    /// Tokenization, encoding, sampling or decoding failed for one request.
    #[error("generation error: {0}")]
    Generation(String),
}

impl PredictError {
    pub fn load(context: impl fmt::Display, err: impl fmt::Display) -> Self {
        PredictError::Load(format!("{context}: {}", first_line(err)))
    }

    pub fn generation(context: impl fmt::Display, err: impl fmt::Display) -> Self {
        PredictError::Generation(format!("{context}: {}", first_line(err)))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, PredictError::Validation { .. })
    }
}

/// candle appends a captured backtrace after the message when `RUST_BACKTRACE` is set.
/// Only the message travels in the error, the rest goes to the debug log.
fn first_line(err: impl fmt::Display) -> String {
    let full = err.to_string();
    match full.split_once('\n') {
        Some((message, _)) => {
            tracing::debug!(error = %full, "full error");
            message.trim_end().to_string()
        }
        None => full,
    }
}
