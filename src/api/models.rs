use serde::{Deserialize, Serialize};

use crate::predictor::GenerationRequest;

/// `POST /predictions` body. `input.prompt` is required, other input fields take their
/// documented defaults.
#[derive(Debug, Deserialize)]
pub struct PredictionRequest {
    pub input: GenerationRequest,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub status: PredictionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PredictionResponse {
    pub fn succeeded(output: Vec<String>) -> Self {
        Self {
            status: PredictionStatus::Succeeded,
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: PredictionStatus::Failed,
            output: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
    pub loader: String,
}
