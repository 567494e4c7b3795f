use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::api::models::PredictionResponse;
use crate::error::PredictError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Predict(#[from] PredictError),

    #[error("a prediction is already running")]
    Busy,

    #[error("prediction worker failed: {0}")]
    Worker(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Predict(PredictError::Validation { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Predict(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Busy => StatusCode::CONFLICT,
            ApiError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "prediction failed");
        } else {
            tracing::warn!(error = %self, "prediction rejected");
        }
        (status, Json(PredictionResponse::failed(self.to_string()))).into_response()
    }
}
