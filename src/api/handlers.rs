use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::api::models::{HealthResponse, PredictionRequest, PredictionResponse};
use crate::app_state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ready".to_string(),
        model: state.predictor.model_id().to_string(),
        loader: state.predictor.strategy().to_string(),
    })
}

pub async fn predict(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PredictionRequest>,
) -> Result<Json<PredictionResponse>, ApiError> {
    // One prediction at a time; a second caller is turned away rather than queued.
    let _permit = state
        .worker
        .clone()
        .try_acquire_owned()
        .map_err(|_| ApiError::Busy)?;

    let request = payload.input;
    tracing::info!(
        n = request.n,
        max_length = request.max_length,
        temperature = request.temperature,
        top_p = request.top_p,
        repetition_penalty = request.repetition_penalty,
        "prediction request"
    );

    let predictor = state.predictor.clone();
    let output = tokio::task::spawn_blocking(move || predictor.predict(&request))
        .await
        .map_err(|e| ApiError::Worker(e.to_string()))??;

    Ok(Json(PredictionResponse::succeeded(output)))
}
