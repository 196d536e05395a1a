use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State, rejection::JsonRejection},
    routing::{get, post},
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::{
    config::SamplingConfig,
    error::ServiceError,
    model::{ModelMetadata, ModelRegistry, PredictRequest, PredictResponse},
};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModelRegistry>,
}

#[derive(Serialize)]
struct MetadataResponse {
    model: ModelMetadata,
    sampling: SamplingConfig,
}

pub fn build_router(registry: Arc<ModelRegistry>) -> Router {
    let state = AppState { registry };

    Router::new()
        .route("/health", get(health))
        .route("/predict", post(predict))
        .route("/metadata", get(metadata))
        .with_state(state)
        // Prompts have no length cap.
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

async fn predict(
    State(state): State<AppState>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictResponse>, ServiceError> {
    let Json(request) = payload?;
    let response = state.registry.predict(request).await?;
    Ok(Json(response))
}

async fn metadata(State(state): State<AppState>) -> Json<MetadataResponse> {
    Json(MetadataResponse {
        model: state.registry.metadata(),
        sampling: *state.registry.sampling(),
    })
}
