use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::reference::detect_arch_label;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub registry_api_url: String,
    pub registry_push_host: String,
    pub registry_healthy: bool,
    pub detected_arch: String,
    pub uptime_seconds: u64,
    pub total_jobs: usize,
    pub version: String,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Health check");

    let response = HealthResponse {
        status: "ok".to_string(),
        registry_api_url: state.settings.api_url(),
        registry_push_host: state.manager.push_host().to_string(),
        registry_healthy: state.manager.registry().ping().await,
        detected_arch: detect_arch_label(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        total_jobs: state.manager.store().len().await,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (StatusCode::OK, Json(response))
}
