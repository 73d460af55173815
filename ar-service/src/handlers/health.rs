use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        message: "agent registry API is running".to_string(),
    })
}

pub async fn version(State(state): State<AppState>) -> Json<crate::state::VersionInfo> {
    Json(state.version.clone())
}
