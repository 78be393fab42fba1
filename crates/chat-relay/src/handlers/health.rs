use axum::{extract::State, http::StatusCode, Json};
use chrono::{Local, Utc};
use std::sync::Arc;

use crate::config::Settings;
use crate::models::chat::HealthResponse;

/// Liveness probe. Never calls upstream.
pub async fn health_check(
    State(settings): State<Arc<Settings>>,
) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            environment: settings.environment.clone(),
            has_api_key: settings.has_api_key(),
            server_time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }),
    )
}
