//! Service info, health, and stats.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use tracing::warn;

use crate::{ApiError, AppState};

pub async fn service_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Autonomous Web Scraping API",
        "version": env!("CARGO_PKG_VERSION"),
        "store": state.store_kind,
        "started_at": state.started_at,
        "health": "/health",
    }))
}

/// Store health. Responds 503 when the store cannot be reached so load
/// balancers take the instance out of rotation.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (status, health, database) = match state.store.ping().await {
        Ok(()) => (StatusCode::OK, "healthy", "connected"),
        Err(e) => {
            warn!(error = %e, store = %state.store_kind, "Health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy", "disconnected")
        }
    };

    (
        status,
        Json(serde_json::json!({
            "status": health,
            "database": database,
            "store": state.store_kind,
            "timestamp": Utc::now(),
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

pub async fn queue_stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let stats = state.store.stats().await?;
    Ok(Json(stats))
}
