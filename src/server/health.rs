//! Health and readiness checks.

use super::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

/// Health response body.
#[derive(Debug, Serialize)]
pub struct Health {
    /// `ok` when the process is up.
    pub status: &'static str,
}

/// Liveness: the process is up.
pub async fn health_check() -> Json<Health> {
    Json(Health { status: "ok" })
}

/// Readiness: the store answers queries.
pub async fn readiness_check(State(state): State<AppState>) -> Result<Json<Health>, StatusCode> {
    match state.store.list_events().await {
        Ok(_) => Ok(Json(Health { status: "ready" })),
        Err(error) => {
            tracing::warn!(%error, "readiness check failed");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
