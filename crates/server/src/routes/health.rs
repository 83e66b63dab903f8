//! Liveness and readiness checks.

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::StoreError;
use crate::error::Result;
use crate::state::AppState;

#[derive(Serialize)]
pub struct ReadyResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_reconcile: Option<DateTime<Utc>>,
}

/// Liveness: the process is up.
pub async fn health() -> &'static str {
    "OK"
}

/// Readiness: the database answers a round trip.
///
/// # Errors
///
/// Returns 503 if the database is unreachable.
pub async fn ready(State(state): State<AppState>) -> Result<Json<ReadyResponse>> {
    if let Some(pool) = state.pool() {
        sqlx::query("SELECT 1")
            .fetch_one(pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
            .map_err(crate::error::AppError::Store)?;
    }

    Ok(Json(ReadyResponse {
        status: "ready",
        last_reconcile: state.importer().last_run(),
    }))
}
