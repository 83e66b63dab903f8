//! Ambassador dashboard handler.

use axum::{Json, extract::State};
use serde::Serialize;

use crate::error::Result;
use crate::middleware::RequireSession;
use crate::models::LeaderboardEntry;
use crate::state::AppState;

#[derive(Serialize)]
pub struct DashboardResponse {
    rank: u64,
    referral_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    referral_code: Option<String>,
    total_verified: u64,
    leaderboard: Vec<LeaderboardEntry>,
}

/// `GET /api/dashboard`
pub async fn show(
    RequireSession(email): RequireSession,
    State(state): State<AppState>,
) -> Result<Json<DashboardResponse>> {
    let dashboard = state.referrals().dashboard(&email).await?;

    Ok(Json(DashboardResponse {
        rank: dashboard.rank,
        referral_count: dashboard.referral_count,
        referral_code: dashboard.referral_code.map(|c| c.as_str().to_owned()),
        total_verified: dashboard.total_verified,
        leaderboard: dashboard.leaderboard,
    }))
}
