//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                      - Liveness check
//! GET  /health/ready                - Readiness check (database round trip)
//!
//! # Auth
//! POST /api/register                - Register and send verification email
//! POST /api/verify                  - Redeem OTP, assign permanent code
//! POST /api/login                   - Login, returns session token
//!
//! # Referrals
//! GET  /api/dashboard               - Rank, counts, leaderboard (requires session)
//! POST /api/track-referral          - Credit a referral to a code
//! POST /api/update-referral-counts  - Reconciliation batch (absolute counts)
//! ```

pub mod auth;
pub mod dashboard;
pub mod health;
pub mod referrals;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

/// Create the API routes router.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(auth::register))
        .route("/verify", post(auth::verify))
        .route("/login", post(auth::login))
        .route("/dashboard", get(dashboard::show))
        .route("/track-referral", post(referrals::track))
        .route("/update-referral-counts", post(referrals::update_counts))
}

/// Assemble the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::ready))
        .nest("/api", api_routes())
        .with_state(state)
}
