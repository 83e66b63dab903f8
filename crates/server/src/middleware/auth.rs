//! Bearer-token authentication extractor.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};

use ambassador_core::Email;

use crate::error::AppError;
use crate::services::session::SessionError;
use crate::state::AppState;

/// Extractor that requires a valid session token.
///
/// Pulls the `Authorization: Bearer <token>` header, verifies the signature
/// and expiry, and hands the handler the authenticated email.
///
/// # Example
///
/// ```rust,ignore
/// async fn dashboard(
///     RequireSession(email): RequireSession,
/// ) -> impl IntoResponse {
///     format!("Hello, {email}!")
/// }
/// ```
pub struct RequireSession(pub Email);

impl FromRequestParts<AppState> for RequireSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::Session(SessionError::Missing))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AppError::Session(SessionError::Missing))?;

        let email = state
            .sessions()
            .authenticate(token, state.clock().now())?;
        Ok(Self(email))
    }
}
