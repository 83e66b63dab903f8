//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures server errors to Sentry
//! before responding to the client. All route handlers return
//! `Result<T, AppError>`. Responses are JSON `{"message": ...}`; storage
//! outages answer 503 with a `retry_after` hint so clients back off instead
//! of hammering.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::db::StoreError;
use crate::services::allocator::AllocatorError;
use crate::services::auth::AuthError;
use crate::services::email::NotificationFailure;
use crate::services::referrals::ReferralError;
use crate::services::session::SessionError;

/// Seconds clients should wait before retrying a 503.
const RETRY_AFTER_SECS: u32 = 10;

/// Application-level error type for the ambassador server.
#[derive(Debug, Error)]
pub enum AppError {
    /// Registration, verification, or login failed.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Referral tracking or dashboard read failed.
    #[error("Referral error: {0}")]
    Referral(#[from] ReferralError),

    /// Session token missing or rejected.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u32>,
}

fn store_status(e: &StoreError) -> StatusCode {
    if e.is_transient() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Auth(err) => match err {
                AuthError::InvalidEmail(_)
                | AuthError::WeakPassword(_)
                | AuthError::DuplicateAccount
                | AuthError::InvalidToken
                | AuthError::InvalidOtp
                | AuthError::OtpExpired => StatusCode::BAD_REQUEST,
                AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                AuthError::NotVerified => StatusCode::FORBIDDEN,
                AuthError::Notification(e) => match e.failure() {
                    NotificationFailure::Recipient => StatusCode::BAD_REQUEST,
                    NotificationFailure::Permanent => StatusCode::INTERNAL_SERVER_ERROR,
                    NotificationFailure::Transient => StatusCode::SERVICE_UNAVAILABLE,
                },
                AuthError::Allocator(AllocatorError::Store(e)) => store_status(e),
                AuthError::Store(e) => store_status(e),
                AuthError::Allocator(AllocatorError::Exhausted) | AuthError::PasswordHash => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Referral(err) => match err {
                ReferralError::InvalidEmail(_) | ReferralError::DuplicateReferral => {
                    StatusCode::BAD_REQUEST
                }
                ReferralError::UnknownCode | ReferralError::AccountNotFound => {
                    StatusCode::NOT_FOUND
                }
                ReferralError::Store(e) => store_status(e),
            },
            Self::Session(_) => StatusCode::UNAUTHORIZED,
            Self::Store(e) => store_status(e),
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Server errors never leak internals.
    fn message(&self, status: StatusCode) -> String {
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return "Service temporarily unavailable, please retry".to_string();
        }
        if status.is_server_error() {
            return "Internal server error".to_string();
        }
        match self {
            Self::Auth(err) => err.to_string(),
            Self::Referral(err) => err.to_string(),
            Self::Session(err) => err.to_string(),
            Self::BadRequest(msg) => msg.clone(),
            // 4xx from storage does not happen; covered for completeness.
            Self::Store(_) | Self::Internal(_) => "Request failed".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let body = ErrorBody {
            message: self.message(status),
            retry_after: (status == StatusCode::SERVICE_UNAVAILABLE).then_some(RETRY_AFTER_SECS),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;
