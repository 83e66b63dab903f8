//! Authentication error types.

use thiserror::Error;

use crate::db::StoreError;
use crate::services::allocator::AllocatorError;
use crate::services::email::NotificationError;

/// Errors that can occur during registration, verification, and login.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid email format.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] ambassador_core::EmailError),

    /// Password too weak or invalid.
    #[error("password validation failed: {0}")]
    WeakPassword(String),

    /// Email is already registered.
    #[error("an account with this email already exists")]
    DuplicateAccount,

    /// Unknown, already-consumed, or otherwise invalid verification token.
    #[error("invalid or expired verification token")]
    InvalidToken,

    /// The submitted OTP does not match.
    #[error("incorrect verification code")]
    InvalidOtp,

    /// The OTP matched but its expiry window has passed.
    #[error("verification code has expired")]
    OtpExpired,

    /// Invalid credentials (wrong password or account not found).
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The account exists but has not completed verification.
    #[error("account is not verified")]
    NotVerified,

    /// The verification email could not be delivered.
    #[error("verification email failed: {0}")]
    Notification(#[from] NotificationError),

    /// Permanent code allocation failed.
    #[error(transparent)]
    Allocator(#[from] AllocatorError),

    /// Storage error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Password hashing error.
    #[error("password hashing error")]
    PasswordHash,
}
