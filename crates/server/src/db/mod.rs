//! Storage layer for accounts and referral events.
//!
//! The [`AccountStore`] trait is the seam between the services and the
//! backing store. Production wiring uses [`postgres::PgStore`]; tests inject
//! [`memory::MemoryStore`], which implements the same atomic semantics behind
//! a single lock.
//!
//! Every operation that reads-then-writes shared state (the verification
//! flip, duplicate-referral insert, count updates) is expressed as one atomic
//! store operation so concurrent requests cannot lose updates.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use ambassador_core::{AccountId, Email, ReferralCode};

use crate::models::{Account, LeaderboardEntry, NewPendingAccount, ReferralEvent};

/// Errors from storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached (connectivity, pool timeout). The HTTP
    /// layer maps this to 503 with a retry hint; the reconciliation importer
    /// retries it with backoff.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(sqlx::Error),

    /// Constraint violation (unique email, unique code, unique referral).
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),
}

impl StoreError {
    /// Whether a retry has any chance of succeeding.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::Unavailable(e.to_string())
            }
            other => Self::Database(other),
        }
    }
}

/// Persistent store for accounts and referral events.
///
/// Implementations must provide unique-constraint enforcement (email,
/// permanent code, referred email) and atomic conditional updates for the
/// operations documented below.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a pending account.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the email is already registered.
    async fn insert_pending(&self, new: NewPendingAccount) -> Result<Account, StoreError>;

    /// Delete an account by email (registration rollback).
    ///
    /// Returns `true` if an account was deleted.
    async fn delete_by_email(&self, email: &Email) -> Result<bool, StoreError>;

    /// Look up an account by email.
    async fn find_by_email(&self, email: &Email) -> Result<Option<Account>, StoreError>;

    /// Look up a pending account by its verification token.
    ///
    /// Verified accounts never match: their token is cleared on the
    /// verification transition, which is what makes a consumed token read as
    /// `InvalidToken` on reuse.
    async fn find_by_token(&self, token: &str) -> Result<Option<Account>, StoreError>;

    /// Look up an account by its permanent referral code.
    async fn find_by_code(&self, code: &ReferralCode) -> Result<Option<Account>, StoreError>;

    /// Atomically flip a pending account to verified: assign the permanent
    /// code, set the verified flag, and clear the OTP fields, conditional on
    /// the account still being unverified.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the account does not exist or was
    /// already verified (the losing side of a verify race), and
    /// `StoreError::Conflict` if the code is somehow already taken.
    async fn complete_verification(
        &self,
        id: AccountId,
        code: &ReferralCode,
    ) -> Result<Account, StoreError>;

    /// The highest numeric suffix among assigned permanent codes, if any.
    /// Used once to seed the allocator's monotonic counter.
    async fn max_assigned_suffix(&self) -> Result<Option<u32>, StoreError>;

    /// Record a referral: insert the event and increment the referring
    /// account's count by exactly 1, as one logical transaction.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the referred email already has an
    /// event (under concurrent calls for the same email, exactly one insert
    /// wins).
    async fn record_referral(
        &self,
        referred: &Email,
        referrer: AccountId,
        code: &ReferralCode,
    ) -> Result<ReferralEvent, StoreError>;

    /// Overwrite (not increment) the count of the account holding `code`.
    ///
    /// Returns `false` if no account holds the code - the caller treats that
    /// as a silent no-op, not an error.
    async fn set_referral_count(
        &self,
        code: &ReferralCode,
        count: u32,
    ) -> Result<bool, StoreError>;

    /// Top verified accounts by referral count.
    async fn leaderboard(&self, limit: u32) -> Result<Vec<LeaderboardEntry>, StoreError>;

    /// 1-based rank for a given count: verified accounts with a strictly
    /// greater count, plus one.
    async fn rank_for_count(&self, count: u32) -> Result<u64, StoreError>;

    /// Number of verified accounts.
    async fn count_verified(&self) -> Result<u64, StoreError>;
}
