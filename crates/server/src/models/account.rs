//! Account model and its projections.

use chrono::{DateTime, Utc};
use serde::Serialize;

use ambassador_core::{AccountId, CodeSlot, Email, OtpCode, ReferralCode, VerificationToken};

/// A registered ambassador account.
///
/// An account is either pending (`verified == false`, `pending` populated,
/// placeholder code) or verified (`verified == true`, `pending` cleared,
/// permanent code assigned) - never both. The storage layer enforces this on
/// the verification transition.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: AccountId,
    pub email: Email,
    /// Argon2id password hash.
    pub password_hash: String,
    pub verified: bool,
    pub code: CodeSlot,
    pub referral_count: u32,
    pub created_at: DateTime<Utc>,
    /// One-time verification state; `None` once verified.
    pub pending: Option<PendingVerification>,
}

/// One-time verification state held while an account is pending.
#[derive(Debug, Clone)]
pub struct PendingVerification {
    pub otp: OtpCode,
    pub otp_expires_at: DateTime<Utc>,
    pub token: VerificationToken,
}

impl Account {
    /// The permanent referral code, if this account has been verified.
    #[must_use]
    pub const fn referral_code(&self) -> Option<&ReferralCode> {
        self.code.assigned()
    }

    /// The public view of this account returned on login.
    #[must_use]
    pub fn profile(&self) -> PublicProfile {
        PublicProfile {
            email: self.email.clone(),
            referral_code: self.referral_code().cloned(),
            referral_count: self.referral_count,
        }
    }
}

/// Fields persisted when a registration creates a pending account.
#[derive(Debug, Clone)]
pub struct NewPendingAccount {
    pub email: Email,
    pub password_hash: String,
    /// Always a placeholder at creation time.
    pub code: CodeSlot,
    pub otp: OtpCode,
    pub otp_expires_at: DateTime<Utc>,
    pub token: VerificationToken,
}

/// Public profile view (email, referral code, referral count).
#[derive(Debug, Clone, Serialize)]
pub struct PublicProfile {
    pub email: Email,
    pub referral_code: Option<ReferralCode>,
    pub referral_count: u32,
}

/// One row of the dashboard leaderboard.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub email: Email,
    pub referral_count: u32,
}
