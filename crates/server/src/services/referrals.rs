//! Referral tracking and dashboard aggregation.

use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use ambassador_core::{Email, ReferralCode};

use crate::db::{AccountStore, StoreError};
use crate::models::{LeaderboardEntry, ReferralEvent};

/// How many accounts the dashboard leaderboard shows.
const LEADERBOARD_SIZE: u32 = 10;

/// Errors from referral operations.
#[derive(Debug, Error)]
pub enum ReferralError {
    /// The referred email is not a valid address.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] ambassador_core::EmailError),

    /// No verified account holds the given referral code.
    #[error("unknown referral code")]
    UnknownCode,

    /// The referred email has already been credited to an ambassador.
    #[error("this email has already been referred")]
    DuplicateReferral,

    /// The dashboard was requested for an email with no account.
    #[error("account not found")]
    AccountNotFound,

    /// Storage error.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Dashboard data for one ambassador.
#[derive(Debug)]
pub struct Dashboard {
    /// 1-based position among verified accounts by referral count.
    pub rank: u64,
    /// This ambassador's referral count.
    pub referral_count: u32,
    /// The ambassador's permanent code, if verified.
    pub referral_code: Option<ReferralCode>,
    /// Total number of verified ambassadors.
    pub total_verified: u64,
    /// Top ambassadors by referral count.
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// Referral counting and dashboard reads.
pub struct ReferralService {
    store: Arc<dyn AccountStore>,
}

impl ReferralService {
    /// Create a new referral service.
    #[must_use]
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    /// Credit a referral to the ambassador holding `code`.
    ///
    /// The event insert and the count increment are one store transaction,
    /// and the referred email is globally unique, so concurrent submissions
    /// of the same email credit exactly one referral.
    ///
    /// # Errors
    ///
    /// Returns `ReferralError::UnknownCode` if the code is malformed or
    /// unassigned and `ReferralError::DuplicateReferral` if the email has
    /// already been credited.
    #[instrument(skip(self))]
    pub async fn track(&self, referred_email: &str, code: &str) -> Result<ReferralEvent, ReferralError> {
        let referred = Email::parse(referred_email)?;
        // A string that is not even code-shaped cannot belong to any account.
        let code = ReferralCode::parse(code).map_err(|_| ReferralError::UnknownCode)?;

        let referrer = self
            .store
            .find_by_code(&code)
            .await?
            .ok_or(ReferralError::UnknownCode)?;

        let event = self
            .store
            .record_referral(&referred, referrer.id, &code)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => ReferralError::DuplicateReferral,
                other => ReferralError::Store(other),
            })?;

        tracing::info!(code = %code, referred = %referred, "referral recorded");
        Ok(event)
    }

    /// Assemble the dashboard for the given account.
    ///
    /// # Errors
    ///
    /// Returns `ReferralError::AccountNotFound` if the email has no account.
    #[instrument(skip(self))]
    pub async fn dashboard(&self, email: &Email) -> Result<Dashboard, ReferralError> {
        let account = self
            .store
            .find_by_email(email)
            .await?
            .ok_or(ReferralError::AccountNotFound)?;

        let rank = self.store.rank_for_count(account.referral_count).await?;
        let total_verified = self.store.count_verified().await?;
        let leaderboard = self.store.leaderboard(LEADERBOARD_SIZE).await?;

        Ok(Dashboard {
            rank,
            referral_count: account.referral_count,
            referral_code: account.referral_code().cloned(),
            total_verified,
            leaderboard,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ambassador_core::{CodeSlot, OtpCode, VerificationToken};
    use chrono::Utc;

    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::models::NewPendingAccount;

    async fn verified_ambassador(store: &MemoryStore, email: &str, suffix: u32) -> ReferralCode {
        let account = store
            .insert_pending(NewPendingAccount {
                email: Email::parse(email).unwrap(),
                password_hash: "hash".to_owned(),
                code: CodeSlot::new_placeholder(),
                otp: OtpCode::generate(),
                otp_expires_at: Utc::now() + chrono::Duration::minutes(15),
                token: VerificationToken::generate(),
            })
            .await
            .unwrap();
        let code = ReferralCode::from_suffix(suffix).unwrap();
        store.complete_verification(account.id, &code).await.unwrap();
        code
    }

    fn service(store: &Arc<MemoryStore>) -> ReferralService {
        ReferralService::new(Arc::clone(store) as Arc<dyn AccountStore>)
    }

    #[tokio::test]
    async fn test_track_credits_one_referral() {
        let store = Arc::new(MemoryStore::new());
        let code = verified_ambassador(&store, "amb@example.com", 1).await;
        let service = service(&store);

        service.track("friend@example.com", code.as_str()).await.unwrap();

        let account = store.find_by_code(&code).await.unwrap().unwrap();
        assert_eq!(account.referral_count, 1);
    }

    #[tokio::test]
    async fn test_track_rejects_duplicate_email() {
        let store = Arc::new(MemoryStore::new());
        let code_a = verified_ambassador(&store, "a@example.com", 1).await;
        let code_b = verified_ambassador(&store, "b@example.com", 2).await;
        let service = service(&store);

        service.track("friend@example.com", code_a.as_str()).await.unwrap();
        // Same email through a different ambassador still counts as spent.
        let err = service
            .track("friend@example.com", code_b.as_str())
            .await
            .unwrap_err();
        assert!(matches!(err, ReferralError::DuplicateReferral));
    }

    #[tokio::test]
    async fn test_track_rejects_unknown_and_malformed_codes() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store);

        let err = service.track("friend@example.com", "AMB-123").await.unwrap_err();
        assert!(matches!(err, ReferralError::UnknownCode));

        let err = service.track("friend@example.com", "not-a-code").await.unwrap_err();
        assert!(matches!(err, ReferralError::UnknownCode));
    }

    #[tokio::test]
    async fn test_concurrent_tracks_credit_exactly_one() {
        let store = Arc::new(MemoryStore::new());
        let code = verified_ambassador(&store, "amb@example.com", 1).await;
        let service = Arc::new(service(&store));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let service = Arc::clone(&service);
            let code = code.clone();
            handles.push(tokio::spawn(async move {
                service.track("friend@example.com", code.as_str()).await
            }));
        }

        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);

        let account = store.find_by_code(&code).await.unwrap().unwrap();
        assert_eq!(account.referral_count, 1);
    }

    #[tokio::test]
    async fn test_dashboard_rank_and_leaderboard() {
        let store = Arc::new(MemoryStore::new());
        let code_a = verified_ambassador(&store, "a@example.com", 1).await;
        let code_b = verified_ambassador(&store, "b@example.com", 2).await;
        verified_ambassador(&store, "c@example.com", 3).await;
        let service = service(&store);

        for i in 0..3 {
            service
                .track(&format!("fa{i}@example.com"), code_a.as_str())
                .await
                .unwrap();
        }
        service.track("fb0@example.com", code_b.as_str()).await.unwrap();

        let dash = service
            .dashboard(&Email::parse("b@example.com").unwrap())
            .await
            .unwrap();
        assert_eq!(dash.rank, 2);
        assert_eq!(dash.referral_count, 1);
        assert_eq!(dash.total_verified, 3);
        assert_eq!(dash.leaderboard.len(), 3);
        assert_eq!(dash.leaderboard[0].email.as_str(), "a@example.com");

        let dash_c = service
            .dashboard(&Email::parse("c@example.com").unwrap())
            .await
            .unwrap();
        assert_eq!(dash_c.rank, 3);
    }

    #[tokio::test]
    async fn test_dashboard_unknown_account() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store);
        let err = service
            .dashboard(&Email::parse("nobody@example.com").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ReferralError::AccountNotFound));
    }
}
