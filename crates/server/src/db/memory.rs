//! In-memory store.
//!
//! Backs service and router tests with the same atomic semantics as the
//! Postgres store: every trait operation runs under one lock, so the
//! conditional verification flip and the duplicate-referral check-and-insert
//! are indivisible exactly as their SQL counterparts are.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use ambassador_core::{AccountId, CodeSlot, Email, ReferralCode, ReferralEventId};

use super::{AccountStore, StoreError};
use crate::models::{Account, LeaderboardEntry, NewPendingAccount, ReferralEvent};

#[derive(Default)]
struct Inner {
    accounts: HashMap<i64, Account>,
    referrals: HashMap<String, ReferralEvent>,
    next_account_id: i64,
    next_event_id: i64,
}

/// Mutex-guarded in-memory [`AccountStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    /// Remaining operations to fail with `Unavailable` (test scripting).
    outages: AtomicU32,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next `n` operations to fail as transient outages.
    pub fn inject_outages(&self, n: u32) {
        self.outages.store(n, Ordering::SeqCst);
    }

    fn check_outage(&self) -> Result<(), StoreError> {
        let remaining = self.outages.load(Ordering::SeqCst);
        if remaining > 0 {
            self.outages.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected outage".to_owned()));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock poisoning only happens if a test panicked mid-operation.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn insert_pending(&self, new: NewPendingAccount) -> Result<Account, StoreError> {
        self.check_outage()?;
        let mut inner = self.lock();

        if inner.accounts.values().any(|a| a.email == new.email) {
            return Err(StoreError::Conflict("email already exists".to_owned()));
        }

        inner.next_account_id += 1;
        let id = inner.next_account_id;
        let account = Account {
            id: AccountId::new(id),
            email: new.email,
            password_hash: new.password_hash,
            verified: false,
            code: new.code,
            referral_count: 0,
            created_at: Utc::now(),
            pending: Some(crate::models::PendingVerification {
                otp: new.otp,
                otp_expires_at: new.otp_expires_at,
                token: new.token,
            }),
        };
        inner.accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn delete_by_email(&self, email: &Email) -> Result<bool, StoreError> {
        self.check_outage()?;
        let mut inner = self.lock();
        let id = inner
            .accounts
            .iter()
            .find(|(_, a)| &a.email == email)
            .map(|(id, _)| *id);
        Ok(match id {
            Some(id) => inner.accounts.remove(&id).is_some(),
            None => false,
        })
    }

    async fn find_by_email(&self, email: &Email) -> Result<Option<Account>, StoreError> {
        self.check_outage()?;
        let inner = self.lock();
        Ok(inner.accounts.values().find(|a| &a.email == email).cloned())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Account>, StoreError> {
        self.check_outage()?;
        let inner = self.lock();
        Ok(inner
            .accounts
            .values()
            .find(|a| {
                !a.verified
                    && a.pending
                        .as_ref()
                        .is_some_and(|p| p.token.as_str() == token)
            })
            .cloned())
    }

    async fn find_by_code(&self, code: &ReferralCode) -> Result<Option<Account>, StoreError> {
        self.check_outage()?;
        let inner = self.lock();
        Ok(inner
            .accounts
            .values()
            .find(|a| a.referral_code() == Some(code))
            .cloned())
    }

    async fn complete_verification(
        &self,
        id: AccountId,
        code: &ReferralCode,
    ) -> Result<Account, StoreError> {
        self.check_outage()?;
        let mut inner = self.lock();

        if inner
            .accounts
            .values()
            .any(|a| a.referral_code() == Some(code))
        {
            return Err(StoreError::Conflict("referral code already taken".to_owned()));
        }

        let account = inner
            .accounts
            .get_mut(&id.as_i64())
            .ok_or(StoreError::NotFound)?;

        // The losing side of a verify race sees the account already flipped.
        if account.verified {
            return Err(StoreError::NotFound);
        }

        account.verified = true;
        account.code = CodeSlot::Assigned(code.clone());
        account.pending = None;
        Ok(account.clone())
    }

    async fn max_assigned_suffix(&self) -> Result<Option<u32>, StoreError> {
        self.check_outage()?;
        let inner = self.lock();
        Ok(inner
            .accounts
            .values()
            .filter_map(|a| a.referral_code().map(ReferralCode::suffix))
            .max())
    }

    async fn record_referral(
        &self,
        referred: &Email,
        referrer: AccountId,
        code: &ReferralCode,
    ) -> Result<ReferralEvent, StoreError> {
        self.check_outage()?;
        let mut inner = self.lock();

        if inner.referrals.contains_key(referred.as_str()) {
            return Err(StoreError::Conflict(
                "email has already been referred".to_owned(),
            ));
        }

        let account = inner
            .accounts
            .get_mut(&referrer.as_i64())
            .ok_or(StoreError::NotFound)?;
        account.referral_count += 1;

        inner.next_event_id += 1;
        let event = ReferralEvent {
            id: ReferralEventId::new(inner.next_event_id),
            email: referred.clone(),
            referrer_id: referrer,
            code: code.clone(),
            created_at: Utc::now(),
        };
        inner
            .referrals
            .insert(referred.as_str().to_owned(), event.clone());
        Ok(event)
    }

    async fn set_referral_count(
        &self,
        code: &ReferralCode,
        count: u32,
    ) -> Result<bool, StoreError> {
        self.check_outage()?;
        let mut inner = self.lock();
        let account = inner
            .accounts
            .values_mut()
            .find(|a| a.referral_code() == Some(code));
        Ok(match account {
            Some(account) => {
                account.referral_count = count;
                true
            }
            None => false,
        })
    }

    async fn leaderboard(&self, limit: u32) -> Result<Vec<LeaderboardEntry>, StoreError> {
        self.check_outage()?;
        let inner = self.lock();
        let mut verified: Vec<&Account> = inner.accounts.values().filter(|a| a.verified).collect();
        verified.sort_by(|a, b| {
            b.referral_count
                .cmp(&a.referral_count)
                .then_with(|| a.email.as_str().cmp(b.email.as_str()))
        });
        Ok(verified
            .into_iter()
            .take(limit as usize)
            .map(|a| LeaderboardEntry {
                email: a.email.clone(),
                referral_count: a.referral_count,
            })
            .collect())
    }

    async fn rank_for_count(&self, count: u32) -> Result<u64, StoreError> {
        self.check_outage()?;
        let inner = self.lock();
        let ahead = inner
            .accounts
            .values()
            .filter(|a| a.verified && a.referral_count > count)
            .count() as u64;
        Ok(ahead + 1)
    }

    async fn count_verified(&self) -> Result<u64, StoreError> {
        self.check_outage()?;
        let inner = self.lock();
        Ok(inner.accounts.values().filter(|a| a.verified).count() as u64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ambassador_core::{OtpCode, VerificationToken};

    fn new_pending(email: &str) -> NewPendingAccount {
        NewPendingAccount {
            email: Email::parse(email).unwrap(),
            password_hash: "hash".to_owned(),
            code: CodeSlot::new_placeholder(),
            otp: OtpCode::generate(),
            otp_expires_at: Utc::now() + chrono::Duration::minutes(15),
            token: VerificationToken::generate(),
        }
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_email() {
        let store = MemoryStore::new();
        store.insert_pending(new_pending("a@example.com")).await.unwrap();
        let err = store
            .insert_pending(new_pending("a@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_find_by_token_ignores_verified() {
        let store = MemoryStore::new();
        let new = new_pending("a@example.com");
        let token = new.token.clone();
        let account = store.insert_pending(new).await.unwrap();

        assert!(store.find_by_token(token.as_str()).await.unwrap().is_some());

        let code = ReferralCode::parse("AMB-001").unwrap();
        store.complete_verification(account.id, &code).await.unwrap();

        assert!(store.find_by_token(token.as_str()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_verification_is_one_shot() {
        let store = MemoryStore::new();
        let account = store.insert_pending(new_pending("a@example.com")).await.unwrap();
        let code = ReferralCode::parse("AMB-001").unwrap();

        let verified = store.complete_verification(account.id, &code).await.unwrap();
        assert!(verified.verified);
        assert!(verified.pending.is_none());
        assert_eq!(verified.referral_code(), Some(&code));

        let again = ReferralCode::parse("AMB-002").unwrap();
        let err = store.complete_verification(account.id, &again).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_complete_verification_rejects_taken_code() {
        let store = MemoryStore::new();
        let a = store.insert_pending(new_pending("a@example.com")).await.unwrap();
        let b = store.insert_pending(new_pending("b@example.com")).await.unwrap();
        let code = ReferralCode::parse("AMB-001").unwrap();

        store.complete_verification(a.id, &code).await.unwrap();
        let err = store.complete_verification(b.id, &code).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_record_referral_increments_once() {
        let store = MemoryStore::new();
        let account = store.insert_pending(new_pending("amb@example.com")).await.unwrap();
        let code = ReferralCode::parse("AMB-001").unwrap();
        let account = store.complete_verification(account.id, &code).await.unwrap();

        let referred = Email::parse("bob@example.com").unwrap();
        store.record_referral(&referred, account.id, &code).await.unwrap();

        let err = store
            .record_referral(&referred, account.id, &code)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let reloaded = store.find_by_code(&code).await.unwrap().unwrap();
        assert_eq!(reloaded.referral_count, 1);
    }

    #[tokio::test]
    async fn test_set_referral_count_unmatched_is_noop() {
        let store = MemoryStore::new();
        let missing = ReferralCode::parse("AMB-999").unwrap();
        assert!(!store.set_referral_count(&missing, 5).await.unwrap());
    }

    #[tokio::test]
    async fn test_injected_outages_are_transient() {
        let store = MemoryStore::new();
        store.inject_outages(1);

        let err = store.count_verified().await.unwrap_err();
        assert!(err.is_transient());

        assert_eq!(store.count_verified().await.unwrap(), 0);
    }
}
