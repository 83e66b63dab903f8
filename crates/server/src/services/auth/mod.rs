//! Registration, verification, and login.
//!
//! Registration stores a pending account under a placeholder code and emails
//! the OTP; if the email cannot be delivered the pending account is rolled
//! back so the address can register again. Verification checks the OTP
//! against the injected clock, allocates the permanent code, and performs the
//! store's one-shot verified flip, so concurrent verify requests for the same
//! token resolve to exactly one winner.

mod error;

pub use error::AuthError;

use std::sync::Arc;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::Duration;
use tracing::instrument;

use ambassador_core::{CodeSlot, Email, OtpCode, VerificationToken};

use crate::clock::Clock;
use crate::db::{AccountStore, StoreError};
use crate::models::{Account, NewPendingAccount};
use crate::services::allocator::CodeAllocator;
use crate::services::email::Mailer;
use crate::services::session::SessionIssuer;

/// Minimum password length.
const MIN_PASSWORD_LENGTH: usize = 8;

/// How long a one-time code stays valid.
const OTP_TTL_MINUTES: i64 = 15;

/// Outcome of a successful registration.
#[derive(Debug)]
pub struct Registration {
    /// Opaque token the client echoes back on the verify call.
    pub verification_token: VerificationToken,
}

/// Outcome of a successful verification or login.
#[derive(Debug)]
pub struct Session {
    /// Signed bearer token.
    pub token: String,
    /// The account, post-transition.
    pub account: Account,
}

/// Registration, verification, and login flows.
pub struct AuthService {
    store: Arc<dyn AccountStore>,
    mailer: Arc<dyn Mailer>,
    allocator: Arc<CodeAllocator>,
    sessions: SessionIssuer,
    clock: Arc<dyn Clock>,
}

impl AuthService {
    /// Create a new authentication service.
    #[must_use]
    pub fn new(
        store: Arc<dyn AccountStore>,
        mailer: Arc<dyn Mailer>,
        allocator: Arc<CodeAllocator>,
        sessions: SessionIssuer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            mailer,
            allocator,
            sessions,
            clock,
        }
    }

    /// Register a new ambassador and send the verification email.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidEmail` or `AuthError::WeakPassword` for
    /// rejected input, `AuthError::DuplicateAccount` if the email is taken,
    /// and `AuthError::Notification` if the email could not be delivered (in
    /// which case the pending account is rolled back).
    #[instrument(skip(self, password))]
    pub async fn register(&self, email: &str, password: &str) -> Result<Registration, AuthError> {
        let email = Email::parse(email)?;
        validate_password(password)?;
        let password_hash = hash_password(password)?;

        let otp = OtpCode::generate();
        let token = VerificationToken::generate();
        let new = NewPendingAccount {
            email: email.clone(),
            password_hash,
            code: CodeSlot::new_placeholder(),
            otp: otp.clone(),
            otp_expires_at: self.clock.now() + Duration::minutes(OTP_TTL_MINUTES),
            token: token.clone(),
        };

        self.store.insert_pending(new).await.map_err(|e| match e {
            StoreError::Conflict(_) => AuthError::DuplicateAccount,
            other => AuthError::Store(other),
        })?;

        if let Err(e) = self.mailer.send_verification(&email, &otp, &token).await {
            // Without the email the OTP is unreachable, so the pending row is
            // useless and would block this address forever. Roll it back.
            if let Err(rollback) = self.store.delete_by_email(&email).await {
                tracing::error!(
                    email = %email,
                    error = %rollback,
                    "failed to roll back pending account after email failure"
                );
            }
            return Err(AuthError::Notification(e));
        }

        tracing::info!(email = %email, "registered pending account");
        Ok(Registration {
            verification_token: token,
        })
    }

    /// Verify a pending account with its OTP.
    ///
    /// On success the account holds its permanent referral code and the
    /// returned session is live.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidToken` for an unknown or consumed token,
    /// `AuthError::InvalidOtp` for a wrong code, and `AuthError::OtpExpired`
    /// past the expiry window.
    #[instrument(skip_all)]
    pub async fn verify(&self, token: &str, otp: &str) -> Result<Session, AuthError> {
        let account = self
            .store
            .find_by_token(token)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        let pending = account.pending.as_ref().ok_or(AuthError::InvalidToken)?;

        if !pending.otp.matches(otp) {
            return Err(AuthError::InvalidOtp);
        }
        if self.clock.now() > pending.otp_expires_at {
            return Err(AuthError::OtpExpired);
        }

        let code = self.allocator.allocate(self.store.as_ref()).await?;
        let account = self
            .store
            .complete_verification(account.id, &code)
            .await
            .map_err(|e| match e {
                // A concurrent verify won the flip between our read and the
                // update; this request's token is spent.
                StoreError::NotFound => AuthError::InvalidToken,
                other => AuthError::Store(other),
            })?;

        tracing::info!(email = %account.email, code = %code, "account verified");
        Ok(Session {
            token: self.sessions.issue(&account.email, self.clock.now()),
            account,
        })
    }

    /// Login with email and password.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` if the email or password is
    /// wrong and `AuthError::NotVerified` for a pending account.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let email = Email::parse(email).map_err(|_| AuthError::InvalidCredentials)?;

        let account = self
            .store
            .find_by_email(&email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        verify_password(password, &account.password_hash)?;

        if !account.verified {
            return Err(AuthError::NotVerified);
        }

        Ok(Session {
            token: self.sessions.issue(&account.email, self.clock.now()),
            account,
        })
    }
}

fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::WeakPassword(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

/// Hash a password using Argon2id.
fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::PasswordHash)
}

/// Verify a password against a hash.
fn verify_password(password: &str, hash: &str) -> Result<(), AuthError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| AuthError::InvalidCredentials)?;
    let argon2 = Argon2::default();

    argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| AuthError::InvalidCredentials)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use secrecy::SecretString;

    use super::*;
    use crate::clock::ManualClock;
    use crate::db::memory::MemoryStore;
    use crate::services::email::NotificationError;

    /// Records sent messages; optionally fails every send.
    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<(Email, OtpCode, VerificationToken)>>,
        fail: bool,
    }

    impl RecordingMailer {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn last_otp(&self) -> OtpCode {
            self.sent.lock().unwrap().last().unwrap().1.clone()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send_verification(
            &self,
            to: &Email,
            otp: &OtpCode,
            token: &VerificationToken,
        ) -> Result<(), NotificationError> {
            if self.fail {
                return Err(NotificationError::BadAddress(
                    lettre::address::AddressError::MissingParts,
                ));
            }
            self.sent
                .lock()
                .unwrap()
                .push((to.clone(), otp.clone(), token.clone()));
            Ok(())
        }
    }

    struct Harness {
        auth: AuthService,
        store: Arc<MemoryStore>,
        mailer: Arc<RecordingMailer>,
        clock: Arc<ManualClock>,
    }

    fn harness_with_mailer(mailer: RecordingMailer) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let mailer = Arc::new(mailer);
        let clock = Arc::new(ManualClock::default());
        let auth = AuthService::new(
            Arc::clone(&store) as Arc<dyn AccountStore>,
            Arc::clone(&mailer) as Arc<dyn Mailer>,
            Arc::new(CodeAllocator::new()),
            SessionIssuer::new(SecretString::from("test-secret-for-auth-tests")),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        Harness {
            auth,
            store,
            mailer,
            clock,
        }
    }

    fn harness() -> Harness {
        harness_with_mailer(RecordingMailer::default())
    }

    #[tokio::test]
    async fn test_register_sends_otp_and_returns_token() {
        let h = harness();
        let reg = h.auth.register("alice@example.com", "password123").await.unwrap();

        let sent = h.mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.as_str(), "alice@example.com");
        assert_eq!(sent[0].2.as_str(), reg.verification_token.as_str());
    }

    #[tokio::test]
    async fn test_register_rejects_short_password() {
        let h = harness();
        let err = h.auth.register("alice@example.com", "short").await.unwrap_err();
        assert!(matches!(err, AuthError::WeakPassword(_)));
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_email() {
        let h = harness();
        h.auth.register("alice@example.com", "password123").await.unwrap();
        let err = h
            .auth
            .register("alice@example.com", "password123")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DuplicateAccount));
    }

    #[tokio::test]
    async fn test_register_rolls_back_on_email_failure() {
        let h = harness_with_mailer(RecordingMailer::failing());
        let err = h
            .auth
            .register("alice@example.com", "password123")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Notification(_)));

        // The address is free to register again.
        let email = Email::parse("alice@example.com").unwrap();
        assert!(h.store.find_by_email(&email).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_verify_happy_path_assigns_first_code() {
        let h = harness();
        let reg = h.auth.register("alice@example.com", "password123").await.unwrap();
        let otp = h.mailer.last_otp();

        let session = h
            .auth
            .verify(reg.verification_token.as_str(), otp.as_str())
            .await
            .unwrap();
        assert!(session.account.verified);
        assert_eq!(
            session.account.referral_code().map(|c| c.as_str().to_owned()),
            Some("AMB-001".to_owned())
        );
        assert!(!session.token.is_empty());
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_otp() {
        let h = harness();
        let reg = h.auth.register("alice@example.com", "password123").await.unwrap();
        let otp = h.mailer.last_otp();
        let wrong = if otp.as_str() == "11111" { "22222" } else { "11111" };

        let err = h
            .auth
            .verify(reg.verification_token.as_str(), wrong)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidOtp));
    }

    #[tokio::test]
    async fn test_verify_rejects_expired_otp() {
        let h = harness();
        let reg = h.auth.register("alice@example.com", "password123").await.unwrap();
        let otp = h.mailer.last_otp();

        h.clock.advance(Duration::minutes(16));

        let err = h
            .auth
            .verify(reg.verification_token.as_str(), otp.as_str())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::OtpExpired));
    }

    #[tokio::test]
    async fn test_verify_token_is_single_use() {
        let h = harness();
        let reg = h.auth.register("alice@example.com", "password123").await.unwrap();
        let otp = h.mailer.last_otp();

        h.auth
            .verify(reg.verification_token.as_str(), otp.as_str())
            .await
            .unwrap();
        let err = h
            .auth
            .verify(reg.verification_token.as_str(), otp.as_str())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_verify_unknown_token() {
        let h = harness();
        let err = h.auth.verify("no-such-token", "12345").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn test_login_requires_verification() {
        let h = harness();
        h.auth.register("alice@example.com", "password123").await.unwrap();

        let err = h
            .auth
            .login("alice@example.com", "password123")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotVerified));
    }

    #[tokio::test]
    async fn test_login_after_verification() {
        let h = harness();
        let reg = h.auth.register("alice@example.com", "password123").await.unwrap();
        let otp = h.mailer.last_otp();
        h.auth
            .verify(reg.verification_token.as_str(), otp.as_str())
            .await
            .unwrap();

        let session = h.auth.login("alice@example.com", "password123").await.unwrap();
        assert_eq!(session.account.email.as_str(), "alice@example.com");

        let err = h
            .auth
            .login("alice@example.com", "wrong-password")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_login_unknown_email_is_invalid_credentials() {
        let h = harness();
        let err = h
            .auth
            .login("nobody@example.com", "password123")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }
}
