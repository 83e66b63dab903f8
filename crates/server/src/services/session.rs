//! Stateless session tokens.
//!
//! A token is `base64url(claims JSON) . base64url(HMAC-SHA256 tag)`, signed
//! with the server's token secret. Nothing is stored server-side: possession
//! of a token with a valid tag and an unexpired `exp` claim is the whole
//! session. Verification uses the MAC crate's constant-time comparison.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Duration;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use ambassador_core::Email;

type HmacSha256 = Hmac<Sha256>;

/// Sessions live for 24 hours.
const SESSION_TTL_HOURS: i64 = 24;

/// Errors from session authentication.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// No bearer token on the request.
    #[error("missing authorization token")]
    Missing,

    /// Malformed token, bad signature, or unparseable claims.
    #[error("invalid authorization token")]
    Invalid,

    /// The token's expiry has passed.
    #[error("expired authorization token")]
    Expired,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    /// The account's email.
    sub: String,
    /// Expiry as a unix timestamp in seconds.
    exp: i64,
}

/// Issues and verifies signed session tokens.
#[derive(Clone)]
pub struct SessionIssuer {
    secret: SecretString,
}

impl SessionIssuer {
    /// Build an issuer over the given signing secret.
    #[must_use]
    pub const fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length, so this cannot fail.
        #[allow(clippy::expect_used)]
        let mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .expect("HMAC accepts keys of any length");
        mac
    }

    /// Issue a token for the given account, valid for 24 hours from `now`.
    #[must_use]
    pub fn issue(&self, email: &Email, now: chrono::DateTime<chrono::Utc>) -> String {
        let claims = SessionClaims {
            sub: email.as_str().to_owned(),
            exp: (now + Duration::hours(SESSION_TTL_HOURS)).timestamp(),
        };
        #[allow(clippy::expect_used)]
        let payload = serde_json::to_vec(&claims).expect("claims serialize infallibly");

        let mut mac = self.mac();
        mac.update(&payload);
        let tag = mac.finalize().into_bytes();

        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(tag)
        )
    }

    /// Verify a token and return the email it was issued for.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Invalid` for structural or signature failures
    /// and `SessionError::Expired` for a valid but stale token.
    pub fn authenticate(
        &self,
        token: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Email, SessionError> {
        let (payload_b64, tag_b64) = token.split_once('.').ok_or(SessionError::Invalid)?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| SessionError::Invalid)?;
        let tag = URL_SAFE_NO_PAD
            .decode(tag_b64)
            .map_err(|_| SessionError::Invalid)?;

        let mut mac = self.mac();
        mac.update(&payload);
        mac.verify_slice(&tag).map_err(|_| SessionError::Invalid)?;

        let claims: SessionClaims =
            serde_json::from_slice(&payload).map_err(|_| SessionError::Invalid)?;
        if claims.exp < now.timestamp() {
            return Err(SessionError::Expired);
        }

        Email::parse(&claims.sub).map_err(|_| SessionError::Invalid)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn issuer() -> SessionIssuer {
        SessionIssuer::new(SecretString::from("test-secret-for-session-tokens"))
    }

    #[test]
    fn test_round_trip() {
        let issuer = issuer();
        let email = Email::parse("alice@example.com").unwrap();
        let now = Utc::now();

        let token = issuer.issue(&email, now);
        let authenticated = issuer.authenticate(&token, now).unwrap();
        assert_eq!(authenticated, email);
    }

    #[test]
    fn test_rejects_tampered_payload() {
        let issuer = issuer();
        let email = Email::parse("alice@example.com").unwrap();
        let token = issuer.issue(&email, Utc::now());

        let (_, tag) = token.split_once('.').unwrap();
        let forged_claims = serde_json::json!({
            "sub": "mallory@example.com",
            "exp": (Utc::now() + Duration::hours(24)).timestamp(),
        });
        let forged = format!(
            "{}.{tag}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap())
        );

        assert_eq!(
            issuer.authenticate(&forged, Utc::now()),
            Err(SessionError::Invalid)
        );
    }

    #[test]
    fn test_rejects_wrong_secret() {
        let email = Email::parse("alice@example.com").unwrap();
        let token = issuer().issue(&email, Utc::now());

        let other = SessionIssuer::new(SecretString::from("a-completely-different-secret"));
        assert_eq!(
            other.authenticate(&token, Utc::now()),
            Err(SessionError::Invalid)
        );
    }

    #[test]
    fn test_rejects_expired() {
        let issuer = issuer();
        let email = Email::parse("alice@example.com").unwrap();
        let issued_at = Utc::now();

        let token = issuer.issue(&email, issued_at);
        let later = issued_at + Duration::hours(25);
        assert_eq!(issuer.authenticate(&token, later), Err(SessionError::Expired));
    }

    #[test]
    fn test_rejects_garbage() {
        let issuer = issuer();
        assert_eq!(
            issuer.authenticate("not-a-token", Utc::now()),
            Err(SessionError::Invalid)
        );
        assert_eq!(
            issuer.authenticate("a.b.c", Utc::now()),
            Err(SessionError::Invalid)
        );
    }
}
