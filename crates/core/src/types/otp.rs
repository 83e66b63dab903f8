//! One-time verification credentials.
//!
//! An [`OtpCode`] is the short numeric code mailed to a registrant; a
//! [`VerificationToken`] is the opaque identifier embedded in the
//! verification link that ties the emailed code back to the pending account.

use core::fmt;

use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};

/// A fixed-length numeric one-time code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct OtpCode(String);

impl OtpCode {
    /// Number of digits in a code.
    pub const LENGTH: usize = 5;

    /// Generate a fresh random code (always exactly [`Self::LENGTH`] digits).
    #[must_use]
    pub fn generate() -> Self {
        let n: u32 = rand::rng().random_range(10_000..100_000);
        Self(n.to_string())
    }

    /// Reconstruct a code from its stored string form.
    #[must_use]
    pub fn from_stored(s: &str) -> Self {
        Self(s.to_owned())
    }

    /// Whether a submitted code matches this one.
    #[must_use]
    pub fn matches(&self, submitted: &str) -> bool {
        self.0 == submitted
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OtpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque token linking a verification email back to its pending account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct VerificationToken(String);

impl VerificationToken {
    /// Length of a generated token.
    pub const LENGTH: usize = 32;

    /// Generate a fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        let token: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(Self::LENGTH)
            .map(char::from)
            .collect();
        Self(token)
    }

    /// Reconstruct a token from its stored string form.
    #[must_use]
    pub fn from_stored(s: &str) -> Self {
        Self(s.to_owned())
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VerificationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
