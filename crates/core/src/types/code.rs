//! Referral code types.
//!
//! Permanent referral codes follow a fixed format: the `AMB-` prefix plus a
//! zero-padded three-digit suffix (`AMB-001`, `AMB-042`, ...). Before
//! verification an account holds a `PENDING-` placeholder instead, which can
//! never collide with a permanent code because the prefixes differ.

use core::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Errors that can occur when building a [`ReferralCode`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferralCodeError {
    /// The input does not match `AMB-` + exactly three digits.
    #[error("referral code must match {prefix}NNN", prefix = ReferralCode::PREFIX)]
    InvalidFormat,
    /// The numeric suffix is outside the representable range.
    #[error("referral code suffix must be between 1 and {max}", max = ReferralCode::MAX_SUFFIX)]
    OutOfRange,
}

/// A permanent referral code (`AMB-` + three zero-padded digits).
///
/// The inner string is always canonical; parsing is strict, so free-text
/// lookalikes such as `AMB-1` or `AMB-0420` are rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ReferralCode(String);

impl ReferralCode {
    /// Constant prefix shared by all permanent codes.
    pub const PREFIX: &'static str = "AMB-";

    /// Fixed width of the zero-padded numeric suffix.
    pub const SUFFIX_WIDTH: usize = 3;

    /// Largest suffix representable at the fixed width.
    pub const MAX_SUFFIX: u32 = 999;

    /// Parse a `ReferralCode` from its exact canonical form.
    ///
    /// # Errors
    ///
    /// Returns `ReferralCodeError::InvalidFormat` unless the input is the
    /// prefix followed by exactly three ASCII digits.
    pub fn parse(s: &str) -> Result<Self, ReferralCodeError> {
        let suffix = s
            .strip_prefix(Self::PREFIX)
            .ok_or(ReferralCodeError::InvalidFormat)?;

        if suffix.len() != Self::SUFFIX_WIDTH || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ReferralCodeError::InvalidFormat);
        }

        Ok(Self(s.to_owned()))
    }

    /// Build a code from its numeric suffix.
    ///
    /// # Errors
    ///
    /// Returns `ReferralCodeError::OutOfRange` if the suffix is zero or does
    /// not fit in the fixed width.
    pub fn from_suffix(n: u32) -> Result<Self, ReferralCodeError> {
        if n == 0 || n > Self::MAX_SUFFIX {
            return Err(ReferralCodeError::OutOfRange);
        }
        Ok(Self(format!(
            "{}{:0width$}",
            Self::PREFIX,
            n,
            width = Self::SUFFIX_WIDTH
        )))
    }

    /// The numeric suffix of this code.
    #[must_use]
    pub fn suffix(&self) -> u32 {
        // Canonical by construction, so the suffix always parses.
        self.0[Self::PREFIX.len()..].parse().unwrap_or(0)
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extract every referral-code token from free text, in order of
    /// appearance. Only exact `AMB-` + three-digit tokens match; longer digit
    /// runs are skipped.
    #[must_use]
    pub fn extract_all(text: &str) -> Vec<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let re = PATTERN.get_or_init(|| {
            #[allow(clippy::unwrap_used)] // pattern is a compile-time constant
            Regex::new(r"AMB-\d{3}").unwrap()
        });

        re.find_iter(text)
            .filter_map(|m| {
                // Reject matches embedded in a longer digit run (e.g. AMB-1234).
                let after = &text[m.end()..];
                if after.starts_with(|c: char| c.is_ascii_digit()) {
                    return None;
                }
                Self::parse(m.as_str()).ok()
            })
            .collect()
    }
}

impl fmt::Display for ReferralCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ReferralCode {
    type Err = ReferralCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for ReferralCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The referral-code slot on an account.
///
/// A pending account holds a unique `PENDING-` placeholder; verification
/// replaces it with a permanent [`ReferralCode`] exactly once. The two states
/// are mutually exclusive by construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CodeSlot {
    /// Temporary placeholder held before verification.
    Placeholder(String),
    /// Permanent code assigned at verification.
    Assigned(ReferralCode),
}

impl CodeSlot {
    /// Prefix used by placeholder codes.
    pub const PLACEHOLDER_PREFIX: &'static str = "PENDING-";

    /// Generate a fresh unique placeholder.
    #[must_use]
    pub fn new_placeholder() -> Self {
        Self::Placeholder(format!("{}{}", Self::PLACEHOLDER_PREFIX, Uuid::new_v4()))
    }

    /// Reconstruct a slot from its stored string form.
    #[must_use]
    pub fn from_stored(s: &str) -> Self {
        ReferralCode::parse(s).map_or_else(|_| Self::Placeholder(s.to_owned()), Self::Assigned)
    }

    /// The permanent code, if one has been assigned.
    #[must_use]
    pub const fn assigned(&self) -> Option<&ReferralCode> {
        match self {
            Self::Assigned(code) => Some(code),
            Self::Placeholder(_) => None,
        }
    }

    /// Whether a permanent code has been assigned.
    #[must_use]
    pub const fn is_assigned(&self) -> bool {
        matches!(self, Self::Assigned(_))
    }

    /// The stored string form of the slot.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Placeholder(s) => s,
            Self::Assigned(code) => code.as_str(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid() {
        let code = ReferralCode::parse("AMB-001").unwrap();
        assert_eq!(code.as_str(), "AMB-001");
        assert_eq!(code.suffix(), 1);

        assert_eq!(ReferralCode::parse("AMB-999").unwrap().suffix(), 999);
    }

    #[test]
    fn test_parse_rejects_wrong_shape() {
        assert!(ReferralCode::parse("AMB-1").is_err());
        assert!(ReferralCode::parse("AMB-0042").is_err());
        assert!(ReferralCode::parse("amb-001").is_err());
        assert!(ReferralCode::parse("XYZ-001").is_err());
        assert!(ReferralCode::parse("AMB-0a1").is_err());
        assert!(ReferralCode::parse("PENDING-001").is_err());
        assert!(ReferralCode::parse("").is_err());
    }

    #[test]
    fn test_from_suffix() {
        assert_eq!(ReferralCode::from_suffix(7).unwrap().as_str(), "AMB-007");
        assert_eq!(ReferralCode::from_suffix(999).unwrap().as_str(), "AMB-999");

        assert_eq!(
            ReferralCode::from_suffix(0),
            Err(ReferralCodeError::OutOfRange)
        );
        assert_eq!(
            ReferralCode::from_suffix(1000),
            Err(ReferralCodeError::OutOfRange)
        );
    }

    #[test]
    fn test_extract_all() {
        let text = "signed up via AMB-042, also mentions AMB-001 and junk AMB-12";
        let codes = ReferralCode::extract_all(text);
        assert_eq!(codes.len(), 2);
        assert_eq!(codes[0].as_str(), "AMB-042");
        assert_eq!(codes[1].as_str(), "AMB-001");
    }

    #[test]
    fn test_extract_all_skips_longer_digit_runs() {
        let codes = ReferralCode::extract_all("AMB-1234 AMB-567");
        assert_eq!(codes.len(), 1);
        assert_eq!(codes[0].as_str(), "AMB-567");
    }

    #[test]
    fn test_placeholder_never_parses_as_permanent() {
        let slot = CodeSlot::new_placeholder();
        assert!(!slot.is_assigned());
        assert!(ReferralCode::parse(slot.as_str()).is_err());
    }

    #[test]
    fn test_slot_roundtrip_through_storage() {
        let assigned = CodeSlot::Assigned(ReferralCode::parse("AMB-005").unwrap());
        assert_eq!(CodeSlot::from_stored(assigned.as_str()), assigned);

        let pending = CodeSlot::new_placeholder();
        assert_eq!(CodeSlot::from_stored(pending.as_str()), pending);
    }

    #[test]
    fn test_serde_transparent() {
        let code = ReferralCode::parse("AMB-010").unwrap();
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, "\"AMB-010\"");
    }
}
