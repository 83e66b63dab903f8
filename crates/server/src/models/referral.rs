//! Referral event model.

use chrono::{DateTime, Utc};
use serde::Serialize;

use ambassador_core::{AccountId, Email, ReferralCode, ReferralEventId};

/// One successful referral attribution.
///
/// At most one event exists per referred email, globally. Events are created
/// atomically with the +1 to the referring account's count and are never
/// mutated or deleted afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct ReferralEvent {
    pub id: ReferralEventId,
    /// The email address that was referred (globally unique).
    pub email: Email,
    /// The account whose code was used.
    pub referrer_id: AccountId,
    /// The permanent code the referral came in under.
    pub code: ReferralCode,
    pub created_at: DateTime<Utc>,
}
