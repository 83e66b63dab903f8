//! Domain models for the ambassador backend.

pub mod account;
pub mod referral;

pub use account::{Account, LeaderboardEntry, NewPendingAccount, PendingVerification, PublicProfile};
pub use referral::ReferralEvent;
