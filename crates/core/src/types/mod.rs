//! Core types for the ambassador referral backend.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod code;
pub mod email;
pub mod id;
pub mod otp;

pub use code::{CodeSlot, ReferralCode, ReferralCodeError};
pub use email::{Email, EmailError};
pub use id::*;
pub use otp::{OtpCode, VerificationToken};
