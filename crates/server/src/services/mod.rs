//! Business logic, independent of the HTTP layer.

pub mod allocator;
pub mod auth;
pub mod email;
pub mod reconcile;
pub mod referrals;
pub mod session;
