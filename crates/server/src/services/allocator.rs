//! Serialized allocation of permanent referral codes.
//!
//! Codes are dense three-digit suffixes handed out in order. Allocation is a
//! read-modify-write on "the highest suffix so far", so it runs under an async
//! mutex: concurrent verifications queue here and each one gets a distinct
//! suffix. The counter seeds itself lazily from the store's maximum assigned
//! suffix, then never consults the store again.
//!
//! If a verification allocates a suffix and then loses the verified-flip race,
//! that suffix is simply never assigned. A gap in the sequence is fine; a
//! duplicate is not.

use thiserror::Error;
use tokio::sync::Mutex;

use ambassador_core::ReferralCode;

use crate::db::{AccountStore, StoreError};

/// Errors from code allocation.
#[derive(Debug, Error)]
pub enum AllocatorError {
    /// The store could not report the current maximum suffix.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// All three-digit suffixes are taken.
    #[error("referral code space exhausted")]
    Exhausted,
}

/// Monotonic, mutex-serialized code allocator.
#[derive(Debug, Default)]
pub struct CodeAllocator {
    /// Highest suffix handed out so far; `None` until first allocation.
    last: Mutex<Option<u32>>,
}

impl CodeAllocator {
    /// Create an unseeded allocator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last: Mutex::new(None),
        }
    }

    /// Allocate the next unused code.
    ///
    /// # Errors
    ///
    /// Returns `AllocatorError::Store` if seeding from the store fails, and
    /// `AllocatorError::Exhausted` once the suffix space is used up.
    pub async fn allocate(&self, store: &dyn AccountStore) -> Result<ReferralCode, AllocatorError> {
        let mut last = self.last.lock().await;

        let current = match *last {
            Some(n) => n,
            None => store.max_assigned_suffix().await?.unwrap_or(0),
        };

        let next = current + 1;
        let code = ReferralCode::from_suffix(next).map_err(|_| AllocatorError::Exhausted)?;
        *last = Some(next);
        Ok(code)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::db::memory::MemoryStore;

    #[tokio::test]
    async fn test_first_allocation_starts_at_one() {
        let store = MemoryStore::new();
        let allocator = CodeAllocator::new();
        let code = allocator.allocate(&store).await.unwrap();
        assert_eq!(code.as_str(), "AMB-001");
    }

    #[tokio::test]
    async fn test_allocations_are_sequential() {
        let store = MemoryStore::new();
        let allocator = CodeAllocator::new();
        assert_eq!(allocator.allocate(&store).await.unwrap().as_str(), "AMB-001");
        assert_eq!(allocator.allocate(&store).await.unwrap().as_str(), "AMB-002");
        assert_eq!(allocator.allocate(&store).await.unwrap().as_str(), "AMB-003");
    }

    #[tokio::test]
    async fn test_concurrent_allocations_are_distinct() {
        let store = Arc::new(MemoryStore::new());
        let allocator = Arc::new(CodeAllocator::new());

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = Arc::clone(&store);
            let allocator = Arc::clone(&allocator);
            handles.push(tokio::spawn(async move {
                allocator.allocate(store.as_ref()).await.unwrap()
            }));
        }

        let mut codes = Vec::new();
        for handle in handles {
            codes.push(handle.await.unwrap());
        }
        codes.sort_by_key(ReferralCode::suffix);
        codes.dedup();
        assert_eq!(codes.len(), 20);
    }

    #[tokio::test]
    async fn test_exhaustion_after_max_suffix() {
        let store = MemoryStore::new();
        let allocator = CodeAllocator::new();
        // Drain the space from the top.
        {
            let mut last = allocator.last.lock().await;
            *last = Some(999);
        }
        let err = allocator.allocate(&store).await.unwrap_err();
        assert!(matches!(err, AllocatorError::Exhausted));
    }
}
