//! Distributed locks guarding scheduler critical sections.
//!
//! The [`LockService`] trait provides a pluggable mechanism for named,
//! time-bounded leases, separate from storage concerns:
//!
//! - **Testing**: Use [`memory::InMemoryLockService`] for unit tests
//! - **Production**: Use a Redis/redlock or Postgres advisory-lock backend
//!
//! ## Design Principles
//!
//! - **Leases, not locks**: holders get time-bounded leases; a crashed
//!   holder's lease expires and another instance takes over
//! - **Non-blocking acquisition**: an instance that fails to acquire yields
//!   immediately and waits for its next timer tick, never spinning
//! - **Auto-extension**: the tick runner extends the lease while the
//!   critical section runs, so leases do not expire mid-section under
//!   normal operation

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Result of a lock acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockResult {
    /// The lease was acquired.
    Acquired {
        /// Lease token required for extension and release.
        lease_token: String,
        /// Duration until the lease expires.
        lease_duration: Duration,
    },
    /// Another instance holds the lease.
    Held {
        /// Identifier of the current holder, if known.
        current_holder: Option<String>,
    },
}

impl LockResult {
    /// Returns true if the lease was acquired.
    #[must_use]
    pub const fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired { .. })
    }

    /// Returns the lease token if acquired.
    #[must_use]
    pub fn lease_token(&self) -> Option<&str> {
        match self {
            Self::Acquired { lease_token, .. } => Some(lease_token),
            Self::Held { .. } => None,
        }
    }
}

/// Result of a lease extension attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtendResult {
    /// The lease was extended.
    Extended {
        /// New lease duration.
        lease_duration: Duration,
    },
    /// The lease expired or was taken over.
    Lost,
    /// The provided lease token does not match the current lease.
    InvalidToken,
}

impl ExtendResult {
    /// Returns true if the lease was extended.
    #[must_use]
    pub const fn is_extended(&self) -> bool {
        matches!(self, Self::Extended { .. })
    }
}

/// Mutually-exclusive, named, time-bounded leases across service instances.
///
/// Each scheduler's critical section is the unit of coordination; no
/// in-process mutexes are needed on top of this.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync` to support concurrent access from async
/// tasks.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Attempts to acquire the named lease, without blocking or retrying.
    ///
    /// # Arguments
    ///
    /// * `lock_key` - Identifier for the lock (e.g. `"events-processor"`)
    /// * `instance_id` - Unique identifier for this instance
    async fn try_acquire(&self, lock_key: &str, instance_id: &str) -> Result<LockResult>;

    /// Extends an existing lease.
    ///
    /// Called periodically while the critical section runs so the lease
    /// does not expire mid-section.
    async fn extend(&self, lock_key: &str, lease_token: &str) -> Result<ExtendResult>;

    /// Releases a lease.
    ///
    /// Returns `true` if released, `false` if the lease was already expired
    /// or held by another instance.
    async fn release(&self, lock_key: &str, lease_token: &str) -> Result<bool>;

    /// Returns the current holder of the named lease, if any.
    async fn current_holder(&self, lock_key: &str) -> Result<Option<String>>;
}
