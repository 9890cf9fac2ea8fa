//! In-memory lock service implementation for testing.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No cross-process coordination
//! - **Single-process only**: Leases are not shared across process boundaries

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ulid::Ulid;

use super::{ExtendResult, LockResult, LockService};
use crate::error::{Error, Result};

/// Clock-drift compensation subtracted from every lease, so a lease observed
/// as valid locally is still valid on a backend with a slightly faster
/// clock.
const DRIFT_COMPENSATION: Duration = Duration::from_millis(200);

/// Lease state for one lock key.
#[derive(Debug, Clone)]
struct Lease {
    holder: String,
    token: String,
    expires_at: DateTime<Utc>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lease table lock poisoned")
}

/// In-memory lock service for testing.
///
/// ## Example
///
/// ```rust
/// use std::time::Duration;
/// use trama_engine::lock::memory::InMemoryLockService;
///
/// let locks = InMemoryLockService::new(Duration::from_secs(30));
/// // Use in tests...
/// ```
#[derive(Debug)]
pub struct InMemoryLockService {
    leases: RwLock<HashMap<String, Lease>>,
    lease_duration: Duration,
}

impl Default for InMemoryLockService {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl InMemoryLockService {
    /// Creates a new lock service with the given lease duration.
    #[must_use]
    pub fn new(lease_duration: Duration) -> Self {
        Self {
            leases: RwLock::new(HashMap::new()),
            lease_duration,
        }
    }

    fn generate_token() -> String {
        Ulid::new().to_string()
    }

    fn expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let effective = self.lease_duration.saturating_sub(DRIFT_COMPENSATION);
        now + chrono::Duration::from_std(effective).unwrap_or_else(|_| chrono::Duration::seconds(30))
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn try_acquire(&self, lock_key: &str, instance_id: &str) -> Result<LockResult> {
        let mut leases = self.leases.write().map_err(poison_err)?;
        let now = Utc::now();

        if let Some(lease) = leases.get(lock_key) {
            if lease.expires_at > now && lease.holder != instance_id {
                let current_holder = lease.holder.clone();
                drop(leases);
                return Ok(LockResult::Held {
                    current_holder: Some(current_holder),
                });
            }
            // Expired, or re-acquisition by the same holder - fall through.
        }

        let lease = Lease {
            holder: instance_id.to_string(),
            token: Self::generate_token(),
            expires_at: self.expiry(now),
        };
        let token = lease.token.clone();
        leases.insert(lock_key.to_string(), lease);
        drop(leases);

        Ok(LockResult::Acquired {
            lease_token: token,
            lease_duration: self.lease_duration,
        })
    }

    async fn extend(&self, lock_key: &str, lease_token: &str) -> Result<ExtendResult> {
        let mut leases = self.leases.write().map_err(poison_err)?;
        let now = Utc::now();

        let Some(lease) = leases.get_mut(lock_key) else {
            drop(leases);
            return Ok(ExtendResult::Lost);
        };

        if lease.token != lease_token {
            drop(leases);
            return Ok(ExtendResult::InvalidToken);
        }

        if lease.expires_at <= now {
            drop(leases);
            return Ok(ExtendResult::Lost);
        }

        lease.expires_at = self.expiry(now);
        drop(leases);

        Ok(ExtendResult::Extended {
            lease_duration: self.lease_duration,
        })
    }

    async fn release(&self, lock_key: &str, lease_token: &str) -> Result<bool> {
        let mut leases = self.leases.write().map_err(poison_err)?;

        let matches = leases
            .get(lock_key)
            .is_some_and(|lease| lease.token == lease_token);
        if matches {
            leases.remove(lock_key);
        }
        drop(leases);

        Ok(matches)
    }

    async fn current_holder(&self, lock_key: &str) -> Result<Option<String>> {
        let leases = self.leases.read().map_err(poison_err)?;
        let now = Utc::now();
        let holder = leases.get(lock_key).and_then(|lease| {
            (lease.expires_at > now).then(|| lease.holder.clone())
        });
        drop(leases);
        Ok(holder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_when_free() -> Result<()> {
        let locks = InMemoryLockService::new(Duration::from_secs(30));

        let result = locks.try_acquire("events-processor", "instance-1").await?;
        assert!(result.is_acquired());
        assert!(result.lease_token().is_some());

        Ok(())
    }

    #[tokio::test]
    async fn second_instance_yields_without_retrying() -> Result<()> {
        let locks = InMemoryLockService::new(Duration::from_secs(30));

        let first = locks.try_acquire("events-processor", "instance-1").await?;
        assert!(first.is_acquired());

        let second = locks.try_acquire("events-processor", "instance-2").await?;
        match second {
            LockResult::Held { current_holder } => {
                assert_eq!(current_holder, Some("instance-1".to_string()));
            }
            LockResult::Acquired { .. } => panic!("expected Held"),
        }

        Ok(())
    }

    #[tokio::test]
    async fn extend_with_valid_token() -> Result<()> {
        let locks = InMemoryLockService::new(Duration::from_secs(30));
        let result = locks.try_acquire("evaluator", "instance-1").await?;
        let token = result.lease_token().unwrap().to_string();

        assert!(locks.extend("evaluator", &token).await?.is_extended());
        assert!(locks.extend("evaluator", &token).await?.is_extended());

        Ok(())
    }

    #[tokio::test]
    async fn extend_with_wrong_token() -> Result<()> {
        let locks = InMemoryLockService::new(Duration::from_secs(30));
        let _ = locks.try_acquire("evaluator", "instance-1").await?;

        let result = locks.extend("evaluator", "wrong-token").await?;
        assert_eq!(result, ExtendResult::InvalidToken);

        Ok(())
    }

    #[tokio::test]
    async fn extend_nonexistent_lease_is_lost() -> Result<()> {
        let locks = InMemoryLockService::new(Duration::from_secs(30));
        assert_eq!(locks.extend("evaluator", "token").await?, ExtendResult::Lost);
        Ok(())
    }

    #[tokio::test]
    async fn release_frees_the_lease() -> Result<()> {
        let locks = InMemoryLockService::new(Duration::from_secs(30));
        let result = locks.try_acquire("evaluator", "instance-1").await?;
        let token = result.lease_token().unwrap().to_string();

        assert!(locks.release("evaluator", &token).await?);
        assert_eq!(locks.current_holder("evaluator").await?, None);

        let retaken = locks.try_acquire("evaluator", "instance-2").await?;
        assert!(retaken.is_acquired());

        Ok(())
    }

    #[tokio::test]
    async fn release_with_wrong_token_is_a_no_op() -> Result<()> {
        let locks = InMemoryLockService::new(Duration::from_secs(30));
        let _ = locks.try_acquire("evaluator", "instance-1").await?;

        assert!(!locks.release("evaluator", "wrong-token").await?);
        assert_eq!(
            locks.current_holder("evaluator").await?,
            Some("instance-1".to_string())
        );

        Ok(())
    }

    #[tokio::test]
    async fn expired_lease_can_be_taken_over() -> Result<()> {
        // Lease duration below drift compensation expires immediately.
        let locks = InMemoryLockService::new(Duration::from_millis(1));

        let _ = locks.try_acquire("evaluator", "instance-1").await?;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let takeover = locks.try_acquire("evaluator", "instance-2").await?;
        assert!(takeover.is_acquired());
        assert_eq!(
            locks.current_holder("evaluator").await?,
            Some("instance-2".to_string())
        );

        Ok(())
    }

    #[tokio::test]
    async fn lock_keys_are_independent() -> Result<()> {
        let locks = InMemoryLockService::new(Duration::from_secs(30));

        assert!(locks.try_acquire("events-processor", "a").await?.is_acquired());
        assert!(locks.try_acquire("field-ops-analyzer", "b").await?.is_acquired());

        assert_eq!(
            locks.current_holder("events-processor").await?,
            Some("a".to_string())
        );
        assert_eq!(
            locks.current_holder("field-ops-analyzer").await?,
            Some("b".to_string())
        );

        Ok(())
    }
}
