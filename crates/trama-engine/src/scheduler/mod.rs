//! Lock-guarded, timer-driven schedulers.
//!
//! Three schedulers share one lifecycle, implemented by [`TickRunner`]:
//!
//! ```text
//! IDLE -> (acquire lock) -> ACTIVE -> (drain / collect) -> (enqueue jobs)
//!      -> (release lock) -> IDLE
//! ```
//!
//! - [`events::EventsProcessor`]: drains unprocessed imported events
//! - [`field_ops::FieldOpsAnalyzer`]: drains unprocessed field operations
//! - [`evaluator::GraphEvaluator`]: batches dirty nodes per entity
//!
//! ## Design Principles
//!
//! - **One lease per scheduler**: mutual exclusion across instances comes
//!   entirely from the lock service; there are no in-process mutexes
//! - **Ticks never propagate errors**: a failed tick is logged and produces
//!   no jobs; the next tick retries from the ledgers' still-unprocessed
//!   state
//! - **Busy gate**: the events processor and the evaluator skip their work
//!   while any blocking field operation is unprocessed, so recomputation
//!   never observes a half-migrated schema

pub mod evaluator;
pub mod events;
pub mod field_ops;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::lock::{LockResult, LockService};
use crate::metrics::{EngineMetrics, TimingGuard};

/// Outcome of one scheduler tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The critical section ran.
    Completed {
        /// Number of jobs handed off to the work queue.
        jobs_enqueued: usize,
    },
    /// Another instance holds the lease; nothing was done.
    LockHeld,
    /// The busy gate was closed; nothing was done.
    SkippedBusy,
    /// The critical section failed; the error was logged and swallowed.
    Failed,
}

impl TickOutcome {
    /// Metric label for this outcome.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::LockHeld => "lock_held",
            Self::SkippedBusy => "skipped_busy",
            Self::Failed => "failed",
        }
    }
}

/// One scheduler's critical section, run under its lease by [`TickRunner`].
#[async_trait]
pub trait SchedulerTask: Send + Sync {
    /// Scheduler name; doubles as the lock key.
    fn name(&self) -> &'static str;

    /// Returns true if this tick must be skipped (busy gate closed).
    ///
    /// The default is never gated.
    async fn is_gated(&self) -> Result<bool> {
        Ok(false)
    }

    /// Runs the critical section, returning the number of jobs enqueued.
    async fn run(&self) -> Result<usize>;
}

/// Runs scheduler ticks under a distributed lease.
///
/// Acquisition is non-blocking with zero local retries: a tick that finds
/// the lease held yields immediately. While the critical section runs, the
/// lease is extended in the background so it does not expire mid-section;
/// a crashed instance's lease still expires on its own.
pub struct TickRunner {
    locks: Arc<dyn LockService>,
    instance_id: String,
    metrics: EngineMetrics,
}

impl TickRunner {
    /// Creates a runner identified by `instance_id` across all its ticks.
    #[must_use]
    pub fn new(locks: Arc<dyn LockService>, instance_id: impl Into<String>) -> Self {
        Self {
            locks,
            instance_id: instance_id.into(),
            metrics: EngineMetrics::new(),
        }
    }

    /// Runs one tick of the given scheduler.
    ///
    /// Never returns an error: lock contention and critical-section
    /// failures are logged and reported through the outcome.
    pub async fn tick(&self, task: &dyn SchedulerTask) -> TickOutcome {
        let name = task.name();
        let metrics = self.metrics.clone();
        let _timing = TimingGuard::new(move |duration| {
            metrics.observe_tick_duration(name, duration);
        });

        let outcome = self.tick_inner(task).await;
        self.metrics.record_tick(name, outcome.as_label());
        outcome
    }

    async fn tick_inner(&self, task: &dyn SchedulerTask) -> TickOutcome {
        let name = task.name();

        let acquisition = match self.locks.try_acquire(name, &self.instance_id).await {
            Ok(result) => result,
            Err(error) => {
                tracing::warn!(scheduler = name, %error, "lock acquisition failed");
                return TickOutcome::Failed;
            }
        };

        let (lease_token, lease_duration) = match acquisition {
            LockResult::Acquired {
                lease_token,
                lease_duration,
            } => (lease_token, lease_duration),
            LockResult::Held { current_holder } => {
                tracing::debug!(scheduler = name, ?current_holder, "lease held - yielding");
                return TickOutcome::LockHeld;
            }
        };

        let _extender = LeaseExtender::spawn(
            Arc::clone(&self.locks),
            name.to_string(),
            lease_token.clone(),
            lease_duration,
        );

        let outcome = match task.is_gated().await {
            Ok(true) => {
                tracing::debug!(scheduler = name, "busy gate closed - skipping tick");
                TickOutcome::SkippedBusy
            }
            Ok(false) => match task.run().await {
                Ok(jobs_enqueued) => {
                    tracing::info!(scheduler = name, jobs_enqueued, "tick completed");
                    TickOutcome::Completed { jobs_enqueued }
                }
                Err(error) => {
                    tracing::warn!(scheduler = name, %error, "tick failed");
                    TickOutcome::Failed
                }
            },
            Err(error) => {
                tracing::warn!(scheduler = name, %error, "busy gate check failed");
                TickOutcome::Failed
            }
        };

        if let Err(error) = self.locks.release(name, &lease_token).await {
            tracing::warn!(scheduler = name, %error, "lease release failed");
        }

        outcome
    }
}

/// Background task extending a lease while a critical section runs.
///
/// Aborted on drop, so the lease stops being extended the moment the tick's
/// scope exits.
struct LeaseExtender {
    handle: JoinHandle<()>,
}

impl LeaseExtender {
    fn spawn(
        locks: Arc<dyn LockService>,
        lock_key: String,
        lease_token: String,
        lease_duration: Duration,
    ) -> Self {
        let interval = lease_duration / 3;
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match locks.extend(&lock_key, &lease_token).await {
                    Ok(result) if result.is_extended() => {}
                    Ok(_) => {
                        tracing::warn!(lock_key, "lease lost while critical section running");
                        break;
                    }
                    Err(error) => {
                        tracing::warn!(lock_key, %error, "lease extension failed");
                        break;
                    }
                }
            }
        });
        Self { handle }
    }
}

impl Drop for LeaseExtender {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
