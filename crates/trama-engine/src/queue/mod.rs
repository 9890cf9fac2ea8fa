//! Durable work-queue abstraction for scheduler hand-off.
//!
//! This module provides:
//!
//! - [`WorkQueue`]: trait for enqueueing jobs to execution backends
//! - [`JobEnvelope`]: serializable job payload keyed by a caller-supplied id
//! - [`memory::InMemoryWorkQueue`]: in-memory queue for testing
//!
//! ## Design Principles
//!
//! - **Backend agnostic**: same interface for BullMQ-style queues, SQS, or
//!   local workers
//! - **Caller-supplied keys**: the job key is the deduplication unit; two
//!   jobs with the same key while one is in flight execute once
//! - **Bounded retries**: a fixed attempt count with backoff, plus
//!   remove-on-complete/remove-on-fail so the key only needs to stay unique
//!   for the lifetime of one attempt

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use trama_core::{EventId, TargetPath, TenantId};

use crate::error::Result;

/// What a queued job does, as a closed tagged union.
///
/// New kinds are a compile-time-checked addition; there is no string-keyed
/// dispatch anywhere downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum JobKind {
    /// Apply one imported event to proxies and the graph.
    #[serde(rename_all = "camelCase")]
    ProcessImportedEvent {
        /// The ledger row to process.
        event_id: EventId,
    },
    /// Apply one schema field operation to the graph.
    #[serde(rename_all = "camelCase")]
    ApplyFieldOperation {
        /// The ledger row to apply.
        operation_id: String,
    },
    /// Re-evaluate one entity's batch of dirty nodes.
    #[serde(rename_all = "camelCase")]
    EvaluateEntity {
        /// Tenant owning the batch.
        tenant_id: TenantId,
        /// The owning entity, or `None` for the ungrouped batch.
        entity: Option<String>,
        /// Targets to re-evaluate.
        targets: Vec<TargetPath>,
    },
}

/// Envelope for a job to be dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    /// Caller-supplied deduplication key.
    pub job_key: String,
    /// What the job does.
    #[serde(flatten)]
    pub kind: JobKind,
    /// Attempt number (1-indexed).
    pub attempt: u32,
    /// When the job was enqueued.
    pub enqueued_at: DateTime<Utc>,
}

impl JobEnvelope {
    /// Creates a first-attempt envelope.
    #[must_use]
    pub fn new(job_key: impl Into<String>, kind: JobKind) -> Self {
        Self {
            job_key: job_key.into(),
            kind,
            attempt: 1,
            enqueued_at: Utc::now(),
        }
    }
}

/// Bounded retry policy applied per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts before the job is dropped (1 = no retries).
    pub max_attempts: u32,
    /// Delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(5),
        }
    }
}

/// Options for job enqueueing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueOptions {
    /// Drop the job record once it completes, releasing its key.
    pub remove_on_complete: bool,
    /// Drop the job record once retries are exhausted, releasing its key.
    pub remove_on_fail: bool,
    /// Retry policy for failed attempts.
    pub retry: RetryPolicy,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            remove_on_complete: true,
            remove_on_fail: true,
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of enqueuing a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    /// The job was enqueued.
    Enqueued {
        /// Queue-specific message ID.
        message_id: String,
    },
    /// A job with the same key is already in flight; nothing was enqueued.
    Deduplicated {
        /// The existing message ID.
        existing_message_id: String,
    },
}

impl EnqueueResult {
    /// Returns true if a new job was enqueued.
    #[must_use]
    pub const fn is_enqueued(&self) -> bool {
        matches!(self, Self::Enqueued { .. })
    }
}

/// Work queue abstraction for dispatching jobs to execution backends.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync` to support concurrent access from multiple
/// scheduler tasks.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Enqueues a job.
    ///
    /// # Returns
    ///
    /// - `EnqueueResult::Enqueued` with a message ID on success
    /// - `EnqueueResult::Deduplicated` if the key is already in flight
    async fn enqueue(&self, envelope: JobEnvelope, options: EnqueueOptions) -> Result<EnqueueResult>;

    /// Returns the approximate number of waiting jobs.
    async fn queue_depth(&self) -> Result<usize>;

    /// Returns the queue's name or identifier.
    fn queue_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_with_flattened_kind() {
        let envelope = JobEnvelope::new(
            "f1:create",
            JobKind::ApplyFieldOperation {
                operation_id: "op-1".into(),
            },
        );
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["jobKey"], "f1:create");
        assert_eq!(json["kind"], "applyFieldOperation");
        assert_eq!(json["operationId"], "op-1");
        assert_eq!(json["attempt"], 1);
    }

    #[test]
    fn envelope_round_trips() {
        let envelope = JobEnvelope::new(
            "acme:proxy-1",
            JobKind::EvaluateEntity {
                tenant_id: TenantId::new_unchecked("acme-corp"),
                entity: Some("proxy-1".into()),
                targets: vec![TargetPath::new("contracts.proxy-1.total")],
            },
        );
        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: JobEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind, envelope.kind);
    }

    #[test]
    fn default_options_remove_on_both_outcomes() {
        let options = EnqueueOptions::default();
        assert!(options.remove_on_complete);
        assert!(options.remove_on_fail);
        assert_eq!(options.retry.max_attempts, 3);
    }
}
