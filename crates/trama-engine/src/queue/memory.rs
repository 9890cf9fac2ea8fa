//! In-memory work queue implementation for testing.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No persistence, no worker processes
//! - **Single-process only**: Jobs are consumed via [`InMemoryWorkQueue::take`]
//!   by the test itself

use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use ulid::Ulid;

use super::{EnqueueOptions, EnqueueResult, JobEnvelope, WorkQueue};
use crate::error::{Error, Result};

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("work queue lock poisoned")
}

/// One queued job with its retained options.
#[derive(Debug, Clone)]
struct QueuedJob {
    envelope: JobEnvelope,
    options: EnqueueOptions,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<QueuedJob>,
    /// Keys reserved by pending or in-flight jobs, mapped to message IDs.
    reserved: HashMap<String, String>,
    in_flight: HashMap<String, QueuedJob>,
}

/// In-memory work queue with key-based deduplication.
///
/// Tests drive the consumer side explicitly: [`take`](Self::take) pops the
/// next job while keeping its key reserved, and
/// [`complete`](Self::complete) / [`fail`](Self::fail) settle it.
#[derive(Debug)]
pub struct InMemoryWorkQueue {
    name: String,
    state: RwLock<QueueState>,
}

impl InMemoryWorkQueue {
    /// Creates a new empty queue with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(QueueState::default()),
        }
    }

    /// Pops the next pending job, moving it to the in-flight set.
    ///
    /// The job's key stays reserved until [`complete`](Self::complete) or
    /// [`fail`](Self::fail) is called for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn take(&self) -> Result<Option<JobEnvelope>> {
        let mut state = self.state.write().map_err(poison_err)?;
        let Some(job) = state.pending.pop_front() else {
            drop(state);
            return Ok(None);
        };
        let envelope = job.envelope.clone();
        state.in_flight.insert(job.envelope.job_key.clone(), job);
        drop(state);
        Ok(Some(envelope))
    }

    /// Settles an in-flight job as completed, releasing its key.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned or the job is not in flight.
    pub fn complete(&self, job_key: &str) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        let Some(job) = state.in_flight.remove(job_key) else {
            drop(state);
            return Err(Error::storage(format!("job '{job_key}' is not in flight")));
        };
        if job.options.remove_on_complete {
            state.reserved.remove(job_key);
        }
        drop(state);
        Ok(())
    }

    /// Settles an in-flight job as failed.
    ///
    /// Re-enqueues with an incremented attempt while the retry policy
    /// permits; otherwise drops the job, releasing its key when
    /// `remove_on_fail` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned or the job is not in flight.
    pub fn fail(&self, job_key: &str) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        let Some(mut job) = state.in_flight.remove(job_key) else {
            drop(state);
            return Err(Error::storage(format!("job '{job_key}' is not in flight")));
        };
        if job.envelope.attempt < job.options.retry.max_attempts {
            job.envelope.attempt += 1;
            state.pending.push_back(job);
        } else if job.options.remove_on_fail {
            state.reserved.remove(job_key);
        }
        drop(state);
        Ok(())
    }

    /// Drains all pending jobs without reserving them in flight, releasing
    /// their keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn drain(&self) -> Result<Vec<JobEnvelope>> {
        let mut state = self.state.write().map_err(poison_err)?;
        let drained: Vec<JobEnvelope> = state
            .pending
            .drain(..)
            .map(|job| job.envelope)
            .collect();
        for envelope in &drained {
            state.reserved.remove(&envelope.job_key);
        }
        drop(state);
        Ok(drained)
    }

    /// Returns the pending envelopes without consuming them.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn pending(&self) -> Result<Vec<JobEnvelope>> {
        let state = self.state.read().map_err(poison_err)?;
        let pending = state.pending.iter().map(|job| job.envelope.clone()).collect();
        drop(state);
        Ok(pending)
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn enqueue(&self, envelope: JobEnvelope, options: EnqueueOptions) -> Result<EnqueueResult> {
        let mut state = self.state.write().map_err(poison_err)?;

        if let Some(existing) = state.reserved.get(&envelope.job_key) {
            let existing_message_id = existing.clone();
            drop(state);
            return Ok(EnqueueResult::Deduplicated { existing_message_id });
        }

        let message_id = Ulid::new().to_string();
        state
            .reserved
            .insert(envelope.job_key.clone(), message_id.clone());
        state.pending.push_back(QueuedJob { envelope, options });
        drop(state);

        Ok(EnqueueResult::Enqueued { message_id })
    }

    async fn queue_depth(&self) -> Result<usize> {
        let state = self.state.read().map_err(poison_err)?;
        let depth = state.pending.len();
        drop(state);
        Ok(depth)
    }

    fn queue_name(&self) -> &str {
        &self.name
    }
}
