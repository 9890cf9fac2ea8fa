//! Events-processor scheduler: hands unprocessed imported events to the
//! work queue, one job per event.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::ledger::{FieldOperationStore, ImportedEventStore};
use crate::metrics::EngineMetrics;
use crate::queue::{EnqueueOptions, EnqueueResult, JobEnvelope, JobKind, WorkQueue};
use crate::scheduler::SchedulerTask;

/// Default ledger drain batch size per tick.
pub const DEFAULT_BATCH_LIMIT: usize = 256;

/// Drains the imported-event ledger into the work queue.
///
/// Gated by the busy gate: while a blocking field operation is unprocessed,
/// no events are handed off, so downstream jobs never race a schema
/// migration.
///
/// The job key is the event's own id, giving exactly-once delivery per
/// event; a row is marked processed only after successful hand-off
/// (at-least-once upstream of the queue's own retry).
pub struct EventsProcessor {
    events: Arc<dyn ImportedEventStore>,
    field_ops: Arc<dyn FieldOperationStore>,
    queue: Arc<dyn WorkQueue>,
    metrics: EngineMetrics,
    batch_limit: usize,
}

impl EventsProcessor {
    /// Creates a processor draining `events` into `queue`.
    #[must_use]
    pub fn new(
        events: Arc<dyn ImportedEventStore>,
        field_ops: Arc<dyn FieldOperationStore>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            events,
            field_ops,
            queue,
            metrics: EngineMetrics::new(),
            batch_limit: DEFAULT_BATCH_LIMIT,
        }
    }

    /// Overrides the per-tick drain batch size.
    #[must_use]
    pub fn with_batch_limit(mut self, batch_limit: usize) -> Self {
        self.batch_limit = batch_limit;
        self
    }
}

#[async_trait]
impl SchedulerTask for EventsProcessor {
    fn name(&self) -> &'static str {
        "events-processor"
    }

    async fn is_gated(&self) -> Result<bool> {
        self.field_ops.exists_blocking_unprocessed().await
    }

    async fn run(&self) -> Result<usize> {
        let pending = self.events.find_unprocessed(self.batch_limit).await?;
        let mut jobs_enqueued = 0;

        for event in pending {
            let envelope = JobEnvelope::new(
                event.event_id.to_string(),
                JobKind::ProcessImportedEvent {
                    event_id: event.event_id,
                },
            );
            let result = self.queue.enqueue(envelope, EnqueueOptions::default()).await?;

            match &result {
                EnqueueResult::Enqueued { .. } => jobs_enqueued += 1,
                EnqueueResult::Deduplicated { .. } => {
                    tracing::debug!(event_id = %event.event_id, "event job already in flight");
                }
            }
            self.metrics.record_enqueue(self.name(), match result {
                EnqueueResult::Enqueued { .. } => "enqueued",
                EnqueueResult::Deduplicated { .. } => "deduplicated",
            });

            // Hand-off succeeded either way; the row will not be offered
            // again.
            self.events.mark_processed(&event.event_id).await?;
        }

        self.metrics
            .set_queue_depth(self.queue.queue_name(), self.queue.queue_depth().await?);
        Ok(jobs_enqueued)
    }
}
