//! Field-operations analyzer: hands unprocessed schema operations to the
//! work queue, one job per field operation.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::ledger::FieldOperationStore;
use crate::metrics::EngineMetrics;
use crate::queue::{EnqueueOptions, EnqueueResult, JobEnvelope, JobKind, WorkQueue};
use crate::scheduler::events::DEFAULT_BATCH_LIMIT;
use crate::scheduler::SchedulerTask;

/// Drains the field-operations ledger into the work queue.
///
/// Never gated: field operations are the schema migration itself, so they
/// must keep flowing while the busy gate holds everyone else back.
///
/// The job key is `{field id}:{operation type}`, idempotent per
/// field+operation. Rows are NOT marked processed here; the downstream
/// applier marks them only after the graph mutation lands, keeping the busy
/// gate closed until the migration fully settles.
pub struct FieldOpsAnalyzer {
    field_ops: Arc<dyn FieldOperationStore>,
    queue: Arc<dyn WorkQueue>,
    metrics: EngineMetrics,
    batch_limit: usize,
}

impl FieldOpsAnalyzer {
    /// Creates an analyzer draining `field_ops` into `queue`.
    #[must_use]
    pub fn new(field_ops: Arc<dyn FieldOperationStore>, queue: Arc<dyn WorkQueue>) -> Self {
        Self {
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
impl SchedulerTask for FieldOpsAnalyzer {
    fn name(&self) -> &'static str {
        "field-ops-analyzer"
    }

    async fn run(&self) -> Result<usize> {
        let pending = self.field_ops.find_unprocessed(self.batch_limit).await?;
        let mut jobs_enqueued = 0;

        for operation in pending {
            let envelope = JobEnvelope::new(
                operation.job_key(),
                JobKind::ApplyFieldOperation {
                    operation_id: operation.operation_id.clone(),
                },
            );
            let result = self.queue.enqueue(envelope, EnqueueOptions::default()).await?;

            match &result {
                EnqueueResult::Enqueued { .. } => jobs_enqueued += 1,
                EnqueueResult::Deduplicated { .. } => {
                    tracing::debug!(
                        operation_id = operation.operation_id,
                        job_key = operation.job_key(),
                        "field-operation job already in flight"
                    );
                }
            }
            self.metrics.record_enqueue(self.name(), match result {
                EnqueueResult::Enqueued { .. } => "enqueued",
                EnqueueResult::Deduplicated { .. } => "deduplicated",
            });
        }

        self.metrics
            .set_queue_depth(self.queue.queue_name(), self.queue.queue_depth().await?);
        Ok(jobs_enqueued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::InMemoryFieldOperationStore;
    use crate::ledger::{FieldOperation, FieldOperationType};
    use crate::queue::memory::InMemoryWorkQueue;
    use crate::registry::FieldDefinition;
    use trama_core::{DomainId, TenantId};

    fn operation(field_id: &str, op_type: FieldOperationType) -> FieldOperation {
        FieldOperation::new(
            op_type,
            FieldDefinition::new(field_id, 1),
            DomainId::new_unchecked("contracts"),
            TenantId::new_unchecked("acme-corp"),
        )
    }

    fn analyzer(
        field_ops: &Arc<InMemoryFieldOperationStore>,
        queue: &Arc<InMemoryWorkQueue>,
    ) -> FieldOpsAnalyzer {
        FieldOpsAnalyzer::new(
            Arc::clone(field_ops) as Arc<dyn FieldOperationStore>,
            Arc::clone(queue) as Arc<dyn WorkQueue>,
        )
    }

    #[tokio::test]
    async fn enqueues_one_job_per_operation_without_marking_processed() -> Result<()> {
        let field_ops = Arc::new(InMemoryFieldOperationStore::new());
        let queue = Arc::new(InMemoryWorkQueue::new("field-ops"));

        let create = operation("f1", FieldOperationType::Create);
        let update = operation("f2", FieldOperationType::Update);
        field_ops
            .append_all(vec![create.clone(), update.clone()])
            .await?;

        let task = analyzer(&field_ops, &queue);
        assert_eq!(task.run().await?, 2);
        assert_eq!(queue.queue_depth().await?, 2);

        // Processing is the applier's responsibility; the busy gate stays
        // closed until the graph mutation lands.
        assert!(!field_ops.get(&create.operation_id).await?.unwrap().processed);
        assert!(field_ops.exists_blocking_unprocessed().await?);

        Ok(())
    }

    #[tokio::test]
    async fn analyzer_is_never_gated() -> Result<()> {
        let field_ops = Arc::new(InMemoryFieldOperationStore::new());
        let queue = Arc::new(InMemoryWorkQueue::new("field-ops"));

        field_ops
            .append_all(vec![operation("f1", FieldOperationType::Create)])
            .await?;

        let task = analyzer(&field_ops, &queue);
        assert!(!task.is_gated().await?);

        Ok(())
    }

    #[tokio::test]
    async fn same_operation_deduplicates_across_ticks() -> Result<()> {
        let field_ops = Arc::new(InMemoryFieldOperationStore::new());
        let queue = Arc::new(InMemoryWorkQueue::new("field-ops"));

        field_ops
            .append_all(vec![operation("f1", FieldOperationType::Create)])
            .await?;

        let task = analyzer(&field_ops, &queue);
        assert_eq!(task.run().await?, 1);
        // Row is still unprocessed, so a second tick re-offers it; the
        // queue's key dedupe keeps it single-flight.
        assert_eq!(task.run().await?, 0);
        assert_eq!(queue.queue_depth().await?, 1);

        Ok(())
    }
}
