//! Dependency-graph evaluator scheduler: batches dirty nodes per owning
//! entity and hands one recompute job per entity to the work queue.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::graph::{GraphStore, ProcessableStatuses};
use crate::ledger::FieldOperationStore;
use crate::metrics::EngineMetrics;
use crate::queue::{EnqueueOptions, EnqueueResult, JobEnvelope, JobKind, WorkQueue};
use crate::scheduler::SchedulerTask;

/// Batches dirty graph nodes into per-entity recompute jobs.
///
/// Gated by the busy gate: evaluation halts entirely while a schema
/// migration is in flight.
///
/// The job key is the tenant-qualified entity grouping key, so at most one
/// recompute per entity is in flight at a time; repeated ticks converge as
/// upstream nodes clear.
pub struct GraphEvaluator {
    graph: Arc<dyn GraphStore>,
    field_ops: Arc<dyn FieldOperationStore>,
    queue: Arc<dyn WorkQueue>,
    metrics: EngineMetrics,
    statuses: ProcessableStatuses,
}

impl GraphEvaluator {
    /// Creates an evaluator batching dirty nodes from `graph` into `queue`.
    #[must_use]
    pub fn new(
        graph: Arc<dyn GraphStore>,
        field_ops: Arc<dyn FieldOperationStore>,
        queue: Arc<dyn WorkQueue>,
    ) -> Self {
        Self {
            graph,
            field_ops,
            queue,
            metrics: EngineMetrics::new(),
            statuses: ProcessableStatuses::default(),
        }
    }

    /// Overrides which node statuses are picked up for re-evaluation.
    ///
    /// The default excludes error statuses; pass
    /// [`ProcessableStatuses::including_errors`] to also retry errored
    /// nodes.
    #[must_use]
    pub fn with_processable_statuses(mut self, statuses: ProcessableStatuses) -> Self {
        self.statuses = statuses;
        self
    }
}

#[async_trait]
impl SchedulerTask for GraphEvaluator {
    fn name(&self) -> &'static str {
        "evaluator"
    }

    async fn is_gated(&self) -> Result<bool> {
        self.field_ops.exists_blocking_unprocessed().await
    }

    async fn run(&self) -> Result<usize> {
        let groups = self
            .graph
            .find_dirty_nodes_grouped_by_entity(&self.statuses)
            .await?;
        let dirty_total: usize = groups.iter().map(|group| group.nodes.len()).sum();
        self.metrics.set_dirty_nodes(dirty_total);

        let mut jobs_enqueued = 0;
        for group in groups {
            let targets = group
                .nodes
                .iter()
                .map(|node| node.target.clone())
                .collect();
            let envelope = JobEnvelope::new(
                group.job_key(),
                JobKind::EvaluateEntity {
                    tenant_id: group.tenant_id.clone(),
                    entity: group.entity.clone(),
                    targets,
                },
            );
            let result = self.queue.enqueue(envelope, EnqueueOptions::default()).await?;

            match &result {
                EnqueueResult::Enqueued { .. } => jobs_enqueued += 1,
                EnqueueResult::Deduplicated { .. } => {
                    tracing::debug!(
                        job_key = group.job_key(),
                        "entity recompute already in flight"
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
