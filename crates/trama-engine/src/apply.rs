//! Downstream job application: the work the queued jobs actually perform.
//!
//! The schedulers only hand off; these appliers run inside queue workers and
//! mutate the graph, proxies, and ledgers. Every mutation is an idempotent
//! upsert or status-matching update, so a retried job converges instead of
//! corrupting state.

use std::sync::Arc;

use serde_json::json;

use trama_core::{EventId, TargetPath, TenantId};

use crate::error::Result;
use crate::graph::{DependencyGraphNode, GraphStore, NodeMatcher};
use crate::ledger::{FieldOperation, FieldOperationStore, FieldOperationType, ImportedEventStore};
use crate::metrics::EngineMetrics;
use crate::proxy::ProxyService;
use crate::registry::DomainStore;

/// Applies field operations to the dependency graph.
///
/// An operation's ledger row is marked processed only after the graph
/// mutation lands, so the busy gate stays closed until the migration has
/// fully settled. Re-running an already-processed operation is a no-op.
pub struct FieldOperationApplier {
    graph: Arc<dyn GraphStore>,
    field_ops: Arc<dyn FieldOperationStore>,
    metrics: EngineMetrics,
}

impl FieldOperationApplier {
    /// Creates an applier mutating `graph` and settling rows in `field_ops`.
    #[must_use]
    pub fn new(graph: Arc<dyn GraphStore>, field_ops: Arc<dyn FieldOperationStore>) -> Self {
        Self {
            graph,
            field_ops,
            metrics: EngineMetrics::new(),
        }
    }

    /// Applies one field operation by ledger row id.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the row does not exist; storage errors
    /// propagate so the queue retries the job.
    #[tracing::instrument(skip(self))]
    pub async fn apply(&self, operation_id: &str) -> Result<()> {
        let Some(operation) = self.field_ops.get(operation_id).await? else {
            return Err(trama_core::Error::not_found("field operation", operation_id).into());
        };
        if operation.processed {
            tracing::debug!(operation_id, "field operation already applied");
            return Ok(());
        }

        let target = TargetPath::for_field(&operation.domain_id, &operation.field.id);
        match operation.op_type {
            FieldOperationType::Create => {
                self.graph.upsert_node(node_for(&operation, target)).await?;
            }
            FieldOperationType::Update => {
                self.graph
                    .upsert_node(node_for(&operation, target.clone()))
                    .await?;
                self.dirty_dependents(&operation.tenant_id, target).await?;
            }
            FieldOperationType::Delete => {
                self.graph
                    .delete_node(&operation.tenant_id, &target)
                    .await?;
                self.dirty_dependents(&operation.tenant_id, target).await?;
            }
        }

        self.metrics
            .record_field_operation(operation.op_type.as_str());
        self.field_ops.mark_processed(operation_id).await?;
        Ok(())
    }

    /// Marks every node reading `target` dirty, cascading the change.
    async fn dirty_dependents(&self, tenant_id: &TenantId, target: TargetPath) -> Result<()> {
        let paths = [target];
        let affected = self
            .graph
            .find_nodes_affected_by_paths(tenant_id, &paths)
            .await?;
        let matchers: Vec<NodeMatcher> = affected
            .into_iter()
            .map(|node| NodeMatcher {
                tenant_id: node.tenant_id,
                target: node.target,
            })
            .collect();
        let transitioned = self.graph.mark_nodes_dirty(&matchers).await?;
        tracing::debug!(target = %paths[0], transitioned, "dependents marked dirty");
        Ok(())
    }
}

/// Builds the graph node a field definition declares.
///
/// Post-creation status is clean: the node only becomes dirty once an event
/// or a later field operation touches one of its dependencies. The
/// condition's dependency list starts unanalyzed.
fn node_for(operation: &FieldOperation, target: TargetPath) -> DependencyGraphNode {
    let mut node = DependencyGraphNode::new(operation.tenant_id.clone(), target);
    if let Some(expression) = operation.field.expression.clone() {
        node = node.with_expression(expression, Vec::new());
    }
    if let Some(condition) = operation.field.condition.clone() {
        node = node.with_condition(condition, None);
    }
    node
}

/// Applies imported events: proxy creation plus graph invalidation.
pub struct ImportedEventApplier {
    events: Arc<dyn ImportedEventStore>,
    domains: Arc<dyn DomainStore>,
    graph: Arc<dyn GraphStore>,
    proxies: Arc<ProxyService>,
    metrics: EngineMetrics,
}

impl ImportedEventApplier {
    /// Creates an applier for the given stores.
    #[must_use]
    pub fn new(
        events: Arc<dyn ImportedEventStore>,
        domains: Arc<dyn DomainStore>,
        graph: Arc<dyn GraphStore>,
        proxies: Arc<ProxyService>,
    ) -> Self {
        Self {
            events,
            domains,
            graph,
            proxies,
            metrics: EngineMetrics::new(),
        }
    }

    /// Applies one imported event by ledger row id.
    ///
    /// Ensures a proxy exists for every domain whose trigger fires for the
    /// event's type, then marks every node reading one of the event's
    /// changed paths dirty. Both halves are idempotent, so a retried job
    /// converges.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the row does not exist; storage errors
    /// propagate so the queue retries the job.
    #[tracing::instrument(skip(self), fields(%event_id))]
    pub async fn apply(&self, event_id: &EventId) -> Result<()> {
        let Some(event) = self.events.get(event_id).await? else {
            return Err(trama_core::Error::not_found("imported event", event_id).into());
        };

        let matches = self.domains.find_matching_triggers(&event.source).await?;
        for matched in matches {
            // Triggers span tenants; effects never do.
            if matched.tenant_id != event.tenant_id {
                continue;
            }
            let fields = self
                .domains
                .get_domain_fields(&matched.tenant_id, &matched.domain_id)
                .await?;
            self.proxies
                .create_proxy(
                    matched.tenant_id,
                    event.source_doc_id.clone(),
                    matched.domain_id,
                    json!({
                        "sourceDocId": event.source_doc_id,
                        "source": event.source,
                    }),
                    &fields,
                    None,
                )
                .await?;
        }

        let changed = event.changed_paths();
        if !changed.is_empty() {
            let affected = self
                .graph
                .find_nodes_affected_by_paths(&event.tenant_id, &changed)
                .await?;
            let matchers: Vec<NodeMatcher> = affected
                .into_iter()
                .map(|node| NodeMatcher {
                    tenant_id: node.tenant_id,
                    target: node.target,
                })
                .collect();
            let transitioned = self.graph.mark_nodes_dirty(&matchers).await?;
            tracing::debug!(transitioned, "nodes invalidated by event");
        }

        self.metrics.record_event_imported(&event.source);
        Ok(())
    }
}
