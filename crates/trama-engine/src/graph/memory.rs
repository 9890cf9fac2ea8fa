//! In-memory graph store implementation for testing.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No persistence, no cross-process sharing
//! - **Single-process only**: State is lost when the process exits

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use trama_core::{TargetPath, TenantId};

use super::{
    DependencyGraphNode, EntityGroup, GraphStore, NodeMatcher, NodePatch, NodeStatus,
    ProcessableStatuses,
};
use crate::error::{Error, Result};

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("graph store lock poisoned")
}

/// In-memory graph store keyed by `(tenant, target)`.
///
/// Provides a simple, thread-safe implementation of the [`GraphStore`] trait
/// using `RwLock` for synchronization. `BTreeMap` keeps iteration order
/// deterministic, which the grouping query relies on.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    nodes: RwLock<BTreeMap<(TenantId, TargetPath), DependencyGraphNode>>,
}

impl InMemoryGraphStore {
    /// Creates a new empty graph store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of stored nodes across tenants.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        let nodes = self.nodes.read().map_err(poison_err)?;
        Ok(nodes.len())
    }

    /// Returns true if the store holds no nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_node(&self, mut node: DependencyGraphNode) -> Result<()> {
        let mut nodes = self.nodes.write().map_err(poison_err)?;
        let key = (node.tenant_id.clone(), node.target.clone());
        node.version = nodes.get(&key).map_or(1, |existing| existing.version + 1);
        nodes.insert(key, node);
        drop(nodes);
        Ok(())
    }

    async fn update_node(
        &self,
        tenant_id: &TenantId,
        target: &TargetPath,
        patch: NodePatch,
    ) -> Result<()> {
        let mut nodes = self.nodes.write().map_err(poison_err)?;
        let key = (tenant_id.clone(), target.clone());
        let Some(node) = nodes.get_mut(&key) else {
            drop(nodes);
            return Err(Error::NodeNotFound {
                target: target.clone(),
            });
        };
        patch.apply_to(node);
        node.version += 1;
        drop(nodes);
        Ok(())
    }

    async fn delete_node(&self, tenant_id: &TenantId, target: &TargetPath) -> Result<bool> {
        let mut nodes = self.nodes.write().map_err(poison_err)?;
        let removed = nodes
            .remove(&(tenant_id.clone(), target.clone()))
            .is_some();
        drop(nodes);
        Ok(removed)
    }

    async fn get_node(
        &self,
        tenant_id: &TenantId,
        target: &TargetPath,
    ) -> Result<Option<DependencyGraphNode>> {
        let nodes = self.nodes.read().map_err(poison_err)?;
        Ok(nodes.get(&(tenant_id.clone(), target.clone())).cloned())
    }

    async fn find_dirty_nodes_grouped_by_entity(
        &self,
        processable: &ProcessableStatuses,
    ) -> Result<Vec<EntityGroup>> {
        let nodes = self.nodes.read().map_err(poison_err)?;

        let mut groups: BTreeMap<(TenantId, String), Vec<DependencyGraphNode>> = BTreeMap::new();
        for node in nodes.values() {
            if !processable.contains(node.status) {
                continue;
            }
            groups
                .entry((node.tenant_id.clone(), node.entity_key().to_string()))
                .or_default()
                .push(node.clone());
        }
        drop(nodes);

        Ok(groups
            .into_iter()
            .map(|((tenant_id, entity_key), group_nodes)| EntityGroup {
                tenant_id,
                entity: (entity_key != super::UNASSIGNED_ENTITY).then_some(entity_key),
                nodes: group_nodes,
            })
            .collect())
    }

    async fn find_nodes_affected_by_paths(
        &self,
        tenant_id: &TenantId,
        paths: &[TargetPath],
    ) -> Result<Vec<DependencyGraphNode>> {
        let nodes = self.nodes.read().map_err(poison_err)?;
        Ok(nodes
            .values()
            .filter(|node| &node.tenant_id == tenant_id && node.depends_on_any(paths))
            .cloned()
            .collect())
    }

    async fn mark_nodes_dirty(&self, matchers: &[NodeMatcher]) -> Result<u64> {
        let mut nodes = self.nodes.write().map_err(poison_err)?;
        let mut transitioned = 0u64;
        for matcher in matchers {
            let key = (matcher.tenant_id.clone(), matcher.target.clone());
            if let Some(node) = nodes.get_mut(&key) {
                if node.status != NodeStatus::Dirty {
                    node.status = NodeStatus::Dirty;
                    node.version += 1;
                    transitioned += 1;
                }
            }
        }
        drop(nodes);
        Ok(transitioned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tenant() -> TenantId {
        TenantId::new_unchecked("acme-corp")
    }

    fn other_tenant() -> TenantId {
        TenantId::new_unchecked("globex")
    }

    fn node(target: &str) -> DependencyGraphNode {
        DependencyGraphNode::new(tenant(), TargetPath::new(target))
    }

    #[tokio::test]
    async fn upsert_and_get_round_trip() -> Result<()> {
        let store = InMemoryGraphStore::new();
        store.upsert_node(node("contracts.total")).await?;

        let fetched = store
            .get_node(&tenant(), &TargetPath::new("contracts.total"))
            .await?
            .expect("node should exist");
        assert_eq!(fetched.version, 1);

        Ok(())
    }

    #[tokio::test]
    async fn upsert_replaces_and_bumps_version() -> Result<()> {
        let store = InMemoryGraphStore::new();
        store.upsert_node(node("contracts.total")).await?;
        store
            .upsert_node(node("contracts.total").with_entity("proxy-1"))
            .await?;

        let fetched = store
            .get_node(&tenant(), &TargetPath::new("contracts.total"))
            .await?
            .expect("node should exist");
        assert_eq!(fetched.version, 2);
        assert_eq!(fetched.entity.as_deref(), Some("proxy-1"));

        Ok(())
    }

    #[tokio::test]
    async fn update_merges_partial_fields() -> Result<()> {
        let store = InMemoryGraphStore::new();
        store
            .upsert_node(node("contracts.total").with_entity("proxy-1"))
            .await?;

        store
            .update_node(
                &tenant(),
                &TargetPath::new("contracts.total"),
                NodePatch {
                    status: Some(NodeStatus::Dirty),
                    ..NodePatch::default()
                },
            )
            .await?;

        let fetched = store
            .get_node(&tenant(), &TargetPath::new("contracts.total"))
            .await?
            .expect("node should exist");
        assert_eq!(fetched.status, NodeStatus::Dirty);
        // Untouched fields survive the partial update.
        assert_eq!(fetched.entity.as_deref(), Some("proxy-1"));
        assert_eq!(fetched.version, 2);

        Ok(())
    }

    #[tokio::test]
    async fn update_missing_node_errors() {
        let store = InMemoryGraphStore::new();
        let result = store
            .update_node(
                &tenant(),
                &TargetPath::new("contracts.missing"),
                NodePatch::default(),
            )
            .await;
        assert!(matches!(result, Err(Error::NodeNotFound { .. })));
    }

    #[tokio::test]
    async fn delete_reports_whether_node_existed() -> Result<()> {
        let store = InMemoryGraphStore::new();
        store.upsert_node(node("contracts.total")).await?;

        assert!(
            store
                .delete_node(&tenant(), &TargetPath::new("contracts.total"))
                .await?
        );
        assert!(
            !store
                .delete_node(&tenant(), &TargetPath::new("contracts.total"))
                .await?
        );

        Ok(())
    }

    #[tokio::test]
    async fn grouping_partitions_dirty_nodes_by_entity() -> Result<()> {
        let store = InMemoryGraphStore::new();
        store
            .upsert_node(
                node("contracts.p1.a")
                    .with_entity("p1")
                    .with_status(NodeStatus::Dirty),
            )
            .await?;
        store
            .upsert_node(
                node("contracts.p1.b")
                    .with_entity("p1")
                    .with_status(NodeStatus::Dirty),
            )
            .await?;
        store
            .upsert_node(
                node("contracts.p2.a")
                    .with_entity("p2")
                    .with_status(NodeStatus::Dirty),
            )
            .await?;
        // Clean and errored nodes never appear in any group.
        store
            .upsert_node(node("contracts.p1.c").with_entity("p1"))
            .await?;
        store
            .upsert_node(
                node("contracts.p2.broken")
                    .with_entity("p2")
                    .with_status(NodeStatus::ErrorExpression),
            )
            .await?;

        let groups = store
            .find_dirty_nodes_grouped_by_entity(&ProcessableStatuses::default())
            .await?;

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].entity.as_deref(), Some("p1"));
        assert_eq!(groups[0].nodes.len(), 2);
        assert_eq!(groups[1].entity.as_deref(), Some("p2"));
        assert_eq!(groups[1].nodes.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn grouping_uses_sentinel_for_entity_less_nodes() -> Result<()> {
        let store = InMemoryGraphStore::new();
        store
            .upsert_node(node("contracts.orphan").with_status(NodeStatus::Dirty))
            .await?;

        let groups = store
            .find_dirty_nodes_grouped_by_entity(&ProcessableStatuses::default())
            .await?;

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].entity, None);
        assert!(groups[0].job_key().ends_with(super::super::UNASSIGNED_ENTITY));

        Ok(())
    }

    #[tokio::test]
    async fn widened_processable_set_includes_errored_nodes() -> Result<()> {
        let store = InMemoryGraphStore::new();
        store
            .upsert_node(
                node("contracts.broken")
                    .with_entity("p1")
                    .with_status(NodeStatus::ErrorExpression),
            )
            .await?;

        let default_groups = store
            .find_dirty_nodes_grouped_by_entity(&ProcessableStatuses::default())
            .await?;
        assert!(default_groups.is_empty());

        let widened = store
            .find_dirty_nodes_grouped_by_entity(&ProcessableStatuses::including_errors())
            .await?;
        assert_eq!(widened.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn affected_by_paths_is_tenant_scoped() -> Result<()> {
        let store = InMemoryGraphStore::new();
        store
            .upsert_node(node("contracts.total").with_expression(
                json!({}),
                vec![TargetPath::new("contracts.a")],
            ))
            .await?;
        store
            .upsert_node(
                DependencyGraphNode::new(other_tenant(), TargetPath::new("contracts.total"))
                    .with_expression(json!({}), vec![TargetPath::new("contracts.a")]),
            )
            .await?;

        let affected = store
            .find_nodes_affected_by_paths(&tenant(), &[TargetPath::new("contracts.a")])
            .await?;

        assert_eq!(affected.len(), 1);
        assert_eq!(affected[0].tenant_id, tenant());

        Ok(())
    }

    #[tokio::test]
    async fn affected_by_paths_matches_condition_deps() -> Result<()> {
        let store = InMemoryGraphStore::new();
        store
            .upsert_node(node("contracts.gated").with_condition(
                json!({}),
                Some(vec![TargetPath::new("contracts.flag")]),
            ))
            .await?;

        let affected = store
            .find_nodes_affected_by_paths(&tenant(), &[TargetPath::new("contracts.flag")])
            .await?;
        assert_eq!(affected.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn mark_dirty_counts_only_transitions() -> Result<()> {
        let store = InMemoryGraphStore::new();
        store.upsert_node(node("contracts.a")).await?;
        store
            .upsert_node(node("contracts.b").with_status(NodeStatus::Dirty))
            .await?;

        let matchers = vec![
            NodeMatcher {
                tenant_id: tenant(),
                target: TargetPath::new("contracts.a"),
            },
            NodeMatcher {
                tenant_id: tenant(),
                target: TargetPath::new("contracts.b"),
            },
            NodeMatcher {
                tenant_id: tenant(),
                target: TargetPath::new("contracts.missing"),
            },
        ];

        let transitioned = store.mark_nodes_dirty(&matchers).await?;
        assert_eq!(transitioned, 1);

        let a = store
            .get_node(&tenant(), &TargetPath::new("contracts.a"))
            .await?
            .expect("node should exist");
        assert_eq!(a.status, NodeStatus::Dirty);

        Ok(())
    }
}
