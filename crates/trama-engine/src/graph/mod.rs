//! The dependency graph: one node per computed target.
//!
//! This module provides:
//!
//! - [`DependencyGraphNode`]: the node model, including nested sub-graphs
//! - [`GraphStore`]: trait for the shared, multi-writer node store
//! - [`InMemoryGraphStore`](memory::InMemoryGraphStore): in-memory store for testing
//!
//! ## Design Principles
//!
//! - **Idempotent upserts**: nodes are keyed by `(tenant, target)`; concurrent
//!   schedulers and retried jobs converge rather than corrupt state
//! - **Status-matching updates**: dirty-marking touches only the status field,
//!   never unrelated fields
//! - **Recursive sub-graphs**: composite targets embed children addressed by
//!   path segment, not by global id

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use trama_core::{TargetPath, TenantId};

use crate::error::Result;

/// Group key used for nodes that carry no owning entity.
pub const UNASSIGNED_ENTITY: &str = "__unassigned__";

/// Recomputation status of a graph node.
///
/// `Clean` nodes are up to date; only `Dirty` nodes are processable by
/// default. The error statuses localize a data error to a single node and
/// exclude it from automatic rescheduling until reset by a field operation
/// or manual intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeStatus {
    /// The computed value is potentially stale and must be re-evaluated.
    Dirty,
    /// The computed value is up to date.
    Clean,
    /// The last condition evaluation failed.
    ErrorCondition,
    /// The last expression evaluation failed.
    ErrorExpression,
}

/// Sibling-conflict resolution at the same nesting level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HorizontalPolicy {
    /// The most recently evaluated sibling wins.
    #[default]
    Overwrite,
    /// Sibling object values are merged key by key; the incoming key wins.
    MergeByKey,
}

/// Parent/child conflict resolution across nesting levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VerticalPolicy {
    /// An explicit parent-level value suppresses child-computed values.
    #[default]
    Parent,
    /// Child values propagate upward and override any parent default.
    Child,
}

/// How a node's result composes into parent/composite targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergePolicy {
    /// Conflict resolution among siblings.
    pub horizontal: HorizontalPolicy,
    /// Conflict resolution between parent and children.
    pub vertical: VerticalPolicy,
}

/// One computed target in the dependency graph.
///
/// Nodes are created or replaced whenever a domain or field operation
/// declares the target, marked [`NodeStatus::Dirty`] whenever an upstream
/// event or field operation affects one of their declared dependencies, and
/// deleted explicitly when a field is removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyGraphNode {
    /// Unique target path within the tenant, e.g. `contracts.proxy-1.total`.
    pub target: TargetPath,
    /// Grouping key for batched recomputation (typically the owning proxy or
    /// config entity). Nodes without an entity batch under
    /// [`UNASSIGNED_ENTITY`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    /// Owning tenant.
    pub tenant_id: TenantId,

    /// The expression computing this target's value, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<Value>,
    /// Free-text errors from the last expression evaluation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression_errors: Option<String>,
    /// Target paths the expression reads, in declaration order.
    pub expression_deps: Vec<TargetPath>,
    /// Extra binding metadata per dependency path.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expression_deps_details: BTreeMap<String, Value>,

    /// Condition gating whether this node contributes at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
    /// Free-text errors from the last condition evaluation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_errors: Option<String>,
    /// Target paths the condition reads. `None` means dependency analysis
    /// has not yet run (distinct from `Some(vec![])`, "analyzed, no deps").
    pub condition_deps: Option<Vec<TargetPath>>,
    /// Extra binding metadata per condition dependency path.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub condition_deps_detail: BTreeMap<String, Value>,
    /// Cached result of the last condition evaluation, so dependents need
    /// not re-run this node's condition. `None` = unknown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_condition_value: Option<bool>,

    /// Recomputation status.
    pub status: NodeStatus,
    /// Merge policy for composing nested results.
    #[serde(default)]
    pub policy: MergePolicy,
    /// Monotonic per-target version stamp, bumped on every store mutation.
    pub version: u64,

    /// Nested sub-graphs for composite/object-shaped targets, addressed by
    /// path segment.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sub_nodes: BTreeMap<String, DependencyGraphNode>,
    /// Raw definitions the sub-graph was built from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_node_definitions: Option<Value>,
    /// Reverse edges: targets that depend on this node, used to cascade
    /// dirtiness.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_deps: Vec<TargetPath>,
    /// Free-form annotations (e.g. provenance).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl DependencyGraphNode {
    /// Creates a new clean node with the default merge policy.
    #[must_use]
    pub fn new(tenant_id: TenantId, target: TargetPath) -> Self {
        Self {
            target,
            entity: None,
            tenant_id,
            expression: None,
            expression_errors: None,
            expression_deps: Vec::new(),
            expression_deps_details: BTreeMap::new(),
            condition: None,
            condition_errors: None,
            condition_deps: None,
            condition_deps_detail: BTreeMap::new(),
            last_condition_value: None,
            status: NodeStatus::Clean,
            policy: MergePolicy::default(),
            version: 0,
            sub_nodes: BTreeMap::new(),
            sub_node_definitions: None,
            child_deps: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Sets the grouping entity.
    #[must_use]
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    /// Sets the expression and its declared dependencies.
    #[must_use]
    pub fn with_expression(mut self, expression: Value, deps: Vec<TargetPath>) -> Self {
        self.expression = Some(expression);
        self.expression_deps = deps;
        self
    }

    /// Sets the condition and its analyzed dependencies.
    #[must_use]
    pub fn with_condition(mut self, condition: Value, deps: Option<Vec<TargetPath>>) -> Self {
        self.condition = Some(condition);
        self.condition_deps = deps;
        self
    }

    /// Sets the recomputation status.
    #[must_use]
    pub const fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the merge policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the entity group key this node batches under.
    #[must_use]
    pub fn entity_key(&self) -> &str {
        self.entity.as_deref().unwrap_or(UNASSIGNED_ENTITY)
    }

    /// Returns true if any declared dependency intersects `paths`.
    #[must_use]
    pub fn depends_on_any(&self, paths: &[TargetPath]) -> bool {
        let in_paths = |dep: &TargetPath| paths.contains(dep);
        self.expression_deps.iter().any(in_paths)
            || self
                .condition_deps
                .as_ref()
                .is_some_and(|deps| deps.iter().any(in_paths))
    }

    /// Returns true if the condition's dependency analysis has not yet run.
    ///
    /// A node with no condition is always active, so only nodes that carry a
    /// condition but no analyzed dependency list require analysis.
    #[must_use]
    pub fn requires_analysis(&self) -> bool {
        self.condition.is_some() && self.condition_deps.is_none()
    }
}

/// Partial update to a node, keyed by `(tenant, target)`.
///
/// Only the populated fields are merged into the stored row; everything else
/// is left intact. This is the primitive evaluation outcomes are written
/// through.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePatch {
    /// New status, if changing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<NodeStatus>,
    /// New cached condition value. Outer `None` = leave untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_condition_value: Option<Option<bool>>,
    /// New expression error text. Outer `None` = leave untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression_errors: Option<Option<String>>,
    /// New condition error text. Outer `None` = leave untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_errors: Option<Option<String>>,
    /// New analyzed condition dependencies. Outer `None` = leave untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_deps: Option<Option<Vec<TargetPath>>>,
    /// New reverse edges. `None` = leave untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_deps: Option<Vec<TargetPath>>,
    /// Metadata entries to merge in.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl NodePatch {
    /// Applies this patch to a node in place.
    pub fn apply_to(&self, node: &mut DependencyGraphNode) {
        if let Some(status) = self.status {
            node.status = status;
        }
        if let Some(value) = self.last_condition_value.clone() {
            node.last_condition_value = value;
        }
        if let Some(errors) = self.expression_errors.clone() {
            node.expression_errors = errors;
        }
        if let Some(errors) = self.condition_errors.clone() {
            node.condition_errors = errors;
        }
        if let Some(deps) = self.condition_deps.clone() {
            node.condition_deps = deps;
        }
        if let Some(deps) = self.child_deps.clone() {
            node.child_deps = deps;
        }
        for (key, value) in &self.metadata {
            node.metadata.insert(key.clone(), value.clone());
        }
    }
}

/// Selects nodes for bulk dirty-marking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMatcher {
    /// Tenant owning the node.
    pub tenant_id: TenantId,
    /// Target path of the node.
    pub target: TargetPath,
}

/// The set of statuses eligible for automatic reprocessing.
///
/// Error statuses are excluded by default: a node that failed evaluation
/// stays parked until a field operation or manual intervention resets it.
/// The set is a construction-time choice rather than a hard-coded match, so
/// deployments that want errored nodes retried can widen it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessableStatuses(Vec<NodeStatus>);

impl Default for ProcessableStatuses {
    fn default() -> Self {
        Self(vec![NodeStatus::Dirty])
    }
}

impl ProcessableStatuses {
    /// Creates a custom processable set.
    #[must_use]
    pub fn new(statuses: Vec<NodeStatus>) -> Self {
        Self(statuses)
    }

    /// The default set, plus both error statuses.
    #[must_use]
    pub fn including_errors() -> Self {
        Self(vec![
            NodeStatus::Dirty,
            NodeStatus::ErrorCondition,
            NodeStatus::ErrorExpression,
        ])
    }

    /// Returns true if `status` is in the processable set.
    #[must_use]
    pub fn contains(&self, status: NodeStatus) -> bool {
        self.0.contains(&status)
    }
}

/// Processable nodes belonging to one owning entity.
///
/// The evaluator enqueues exactly one batch job per group, so at most one
/// recomputation job per entity is ever in flight.
#[derive(Debug, Clone)]
pub struct EntityGroup {
    /// Tenant owning the nodes.
    pub tenant_id: TenantId,
    /// The owning entity, or `None` for ungrouped nodes.
    pub entity: Option<String>,
    /// The nodes in this group.
    pub nodes: Vec<DependencyGraphNode>,
}

impl EntityGroup {
    /// Returns the queue job key for this group.
    ///
    /// Tenant-qualified so entity ids from different tenants never collide
    /// on the queue.
    #[must_use]
    pub fn job_key(&self) -> String {
        format!(
            "{}:{}",
            self.tenant_id,
            self.entity.as_deref().unwrap_or(UNASSIGNED_ENTITY)
        )
    }
}

/// Storage abstraction for the dependency graph.
///
/// The graph is a shared, multi-writer store; all mutations are idempotent
/// upserts or status-matching updates so that concurrent schedulers and
/// retried jobs converge.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Inserts or replaces the node at `(tenant, target)`.
    ///
    /// Replacement bumps the stored version stamp; the operation is
    /// idempotent with respect to node content.
    async fn upsert_node(&self, node: DependencyGraphNode) -> Result<()>;

    /// Partially merges `patch` into the node at `(tenant, target)`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NodeNotFound`] if no such node exists.
    async fn update_node(
        &self,
        tenant_id: &TenantId,
        target: &TargetPath,
        patch: NodePatch,
    ) -> Result<()>;

    /// Deletes the node at `(tenant, target)`.
    ///
    /// Returns `true` if a node was deleted, `false` if none existed.
    async fn delete_node(&self, tenant_id: &TenantId, target: &TargetPath) -> Result<bool>;

    /// Gets the node at `(tenant, target)`, if any.
    async fn get_node(
        &self,
        tenant_id: &TenantId,
        target: &TargetPath,
    ) -> Result<Option<DependencyGraphNode>>;

    /// Returns processable nodes grouped by owning entity.
    ///
    /// This is a system-level maintenance query and deliberately spans
    /// tenants; groups are ordered by `(tenant, entity)` for deterministic
    /// scheduling. Nodes whose status is outside `processable` never appear.
    async fn find_dirty_nodes_grouped_by_entity(
        &self,
        processable: &ProcessableStatuses,
    ) -> Result<Vec<EntityGroup>>;

    /// Returns all of the tenant's nodes whose expression or condition
    /// dependencies intersect `paths`.
    async fn find_nodes_affected_by_paths(
        &self,
        tenant_id: &TenantId,
        paths: &[TargetPath],
    ) -> Result<Vec<DependencyGraphNode>>;

    /// Bulk status update to dirty for all nodes matching any matcher.
    ///
    /// Returns the number of nodes transitioned. Touches only the status
    /// field and version stamp.
    async fn mark_nodes_dirty(&self, matchers: &[NodeMatcher]) -> Result<u64>;
}
