//! The node-evaluation contract honored by queue workers.
//!
//! The worker that computes expression values is an external job consumer,
//! but the engine owns the rules that make the graph correct:
//!
//! 1. A node is eligible only once every declared dependency is non-dirty
//!    (topological readiness, converged by repeated scheduling passes)
//! 2. A present condition is evaluated first; a false condition withdraws
//!    the node's value rather than leaving it stale
//! 3. Sibling and parent/child conflicts resolve by the node's merge policy
//! 4. Evaluation failures park the node in an error status with the error
//!    text recorded, excluded from automatic rescheduling
//!
//! This module encodes those rules as data types plus the store writes that
//! commit an outcome.

use serde_json::Value;

use trama_core::{TargetPath, TenantId};

use crate::error::Result;
use crate::graph::{
    DependencyGraphNode, GraphStore, HorizontalPolicy, NodePatch, NodeStatus, VerticalPolicy,
};
use crate::metrics::EngineMetrics;

/// Whether a node may be evaluated right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// All declared dependencies are settled.
    Ready,
    /// These upstream targets are still dirty; try again on a later pass.
    AwaitingDeps(Vec<TargetPath>),
    /// The condition's dependency analysis has not run yet; the node cannot
    /// be scheduled until a field operation or analyzer fills it in.
    NeedsAnalysis,
}

/// Computes a node's readiness against the current graph state.
///
/// A dependency with no stored node counts as settled: the value source is
/// outside the graph (e.g. a raw event path), so there is nothing to wait
/// for.
pub async fn readiness(graph: &dyn GraphStore, node: &DependencyGraphNode) -> Result<Readiness> {
    if node.requires_analysis() {
        return Ok(Readiness::NeedsAnalysis);
    }

    let mut awaiting = Vec::new();
    let condition_deps = node.condition_deps.as_deref().unwrap_or(&[]);
    for dep in node.expression_deps.iter().chain(condition_deps) {
        let upstream = graph.get_node(&node.tenant_id, dep).await?;
        if upstream.is_some_and(|up| up.status == NodeStatus::Dirty) {
            awaiting.push(dep.clone());
        }
    }

    if awaiting.is_empty() {
        Ok(Readiness::Ready)
    } else {
        Ok(Readiness::AwaitingDeps(awaiting))
    }
}

/// What one evaluation attempt produced.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationOutcome {
    /// The expression produced a value (condition absent or true).
    Evaluated {
        /// The computed value.
        value: Value,
        /// The cached condition result, if a condition was evaluated.
        condition_value: Option<bool>,
    },
    /// The condition evaluated to false; any previous value is withdrawn.
    ConditionFalse,
    /// The condition threw; the node parks in `ErrorCondition`.
    ConditionFailed {
        /// Error text to record on the node.
        error: String,
    },
    /// The expression threw; the node parks in `ErrorExpression`.
    ExpressionFailed {
        /// Error text to record on the node.
        error: String,
    },
}

impl EvaluationOutcome {
    /// Metric label for this outcome.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Evaluated { .. } => "evaluated",
            Self::ConditionFalse => "condition_false",
            Self::ConditionFailed { .. } => "condition_failed",
            Self::ExpressionFailed { .. } => "expression_failed",
        }
    }
}

/// Commits an evaluation outcome to the node's stored row.
///
/// Writes only through a partial patch so concurrent mutations to unrelated
/// fields survive. Success clears both error slots; a failure records its
/// error text and parks the node.
pub async fn apply_outcome(
    graph: &dyn GraphStore,
    tenant_id: &TenantId,
    target: &TargetPath,
    outcome: &EvaluationOutcome,
) -> Result<()> {
    let patch = match outcome {
        EvaluationOutcome::Evaluated {
            condition_value, ..
        } => NodePatch {
            status: Some(NodeStatus::Clean),
            last_condition_value: Some(*condition_value),
            expression_errors: Some(None),
            condition_errors: Some(None),
            ..NodePatch::default()
        },
        EvaluationOutcome::ConditionFalse => NodePatch {
            status: Some(NodeStatus::Clean),
            last_condition_value: Some(Some(false)),
            expression_errors: Some(None),
            condition_errors: Some(None),
            ..NodePatch::default()
        },
        EvaluationOutcome::ConditionFailed { error } => NodePatch {
            status: Some(NodeStatus::ErrorCondition),
            last_condition_value: Some(None),
            condition_errors: Some(Some(error.clone())),
            ..NodePatch::default()
        },
        EvaluationOutcome::ExpressionFailed { error } => NodePatch {
            status: Some(NodeStatus::ErrorExpression),
            expression_errors: Some(Some(error.clone())),
            ..NodePatch::default()
        },
    };

    graph.update_node(tenant_id, target, patch).await?;
    EngineMetrics::new().record_evaluation(outcome.as_label());
    Ok(())
}

/// Resolves a sibling conflict at the same nesting level.
///
/// `incoming` is the more recently evaluated sibling.
#[must_use]
pub fn merge_siblings(policy: HorizontalPolicy, existing: Value, incoming: Value) -> Value {
    match policy {
        HorizontalPolicy::Overwrite => incoming,
        HorizontalPolicy::MergeByKey => match (existing, incoming) {
            (Value::Object(mut base), Value::Object(update)) => {
                for (key, value) in update {
                    base.insert(key, value);
                }
                Value::Object(base)
            }
            // Non-objects cannot merge by key; the incoming sibling wins.
            (_, incoming) => incoming,
        },
    }
}

/// Resolves a parent/child conflict across nesting levels.
#[must_use]
pub fn resolve_vertical(
    policy: VerticalPolicy,
    parent: Option<Value>,
    child: Option<Value>,
) -> Option<Value> {
    match policy {
        VerticalPolicy::Parent => parent.or(child),
        VerticalPolicy::Child => child.or(parent),
    }
}
