//! Durable ledgers feeding the schedulers.
//!
//! Two row families live here:
//!
//! - [`ImportedEvent`]: externally-sourced domain events (create/update/delete
//!   of source entities) pending processing
//! - [`FieldOperation`]: pending schema-diff operations that must fully settle
//!   before the graph may recompute (the **busy gate**)
//!
//! Rows are only marked processed after successful hand-off or successful
//! processing, giving at-least-once semantics upstream of the queue's own
//! retry.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use trama_core::{DomainId, EventId, TargetPath, TenantId};

use crate::error::Result;
use crate::registry::FieldDefinition;

/// Asynchronous message consumed from other bounded contexts announcing a
/// source-entity change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEventOccurred {
    /// Originating event type name, e.g. `contract.updated`.
    pub source: String,
    /// Identifier of the changed source document.
    pub source_doc_id: String,
    /// Snapshot of relevant fields before the change.
    pub previous_values: Value,
    /// Snapshot of relevant fields after the change.
    pub current_values: Value,
    /// Tenant the event belongs to.
    pub tenant_id: TenantId,
}

/// An externally-sourced domain event recorded for processing.
///
/// Consumed exactly once by the events-processor (idempotent via queue job
/// id = event id); never mutated after `processed` flips to true.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedEvent {
    /// Unique ledger row id, doubling as the queue job key.
    pub event_id: EventId,
    /// Originating event type name.
    pub source: String,
    /// Identifier of the changed source document.
    pub source_doc_id: String,
    /// Free-form annotations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Snapshot of relevant fields before the change.
    pub previous_values: Value,
    /// Snapshot of relevant fields after the change.
    pub current_values: Value,
    /// Whether the event has been handed off for processing.
    pub processed: bool,
    /// Tenant the event belongs to.
    pub tenant_id: TenantId,
    /// When the event was recorded.
    pub imported_at: DateTime<Utc>,
}

impl ImportedEvent {
    /// Records a new unprocessed ledger row for an incoming message.
    #[must_use]
    pub fn record(message: DomainEventOccurred) -> Self {
        Self {
            event_id: EventId::generate(),
            source: message.source,
            source_doc_id: message.source_doc_id,
            metadata: None,
            previous_values: message.previous_values,
            current_values: message.current_values,
            processed: false,
            tenant_id: message.tenant_id,
            imported_at: Utc::now(),
        }
    }

    /// Derives the graph paths affected by this event.
    ///
    /// A path `{source}.{field}` is affected for every field whose value
    /// differs between the previous and current snapshots; fields present on
    /// only one side count as changed. Non-object snapshots yield no paths.
    #[must_use]
    pub fn changed_paths(&self) -> Vec<TargetPath> {
        let empty = serde_json::Map::new();
        let previous = self.previous_values.as_object().unwrap_or(&empty);
        let current = self.current_values.as_object().unwrap_or(&empty);

        let mut fields: Vec<&String> = previous.keys().chain(current.keys()).collect();
        fields.sort_unstable();
        fields.dedup();

        fields
            .into_iter()
            .filter(|field| previous.get(*field) != current.get(*field))
            .map(|field| TargetPath::new(format!("{}.{field}", self.source)))
            .collect()
    }
}

/// The kind of schema reconciliation a field operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldOperationType {
    /// A field was added to the domain.
    Create,
    /// A field definition changed version.
    Update,
    /// A field was removed from the domain.
    Delete,
}

impl FieldOperationType {
    /// Stable lowercase name, used in queue job keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// A pending create/update/delete action reconciling a domain's declared
/// fields with the dependency graph and proxies.
///
/// Blocking operations close the busy gate: graph evaluation halts until
/// every blocking row is processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldOperation {
    /// Unique ledger row id.
    pub operation_id: String,
    /// What the operation does.
    #[serde(rename = "type")]
    pub op_type: FieldOperationType,
    /// Snapshot of the field definition the operation applies.
    pub field: FieldDefinition,
    /// Domain the field belongs to.
    pub domain_id: DomainId,
    /// Tenant the operation belongs to.
    pub tenant_id: TenantId,
    /// Whether graph evaluation must halt until this settles.
    pub blocking: bool,
    /// Whether the operation has been applied to the graph.
    pub processed: bool,
}

impl FieldOperation {
    /// Creates a new blocking, unprocessed operation.
    #[must_use]
    pub fn new(
        op_type: FieldOperationType,
        field: FieldDefinition,
        domain_id: DomainId,
        tenant_id: TenantId,
    ) -> Self {
        Self {
            operation_id: Ulid::new().to_string(),
            op_type,
            field,
            domain_id,
            tenant_id,
            blocking: true,
            processed: false,
        }
    }

    /// Returns the idempotent queue job key: `{field.id}:{operation type}`.
    ///
    /// Re-enqueuing the same field operation while the first job is still in
    /// flight deduplicates on this key.
    #[must_use]
    pub fn job_key(&self) -> String {
        format!("{}:{}", self.field.id, self.op_type.as_str())
    }
}

/// Storage for the imported-event ledger.
#[async_trait]
pub trait ImportedEventStore: Send + Sync {
    /// Appends a new ledger row.
    async fn append(&self, event: ImportedEvent) -> Result<()>;

    /// Gets a row by id.
    async fn get(&self, event_id: &EventId) -> Result<Option<ImportedEvent>>;

    /// Returns up to `limit` unprocessed rows, oldest first.
    ///
    /// System-level maintenance query; spans tenants.
    async fn find_unprocessed(&self, limit: usize) -> Result<Vec<ImportedEvent>>;

    /// Marks a row processed. Idempotent; returns `true` if the row
    /// transitioned, `false` if it was already processed or missing.
    async fn mark_processed(&self, event_id: &EventId) -> Result<bool>;
}

/// Storage for the field-operations ledger.
#[async_trait]
pub trait FieldOperationStore: Send + Sync {
    /// Appends a batch of operations (one upload produces many).
    async fn append_all(&self, operations: Vec<FieldOperation>) -> Result<()>;

    /// Gets an operation by id.
    async fn get(&self, operation_id: &str) -> Result<Option<FieldOperation>>;

    /// Returns up to `limit` unprocessed rows, oldest first.
    ///
    /// System-level maintenance query; spans tenants.
    async fn find_unprocessed(&self, limit: usize) -> Result<Vec<FieldOperation>>;

    /// Marks an operation processed. Idempotent; returns `true` if the row
    /// transitioned.
    async fn mark_processed(&self, operation_id: &str) -> Result<bool>;

    /// The busy gate: true while any blocking operation is unprocessed.
    ///
    /// Graph evaluation and event processing must skip their tick while this
    /// holds; recomputing against a half-migrated schema would produce
    /// inconsistent results.
    async fn exists_blocking_unprocessed(&self) -> Result<bool>;
}
