//! In-memory ledger implementations for testing.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No persistence, no cross-process sharing
//! - **Single-process only**: State is lost when the process exits

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use trama_core::EventId;

use super::{FieldOperation, FieldOperationStore, ImportedEvent, ImportedEventStore};
use crate::error::{Error, Result};

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("ledger lock poisoned")
}

/// In-memory imported-event ledger.
///
/// Rows are keyed by event id; ULID ordering gives oldest-first drains.
#[derive(Debug, Default)]
pub struct InMemoryImportedEventStore {
    events: RwLock<BTreeMap<EventId, ImportedEvent>>,
}

impl InMemoryImportedEventStore {
    /// Creates a new empty event ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImportedEventStore for InMemoryImportedEventStore {
    async fn append(&self, event: ImportedEvent) -> Result<()> {
        let mut events = self.events.write().map_err(poison_err)?;
        events.insert(event.event_id, event);
        drop(events);
        Ok(())
    }

    async fn get(&self, event_id: &EventId) -> Result<Option<ImportedEvent>> {
        let events = self.events.read().map_err(poison_err)?;
        Ok(events.get(event_id).cloned())
    }

    async fn find_unprocessed(&self, limit: usize) -> Result<Vec<ImportedEvent>> {
        let events = self.events.read().map_err(poison_err)?;
        Ok(events
            .values()
            .filter(|event| !event.processed)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, event_id: &EventId) -> Result<bool> {
        let mut events = self.events.write().map_err(poison_err)?;
        let transitioned = match events.get_mut(event_id) {
            Some(event) if !event.processed => {
                event.processed = true;
                true
            }
            _ => false,
        };
        drop(events);
        Ok(transitioned)
    }
}

/// In-memory field-operations ledger.
#[derive(Debug, Default)]
pub struct InMemoryFieldOperationStore {
    operations: RwLock<BTreeMap<String, FieldOperation>>,
}

impl InMemoryFieldOperationStore {
    /// Creates a new empty field-operations ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FieldOperationStore for InMemoryFieldOperationStore {
    async fn append_all(&self, batch: Vec<FieldOperation>) -> Result<()> {
        let mut operations = self.operations.write().map_err(poison_err)?;
        for operation in batch {
            operations.insert(operation.operation_id.clone(), operation);
        }
        drop(operations);
        Ok(())
    }

    async fn get(&self, operation_id: &str) -> Result<Option<FieldOperation>> {
        let operations = self.operations.read().map_err(poison_err)?;
        Ok(operations.get(operation_id).cloned())
    }

    async fn find_unprocessed(&self, limit: usize) -> Result<Vec<FieldOperation>> {
        let operations = self.operations.read().map_err(poison_err)?;
        Ok(operations
            .values()
            .filter(|operation| !operation.processed)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, operation_id: &str) -> Result<bool> {
        let mut operations = self.operations.write().map_err(poison_err)?;
        let transitioned = match operations.get_mut(operation_id) {
            Some(operation) if !operation.processed => {
                operation.processed = true;
                true
            }
            _ => false,
        };
        drop(operations);
        Ok(transitioned)
    }

    async fn exists_blocking_unprocessed(&self) -> Result<bool> {
        let operations = self.operations.read().map_err(poison_err)?;
        Ok(operations
            .values()
            .any(|operation| operation.blocking && !operation.processed))
    }
}
