//! # trama-engine
//!
//! The dynamic dependency-graph evaluation engine behind Trama's universal
//! reporting: computed fields on domain records ("proxies") are derived from
//! uploaded configuration, kept consistent as upstream data changes, and
//! recomputed safely across concurrent service instances.
//!
//! ## Architecture
//!
//! ```text
//!   ConfigurationUploaded          DomainEventOccurred
//!          |                              |
//!          v                              v
//!     ConfigIngest                 ImportedEvent ledger
//!      |        |                         |
//!      v        v                         v
//!   Domain   FieldOperation ledger   EventsProcessor ---> WorkQueue
//!   registry       |    (busy gate)                          |
//!                  v                                         v
//!           FieldOpsAnalyzer -----> WorkQueue ----> appliers mutate the
//!                                                   dependency graph
//!                  GraphEvaluator -> WorkQueue ---> per-entity recompute
//! ```
//!
//! Three timer-driven schedulers share one lock-guarded lifecycle (see
//! [`scheduler`]); the [`queue`] deduplicates their jobs by key; the
//! [`apply`] and [`evaluate`] modules define what the queue workers do.
//!
//! ## Key Properties
//!
//! - **Convergent**: every store mutation is an idempotent upsert or a
//!   status-matching update; retried jobs and concurrent schedulers settle
//!   to the same state
//! - **Busy-gated**: graph recomputation halts while any blocking field
//!   operation is unprocessed, so evaluation never sees a half-migrated
//!   schema
//! - **Tenant-explicit**: every store call takes a [`trama_core::TenantId`];
//!   only system-level maintenance queries span tenants

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod apply;
pub mod error;
pub mod evaluate;
pub mod expression;
pub mod graph;
pub mod ingest;
pub mod ledger;
pub mod lock;
pub mod metrics;
pub mod proxy;
pub mod queue;
pub mod registry;
pub mod scheduler;

pub use error::{Error, Result};

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use trama_engine::prelude::*;
/// ```
pub mod prelude {
    pub use crate::apply::{FieldOperationApplier, ImportedEventApplier};
    pub use crate::error::{Error, Result};
    pub use crate::graph::{
        DependencyGraphNode, GraphStore, NodeStatus, ProcessableStatuses,
    };
    pub use crate::ingest::{ConfigIngest, ConfigurationUploaded};
    pub use crate::ledger::{
        DomainEventOccurred, FieldOperation, FieldOperationStore, FieldOperationType,
        ImportedEvent, ImportedEventStore,
    };
    pub use crate::lock::LockService;
    pub use crate::proxy::{ProxyService, ProxyStore};
    pub use crate::queue::{JobEnvelope, JobKind, WorkQueue};
    pub use crate::registry::{ConfigStore, Domain, DomainStore, FieldDefinition};
    pub use crate::scheduler::{SchedulerTask, TickOutcome, TickRunner};
}
