//! # trama-core
//!
//! Core abstractions for the Trama universal-reporting engine.
//!
//! This crate provides the foundational types used across all Trama components:
//!
//! - **Tenant Context**: Multi-tenant isolation primitives
//! - **Identifiers**: Strongly-typed IDs for events, domains, and graph targets
//! - **Error Types**: Shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `trama-core` is the only crate allowed to define shared primitives. Every
//! store and scheduler call in the engine takes an explicit [`TenantId`];
//! there is no ambient "current tenant" state anywhere in the system.
//!
//! ## Example
//!
//! ```rust
//! use trama_core::prelude::*;
//!
//! let tenant = TenantId::new("acme-corp").unwrap();
//! let event_id = EventId::generate();
//! let target = TargetPath::new("contracts.proxy-1.total");
//! assert_eq!(target.head(), Some("contracts"));
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod tenant;

pub use error::{Error, Result};
pub use id::{DomainId, EventId, TargetPath};
pub use tenant::TenantId;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use trama_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{DomainId, EventId, TargetPath};
    pub use crate::tenant::TenantId;
}
