//! Strongly-typed identifiers for Trama entities.
//!
//! Identifiers in Trama are:
//! - **Strongly typed**: Prevents mixing up different ID types at compile time
//! - **Lexicographically sortable**: Generated IDs are ULIDs and sort by
//!   creation time
//!
//! # Example
//!
//! ```rust
//! use trama_core::id::{EventId, TargetPath};
//!
//! let event = EventId::generate();
//! let target = TargetPath::new("contracts.proxy-1.total");
//! assert_eq!(target.segments().count(), 3);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

/// A unique identifier for an imported domain event.
///
/// Event IDs double as queue job keys, which is what gives the
/// events-processor its exactly-once hand-off per event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Ulid);

impl EventId {
    /// Generates a new unique event ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Creates an event ID from a raw ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }

    /// Returns the creation timestamp encoded in the ID.
    #[must_use]
    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        let ms = self.0.timestamp_ms();
        chrono::DateTime::from_timestamp_millis(i64::try_from(ms).unwrap_or(i64::MAX))
            .unwrap_or_else(chrono::Utc::now)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s).map(Self).map_err(|e| Error::InvalidId {
            message: format!("invalid event ID '{s}': {e}"),
        })
    }
}

/// A caller-supplied identifier for a business domain.
///
/// Domain IDs come from uploaded configuration and are unique per tenant.
/// They become the leading segment of every graph target path the domain
/// declares.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainId(String);

impl DomainId {
    /// Creates a new domain ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID is empty or contains a path separator.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidId {
                message: "domain ID cannot be empty".to_string(),
            });
        }
        if id.contains('.') {
            return Err(Error::InvalidId {
                message: format!("domain ID '{id}' cannot contain '.'"),
            });
        }
        Ok(Self(id))
    }

    /// Creates a domain ID without validation.
    #[must_use]
    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the domain ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A dot-separated path addressing one computed target in the dependency
/// graph, e.g. `contracts.proxy-1.total`.
///
/// Paths are plain strings with segment helpers; the graph itself addresses
/// nested sub-nodes by walking segments, not by global ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetPath(String);

impl TargetPath {
    /// Creates a target path from a dot-separated string.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Builds a path from a domain and a field ID.
    #[must_use]
    pub fn for_field(domain: &DomainId, field_id: &str) -> Self {
        Self(format!("{}.{field_id}", domain.as_str()))
    }

    /// Appends a segment, returning the extended path.
    #[must_use]
    pub fn join(&self, segment: &str) -> Self {
        Self(format!("{}.{segment}", self.0))
    }

    /// Iterates over the path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Returns the first segment (typically the owning domain).
    #[must_use]
    pub fn head(&self) -> Option<&str> {
        self.0.split('.').next().filter(|s| !s.is_empty())
    }

    /// Returns the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TargetPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_are_unique_and_sortable() {
        let a = EventId::generate();
        let b = EventId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn event_id_round_trips_through_string() {
        let id = EventId::generate();
        let parsed: EventId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn event_id_rejects_garbage() {
        assert!("not-a-ulid!".parse::<EventId>().is_err());
    }

    #[test]
    fn domain_id_rejects_dots_and_empty() {
        assert!(DomainId::new("contracts").is_ok());
        assert!(DomainId::new("").is_err());
        assert!(DomainId::new("a.b").is_err());
    }

    #[test]
    fn target_path_segments() {
        let path = TargetPath::new("contracts.proxy-1.total");
        let segments: Vec<_> = path.segments().collect();
        assert_eq!(segments, vec!["contracts", "proxy-1", "total"]);
        assert_eq!(path.head(), Some("contracts"));
    }

    #[test]
    fn target_path_for_field() {
        let domain = DomainId::new("contracts").unwrap();
        let path = TargetPath::for_field(&domain, "total");
        assert_eq!(path.as_str(), "contracts.total");
    }

    #[test]
    fn target_path_join() {
        let path = TargetPath::new("contracts").join("total");
        assert_eq!(path.as_str(), "contracts.total");
    }
}
