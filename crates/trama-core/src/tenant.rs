//! Multi-tenant isolation primitives.
//!
//! Every row family in Trama is tenant-scoped, and every store and scheduler
//! call takes the tenant explicitly. The engine deliberately has no ambient
//! "current tenant" context: concurrency across schedulers stays free of
//! hidden coupling, and a missing tenant is a compile-time impossibility
//! rather than a silently-defaulted query.
//!
//! # Example
//!
//! ```rust
//! use trama_core::tenant::TenantId;
//!
//! let tenant = TenantId::new("acme-corp").unwrap();
//! assert_eq!(tenant.as_str(), "acme-corp");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// A unique identifier for a tenant.
///
/// Tenant IDs must be:
/// - Non-empty
/// - Lowercase alphanumeric with hyphens
/// - Between 3 and 63 characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a new tenant ID after validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the tenant ID is invalid.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Creates a tenant ID without validation.
    ///
    /// Intended for IDs that have already been validated (e.g., read back
    /// from storage).
    #[must_use]
    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the tenant ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validates a tenant ID string.
    fn validate(id: &str) -> Result<()> {
        let invalid = |message: String| Error::InvalidId { message };

        match id.len() {
            0 => return Err(invalid("tenant ID cannot be empty".to_string())),
            1..=2 => {
                return Err(invalid(format!(
                    "tenant ID '{id}' is too short (minimum 3 characters)"
                )));
            }
            3..=63 => {}
            _ => {
                return Err(invalid(format!(
                    "tenant ID '{id}' is too long (maximum 63 characters)"
                )));
            }
        }

        let allowed = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-';
        if let Some(bad) = id.chars().find(|c| !allowed(*c)) {
            return Err(invalid(format!(
                "tenant ID '{id}' contains invalid character '{bad}' (lowercase letters, digits, and hyphens only)"
            )));
        }

        if id.starts_with('-') || id.ends_with('-') {
            return Err(invalid(format!(
                "tenant ID '{id}' cannot start or end with a hyphen"
            )));
        }

        Ok(())
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_tenant_ids() {
        assert!(TenantId::new("acme-corp").is_ok());
        assert!(TenantId::new("abc").is_ok());
        assert!(TenantId::new("tenant-42").is_ok());
    }

    #[test]
    fn rejects_empty_and_short() {
        assert!(TenantId::new("").is_err());
        assert!(TenantId::new("ab").is_err());
    }

    #[test]
    fn rejects_invalid_characters() {
        assert!(TenantId::new("Acme").is_err());
        assert!(TenantId::new("acme_corp").is_err());
        assert!(TenantId::new("acme corp").is_err());
    }

    #[test]
    fn rejects_leading_and_trailing_hyphen() {
        assert!(TenantId::new("-acme").is_err());
        assert!(TenantId::new("acme-").is_err());
    }

    #[test]
    fn rejects_overlong() {
        let long = "a".repeat(64);
        assert!(TenantId::new(long).is_err());
    }

    #[test]
    fn serde_is_transparent() {
        let tenant = TenantId::new("acme-corp").unwrap();
        let json = serde_json::to_string(&tenant).unwrap();
        assert_eq!(json, "\"acme-corp\"");
    }
}
