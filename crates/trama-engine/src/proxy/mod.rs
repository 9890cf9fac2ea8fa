//! Proxies: materialized, domain-scoped records whose dynamic fields are
//! computed rather than directly written.
//!
//! A proxy exists per `(context key, domain, tenant)`. Creation is guarded
//! against duplicate-key races: triggers may fire multiple times for the
//! same context, so a duplicate insert resolves to "already exists", not an
//! error.

pub mod memory;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use trama_core::{DomainId, TenantId};

use crate::error::Result;
use crate::registry::FieldDefinition;

/// A computed field slot on a proxy.
///
/// Every declared field starts `Unset` and is filled in by the evaluation
/// worker as the graph settles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "state", content = "value")]
pub enum FieldValue {
    /// No value has been computed yet, or the value was withdrawn.
    Unset,
    /// A computed value.
    Set(Value),
}

impl FieldValue {
    /// Returns true if no value is present.
    #[must_use]
    pub const fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }
}

/// A materialized record for one `(context key, domain, tenant)` triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proxy {
    /// Externally-relevant context identifier (e.g. a source document id).
    pub context_key: String,
    /// Domain the proxy belongs to.
    pub domain_id: DomainId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Opaque identifying payload.
    pub context: Value,
    /// Computed field values, keyed by field id.
    pub dynamic_fields: BTreeMap<String, FieldValue>,
    /// Optional raw source payload fragments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fragments: Option<Value>,
    /// When the proxy was created.
    pub created_at: DateTime<Utc>,
}

/// Outcome of a proxy insert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The proxy was created.
    Created,
    /// A proxy with the same key triple already exists; nothing was written.
    AlreadyExists,
}

/// Storage abstraction for proxies.
#[async_trait]
pub trait ProxyStore: Send + Sync {
    /// Inserts a proxy, enforcing the `(context key, domain, tenant)`
    /// uniqueness constraint.
    async fn insert(&self, proxy: Proxy) -> Result<InsertOutcome>;

    /// Gets a proxy, if present.
    async fn get(
        &self,
        tenant_id: &TenantId,
        domain_id: &DomainId,
        context_key: &str,
    ) -> Result<Option<Proxy>>;

    /// Writes one computed field value.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the proxy does not exist.
    async fn set_dynamic_field(
        &self,
        tenant_id: &TenantId,
        domain_id: &DomainId,
        context_key: &str,
        field_id: &str,
        value: FieldValue,
    ) -> Result<()>;
}

/// Proxy lifecycle operations layered over a [`ProxyStore`].
///
/// Carries the reactive-side-effect switch: while a proxy insert is in
/// flight, the insert's own write must not feed back into invalidation, so
/// side effects are suppressed for the duration and restored afterwards,
/// including on the error path.
pub struct ProxyService {
    store: Arc<dyn ProxyStore>,
    side_effects_suppressed: Arc<AtomicBool>,
}

impl ProxyService {
    /// Creates a service over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn ProxyStore>) -> Self {
        Self {
            store,
            side_effects_suppressed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns true if reactive side effects should currently be skipped.
    #[must_use]
    pub fn side_effects_suppressed(&self) -> bool {
        self.side_effects_suppressed.load(Ordering::SeqCst)
    }

    /// Creates a proxy with every declared field initialized to
    /// [`FieldValue::Unset`].
    ///
    /// Returns `Ok(None)` if a proxy for the same `(context key, domain,
    /// tenant)` already exists.
    #[tracing::instrument(skip(self, context, fields, fragments), fields(%tenant_id, %domain_id, context_key))]
    pub async fn create_proxy(
        &self,
        tenant_id: TenantId,
        context_key: impl Into<String> + std::fmt::Debug,
        domain_id: DomainId,
        context: Value,
        fields: &[FieldDefinition],
        fragments: Option<Value>,
    ) -> Result<Option<Proxy>> {
        let proxy = Proxy {
            context_key: context_key.into(),
            domain_id,
            tenant_id,
            context,
            dynamic_fields: fields
                .iter()
                .map(|field| (field.id.clone(), FieldValue::Unset))
                .collect(),
            fragments,
            created_at: Utc::now(),
        };

        let _guard = SuppressionGuard::engage(&self.side_effects_suppressed);
        match self.store.insert(proxy.clone()).await? {
            InsertOutcome::Created => Ok(Some(proxy)),
            InsertOutcome::AlreadyExists => {
                tracing::debug!("duplicate proxy creation - no-op");
                Ok(None)
            }
        }
    }
}

/// Drop-guard flipping the suppression flag on for its lifetime.
///
/// Restores the previous value on drop, so nested suppression and the error
/// path both unwind correctly.
struct SuppressionGuard {
    flag: Arc<AtomicBool>,
    previous: bool,
}

impl SuppressionGuard {
    fn engage(flag: &Arc<AtomicBool>) -> Self {
        let previous = flag.swap(true, Ordering::SeqCst);
        Self {
            flag: Arc::clone(flag),
            previous,
        }
    }
}

impl Drop for SuppressionGuard {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::SeqCst);
    }
}
