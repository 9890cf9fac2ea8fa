//! In-memory proxy store implementation for testing.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No persistence, no cross-process sharing
//! - **Single-process only**: State is lost when the process exits

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use trama_core::{DomainId, TenantId};

use super::{FieldValue, InsertOutcome, Proxy, ProxyStore};
use crate::error::{Error, Result};

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("proxy store lock poisoned")
}

type ProxyKey = (TenantId, DomainId, String);

/// In-memory proxy store keyed by `(tenant, domain, context key)`.
#[derive(Debug, Default)]
pub struct InMemoryProxyStore {
    proxies: RwLock<BTreeMap<ProxyKey, Proxy>>,
}

impl InMemoryProxyStore {
    /// Creates a new empty proxy store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored proxies.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        let proxies = self.proxies.read().map_err(poison_err)?;
        Ok(proxies.len())
    }

    /// Returns true if the store holds no proxies.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl ProxyStore for InMemoryProxyStore {
    async fn insert(&self, proxy: Proxy) -> Result<InsertOutcome> {
        let mut proxies = self.proxies.write().map_err(poison_err)?;
        let key = (
            proxy.tenant_id.clone(),
            proxy.domain_id.clone(),
            proxy.context_key.clone(),
        );
        if proxies.contains_key(&key) {
            drop(proxies);
            return Ok(InsertOutcome::AlreadyExists);
        }
        proxies.insert(key, proxy);
        drop(proxies);
        Ok(InsertOutcome::Created)
    }

    async fn get(
        &self,
        tenant_id: &TenantId,
        domain_id: &DomainId,
        context_key: &str,
    ) -> Result<Option<Proxy>> {
        let proxies = self.proxies.read().map_err(poison_err)?;
        Ok(proxies
            .get(&(tenant_id.clone(), domain_id.clone(), context_key.to_string()))
            .cloned())
    }

    async fn set_dynamic_field(
        &self,
        tenant_id: &TenantId,
        domain_id: &DomainId,
        context_key: &str,
        field_id: &str,
        value: FieldValue,
    ) -> Result<()> {
        let mut proxies = self.proxies.write().map_err(poison_err)?;
        let key = (tenant_id.clone(), domain_id.clone(), context_key.to_string());
        let Some(proxy) = proxies.get_mut(&key) else {
            drop(proxies);
            return Err(trama_core::Error::not_found("proxy", context_key).into());
        };
        proxy.dynamic_fields.insert(field_id.to_string(), value);
        drop(proxies);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyService;
    use crate::registry::FieldDefinition;
    use serde_json::json;
    use std::sync::Arc;

    fn tenant() -> TenantId {
        TenantId::new_unchecked("acme-corp")
    }

    fn domain() -> DomainId {
        DomainId::new_unchecked("contracts")
    }

    #[tokio::test]
    async fn create_proxy_initializes_fields_unset() -> Result<()> {
        let store = Arc::new(InMemoryProxyStore::new());
        let service = ProxyService::new(store.clone());

        let fields = vec![FieldDefinition::new("f1", 1), FieldDefinition::new("f2", 1)];
        let created = service
            .create_proxy(
                tenant(),
                "doc-1",
                domain(),
                json!({"sourceDocId": "doc-1"}),
                &fields,
                None,
            )
            .await?
            .expect("first creation should succeed");

        assert_eq!(created.dynamic_fields.len(), 2);
        assert!(created.dynamic_fields.values().all(FieldValue::is_unset));
        assert_eq!(store.len()?, 1);

        Ok(())
    }

    #[tokio::test]
    async fn duplicate_creation_returns_none_without_error() -> Result<()> {
        let store = Arc::new(InMemoryProxyStore::new());
        let service = ProxyService::new(store.clone());
        let fields = vec![FieldDefinition::new("f1", 1)];

        let first = service
            .create_proxy(tenant(), "doc-1", domain(), json!({}), &fields, None)
            .await?;
        assert!(first.is_some());

        let second = service
            .create_proxy(tenant(), "doc-1", domain(), json!({}), &fields, None)
            .await?;
        assert!(second.is_none());
        assert_eq!(store.len()?, 1);

        Ok(())
    }

    #[tokio::test]
    async fn same_context_key_in_other_domain_is_distinct() -> Result<()> {
        let store = Arc::new(InMemoryProxyStore::new());
        let service = ProxyService::new(store.clone());
        let fields = vec![FieldDefinition::new("f1", 1)];

        service
            .create_proxy(tenant(), "doc-1", domain(), json!({}), &fields, None)
            .await?;
        let other = service
            .create_proxy(
                tenant(),
                "doc-1",
                DomainId::new_unchecked("billing"),
                json!({}),
                &fields,
                None,
            )
            .await?;

        assert!(other.is_some());
        assert_eq!(store.len()?, 2);

        Ok(())
    }

    #[tokio::test]
    async fn side_effects_restored_after_creation() -> Result<()> {
        let store = Arc::new(InMemoryProxyStore::new());
        let service = ProxyService::new(store);

        assert!(!service.side_effects_suppressed());
        service
            .create_proxy(tenant(), "doc-1", domain(), json!({}), &[], None)
            .await?;
        assert!(!service.side_effects_suppressed());

        Ok(())
    }

    #[tokio::test]
    async fn set_dynamic_field_updates_value() -> Result<()> {
        let store = InMemoryProxyStore::new();
        let proxy = Proxy {
            context_key: "doc-1".into(),
            domain_id: domain(),
            tenant_id: tenant(),
            context: json!({}),
            dynamic_fields: BTreeMap::from([("f1".to_string(), FieldValue::Unset)]),
            fragments: None,
            created_at: chrono::Utc::now(),
        };
        store.insert(proxy).await?;

        store
            .set_dynamic_field(&tenant(), &domain(), "doc-1", "f1", FieldValue::Set(json!(42)))
            .await?;

        let fetched = store
            .get(&tenant(), &domain(), "doc-1")
            .await?
            .expect("proxy should exist");
        assert_eq!(fetched.dynamic_fields["f1"], FieldValue::Set(json!(42)));

        Ok(())
    }

    #[tokio::test]
    async fn set_dynamic_field_on_missing_proxy_errors() {
        let store = InMemoryProxyStore::new();
        let result = store
            .set_dynamic_field(&tenant(), &domain(), "ghost", "f1", FieldValue::Unset)
            .await;
        assert!(result.is_err());
    }
}
