//! In-memory registry implementations for testing.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No persistence, no cross-process sharing
//! - **Single-process only**: State is lost when the process exits

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use trama_core::{DomainId, TenantId};

use super::{
    ConfigDocument, ConfigStore, Domain, DomainStore, FieldDefinition, NamedExpressionStore,
    TriggerMatch, LATEST_VERSION,
};
use crate::error::{Error, Result};
use crate::expression::NamedExpression;

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("registry lock poisoned")
}

/// In-memory domain registry.
#[derive(Debug, Default)]
pub struct InMemoryDomainStore {
    domains: RwLock<BTreeMap<(TenantId, DomainId), Domain>>,
}

impl InMemoryDomainStore {
    /// Creates a new empty domain registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DomainStore for InMemoryDomainStore {
    async fn upsert(&self, domain: Domain) -> Result<()> {
        let mut domains = self.domains.write().map_err(poison_err)?;
        domains.insert((domain.tenant_id.clone(), domain.domain_id.clone()), domain);
        drop(domains);
        Ok(())
    }

    async fn get(&self, tenant_id: &TenantId, domain_id: &DomainId) -> Result<Option<Domain>> {
        let domains = self.domains.read().map_err(poison_err)?;
        Ok(domains.get(&(tenant_id.clone(), domain_id.clone())).cloned())
    }

    async fn get_domain_fields(
        &self,
        tenant_id: &TenantId,
        domain_id: &DomainId,
    ) -> Result<Vec<FieldDefinition>> {
        let domains = self.domains.read().map_err(poison_err)?;
        domains
            .get(&(tenant_id.clone(), domain_id.clone()))
            .map(|domain| domain.proxy_fields.clone())
            .ok_or_else(|| trama_core::Error::not_found("domain", domain_id).into())
    }

    async fn find_matching_triggers(&self, event_type: &str) -> Result<Vec<TriggerMatch>> {
        let domains = self.domains.read().map_err(poison_err)?;
        Ok(domains
            .values()
            .filter(|domain| domain.trigger.matches(event_type))
            .map(|domain| TriggerMatch {
                trigger: domain.trigger.clone(),
                tenant_id: domain.tenant_id.clone(),
                domain_id: domain.domain_id.clone(),
            })
            .collect())
    }
}

/// In-memory named-expression store.
#[derive(Debug, Default)]
pub struct InMemoryNamedExpressionStore {
    expressions: RwLock<BTreeMap<TenantId, BTreeMap<String, NamedExpression>>>,
}

impl InMemoryNamedExpressionStore {
    /// Creates a new empty named-expression store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NamedExpressionStore for InMemoryNamedExpressionStore {
    async fn replace_all(
        &self,
        tenant_id: &TenantId,
        batch: Vec<NamedExpression>,
    ) -> Result<()> {
        let mut expressions = self.expressions.write().map_err(poison_err)?;
        let set = batch
            .into_iter()
            .map(|expression| (expression.id.clone(), expression))
            .collect();
        expressions.insert(tenant_id.clone(), set);
        drop(expressions);
        Ok(())
    }

    async fn get(&self, tenant_id: &TenantId, id: &str) -> Result<Option<NamedExpression>> {
        let expressions = self.expressions.read().map_err(poison_err)?;
        Ok(expressions
            .get(tenant_id)
            .and_then(|set| set.get(id))
            .cloned())
    }
}

/// In-memory configuration document store.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    documents: RwLock<Vec<ConfigDocument>>,
}

impl InMemoryConfigStore {
    /// Creates a new empty config store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn insert(&self, document: ConfigDocument) -> Result<()> {
        let mut documents = self.documents.write().map_err(poison_err)?;
        let duplicate = documents
            .iter()
            .any(|doc| doc.tenant_id == document.tenant_id && doc.version == document.version);
        if duplicate {
            drop(documents);
            return Err(trama_core::Error::PreconditionFailed {
                message: format!("configuration version '{}' already exists", document.version),
            }
            .into());
        }
        documents.push(document);
        drop(documents);
        Ok(())
    }

    async fn version_exists(&self, tenant_id: &TenantId, version: &str) -> Result<bool> {
        let documents = self.documents.read().map_err(poison_err)?;
        Ok(documents
            .iter()
            .any(|doc| &doc.tenant_id == tenant_id && doc.version == version))
    }

    async fn get_target_config(
        &self,
        tenant_id: &TenantId,
        version: &str,
        config_key: &str,
    ) -> Result<Option<Value>> {
        let documents = self.documents.read().map_err(poison_err)?;
        let document = if version == LATEST_VERSION {
            documents
                .iter()
                .filter(|doc| &doc.tenant_id == tenant_id)
                .max_by_key(|doc| doc.uploaded_at)
        } else {
            documents
                .iter()
                .find(|doc| &doc.tenant_id == tenant_id && doc.version == version)
        };
        Ok(document.and_then(|doc| doc.sections.get(config_key).cloned()))
    }
}
