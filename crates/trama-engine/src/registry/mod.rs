//! The domain registry and its sibling configuration stores.
//!
//! Three row families written by config ingestion live here:
//!
//! - [`Domain`]: per-domain trigger definition, proxy field schema, and
//!   access-condition expressions
//! - named expressions (see [`crate::expression::NamedExpression`]): the
//!   deduplicated fragment set, replaced wholesale on every upload
//! - uploaded configuration documents, addressable by version or `"latest"`

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use trama_core::{DomainId, TenantId};

use crate::error::Result;
use crate::expression::NamedExpression;

/// Version selector resolving to the newest uploaded configuration.
pub const LATEST_VERSION: &str = "latest";

/// One dynamic field a domain declares on its proxies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    /// Field identifier, unique within the domain.
    pub id: String,
    /// Version stamp; a changed stamp means the definition changed.
    pub version: u32,
    /// Display label, if configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Expression computing the field's value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<Value>,
    /// Condition gating whether the field contributes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
}

impl FieldDefinition {
    /// Creates a bare field definition.
    #[must_use]
    pub fn new(id: impl Into<String>, version: u32) -> Self {
        Self {
            id: id.into(),
            version,
            label: None,
            expression: None,
            condition: None,
        }
    }

    /// Sets the computing expression.
    #[must_use]
    pub fn with_expression(mut self, expression: Value) -> Self {
        self.expression = Some(expression);
        self
    }

    /// Sets the gating condition.
    #[must_use]
    pub fn with_condition(mut self, condition: Value) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// Which external event types spawn or update proxies for a domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRule {
    /// Event type names that activate this domain.
    pub sources: Vec<String>,
    /// Optional activation rule evaluated against the event payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation: Option<Value>,
}

impl TriggerRule {
    /// Creates a rule matching the given event types unconditionally.
    #[must_use]
    pub fn for_sources(sources: Vec<String>) -> Self {
        Self {
            sources,
            activation: None,
        }
    }

    /// Returns true if the rule fires for `event_type`.
    #[must_use]
    pub fn matches(&self, event_type: &str) -> bool {
        self.sources.iter().any(|source| source == event_type)
    }
}

/// The three access-condition expressions a domain carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessConditions {
    /// Gate for list views.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list: Option<Value>,
    /// Gate for detail views.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
    /// Gate for editing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit: Option<Value>,
}

/// A named grouping of proxy field definitions plus the trigger rule that
/// creates/updates its proxies from external events.
///
/// Created on first sight in configuration; updated in place on subsequent
/// uploads with the field list diffed, never blindly replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    /// Domain identifier, unique per tenant.
    pub domain_id: DomainId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Localized display name, keyed by locale.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub name: BTreeMap<String, String>,
    /// Localized description, keyed by locale.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub description: BTreeMap<String, String>,
    /// Trigger definition.
    pub trigger: TriggerRule,
    /// Ordered proxy field schema.
    pub proxy_fields: Vec<FieldDefinition>,
    /// Access-condition expressions.
    #[serde(default)]
    pub access: AccessConditions,
}

impl Domain {
    /// Looks up a field definition by id.
    #[must_use]
    pub fn field(&self, field_id: &str) -> Option<&FieldDefinition> {
        self.proxy_fields.iter().find(|field| field.id == field_id)
    }
}

/// A trigger that fired for an event type, with its owning domain.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerMatch {
    /// The matching trigger rule.
    pub trigger: TriggerRule,
    /// Tenant the domain belongs to.
    pub tenant_id: TenantId,
    /// The matched domain.
    pub domain_id: DomainId,
}

/// An uploaded configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    /// Caller-supplied version; unique per tenant.
    pub version: String,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Top-level config sections, keyed by config key.
    pub sections: BTreeMap<String, Value>,
    /// When the document was accepted.
    pub uploaded_at: DateTime<Utc>,
}

/// Storage for domain definitions.
#[async_trait]
pub trait DomainStore: Send + Sync {
    /// Inserts or replaces the domain at `(tenant, domain_id)`.
    async fn upsert(&self, domain: Domain) -> Result<()>;

    /// Gets a domain, if present.
    async fn get(&self, tenant_id: &TenantId, domain_id: &DomainId) -> Result<Option<Domain>>;

    /// Returns the domain's declared field definitions.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the domain does not exist.
    async fn get_domain_fields(
        &self,
        tenant_id: &TenantId,
        domain_id: &DomainId,
    ) -> Result<Vec<FieldDefinition>>;

    /// Returns every trigger firing for `event_type`.
    ///
    /// System-level maintenance query; spans tenants. Used by the
    /// events-processor's downstream job to decide which domains and proxies
    /// an event affects.
    async fn find_matching_triggers(&self, event_type: &str) -> Result<Vec<TriggerMatch>>;
}

/// Storage for deduplicated named expressions.
#[async_trait]
pub trait NamedExpressionStore: Send + Sync {
    /// Replaces the tenant's full named-expression set.
    ///
    /// Every configuration upload rebuilds the set from scratch; fragments
    /// from earlier uploads do not survive.
    async fn replace_all(
        &self,
        tenant_id: &TenantId,
        expressions: Vec<NamedExpression>,
    ) -> Result<()>;

    /// Gets a named expression by id.
    async fn get(&self, tenant_id: &TenantId, id: &str) -> Result<Option<NamedExpression>>;
}

/// Storage for uploaded configuration documents.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Inserts a new configuration version.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if the version already exists for the
    /// tenant.
    async fn insert(&self, document: ConfigDocument) -> Result<()>;

    /// Returns true if the version already exists for the tenant.
    async fn version_exists(&self, tenant_id: &TenantId, version: &str) -> Result<bool>;

    /// Resolves a config section by version and config key.
    ///
    /// The version [`LATEST_VERSION`] resolves to the newest uploaded
    /// document.
    async fn get_target_config(
        &self,
        tenant_id: &TenantId,
        version: &str,
        config_key: &str,
    ) -> Result<Option<Value>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_rule_matches_declared_sources() {
        let rule = TriggerRule::for_sources(vec!["contract.updated".into()]);
        assert!(rule.matches("contract.updated"));
        assert!(!rule.matches("contract.created"));
    }

    #[test]
    fn domain_field_lookup() {
        let domain = Domain {
            domain_id: DomainId::new_unchecked("contracts"),
            tenant_id: TenantId::new_unchecked("acme-corp"),
            name: BTreeMap::new(),
            description: BTreeMap::new(),
            trigger: TriggerRule::for_sources(vec![]),
            proxy_fields: vec![FieldDefinition::new("f1", 1), FieldDefinition::new("f2", 3)],
            access: AccessConditions::default(),
        };
        assert_eq!(domain.field("f2").map(|f| f.version), Some(3));
        assert!(domain.field("f3").is_none());
    }

    #[test]
    fn field_definition_serializes_camel_case() {
        let field = FieldDefinition::new("f1", 2).with_expression(serde_json::json!({"op": "+"}));
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(json["id"], "f1");
        assert_eq!(json["version"], 2);
        assert!(json.get("expression").is_some());
        assert!(json.get("condition").is_none());
    }
}
