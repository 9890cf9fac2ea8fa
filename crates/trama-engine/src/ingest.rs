//! Configuration ingestion: named-expression extraction, domain-field
//! diffing, and field-operation emission.
//!
//! An upload is atomic-or-nothing from the caller's point of view: all
//! validation, extraction, and diffing happen before the first store write,
//! so a rejected upload retains no registry or ledger rows.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use ulid::Ulid;

use trama_core::{DomainId, TenantId};

use crate::error::{Error, Result};
use crate::expression::{is_inline_expression, named_expression_ref, reference_for, NamedExpression};
use crate::ledger::{FieldOperation, FieldOperationStore, FieldOperationType};
use crate::registry::{
    AccessConditions, ConfigDocument, ConfigStore, Domain, DomainStore, FieldDefinition,
    NamedExpressionStore, TriggerRule,
};

/// The top-level config sections ingestion understands.
const SUPPORTED_SECTIONS: &[&str] = &["domains"];

/// Asynchronous message announcing a new configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationUploaded {
    /// Caller-supplied version; must be new for the tenant.
    pub version: String,
    /// The raw configuration document.
    pub data: Value,
}

/// What an accepted upload changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    /// Domains created or updated.
    pub domains_written: usize,
    /// Field operations appended to the ledger.
    pub operations_queued: usize,
    /// Inline expressions extracted into the named-expression store.
    pub expressions_extracted: usize,
}

/// Partition of a domain's incoming field set against its stored one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldDiff {
    /// Fields whose ids are new.
    pub to_create: Vec<FieldDefinition>,
    /// Fields present in both sets with a different version stamp.
    pub to_update: Vec<FieldDefinition>,
    /// Stored fields absent from the incoming set.
    pub to_delete: Vec<FieldDefinition>,
}

impl FieldDiff {
    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

/// Partitions `incoming` fields against the `existing` stored set.
///
/// Diffing the stored set against itself yields an empty partition, so
/// re-uploading an unchanged configuration queues no work.
#[must_use]
pub fn diff_domain_fields(existing: &[FieldDefinition], incoming: &[FieldDefinition]) -> FieldDiff {
    let existing_by_id: BTreeMap<&str, &FieldDefinition> = existing
        .iter()
        .map(|field| (field.id.as_str(), field))
        .collect();
    let incoming_ids: BTreeSet<&str> = incoming.iter().map(|field| field.id.as_str()).collect();

    let mut diff = FieldDiff::default();
    for field in incoming {
        match existing_by_id.get(field.id.as_str()) {
            None => diff.to_create.push(field.clone()),
            Some(stored) if stored.version != field.version => diff.to_update.push(field.clone()),
            Some(_) => {}
        }
    }
    for field in existing {
        if !incoming_ids.contains(field.id.as_str()) {
            diff.to_delete.push(field.clone());
        }
    }
    diff
}

/// Replaces every inline expression in `value` with a named-expression
/// reference, returning the rewritten tree and the extracted fragments.
///
/// Extraction is exhaustive over objects and arrays and leaves scalar values
/// untouched. An inline expression is taken whole; nested inline
/// expressions inside it stay embedded in the extracted fragment.
#[must_use]
pub fn extract_named_expressions(value: Value) -> (Value, Vec<NamedExpression>) {
    let mut extracted = Vec::new();
    let rewritten = extract_into(value, &mut extracted);
    (rewritten, extracted)
}

fn extract_into(value: Value, sink: &mut Vec<NamedExpression>) -> Value {
    if is_inline_expression(&value) {
        let id = Ulid::new().to_string();
        let reference = reference_for(&id);
        sink.push(NamedExpression { id, data: value });
        return reference;
    }
    match value {
        Value::Object(object) => Value::Object(
            object
                .into_iter()
                .map(|(key, child)| (key, extract_into(child, sink)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|child| extract_into(child, sink))
                .collect(),
        ),
        other => other,
    }
}

/// Collects every named-expression id referenced anywhere in `value`.
fn collect_reference_ids(value: &Value, ids: &mut BTreeSet<String>) {
    if let Some(id) = named_expression_ref(value) {
        ids.insert(id.to_string());
        return;
    }
    match value {
        Value::Object(object) => {
            for child in object.values() {
                collect_reference_ids(child, ids);
            }
        }
        Value::Array(items) => {
            for child in items {
                collect_reference_ids(child, ids);
            }
        }
        _ => {}
    }
}

/// Replaces every reference in `value` with its stored expression tree.
fn reinsert(value: Value, fragments: &BTreeMap<String, Value>) -> Value {
    if let Some(id) = named_expression_ref(&value) {
        if let Some(data) = fragments.get(id) {
            return data.clone();
        }
    }
    match value {
        Value::Object(object) => Value::Object(
            object
                .into_iter()
                .map(|(key, child)| (key, reinsert(child, fragments)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|child| reinsert(child, fragments))
                .collect(),
        ),
        other => other,
    }
}

/// One domain's section of an uploaded configuration document.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DomainSection {
    #[serde(default)]
    name: BTreeMap<String, String>,
    #[serde(default)]
    description: BTreeMap<String, String>,
    trigger: TriggerRule,
    #[serde(default)]
    proxy_fields: Vec<FieldDefinition>,
    #[serde(default)]
    access: AccessConditions,
}

/// Configuration ingestion over the registry and ledger stores.
pub struct ConfigIngest {
    domains: Arc<dyn DomainStore>,
    expressions: Arc<dyn NamedExpressionStore>,
    configs: Arc<dyn ConfigStore>,
    field_ops: Arc<dyn FieldOperationStore>,
}

impl ConfigIngest {
    /// Creates an ingestion service over the given stores.
    #[must_use]
    pub fn new(
        domains: Arc<dyn DomainStore>,
        expressions: Arc<dyn NamedExpressionStore>,
        configs: Arc<dyn ConfigStore>,
        field_ops: Arc<dyn FieldOperationStore>,
    ) -> Self {
        Self {
            domains,
            expressions,
            configs,
            field_ops,
        }
    }

    /// Processes an uploaded configuration document.
    ///
    /// # Errors
    ///
    /// Rejects synchronously, retaining no rows, when the version already
    /// exists for the tenant, when the document is not an object, when it
    /// carries an unsupported top-level key, or when a domain section is
    /// malformed.
    #[tracing::instrument(skip(self, message), fields(%tenant_id, version = message.version))]
    pub async fn upload(
        &self,
        tenant_id: &TenantId,
        message: ConfigurationUploaded,
    ) -> Result<UploadSummary> {
        if self.configs.version_exists(tenant_id, &message.version).await? {
            return Err(Error::config_rejected(format!(
                "configuration version '{}' already exists",
                message.version
            )));
        }

        let Value::Object(sections) = message.data else {
            return Err(Error::config_rejected(
                "configuration document must be a JSON object",
            ));
        };
        if let Some(unsupported) = sections
            .keys()
            .find(|key| !SUPPORTED_SECTIONS.contains(&key.as_str()))
        {
            return Err(Error::config_rejected(format!(
                "unsupported configuration key '{unsupported}'"
            )));
        }

        let (rewritten, extracted) = extract_named_expressions(Value::Object(sections));
        let Value::Object(rewritten_sections) = rewritten else {
            unreachable!("extraction preserves the top-level shape");
        };

        // Parse and diff everything before the first store write.
        let mut parsed_domains = Vec::new();
        let mut operations = Vec::new();
        if let Some(domains_section) = rewritten_sections.get("domains") {
            let Value::Object(entries) = domains_section else {
                return Err(Error::config_rejected(
                    "'domains' section must be an object keyed by domain id",
                ));
            };
            for (raw_id, section) in entries {
                let domain_id = DomainId::new(raw_id.clone())
                    .map_err(|error| Error::config_rejected(error.to_string()))?;
                let section: DomainSection = serde_json::from_value(section.clone())
                    .map_err(|error| {
                        Error::config_rejected(format!("malformed domain '{raw_id}': {error}"))
                    })?;

                let existing = self
                    .domains
                    .get(tenant_id, &domain_id)
                    .await?
                    .map(|domain| domain.proxy_fields)
                    .unwrap_or_default();
                let diff = diff_domain_fields(&existing, &section.proxy_fields);
                for field in &diff.to_create {
                    operations.push(FieldOperation::new(
                        FieldOperationType::Create,
                        field.clone(),
                        domain_id.clone(),
                        tenant_id.clone(),
                    ));
                }
                for field in &diff.to_update {
                    operations.push(FieldOperation::new(
                        FieldOperationType::Update,
                        field.clone(),
                        domain_id.clone(),
                        tenant_id.clone(),
                    ));
                }
                for field in &diff.to_delete {
                    operations.push(FieldOperation::new(
                        FieldOperationType::Delete,
                        field.clone(),
                        domain_id.clone(),
                        tenant_id.clone(),
                    ));
                }

                parsed_domains.push(Domain {
                    domain_id,
                    tenant_id: tenant_id.clone(),
                    name: section.name,
                    description: section.description,
                    trigger: section.trigger,
                    proxy_fields: section.proxy_fields,
                    access: section.access,
                });
            }
        }

        // Commit phase: nothing below here rejects on content.
        self.configs
            .insert(ConfigDocument {
                version: message.version,
                tenant_id: tenant_id.clone(),
                sections: rewritten_sections.into_iter().collect(),
                uploaded_at: chrono::Utc::now(),
            })
            .await?;
        let expressions_extracted = extracted.len();
        self.expressions.replace_all(tenant_id, extracted).await?;
        let domains_written = parsed_domains.len();
        for domain in parsed_domains {
            self.domains.upsert(domain).await?;
        }
        let operations_queued = operations.len();
        self.field_ops.append_all(operations).await?;

        tracing::info!(
            domains_written,
            operations_queued,
            expressions_extracted,
            "configuration accepted"
        );
        Ok(UploadSummary {
            domains_written,
            operations_queued,
            expressions_extracted,
        })
    }

    /// Resolves every named-expression reference in `value` back to its
    /// stored expression tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NamedExpressionNotFound`] if a referenced id is not
    /// in the store.
    pub async fn resolve_named_expressions(
        &self,
        tenant_id: &TenantId,
        value: Value,
    ) -> Result<Value> {
        let mut ids = BTreeSet::new();
        collect_reference_ids(&value, &mut ids);

        let mut fragments = BTreeMap::new();
        for id in ids {
            let Some(expression) = self.expressions.get(tenant_id, &id).await? else {
                return Err(Error::NamedExpressionNotFound { id });
            };
            fragments.insert(id, expression.data);
        }

        Ok(reinsert(value, &fragments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::InMemoryFieldOperationStore;
    use crate::registry::memory::{
        InMemoryConfigStore, InMemoryDomainStore, InMemoryNamedExpressionStore,
    };
    use serde_json::json;

    fn tenant() -> TenantId {
        TenantId::new_unchecked("acme-corp")
    }

    fn ingest_fixture() -> (
        Arc<InMemoryDomainStore>,
        Arc<InMemoryNamedExpressionStore>,
        Arc<InMemoryConfigStore>,
        Arc<InMemoryFieldOperationStore>,
        ConfigIngest,
    ) {
        let domains = Arc::new(InMemoryDomainStore::new());
        let expressions = Arc::new(InMemoryNamedExpressionStore::new());
        let configs = Arc::new(InMemoryConfigStore::new());
        let field_ops = Arc::new(InMemoryFieldOperationStore::new());
        let ingest = ConfigIngest::new(
            Arc::clone(&domains) as Arc<dyn DomainStore>,
            Arc::clone(&expressions) as Arc<dyn NamedExpressionStore>,
            Arc::clone(&configs) as Arc<dyn ConfigStore>,
            Arc::clone(&field_ops) as Arc<dyn FieldOperationStore>,
        );
        (domains, expressions, configs, field_ops, ingest)
    }

    fn config_v1() -> Value {
        json!({
            "domains": {
                "contracts": {
                    "trigger": {"sources": ["contract"]},
                    "proxyFields": [
                        {"id": "f1", "version": 1},
                    ],
                },
            },
        })
    }

    #[test]
    fn diff_partitions_create_update_delete() {
        let existing = vec![FieldDefinition::new("a", 1), FieldDefinition::new("b", 1)];
        let incoming = vec![FieldDefinition::new("a", 2), FieldDefinition::new("c", 1)];

        let diff = diff_domain_fields(&existing, &incoming);
        assert_eq!(diff.to_create, vec![FieldDefinition::new("c", 1)]);
        assert_eq!(diff.to_update, vec![FieldDefinition::new("a", 2)]);
        assert_eq!(diff.to_delete, vec![FieldDefinition::new("b", 1)]);
    }

    #[test]
    fn diff_against_itself_is_empty() {
        let fields = vec![FieldDefinition::new("a", 1), FieldDefinition::new("b", 2)];
        assert!(diff_domain_fields(&fields, &fields).is_empty());
    }

    #[test]
    fn extraction_is_exhaustive_and_leaves_scalars_alone() {
        let inline = json!({
            "expressionKind": "binary",
            "skipPermissionCheck": true,
            "op": "+",
        });
        let document = json!({
            "top": inline,
            "nested": {"inner": [1, "two", inline]},
        });

        let (rewritten, extracted) = extract_named_expressions(document);
        assert_eq!(extracted.len(), 2);
        assert!(named_expression_ref(&rewritten["top"]).is_some());
        assert!(named_expression_ref(&rewritten["nested"]["inner"][2]).is_some());
        assert_eq!(rewritten["nested"]["inner"][0], json!(1));
        assert_eq!(rewritten["nested"]["inner"][1], json!("two"));
    }

    #[tokio::test]
    async fn named_expression_round_trip() -> Result<()> {
        let (_, expressions, _, _, ingest) = ingest_fixture();

        let original = json!({
            "fields": [{
                "expression": {
                    "expressionKind": "binary",
                    "skipPermissionCheck": true,
                    "left": {"field": "a"},
                    "right": {"field": "b"},
                },
            }],
            "plain": 42,
        });

        let (rewritten, extracted) = extract_named_expressions(original.clone());
        expressions.replace_all(&tenant(), extracted).await?;

        let resolved = ingest.resolve_named_expressions(&tenant(), rewritten).await?;
        assert_eq!(resolved, original);

        Ok(())
    }

    #[tokio::test]
    async fn unknown_reference_is_an_error() {
        let (_, _, _, _, ingest) = ingest_fixture();
        let value = reference_for("missing-id");
        let result = ingest.resolve_named_expressions(&tenant(), value).await;
        assert!(matches!(
            result,
            Err(Error::NamedExpressionNotFound { id }) if id == "missing-id"
        ));
    }

    #[tokio::test]
    async fn first_upload_creates_domain_and_create_operations() -> Result<()> {
        let (domains, _, _, field_ops, ingest) = ingest_fixture();

        let summary = ingest
            .upload(
                &tenant(),
                ConfigurationUploaded {
                    version: "v1".into(),
                    data: config_v1(),
                },
            )
            .await?;

        assert_eq!(summary.domains_written, 1);
        assert_eq!(summary.operations_queued, 1);

        let domain = domains
            .get(&tenant(), &DomainId::new_unchecked("contracts"))
            .await?
            .expect("domain should exist");
        assert_eq!(domain.proxy_fields.len(), 1);

        let pending = field_ops.find_unprocessed(10).await?;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].op_type, FieldOperationType::Create);
        assert_eq!(pending[0].field.id, "f1");

        Ok(())
    }

    #[tokio::test]
    async fn version_bump_queues_exactly_one_update() -> Result<()> {
        let (_, _, _, field_ops, ingest) = ingest_fixture();

        ingest
            .upload(
                &tenant(),
                ConfigurationUploaded {
                    version: "v1".into(),
                    data: config_v1(),
                },
            )
            .await?;

        let v2 = json!({
            "domains": {
                "contracts": {
                    "trigger": {"sources": ["contract"]},
                    "proxyFields": [
                        {"id": "f1", "version": 2},
                    ],
                },
            },
        });
        let summary = ingest
            .upload(
                &tenant(),
                ConfigurationUploaded {
                    version: "v2".into(),
                    data: v2,
                },
            )
            .await?;
        assert_eq!(summary.operations_queued, 1);

        let pending = field_ops.find_unprocessed(10).await?;
        let updates: Vec<_> = pending
            .iter()
            .filter(|op| op.op_type == FieldOperationType::Update)
            .collect();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].field.version, 2);

        Ok(())
    }

    #[tokio::test]
    async fn duplicate_version_is_rejected() -> Result<()> {
        let (_, _, _, _, ingest) = ingest_fixture();

        ingest
            .upload(
                &tenant(),
                ConfigurationUploaded {
                    version: "v1".into(),
                    data: config_v1(),
                },
            )
            .await?;

        let result = ingest
            .upload(
                &tenant(),
                ConfigurationUploaded {
                    version: "v1".into(),
                    data: config_v1(),
                },
            )
            .await;
        assert!(matches!(result, Err(Error::ConfigRejected { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn unsupported_key_rejects_without_partial_effects() -> Result<()> {
        let (domains, _, configs, field_ops, ingest) = ingest_fixture();

        let mut data = config_v1();
        data["reports"] = json!({});
        let result = ingest
            .upload(
                &tenant(),
                ConfigurationUploaded {
                    version: "v1".into(),
                    data,
                },
            )
            .await;
        assert!(matches!(result, Err(Error::ConfigRejected { .. })));

        assert!(domains
            .get(&tenant(), &DomainId::new_unchecked("contracts"))
            .await?
            .is_none());
        assert!(!configs.version_exists(&tenant(), "v1").await?);
        assert!(field_ops.find_unprocessed(10).await?.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn malformed_domain_rejects_without_partial_effects() -> Result<()> {
        let (_, _, configs, field_ops, ingest) = ingest_fixture();

        let data = json!({
            "domains": {
                "contracts": {"proxyFields": "not-an-array"},
            },
        });
        let result = ingest
            .upload(
                &tenant(),
                ConfigurationUploaded {
                    version: "v1".into(),
                    data,
                },
            )
            .await;
        assert!(matches!(result, Err(Error::ConfigRejected { .. })));
        assert!(!configs.version_exists(&tenant(), "v1").await?);
        assert!(field_ops.find_unprocessed(10).await?.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn inline_expressions_are_extracted_from_uploads() -> Result<()> {
        let (domains, expressions, _, _, ingest) = ingest_fixture();

        let data = json!({
            "domains": {
                "contracts": {
                    "trigger": {"sources": ["contract"]},
                    "proxyFields": [{
                        "id": "f1",
                        "version": 1,
                        "expression": {
                            "expressionKind": "binary",
                            "skipPermissionCheck": true,
                            "op": "+",
                        },
                    }],
                },
            },
        });
        let summary = ingest
            .upload(
                &tenant(),
                ConfigurationUploaded {
                    version: "v1".into(),
                    data,
                },
            )
            .await?;
        assert_eq!(summary.expressions_extracted, 1);

        // The stored field definition holds a reference, not the inline tree.
        let domain = domains
            .get(&tenant(), &DomainId::new_unchecked("contracts"))
            .await?
            .unwrap();
        let expression = domain.proxy_fields[0].expression.as_ref().unwrap();
        let id = named_expression_ref(expression).expect("expression should be a reference");
        assert!(expressions.get(&tenant(), id).await?.is_some());

        Ok(())
    }
}
