//! Expression trees and the structural markers ingestion relies on.
//!
//! The engine treats expressions as opaque JSON documents; the full grammar
//! lives with the external evaluation worker. What the engine does define is
//! the *structure* that configuration ingestion recognizes:
//!
//! - an **inline expression** is an object carrying both the expression-kind
//!   marker and the permission-bypass marker;
//! - a **named-expression reference** is an object with a string
//!   `namedExpressionId` field, pointing into the named-expression store.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key identifying the kind of an expression object.
pub const EXPRESSION_KIND_KEY: &str = "expressionKind";

/// Key marking an expression as bypassing per-field permission checks.
///
/// Inline expressions extracted from configuration always carry this marker;
/// its presence alongside [`EXPRESSION_KIND_KEY`] is how extraction detects
/// them structurally, independent of any name.
pub const SKIP_PERMISSION_KEY: &str = "skipPermissionCheck";

/// Key holding a reference to a stored named expression.
pub const NAMED_EXPRESSION_ID_KEY: &str = "namedExpressionId";

/// Expression kind value used for named-expression references.
pub const NAMED_EXPRESSION_KIND: &str = "namedExpression";

/// A deduplicated, by-reference expression fragment extracted from uploaded
/// configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedExpression {
    /// Unique identifier the configuration references.
    pub id: String,
    /// The original expression tree.
    pub data: Value,
}

/// Returns true if `value` is structurally an inline expression.
#[must_use]
pub fn is_inline_expression(value: &Value) -> bool {
    value.as_object().is_some_and(|obj| {
        obj.contains_key(EXPRESSION_KIND_KEY) && obj.contains_key(SKIP_PERMISSION_KEY)
    })
}

/// Returns the referenced named-expression ID, if `value` is a reference.
#[must_use]
pub fn named_expression_ref(value: &Value) -> Option<&str> {
    value
        .as_object()
        .and_then(|obj| obj.get(NAMED_EXPRESSION_ID_KEY))
        .and_then(Value::as_str)
}

/// Builds the reference object that replaces an extracted inline expression.
#[must_use]
pub fn reference_for(id: &str) -> Value {
    serde_json::json!({
        EXPRESSION_KIND_KEY: NAMED_EXPRESSION_KIND,
        NAMED_EXPRESSION_ID_KEY: id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_inline_expressions() {
        let inline = json!({
            "expressionKind": "binary",
            "skipPermissionCheck": true,
            "op": "+",
        });
        assert!(is_inline_expression(&inline));
    }

    #[test]
    fn requires_both_markers() {
        assert!(!is_inline_expression(&json!({"expressionKind": "binary"})));
        assert!(!is_inline_expression(&json!({"skipPermissionCheck": true})));
        assert!(!is_inline_expression(&json!("expressionKind")));
    }

    #[test]
    fn detects_references() {
        let reference = reference_for("ne-01");
        assert_eq!(named_expression_ref(&reference), Some("ne-01"));
        assert_eq!(named_expression_ref(&json!({"other": 1})), None);
    }

    #[test]
    fn non_string_reference_id_is_not_a_reference() {
        assert_eq!(named_expression_ref(&json!({"namedExpressionId": 7})), None);
    }
}
