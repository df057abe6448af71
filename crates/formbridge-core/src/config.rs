//! Raw configuration structures
//!
//! Integration definitions arrive as plain nested mapping/array data; this
//! module gives that wire format a typed shape. Where the platform
//! historically sniffed object shapes (operands, conditions, desired row
//! sets) the ambiguity is resolved once, here, through untagged unions.
//! Compiled configurations never re-inspect these structures.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An operand of a condition or getter: literal, field reference, or
/// property path. Discriminated once during deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperandConf {
    /// `{field, property?}` — a record field sub-property
    Field(FieldOperandConf),
    /// `{property, required?}` — a nested property path
    Property(PropertyOperandConf),
    /// `{value}` — a literal
    Literal(LiteralOperandConf),
}

/// Field-reference operand configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldOperandConf {
    /// Field name, resolved to a uid at compile time
    pub field: String,
    /// Sub-property to read; defaults to "Value"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
}

/// Property-path operand configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyOperandConf {
    /// Dot-separated path into the record's properties
    pub property: String,
    /// Demand presence (absence becomes an error) instead of tolerating it
    #[serde(default)]
    pub required: bool,
}

/// Literal operand configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiteralOperandConf {
    /// The literal value itself
    pub value: Value,
}

impl OperandConf {
    /// Shorthand for a literal operand.
    pub fn literal(value: Value) -> Self {
        OperandConf::Literal(LiteralOperandConf { value })
    }

    /// Shorthand for a field operand reading the default sub-property.
    pub fn field(name: impl Into<String>) -> Self {
        OperandConf::Field(FieldOperandConf {
            field: name.into(),
            property: None,
        })
    }

    /// Shorthand for a tolerant property-path operand.
    pub fn property(path: impl Into<String>) -> Self {
        OperandConf::Property(PropertyOperandConf {
            property: path.into(),
            required: false,
        })
    }
}

/// A predicate configuration: a bare operator name, an array (implicit
/// AND of sub-conditions), or a full node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionConf {
    /// Operator name only
    Operator(String),
    /// Implicit AND over sub-conditions
    All(Vec<ConditionConf>),
    /// Full predicate node
    Node(Box<ConditionNodeConf>),
}

/// A full predicate node. Only the keys relevant to the named operator
/// are honored; unknown operators fail compilation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionNodeConf {
    /// Operator name from the closed registry
    pub operator: String,

    /// `false` compiles the condition away ("no restriction")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Negate the result
    #[serde(default)]
    pub not: bool,

    /// Diagnostic label, logged when the condition evaluates false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Single operand (most leaf operators)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operand: Option<OperandConf>,

    /// Nested sub-conditions (`and`/`or`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operands: Option<Vec<ConditionConf>>,

    /// Left operand of pairwise operators
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operand1: Option<OperandConf>,

    /// Right operand of pairwise operators
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operand2: Option<OperandConf>,

    /// Allow-set for `oneOfValues`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,

    /// Allow-set for `formStatus`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statuses: Option<Vec<Value>>,

    /// `formStatus` guard: false when the previous status equals this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unless_previous: Option<Value>,

    /// Date format for `expired`/`equalDates`/`dateAfter` (chrono spec)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Increment unit for `expired`: days/hours/minutes/months/years
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Increment amount for `expired`, itself an operand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub increment: Option<OperandConf>,

    /// Trim strings before the `empty` test
    #[serde(default)]
    pub trim: bool,

    /// Treat empty arrays/objects as empty in the `empty` test
    #[serde(default)]
    pub empty_collections: bool,

    /// `dateAfter` also accepts equality
    #[serde(default)]
    pub inclusive: bool,

    /// Pattern for `regexp`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Nested predicate for the `exists`/`all` quantifiers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionConf>,
}

impl ConditionNodeConf {
    /// Node with only an operator name set.
    pub fn operator(name: impl Into<String>) -> Self {
        Self {
            operator: name.into(),
            ..Default::default()
        }
    }
}

/// A getter configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetterConf {
    /// Getter name; absent selects the default positional getter for the
    /// source field's type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub getter: Option<String>,

    /// Source field name, resolved via the schema at compile time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    /// Sub-property of the source field, or a property path when no
    /// field is named
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,

    /// Constant value (the `constant` getter)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Explicit operand, overriding field/property shorthands
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operand: Option<OperandConf>,

    /// Guard condition; a false guard makes the getter yield undefined
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionConf>,

    /// Demand presence: a runtime miss becomes an error instead of
    /// resolving to the default value
    #[serde(default)]
    pub demand: bool,

    /// Substituted when the getter yields exactly undefined
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,

    /// Sub-field getters for table extraction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<GetterConf>>,

    /// Column name keying the flattened table object; absent flattens to
    /// an array
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_field: Option<String>,

    /// Reference-field chain for the deep getter: the first entry is a
    /// field name in the own process, the rest are uids in the linked
    /// processes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<Vec<String>>,

    /// Scale factor for the percent getter (default 100)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,

    /// Entity kind for the reference getter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    /// View name for view-backed selection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,

    /// Match condition for view-backed selection, evaluated under a
    /// `{source, candidate}` scope
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_condition: Option<ConditionConf>,

    /// View selection returns all matching rows instead of the first
    #[serde(default)]
    pub all: bool,

    /// Ordered cases for conditional value selection; first match wins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cases: Option<Vec<CaseConf>>,
}

/// One case of a conditional getter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseConf {
    /// Value produced when the case matches
    pub value: Value,

    /// Case condition; an absent condition always matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionConf>,
}

/// A setter configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetterConf {
    /// Setter name; absent selects the default setter for the
    /// destination field's type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setter: Option<String>,

    /// Destination field name, resolved via the schema at compile time
    pub field: String,

    /// Constant value to write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Source getter computing the value to write; for table setters it
    /// produces the desired row set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Box<GetterConf>>,

    /// Property of the logical row feeding a table column setter;
    /// defaults to the destination column name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,

    /// Guard condition, honored for non-table fields only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionConf>,

    /// Column setters for table fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<SetterConf>>,

    /// Column name whose value keys row matching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_field: Option<String>,

    /// Interpret desired keys directly as physical row ids
    #[serde(default)]
    pub key_is_row_id: bool,

    /// Emit unmatched desired keys as new rows (id 0)
    #[serde(default)]
    pub create_rows: bool,

    /// Re-emit unmatched existing rows as keep-only placeholders
    #[serde(default)]
    pub full_sync: bool,
}

/// One stage of a conversion pipeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageConf {
    /// Stage name for logging and diagnostics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Converter key; defaults to the plain "getter" stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converter: Option<String>,

    /// `false` drops the stage at compile time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Abort the pipeline on stage failure (default true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throw_error: Option<bool>,

    /// Capture a stage failure under this property on the in-flight
    /// batch items and continue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_property: Option<String>,

    /// Opt-in per-item fan-out; only safe when per-item collaborator
    /// calls are independent
    #[serde(default)]
    pub parallel: bool,

    /// Output mapping of the getter stage: output property -> getter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub getters: Option<BTreeMap<String, GetterConf>>,

    /// Predicate of the filter stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionConf>,

    /// Setters of the setter stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setters: Option<Vec<SetterConf>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand_conf_discrimination() {
        let field: OperandConf = serde_json::from_str(r#"{"field": "Amount"}"#).unwrap();
        assert!(matches!(field, OperandConf::Field(_)));

        let path: OperandConf = serde_json::from_str(r#"{"property": "user.email"}"#).unwrap();
        assert!(matches!(path, OperandConf::Property(_)));

        let literal: OperandConf = serde_json::from_str(r#"{"value": 42}"#).unwrap();
        assert!(matches!(literal, OperandConf::Literal(_)));
    }

    #[test]
    fn test_field_operand_with_property() {
        let conf: OperandConf =
            serde_json::from_str(r#"{"field": "Customer", "property": "ID"}"#).unwrap();
        match conf {
            OperandConf::Field(f) => {
                assert_eq!(f.field, "Customer");
                assert_eq!(f.property.as_deref(), Some("ID"));
            }
            other => panic!("expected field operand, got {other:?}"),
        }
    }

    #[test]
    fn test_condition_conf_shapes() {
        let name: ConditionConf = serde_json::from_str(r#""true""#).unwrap();
        assert!(matches!(name, ConditionConf::Operator(_)));

        let list: ConditionConf =
            serde_json::from_str(r#"[{"operator": "empty", "operand": {"value": ""}}]"#).unwrap();
        assert!(matches!(list, ConditionConf::All(_)));

        let node: ConditionConf = serde_json::from_str(
            r#"{"operator": "oneOfValues", "operand": {"field": "Status"}, "values": [1, 2]}"#,
        )
        .unwrap();
        match node {
            ConditionConf::Node(n) => assert_eq!(n.operator, "oneOfValues"),
            other => panic!("expected node, got {other:?}"),
        }
    }

    #[test]
    fn test_stage_conf_defaults() {
        let stage: StageConf = serde_json::from_str(r#"{"converter": "filter"}"#).unwrap();
        assert_eq!(stage.throw_error, None);
        assert!(!stage.parallel);
        assert_eq!(stage.enabled, None);
    }

    #[test]
    fn test_getter_conf_match_key() {
        let conf: GetterConf = serde_json::from_str(
            r#"{"getter": "view", "view": "Suppliers", "match": {"operator": "equal",
                "operand1": {"property": "source.sku"}, "operand2": {"property": "candidate.sku"}}}"#,
        )
        .unwrap();
        assert!(conf.match_condition.is_some());
    }
}
