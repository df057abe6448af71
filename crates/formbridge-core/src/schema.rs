//! Schema metadata supplied by the schema collaborator
//!
//! Field metadata is consumed only during the compile phase; compiled
//! configurations carry the resolved identifiers and never touch the
//! schema again.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Metadata of a single process field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMeta {
    /// Stable field uid
    pub uid: String,

    /// Human-readable field name, unique within a process
    pub name: String,

    /// Field type and subtype
    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Declared options (choice lists, status sets)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<Value>>,

    /// Column metadata, present on table fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<FieldMeta>>,
}

impl FieldMeta {
    /// Create scalar field metadata.
    pub fn new(uid: impl Into<String>, name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            uid: uid.into(),
            name: name.into(),
            field_type: FieldType { kind, subtype: None },
            options: None,
            columns: None,
        }
    }

    /// Find a column of a table field by name.
    pub fn column(&self, name: &str) -> Option<&FieldMeta> {
        self.columns
            .as_ref()
            .and_then(|cols| cols.iter().find(|c| c.name == name))
    }
}

/// Field type with an optional platform subtype (e.g. a number field with
/// subtype "percent").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldType {
    /// Base kind
    pub kind: FieldKind,

    /// Platform subtype refining the base kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
}

impl FieldType {
    /// Plain type without a subtype.
    pub fn plain(kind: FieldKind) -> Self {
        Self { kind, subtype: None }
    }
}

/// Closed set of field kinds known to the engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Free text
    Text,
    /// Numeric value
    Number,
    /// Date or datetime
    Date,
    /// Boolean flag
    Boolean,
    /// Table of sub-rows
    Table,
    /// Reference to another record or entity
    Reference,
    /// Choice list
    List,
    /// Identifier-typed field (bare scalar patches target ID, not Value)
    Identifier,
    /// Workflow status
    Status,
}

impl FieldKind {
    /// Whether a bare scalar setter result should be wrapped as `{ID}`
    /// rather than `{Value}`.
    pub fn is_identifier(self) -> bool {
        matches!(self, FieldKind::Identifier | FieldKind::Reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_meta_column_lookup() {
        let mut table = FieldMeta::new("t-1", "Items", FieldKind::Table);
        table.columns = Some(vec![
            FieldMeta::new("c-1", "Sku", FieldKind::Text),
            FieldMeta::new("c-2", "Qty", FieldKind::Number),
        ]);
        assert_eq!(table.column("Qty").unwrap().uid, "c-2");
        assert!(table.column("Missing").is_none());
    }

    #[test]
    fn test_identifier_wrapping_kinds() {
        assert!(FieldKind::Reference.is_identifier());
        assert!(FieldKind::Identifier.is_identifier());
        assert!(!FieldKind::Text.is_identifier());
    }

    #[test]
    fn test_field_meta_serde() {
        let meta = FieldMeta::new("f-9", "Amount", FieldKind::Number);
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"number\""));
        let back: FieldMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
