//! Record data model
//!
//! A `Record` is the business data object the engines operate over: a set
//! of uid-keyed typed fields plus free-form top-level properties (status,
//! owner, anything attached by earlier pipeline stages). Table fields
//! carry physical rows with stable row identifiers.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The value slot of a single field on a record.
///
/// Mirrors the platform's field payload: a display value, an optional
/// identifier (for reference/identifier fields) and optional table rows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldValue {
    /// Display value of the field
    #[serde(rename = "Value", default)]
    pub value: Value,

    /// Identifier, present on reference and identifier fields
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    /// Physical rows, present on table fields
    #[serde(rename = "Rows", default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<TableRow>>,
}

impl FieldValue {
    /// A plain scalar field value.
    pub fn scalar(value: Value) -> Self {
        Self {
            value,
            id: None,
            rows: None,
        }
    }

    /// A reference-style field value carrying both id and display value.
    pub fn with_id(id: Value, value: Value) -> Self {
        Self {
            value,
            id: Some(id),
            rows: None,
        }
    }

    /// A table field value.
    pub fn table(rows: Vec<TableRow>) -> Self {
        Self {
            value: Value::Null,
            id: None,
            rows: Some(rows),
        }
    }

    /// Named sub-property lookup used by field operands.
    ///
    /// Returns `None` (undefined) for an absent sub-property, which is
    /// distinct from a present `Value::Null`.
    pub fn property(&self, name: &str) -> Option<Value> {
        match name {
            "Value" => Some(self.value.clone()),
            "ID" => self.id.clone(),
            "Rows" => self
                .rows
                .as_ref()
                .map(|rows| Value::Array(rows.iter().map(TableRow::to_value).collect())),
            _ => None,
        }
    }
}

/// One physical row of a table field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    /// Stable physical row identifier; 0 means "to be created"
    #[serde(rename = "RowID")]
    pub row_id: i64,

    /// Definition rows describe the table template and are skipped by
    /// table getters
    #[serde(rename = "Definition", default)]
    pub definition: bool,

    /// Row cells, keyed by column field uid
    #[serde(rename = "Fields", default)]
    pub fields: HashMap<String, FieldValue>,
}

impl TableRow {
    /// Create a data row.
    pub fn new(row_id: i64, fields: HashMap<String, FieldValue>) -> Self {
        Self {
            row_id,
            definition: false,
            fields,
        }
    }

    /// Flatten the row into a plain value object (uid -> display value,
    /// plus the row id under `RowID`).
    pub fn to_value(&self) -> Value {
        let mut map: HashMap<String, Value> = self
            .fields
            .iter()
            .map(|(uid, field)| (uid.clone(), field.value.clone()))
            .collect();
        map.insert("RowID".to_string(), Value::Number(self.row_id as f64));
        Value::Object(map)
    }
}

/// The business record (a "form" in platform terms).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    /// Typed fields, keyed by field uid
    #[serde(rename = "Fields", default)]
    pub fields: HashMap<String, FieldValue>,

    /// Top-level properties: status, owner, pipeline-attached data
    #[serde(rename = "Props", default)]
    pub props: HashMap<String, Value>,
}

impl Record {
    /// Empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record built from uid-keyed fields only.
    pub fn from_fields(fields: HashMap<String, FieldValue>) -> Self {
        Self {
            fields,
            props: HashMap::new(),
        }
    }

    /// Synthetic record used as the evaluation scope of quantifiers and
    /// view matching, e.g. `{parent, child}` or `{source, candidate}`.
    pub fn scoped<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, Value)>,
    {
        Self {
            fields: HashMap::new(),
            props: pairs
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }

    /// Look up a field slot by uid.
    pub fn field(&self, uid: &str) -> Option<&FieldValue> {
        self.fields.get(uid)
    }

    /// Nested property-path lookup over `props`, tolerant of absence.
    ///
    /// Returns `None` when any segment of the path is missing or a
    /// non-object value is traversed into.
    pub fn prop_path(&self, path: &[String]) -> Option<Value> {
        let first = path.first()?;
        let mut current = self.props.get(first)?.clone();
        for segment in &path[1..] {
            match current {
                Value::Object(ref map) => {
                    current = map.get(segment)?.clone();
                }
                _ => return None,
            }
        }
        Some(current)
    }

    /// Flatten the record into a plain value object: all props, plus
    /// fields as uid -> display value.
    pub fn to_value(&self) -> Value {
        let mut map = self.props.clone();
        for (uid, field) in &self.fields {
            map.insert(uid.clone(), field.value.clone());
        }
        Value::Object(map)
    }
}
