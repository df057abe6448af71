//! Patch fragments produced by the setter engine
//!
//! A setter evaluation yields a `FieldPatch` describing how one field of
//! a record should change. Table setters nest `RowPatch` entries under the
//! field-level fragment. The serialized key casing (`Value`, `ID`, `Rows`,
//! `Errors`, `Uid`, `Field`) is the platform's write contract.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// The value portion of a patch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PatchFragment {
    /// New display value
    #[serde(rename = "Value", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// New identifier, used for reference/identifier fields
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    /// Reconciled table rows, used for table fields
    #[serde(rename = "Rows", default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<RowPatch>>,

    /// Field-level diagnostics from recoverable value errors
    #[serde(rename = "Errors", default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl PatchFragment {
    /// Fragment carrying only a display value.
    pub fn value(value: Value) -> Self {
        Self {
            value: Some(value),
            ..Default::default()
        }
    }

    /// Fragment carrying only an identifier.
    pub fn id(id: Value) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    /// Diagnostic fragment for a captured value error: the write is
    /// neutralized (`ID: 0`, `Value: null`) and the message kept.
    pub fn value_error(message: impl Into<String>) -> Self {
        Self {
            value: Some(Value::Null),
            id: Some(Value::Number(0.0)),
            rows: None,
            errors: Some(vec![message.into()]),
        }
    }

    /// Append diagnostics to this fragment.
    pub fn push_errors(&mut self, messages: impl IntoIterator<Item = String>) {
        let errors = self.errors.get_or_insert_with(Vec::new);
        errors.extend(messages);
        if errors.is_empty() {
            self.errors = None;
        }
    }
}

/// A patch addressed to one field of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPatch {
    /// Destination field uid
    #[serde(rename = "Uid")]
    pub uid: String,

    /// Destination field name, kept for diagnostics and logging
    #[serde(rename = "Field")]
    pub field: String,

    /// The change itself
    #[serde(flatten)]
    pub fragment: PatchFragment,
}

impl FieldPatch {
    /// Create a patch for the given destination.
    pub fn new(uid: impl Into<String>, field: impl Into<String>, fragment: PatchFragment) -> Self {
        Self {
            uid: uid.into(),
            field: field.into(),
            fragment,
        }
    }
}

/// One reconciled table row.
///
/// `row_id` 0 requests creation of a new physical row; a patch with an
/// existing row id and no fields keeps the row and modifies nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowPatch {
    /// Target physical row id, 0 for a new row
    #[serde(rename = "RowID")]
    pub row_id: i64,

    /// Cell patches for this row
    #[serde(rename = "Fields", default)]
    pub fields: Vec<FieldPatch>,
}

impl RowPatch {
    /// Row patch updating the given cells.
    pub fn new(row_id: i64, fields: Vec<FieldPatch>) -> Self {
        Self { row_id, fields }
    }

    /// Placeholder keeping an existing row untouched.
    pub fn keep(row_id: i64) -> Self {
        Self {
            row_id,
            fields: Vec::new(),
        }
    }
}
