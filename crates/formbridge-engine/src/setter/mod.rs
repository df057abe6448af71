//! Setter engine
//!
//! Symmetric to the getter engine, but producing patch fragments instead
//! of values. Bare scalar results are wrapped as `{Value}` (or `{ID}` for
//! identifier-typed destinations); a recoverable value error becomes a
//! field-level diagnostic instead of aborting the enclosing patch. Table
//! setters reconcile desired logical rows against existing physical rows.

mod reconcile;

pub use reconcile::RowMatchMode;

use crate::condition::{self, CompiledCondition};
use crate::context::{CompileContext, EvalContext};
use crate::getter::{self, CompiledGetter, GetterKind};
use crate::operand::Operand;
use formbridge_core::config::SetterConf;
use formbridge_core::{
    EngineError, FieldKind, FieldMeta, FieldPatch, PatchFragment, Record, Result, RowPatch, Value,
};
use futures::future::BoxFuture;
use reconcile::{assign_rows, DesiredRows};

/// A compiled setter, bound to its destination field.
#[derive(Debug, Clone)]
pub struct CompiledSetter {
    /// Destination field uid
    pub uid: String,
    /// Destination field name, kept for diagnostics
    pub field: String,
    /// Process owning the destination field
    pub process_id: i64,
    /// Destination field kind, drives scalar wrapping and validation
    pub field_kind: FieldKind,
    /// The dispatched implementation
    pub kind: SetterKind,
    /// Guard condition, honored for non-table fields only
    pub guard: Option<CompiledCondition>,
}

/// The dispatched setter implementations.
#[derive(Debug, Clone)]
pub enum SetterKind {
    /// Write the result of a source getter
    Value {
        /// Source getter evaluated against the record
        source: Box<CompiledGetter>,
    },
    /// Write a constant
    Constant {
        /// The value itself
        value: Value,
    },
    /// Reconcile table rows
    Table {
        /// Column setters, recursively applied per row
        columns: Vec<CompiledSetter>,
        /// Row matching mode
        mode: RowMatchMode,
        /// Emit unmatched desired rows as new rows (id 0)
        create_rows: bool,
        /// Re-emit unmatched existing rows as keep-only placeholders
        full_sync: bool,
        /// Source getter producing the desired row set
        source: Box<CompiledGetter>,
    },
}

/// Compile a setter configuration against the schema.
pub fn compile<'a>(
    conf: &'a SetterConf,
    cx: &'a CompileContext<'a>,
) -> BoxFuture<'a, Result<CompiledSetter>> {
    compile_with_meta(conf, None, cx)
}

/// Compile with pre-resolved metadata (table columns).
fn compile_with_meta<'a>(
    conf: &'a SetterConf,
    meta: Option<FieldMeta>,
    cx: &'a CompileContext<'a>,
) -> BoxFuture<'a, Result<CompiledSetter>> {
    Box::pin(async move {
        let meta = match meta {
            Some(meta) => meta,
            None => cx.schema.field_by_name(cx.process_id, &conf.field).await?,
        };

        let guard = match &conf.condition {
            Some(c) => condition::compile(c, cx).await?,
            None => None,
        };

        let kind = if meta.field_type.kind == FieldKind::Table {
            compile_table(conf, &meta, cx).await?
        } else {
            compile_scalar(conf, cx).await?
        };

        Ok(CompiledSetter {
            uid: meta.uid,
            field: meta.name,
            process_id: cx.process_id,
            field_kind: meta.field_type.kind,
            kind,
            guard,
        })
    })
}

async fn compile_scalar(conf: &SetterConf, cx: &CompileContext<'_>) -> Result<SetterKind> {
    match conf.setter.as_deref() {
        None | Some("value") => {
            if let Some(source) = &conf.source {
                return Ok(SetterKind::Value {
                    source: Box::new(getter::compile(source, cx).await?),
                });
            }
            if let Some(value) = &conf.value {
                return Ok(SetterKind::Constant {
                    value: value.clone(),
                });
            }
            // Table columns fall back to reading their slot of the
            // logical row.
            if let Some(property) = conf.property.clone().or_else(|| Some(conf.field.clone())) {
                return Ok(SetterKind::Value {
                    source: Box::new(row_property_getter(property)),
                });
            }
            Err(EngineError::Schema(format!(
                "setter for {} requires a value or source",
                conf.field
            )))
        }
        Some("constant") => Ok(SetterKind::Constant {
            value: conf.value.clone().ok_or_else(|| {
                EngineError::Schema("constant setter requires a value".to_string())
            })?,
        }),
        Some(other) => Err(EngineError::Schema(format!("unknown setter: {other}"))),
    }
}

async fn compile_table(
    conf: &SetterConf,
    meta: &FieldMeta,
    cx: &CompileContext<'_>,
) -> Result<SetterKind> {
    let sub_confs = conf.fields.as_ref().ok_or_else(|| {
        EngineError::Schema(format!("table setter for {} requires sub-fields", meta.name))
    })?;

    let mut columns = Vec::with_capacity(sub_confs.len());
    for sub in sub_confs {
        let col_meta = meta.column(&sub.field).cloned().ok_or_else(|| {
            EngineError::Schema(format!("unknown column {} on table {}", sub.field, meta.name))
        })?;
        columns.push(compile_with_meta(sub, Some(col_meta), cx).await?);
    }

    let mode = if conf.key_is_row_id {
        RowMatchMode::ByRowId
    } else if let Some(name) = &conf.key_field {
        let uid = meta.column(name).map(|c| c.uid.clone()).ok_or_else(|| {
            EngineError::Schema(format!("unknown key column {name} on table {}", meta.name))
        })?;
        RowMatchMode::ByKeyField(uid)
    } else {
        RowMatchMode::Positional
    };

    let source = if let Some(source) = &conf.source {
        getter::compile(source, cx).await?
    } else if let Some(value) = &conf.value {
        constant_getter(value.clone())
    } else {
        return Err(EngineError::Schema(format!(
            "table setter for {} requires a desired row source",
            meta.name
        )));
    };

    Ok(SetterKind::Table {
        columns,
        mode,
        create_rows: conf.create_rows,
        full_sync: conf.full_sync,
        source: Box::new(source),
    })
}

/// Getter reading one slot of the logical row scope (`row.<property>`).
fn row_property_getter(property: String) -> CompiledGetter {
    CompiledGetter {
        uid: None,
        field: None,
        name: "property".to_string(),
        kind: GetterKind::Property {
            operand: Operand::Property {
                path: vec!["row".to_string(), property],
                required: false,
            },
            demand: false,
        },
        guard: None,
        default_value: None,
    }
}

fn constant_getter(value: Value) -> CompiledGetter {
    CompiledGetter {
        uid: None,
        field: None,
        name: "constant".to_string(),
        kind: GetterKind::Constant { value },
        guard: None,
        default_value: None,
    }
}

impl CompiledSetter {
    /// Evaluate the setter against a record.
    ///
    /// `existing` supplies the physical rows for table reconciliation;
    /// when absent, the record's own rows are used. A value error is
    /// captured as a field-level diagnostic rather than propagated.
    pub fn evaluate<'a>(
        &'a self,
        record: &'a Record,
        existing: Option<&'a Record>,
        cx: &'a EvalContext<'a>,
    ) -> BoxFuture<'a, Result<Option<FieldPatch>>> {
        Box::pin(async move {
            match self.evaluate_fragment(record, existing, cx).await {
                Ok(fragment) => {
                    Ok(fragment.map(|f| FieldPatch::new(&self.uid, &self.field, f)))
                }
                Err(err) if err.is_value_error() => {
                    tracing::debug!(field = %self.field, error = %err,
                        "value error captured as field diagnostic");
                    Ok(Some(FieldPatch::new(
                        &self.uid,
                        &self.field,
                        PatchFragment::value_error(err.to_string()),
                    )))
                }
                Err(err) => Err(err),
            }
        })
    }

    async fn evaluate_fragment(
        &self,
        record: &Record,
        existing: Option<&Record>,
        cx: &EvalContext<'_>,
    ) -> Result<Option<PatchFragment>> {
        match &self.kind {
            SetterKind::Table {
                columns,
                mode,
                create_rows,
                full_sync,
                source,
            } => {
                self.evaluate_table(
                    columns,
                    mode,
                    *create_rows,
                    *full_sync,
                    source,
                    record,
                    existing,
                    cx,
                )
                .await
            }
            SetterKind::Constant { value } => {
                if !condition::evaluate(self.guard.as_ref(), record, cx)? {
                    return Ok(None);
                }
                Ok(Some(self.wrap_scalar(value.clone())?))
            }
            SetterKind::Value { source } => {
                if !condition::evaluate(self.guard.as_ref(), record, cx)? {
                    return Ok(None);
                }
                match source.evaluate(record, cx).await? {
                    None => Ok(None),
                    Some(value) => Ok(Some(self.wrap_scalar(value)?)),
                }
            }
        }
    }

    /// Wrap a getter result into a patch fragment. An object already
    /// shaped as `{Value, ID}` (id/value getters) passes through; bare
    /// scalars target `Value`, or `ID` for identifier-typed fields.
    fn wrap_scalar(&self, value: Value) -> Result<PatchFragment> {
        if let Value::Object(map) = &value {
            if map.contains_key("Value") || map.contains_key("ID") {
                return Ok(PatchFragment {
                    value: map.get("Value").cloned(),
                    id: map.get("ID").cloned(),
                    rows: None,
                    errors: None,
                });
            }
        }
        self.validate(&value)?;
        Ok(if self.field_kind.is_identifier() {
            PatchFragment::id(value)
        } else {
            PatchFragment::value(value)
        })
    }

    fn validate(&self, value: &Value) -> Result<()> {
        if *value == Value::Null {
            return Ok(());
        }
        match self.field_kind {
            FieldKind::Number | FieldKind::Identifier | FieldKind::Reference => {
                if value.as_f64().is_none() {
                    return Err(EngineError::ValueFormat(format!(
                        "'{}' is not a number for field {}",
                        value.to_display_string(),
                        self.field
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn evaluate_table(
        &self,
        columns: &[CompiledSetter],
        mode: &RowMatchMode,
        create_rows: bool,
        full_sync: bool,
        source: &CompiledGetter,
        record: &Record,
        existing: Option<&Record>,
        cx: &EvalContext<'_>,
    ) -> Result<Option<PatchFragment>> {
        let desired_value = match source.evaluate(record, cx).await? {
            Some(value) => value,
            None => return Ok(None),
        };
        let desired = DesiredRows::from_value(desired_value)?;
        let existing_rows = existing
            .unwrap_or(record)
            .field(&self.uid)
            .and_then(|field| field.rows.clone())
            .unwrap_or_default();

        let slots = assign_rows(desired, &existing_rows, mode, create_rows, full_sync)?;

        let parent = record.to_value();
        let mut rows = Vec::with_capacity(slots.len());
        let mut field_errors = Vec::new();
        for slot in slots {
            let logical = match slot.logical {
                None => {
                    rows.push(RowPatch::keep(slot.row_id));
                    continue;
                }
                Some(logical) => logical,
            };

            let scope = Record::scoped([("parent", parent.clone()), ("row", logical)]);
            let mut cells = Vec::new();
            for column in columns {
                if let Some(cell) = column.evaluate(&scope, None, cx).await? {
                    if let Some(errors) = &cell.fragment.errors {
                        field_errors.extend(errors.iter().cloned());
                    }
                    cells.push(cell);
                }
            }

            if let Some((key_uid, key_value)) = slot.stamp_key {
                // Stamp the business key into created rows so the next
                // reconciliation pass can match them.
                if !cells.iter().any(|cell| cell.uid == key_uid) {
                    let name = columns
                        .iter()
                        .find(|column| column.uid == key_uid)
                        .map(|column| column.field.clone())
                        .unwrap_or_else(|| key_uid.clone());
                    cells.push(FieldPatch::new(key_uid, name, PatchFragment::value(key_value)));
                }
            }
            rows.push(RowPatch::new(slot.row_id, cells));
        }

        let mut fragment = PatchFragment {
            rows: Some(rows),
            ..Default::default()
        };
        if !field_errors.is_empty() {
            fragment.errors = Some(field_errors);
        }
        Ok(Some(fragment))
    }
}
