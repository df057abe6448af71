//! Getter engine
//!
//! Compiles schema-bound value-extraction configurations and evaluates
//! them against records. Getters are resolved through a three-level
//! fallback: a type+subtype-specific named getter, else a generic named
//! getter, else the default positional getter for the source field.
//!
//! The evaluate contract distinguishes "exactly undefined" (`Ok(None)`)
//! from a present null; only the former triggers `default_value`
//! substitution.

use crate::condition::{self, CompiledCondition};
use crate::context::{CompileContext, EvalContext};
use crate::operand::Operand;
use crate::providers::ReferenceKind;
use formbridge_core::config::GetterConf;
use formbridge_core::{EngineError, FieldKind, FieldMeta, Record, Result, Value};
use futures::future::BoxFuture;
use std::collections::HashMap;

/// Default scale of the percent getter: fraction to percent.
const DEFAULT_PERCENT_SCALE: f64 = 100.0;

/// A compiled getter, bound to the schema it was compiled against.
#[derive(Debug, Clone)]
pub struct CompiledGetter {
    /// Resolved source field uid, when the getter reads a field
    pub uid: Option<String>,
    /// Source field name, kept for diagnostics
    pub field: Option<String>,
    /// Resolved getter name, kept for diagnostics
    pub name: String,
    /// The dispatched implementation
    pub kind: GetterKind,
    /// Guard condition; a false guard makes the getter yield undefined
    pub guard: Option<CompiledCondition>,
    /// Substituted when the result is exactly undefined
    pub default_value: Option<Value>,
}

/// The dispatched getter implementations.
#[derive(Debug, Clone)]
pub enum GetterKind {
    /// Direct property extraction
    Property {
        /// Resolved source operand
        operand: Operand,
        /// Error on a runtime miss instead of yielding undefined
        demand: bool,
    },
    /// Constant value
    Constant {
        /// The value itself
        value: Value,
    },
    /// Owner lookup through the data collaborator
    Owner,
    /// Entity resolution through the data collaborator
    Reference {
        /// Entity kind
        kind: ReferenceKind,
        /// Operand yielding the id or name to resolve
        operand: Operand,
    },
    /// Linked-record traversal across a chain of reference fields
    Deep {
        /// Field uids: all but the last are followed by id, the last is
        /// read as a value
        chain: Vec<String>,
    },
    /// Percentage scaling of a numeric field
    Percent {
        /// Resolved source operand
        operand: Operand,
        /// Multiplier applied to the raw value
        scale: f64,
    },
    /// Id/value pair extraction from a reference field
    IdValue {
        /// Source field uid
        uid: String,
    },
    /// Table flattening: non-definition rows to an array or keyed object
    Table {
        /// Table field uid
        uid: String,
        /// Output key and getter per declared sub-field
        columns: Vec<(String, CompiledGetter)>,
        /// Column uid keying the output object; absent yields an array
        key_field: Option<String>,
    },
    /// Ordered conditional value selection; first matching case wins
    Conditional {
        /// Cases in declaration order; an absent condition always matches
        cases: Vec<(Value, Option<CompiledCondition>)>,
    },
    /// View-backed selection under a `{source, candidate}` scope
    View {
        /// Process owning the view
        process_id: i64,
        /// View name
        view: String,
        /// Row match condition; absent matches every row
        matcher: Option<CompiledCondition>,
        /// Return all matching rows instead of the first
        all: bool,
    },
}

/// Compile a getter configuration against the schema.
pub fn compile<'a>(
    conf: &'a GetterConf,
    cx: &'a CompileContext<'a>,
) -> BoxFuture<'a, Result<CompiledGetter>> {
    compile_with_meta(conf, None, cx)
}

/// Compile with pre-resolved field metadata (used for table columns,
/// whose metadata comes from the parent table field).
pub(crate) fn compile_with_meta<'a>(
    conf: &'a GetterConf,
    meta: Option<FieldMeta>,
    cx: &'a CompileContext<'a>,
) -> BoxFuture<'a, Result<CompiledGetter>> {
    Box::pin(async move {
        let meta = match (meta, &conf.field) {
            (Some(meta), _) => Some(meta),
            (None, Some(name)) => Some(cx.schema.field_by_name(cx.process_id, name).await?),
            (None, None) => None,
        };
        let name = conf.getter.as_deref();

        // Resolution order: type+subtype-specific named getter, then
        // generic named getter, then the default positional getter.
        let kind = if let Some(kind) = compile_type_specific(conf, meta.as_ref(), cx).await? {
            kind
        } else if let Some(kind) = compile_generic_named(conf, meta.as_ref(), cx).await? {
            kind
        } else if matches!(name, None | Some("value")) {
            compile_default(conf, meta.as_ref())?
        } else {
            return Err(EngineError::Schema(format!(
                "unknown getter: {}",
                name.unwrap_or_default()
            )));
        };

        let guard = match &conf.condition {
            Some(c) => condition::compile(c, cx).await?,
            None => None,
        };

        Ok(CompiledGetter {
            uid: meta.as_ref().map(|m| m.uid.clone()),
            field: meta.as_ref().map(|m| m.name.clone()),
            name: kind_name(&kind).to_string(),
            kind,
            guard,
            default_value: conf.default_value.clone(),
        })
    })
}

fn kind_name(kind: &GetterKind) -> &'static str {
    match kind {
        GetterKind::Property { .. } => "property",
        GetterKind::Constant { .. } => "constant",
        GetterKind::Owner => "owner",
        GetterKind::Reference { .. } => "reference",
        GetterKind::Deep { .. } => "deep",
        GetterKind::Percent { .. } => "percent",
        GetterKind::IdValue { .. } => "idValue",
        GetterKind::Table { .. } => "table",
        GetterKind::Conditional { .. } => "conditional",
        GetterKind::View { .. } => "view",
    }
}

/// Level one: getters selected by the source field's type and subtype.
async fn compile_type_specific(
    conf: &GetterConf,
    meta: Option<&FieldMeta>,
    cx: &CompileContext<'_>,
) -> Result<Option<GetterKind>> {
    let meta = match meta {
        Some(meta) => meta,
        None => return Ok(None),
    };
    let name = conf.getter.as_deref();
    let positional = matches!(name, None | Some("value"));

    match meta.field_type.kind {
        FieldKind::Table if positional => Ok(Some(compile_table(conf, meta, cx).await?)),
        FieldKind::Reference if positional => Ok(Some(GetterKind::IdValue {
            uid: meta.uid.clone(),
        })),
        FieldKind::Reference if name == Some("deep") => {
            Ok(Some(compile_deep(conf, cx).await?))
        }
        FieldKind::Number
            if positional && meta.field_type.subtype.as_deref() == Some("percent") =>
        {
            Ok(Some(GetterKind::Percent {
                operand: source_operand(conf, Some(meta))?,
                scale: conf.scale.unwrap_or(DEFAULT_PERCENT_SCALE),
            }))
        }
        _ => Ok(None),
    }
}

/// Level two: getters selected by name alone.
async fn compile_generic_named(
    conf: &GetterConf,
    meta: Option<&FieldMeta>,
    cx: &CompileContext<'_>,
) -> Result<Option<GetterKind>> {
    let kind = match conf.getter.as_deref() {
        Some("constant") => GetterKind::Constant {
            value: conf
                .value
                .clone()
                .ok_or_else(|| EngineError::Schema("constant getter requires a value".to_string()))?,
        },
        Some("property") => GetterKind::Property {
            operand: compiled_operand(conf, meta, cx).await?,
            demand: conf.demand,
        },
        Some("owner") => GetterKind::Owner,
        Some("reference") => {
            let reference = conf.reference.as_deref().ok_or_else(|| {
                EngineError::Schema("reference getter requires a reference kind".to_string())
            })?;
            let kind = ReferenceKind::parse(reference).ok_or_else(|| {
                EngineError::Schema(format!("unknown reference kind: {reference}"))
            })?;
            GetterKind::Reference {
                kind,
                operand: compiled_operand(conf, meta, cx).await?,
            }
        }
        Some("deep") => compile_deep(conf, cx).await?,
        Some("percent") => GetterKind::Percent {
            operand: compiled_operand(conf, meta, cx).await?,
            scale: conf.scale.unwrap_or(DEFAULT_PERCENT_SCALE),
        },
        Some("idValue") => GetterKind::IdValue {
            uid: meta
                .map(|m| m.uid.clone())
                .ok_or_else(|| EngineError::Schema("idValue getter requires a field".to_string()))?,
        },
        Some("conditional") => {
            let cases_conf = conf.cases.as_ref().ok_or_else(|| {
                EngineError::Schema("conditional getter requires cases".to_string())
            })?;
            let mut cases = Vec::with_capacity(cases_conf.len());
            for case in cases_conf {
                let compiled = match &case.condition {
                    Some(c) => condition::compile(c, cx).await?,
                    None => None,
                };
                cases.push((case.value.clone(), compiled));
            }
            GetterKind::Conditional { cases }
        }
        Some("view") => {
            let view = conf
                .view
                .clone()
                .ok_or_else(|| EngineError::Schema("view getter requires a view".to_string()))?;
            let matcher = match &conf.match_condition {
                Some(c) => condition::compile(c, cx).await?,
                None => None,
            };
            GetterKind::View {
                process_id: cx.process_id,
                view,
                matcher,
                all: conf.all,
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(kind))
}

/// Level three: the default positional getter, plain property extraction
/// from whatever source the configuration names.
fn compile_default(conf: &GetterConf, meta: Option<&FieldMeta>) -> Result<GetterKind> {
    if conf.value.is_some() {
        return Ok(GetterKind::Constant {
            value: conf.value.clone().unwrap_or(Value::Null),
        });
    }
    Ok(GetterKind::Property {
        operand: source_operand(conf, meta)?,
        demand: conf.demand,
    })
}

/// Resolve the source operand of property-style getters: an explicit
/// operand wins, then the resolved field, then a bare property path.
fn source_operand(conf: &GetterConf, meta: Option<&FieldMeta>) -> Result<Operand> {
    if let Some(meta) = meta {
        return Ok(Operand::Field {
            uid: meta.uid.clone(),
            property: conf.property.clone().unwrap_or_else(|| "Value".to_string()),
        });
    }
    if let Some(path) = &conf.property {
        return Ok(Operand::Property {
            path: path.split('.').map(str::to_string).collect(),
            required: false,
        });
    }
    Err(EngineError::Schema(
        "getter requires a source field, property or operand".to_string(),
    ))
}

async fn compiled_operand(
    conf: &GetterConf,
    meta: Option<&FieldMeta>,
    cx: &CompileContext<'_>,
) -> Result<Operand> {
    match &conf.operand {
        Some(operand) => Operand::compile(operand, cx).await,
        None => source_operand(conf, meta),
    }
}

async fn compile_deep(conf: &GetterConf, cx: &CompileContext<'_>) -> Result<GetterKind> {
    let chain_conf = conf
        .chain
        .as_ref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| EngineError::Schema("deep getter requires a chain".to_string()))?;
    // The first link is a field name in the own process; the remaining
    // links are uids in the linked processes, whose schemas are not ours
    // to resolve.
    let first = cx
        .schema
        .field_by_name(cx.process_id, &chain_conf[0])
        .await?;
    let mut chain = vec![first.uid];
    chain.extend(chain_conf[1..].iter().cloned());
    Ok(GetterKind::Deep { chain })
}

async fn compile_table(
    conf: &GetterConf,
    meta: &FieldMeta,
    cx: &CompileContext<'_>,
) -> Result<GetterKind> {
    let sub_confs = conf
        .fields
        .as_ref()
        .ok_or_else(|| EngineError::Schema("table getter requires sub-fields".to_string()))?;

    let mut columns = Vec::with_capacity(sub_confs.len());
    for sub in sub_confs {
        let out_key = sub
            .field
            .clone()
            .or_else(|| sub.property.clone())
            .ok_or_else(|| {
                EngineError::Schema("table sub-getter requires a field".to_string())
            })?;
        let col_meta = match &sub.field {
            Some(name) => Some(meta.column(name).cloned().ok_or_else(|| {
                EngineError::Schema(format!("unknown column {name} on table {}", meta.name))
            })?),
            None => None,
        };
        columns.push((out_key, compile_with_meta(sub, col_meta, cx).await?));
    }

    let key_field = match &conf.key_field {
        Some(name) => Some(
            meta.column(name)
                .map(|c| c.uid.clone())
                .ok_or_else(|| {
                    EngineError::Schema(format!("unknown key column {name} on table {}", meta.name))
                })?,
        ),
        None => None,
    };

    Ok(GetterKind::Table {
        uid: meta.uid.clone(),
        columns,
        key_field,
    })
}

impl CompiledGetter {
    /// Evaluate the getter against a record.
    ///
    /// `Ok(None)` after default substitution means the getter and its
    /// default both yielded nothing.
    pub fn evaluate<'a>(
        &'a self,
        record: &'a Record,
        cx: &'a EvalContext<'a>,
    ) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async move {
            let raw = if condition::evaluate(self.guard.as_ref(), record, cx)? {
                self.evaluate_kind(record, cx).await?
            } else {
                None
            };
            // Substitution fires only on exactly-undefined; null and
            // empty string pass through.
            Ok(match raw {
                None => self.default_value.clone(),
                present => present,
            })
        })
    }

    async fn evaluate_kind(&self, record: &Record, cx: &EvalContext<'_>) -> Result<Option<Value>> {
        match &self.kind {
            GetterKind::Property { operand, demand } => {
                let resolved = operand.resolve(record)?;
                if resolved.is_none() && *demand {
                    return Err(EngineError::NotFound(format!(
                        "demanded source missing: {}",
                        self.field.as_deref().unwrap_or(&self.name)
                    )));
                }
                Ok(resolved)
            }
            GetterKind::Constant { value } => Ok(Some(value.clone())),
            GetterKind::Owner => {
                let owner = match record.props.get("OwnerID") {
                    Some(id) if *id != Value::Null => id.clone(),
                    _ => return Ok(None),
                };
                Ok(Some(
                    cx.data.resolve_reference(ReferenceKind::Owner, &owner).await?,
                ))
            }
            GetterKind::Reference { kind, operand } => {
                let key = match operand.resolve(record)? {
                    Some(key) if key != Value::Null => key,
                    _ => return Ok(None),
                };
                Ok(Some(cx.data.resolve_reference(*kind, &key).await?))
            }
            GetterKind::Deep { chain } => self.evaluate_deep(chain, record, cx).await,
            GetterKind::Percent { operand, scale } => {
                let number = operand.resolve(record)?.and_then(|value| value.as_f64());
                Ok(number.map(|n| Value::Number(n * scale)))
            }
            GetterKind::IdValue { uid } => Ok(record.field(uid).map(|field| {
                Value::Object(HashMap::from([
                    (
                        "ID".to_string(),
                        field.id.clone().unwrap_or(Value::Null),
                    ),
                    ("Value".to_string(), field.value.clone()),
                ]))
            })),
            GetterKind::Table {
                uid,
                columns,
                key_field,
            } => self.evaluate_table(uid, columns, key_field.as_deref(), record, cx).await,
            GetterKind::Conditional { cases } => {
                // First matching case wins; no best-match search.
                for (value, case_condition) in cases {
                    if condition::evaluate(case_condition.as_ref(), record, cx)? {
                        return Ok(Some(value.clone()));
                    }
                }
                Ok(None)
            }
            GetterKind::View {
                process_id,
                view,
                matcher,
                all,
            } => {
                // View rows are a lookup list: fetched once per cache
                // generation, shared by handle afterwards.
                let cache_key = format!("view:{process_id}:{view}");
                let rows = match cx.caches.lookup_get(&cache_key) {
                    Some(rows) => rows,
                    None => {
                        let fetched = cx.schema.view_rows(*process_id, view).await?;
                        cx.caches.lookup_put(
                            &cache_key,
                            fetched.iter().map(Record::to_value).collect(),
                        )
                    }
                };
                let source = record.to_value();
                let mut matches = Vec::new();
                for candidate in rows.iter() {
                    let scope = Record::scoped([
                        ("source", source.clone()),
                        ("candidate", candidate.clone()),
                    ]);
                    if condition::evaluate(matcher.as_ref(), &scope, cx)? {
                        if !all {
                            return Ok(Some(candidate.clone()));
                        }
                        matches.push(candidate.clone());
                    }
                }
                if *all {
                    Ok(Some(Value::Array(matches)))
                } else {
                    Ok(None)
                }
            }
        }
    }

    async fn evaluate_deep(
        &self,
        chain: &[String],
        record: &Record,
        cx: &EvalContext<'_>,
    ) -> Result<Option<Value>> {
        let mut current = record.clone();
        for (index, uid) in chain.iter().enumerate() {
            let field = match current.field(uid) {
                Some(field) => field.clone(),
                None => return Ok(None),
            };
            if index + 1 == chain.len() {
                return Ok(Some(field.value));
            }
            let id = match field.id {
                Some(id) if id != Value::Null => id,
                _ => return Ok(None),
            };
            current = cx.data.fetch_record(&id).await?;
        }
        Ok(None)
    }

    async fn evaluate_table(
        &self,
        uid: &str,
        columns: &[(String, CompiledGetter)],
        key_field: Option<&str>,
        record: &Record,
        cx: &EvalContext<'_>,
    ) -> Result<Option<Value>> {
        let rows = match record.field(uid).and_then(|field| field.rows.clone()) {
            Some(rows) => rows,
            None => return Ok(None),
        };

        let mut flattened = Vec::new();
        for row in rows.iter().filter(|row| !row.definition) {
            let row_record = Record::from_fields(row.fields.clone());
            let mut out = HashMap::new();
            for (out_key, getter) in columns {
                if let Some(value) = getter.evaluate(&row_record, cx).await? {
                    out.insert(out_key.clone(), value);
                }
            }
            let key = key_field.and_then(|key_uid| {
                row.fields
                    .get(key_uid)
                    .map(|field| field.value.to_display_string())
            });
            flattened.push((key, Value::Object(out)));
        }

        match key_field {
            None => Ok(Some(Value::Array(
                flattened.into_iter().map(|(_, row)| row).collect(),
            ))),
            Some(_) => {
                let mut keyed = HashMap::new();
                for (key, row) in flattened {
                    match key {
                        Some(key) if !key.is_empty() => {
                            keyed.insert(key, row);
                        }
                        _ => {
                            tracing::debug!(
                                field = self.field.as_deref().unwrap_or_default(),
                                "table row without a key value skipped"
                            );
                        }
                    }
                }
                Ok(Some(Value::Object(keyed)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::operators::PairwiseOps;
    use crate::context::EngineCaches;
    use crate::test_support::{eval_context, StubData, StubSchema};
    use formbridge_core::{FieldValue, TableRow};

    fn plain(kind: GetterKind) -> CompiledGetter {
        CompiledGetter {
            uid: None,
            field: None,
            name: "test".to_string(),
            kind,
            guard: None,
            default_value: None,
        }
    }

    #[tokio::test]
    async fn test_default_value_fires_only_on_undefined() {
        let schema = StubSchema::default();
        let data = StubData::default();
        let caches = EngineCaches::new();
        let ops = PairwiseOps::new();
        let cx = eval_context(&schema, &data, &ops, &caches);
        let record = Record::new();

        let mut getter = plain(GetterKind::Property {
            operand: Operand::Property {
                path: vec!["missing".to_string()],
                required: false,
            },
            demand: false,
        });
        getter.default_value = Some(Value::String("fallback".to_string()));
        assert_eq!(
            getter.evaluate(&record, &cx).await.unwrap(),
            Some(Value::String("fallback".to_string()))
        );

        // A present null must not trigger the default.
        let mut nullable = plain(GetterKind::Constant { value: Value::Null });
        nullable.default_value = Some(Value::String("fallback".to_string()));
        assert_eq!(
            nullable.evaluate(&record, &cx).await.unwrap(),
            Some(Value::Null)
        );

        // Neither must an empty string.
        let mut empty = plain(GetterKind::Constant {
            value: Value::String(String::new()),
        });
        empty.default_value = Some(Value::String("fallback".to_string()));
        assert_eq!(
            empty.evaluate(&record, &cx).await.unwrap(),
            Some(Value::String(String::new()))
        );
    }

    #[tokio::test]
    async fn test_demand_errors_on_missing_source() {
        let schema = StubSchema::default();
        let data = StubData::default();
        let caches = EngineCaches::new();
        let ops = PairwiseOps::new();
        let cx = eval_context(&schema, &data, &ops, &caches);

        let getter = plain(GetterKind::Property {
            operand: Operand::Field {
                uid: "f-gone".to_string(),
                property: "Value".to_string(),
            },
            demand: true,
        });
        let err = getter.evaluate(&Record::new(), &cx).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_percent_scaling() {
        let schema = StubSchema::default();
        let data = StubData::default();
        let caches = EngineCaches::new();
        let ops = PairwiseOps::new();
        let cx = eval_context(&schema, &data, &ops, &caches);

        let getter = plain(GetterKind::Percent {
            operand: Operand::Literal(Value::Number(0.175)),
            scale: 100.0,
        });
        assert_eq!(
            getter.evaluate(&Record::new(), &cx).await.unwrap(),
            Some(Value::Number(17.5))
        );
    }

    #[tokio::test]
    async fn test_table_flattening_skips_definition_rows() {
        let schema = StubSchema::default();
        let data = StubData::default();
        let caches = EngineCaches::new();
        let ops = PairwiseOps::new();
        let cx = eval_context(&schema, &data, &ops, &caches);

        let mut definition = TableRow::new(
            1,
            HashMap::from([(
                "c-sku".to_string(),
                FieldValue::scalar(Value::String("template".to_string())),
            )]),
        );
        definition.definition = true;
        let data_row = TableRow::new(
            2,
            HashMap::from([(
                "c-sku".to_string(),
                FieldValue::scalar(Value::String("A-100".to_string())),
            )]),
        );

        let mut record = Record::new();
        record.fields.insert(
            "t-items".to_string(),
            FieldValue::table(vec![definition, data_row]),
        );

        let sku_column = plain(GetterKind::Property {
            operand: Operand::Field {
                uid: "c-sku".to_string(),
                property: "Value".to_string(),
            },
            demand: false,
        });
        let getter = plain(GetterKind::Table {
            uid: "t-items".to_string(),
            columns: vec![("Sku".to_string(), sku_column)],
            key_field: None,
        });

        let result = getter.evaluate(&record, &cx).await.unwrap().unwrap();
        let rows = result.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].as_object().unwrap().get("Sku"),
            Some(&Value::String("A-100".to_string()))
        );
    }

    #[tokio::test]
    async fn test_conditional_first_match_wins() {
        let schema = StubSchema::default();
        let data = StubData::default();
        let caches = EngineCaches::new();
        let ops = PairwiseOps::new();
        let cx = eval_context(&schema, &data, &ops, &caches);

        let always = CompiledCondition {
            op: crate::condition::ConditionOp::IsTrue(Operand::Literal(Value::Bool(true))),
            not: false,
            description: None,
        };
        let never = CompiledCondition {
            op: crate::condition::ConditionOp::IsTrue(Operand::Literal(Value::Bool(false))),
            not: false,
            description: None,
        };

        let getter = plain(GetterKind::Conditional {
            cases: vec![
                (Value::String("skip".to_string()), Some(never)),
                (Value::String("first".to_string()), Some(always.clone())),
                (Value::String("late".to_string()), Some(always)),
            ],
        });
        assert_eq!(
            getter.evaluate(&Record::new(), &cx).await.unwrap(),
            Some(Value::String("first".to_string()))
        );
    }

    #[tokio::test]
    async fn test_guard_failure_yields_undefined() {
        let schema = StubSchema::default();
        let data = StubData::default();
        let caches = EngineCaches::new();
        let ops = PairwiseOps::new();
        let cx = eval_context(&schema, &data, &ops, &caches);

        let mut getter = plain(GetterKind::Constant {
            value: Value::Number(1.0),
        });
        getter.guard = Some(CompiledCondition {
            op: crate::condition::ConditionOp::IsTrue(Operand::Literal(Value::Bool(false))),
            not: false,
            description: None,
        });
        assert_eq!(getter.evaluate(&Record::new(), &cx).await.unwrap(), None);
    }
}
