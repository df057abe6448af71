//! In-memory collaborators for unit tests.

use crate::condition::operators::PairwiseOps;
use crate::context::{EngineCaches, EvalContext};
use crate::providers::{DataProvider, ReferenceKind, SchemaProvider};
use async_trait::async_trait;
use formbridge_core::{EngineError, FieldMeta, Record, Result, Value};
use std::collections::HashMap;

/// Schema collaborator backed by a plain field list.
#[derive(Default)]
pub struct StubSchema {
    pub fields: Vec<FieldMeta>,
    pub views: HashMap<String, Vec<Record>>,
}

impl StubSchema {
    pub fn with_fields(fields: Vec<FieldMeta>) -> Self {
        Self {
            fields,
            views: HashMap::new(),
        }
    }
}

#[async_trait]
impl SchemaProvider for StubSchema {
    async fn field_by_name(&self, _process_id: i64, name: &str) -> Result<FieldMeta> {
        self.fields
            .iter()
            .find(|meta| meta.name == name)
            .cloned()
            .ok_or_else(|| EngineError::Schema(format!("unknown field: {name}")))
    }

    async fn view_rows(&self, _process_id: i64, view: &str) -> Result<Vec<Record>> {
        self.views
            .get(view)
            .cloned()
            .ok_or_else(|| EngineError::Schema(format!("unknown view: {view}")))
    }
}

/// Data collaborator backed by in-memory maps.
#[derive(Default)]
pub struct StubData {
    pub references: HashMap<(ReferenceKind, String), Value>,
    pub records: HashMap<String, Record>,
}

#[async_trait]
impl DataProvider for StubData {
    async fn resolve_reference(&self, kind: ReferenceKind, key: &Value) -> Result<Value> {
        self.references
            .get(&(kind, key.to_display_string()))
            .cloned()
            .ok_or_else(|| {
                EngineError::Collaborator(format!("unresolvable {kind:?}: {key:?}"))
            })
    }

    async fn fetch_record(&self, record_id: &Value) -> Result<Record> {
        self.records
            .get(&record_id.to_display_string())
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("record {record_id:?}")))
    }
}

/// Build an evaluation context over stub collaborators.
pub fn eval_context<'a>(
    schema: &'a StubSchema,
    data: &'a StubData,
    operators: &'a PairwiseOps,
    caches: &'a EngineCaches,
) -> EvalContext<'a> {
    EvalContext::new(schema, data, operators, caches)
}
