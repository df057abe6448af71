//! Shared in-memory collaborators and fixtures for integration tests.

use async_trait::async_trait;
use formbridge_core::{
    EngineError, FieldKind, FieldMeta, FieldValue, Record, Result, TableRow, Value,
};
use formbridge_engine::{
    CompileContext, DataProvider, EngineCaches, EvalContext, PairwiseOps, ReferenceKind,
    SchemaProvider,
};
use std::collections::HashMap;

pub const PROCESS_ID: i64 = 42;

/// Schema collaborator backed by a field list and named views.
#[derive(Default)]
pub struct InMemorySchema {
    pub fields: Vec<FieldMeta>,
    pub views: HashMap<String, Vec<Record>>,
}

#[async_trait]
impl SchemaProvider for InMemorySchema {
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

/// Data collaborator backed by plain maps.
#[derive(Default)]
pub struct InMemoryData {
    pub references: HashMap<(ReferenceKind, String), Value>,
    pub records: HashMap<String, Record>,
}

#[async_trait]
impl DataProvider for InMemoryData {
    async fn resolve_reference(&self, kind: ReferenceKind, key: &Value) -> Result<Value> {
        self.references
            .get(&(kind, key.to_display_string()))
            .cloned()
            .ok_or_else(|| EngineError::Collaborator(format!("unresolvable {kind:?}: {key:?}")))
    }

    async fn fetch_record(&self, record_id: &Value) -> Result<Record> {
        self.records
            .get(&record_id.to_display_string())
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("record {record_id:?}")))
    }
}

/// Everything one test needs to compile and evaluate.
pub struct Harness {
    pub schema: InMemorySchema,
    pub data: InMemoryData,
    pub operators: PairwiseOps,
    pub caches: EngineCaches,
}

impl Harness {
    pub fn new(fields: Vec<FieldMeta>) -> Self {
        Self {
            schema: InMemorySchema {
                fields,
                views: HashMap::new(),
            },
            data: InMemoryData::default(),
            operators: PairwiseOps::default(),
            caches: EngineCaches::new(),
        }
    }

    pub fn compile_cx(&self) -> CompileContext<'_> {
        CompileContext::new(PROCESS_ID, &self.schema, &self.operators)
    }

    pub fn eval_cx(&self) -> EvalContext<'_> {
        EvalContext::new(&self.schema, &self.data, &self.operators, &self.caches)
    }
}

pub fn text_field(uid: &str, name: &str) -> FieldMeta {
    FieldMeta::new(uid, name, FieldKind::Text)
}

pub fn number_field(uid: &str, name: &str) -> FieldMeta {
    FieldMeta::new(uid, name, FieldKind::Number)
}

pub fn table_field(uid: &str, name: &str, columns: Vec<FieldMeta>) -> FieldMeta {
    let mut meta = FieldMeta::new(uid, name, FieldKind::Table);
    meta.columns = Some(columns);
    meta
}

pub fn data_row(row_id: i64, cells: &[(&str, Value)]) -> TableRow {
    TableRow::new(
        row_id,
        cells
            .iter()
            .map(|(uid, value)| (uid.to_string(), FieldValue::scalar(value.clone())))
            .collect(),
    )
}

pub fn record(fields: &[(&str, FieldValue)]) -> Record {
    Record::from_fields(
        fields
            .iter()
            .map(|(uid, value)| (uid.to_string(), value.clone()))
            .collect(),
    )
}

pub fn value(json: serde_json::Value) -> Value {
    Value::from(json)
}
