//! Collaborator capability interfaces
//!
//! The engines own no storage or wire protocol; everything they need from
//! the backend arrives through these two narrow traits. Every call is a
//! suspension point; timeouts and cancellation are the collaborator's
//! responsibility.

use async_trait::async_trait;
use formbridge_core::{FieldMeta, Record, Result, Value};
use serde::{Deserialize, Serialize};

/// Entity kinds resolvable through [`DataProvider::resolve_reference`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    /// Customer entity
    Customer,
    /// Supplier entity
    Supplier,
    /// Agency entity
    Agency,
    /// Sales representative
    Rep,
    /// Owner of the current record
    Owner,
    /// A linked record in another process
    Record,
}

impl ReferenceKind {
    /// Parse a configuration string into a reference kind.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "customer" => Some(ReferenceKind::Customer),
            "supplier" => Some(ReferenceKind::Supplier),
            "agency" => Some(ReferenceKind::Agency),
            "rep" => Some(ReferenceKind::Rep),
            "owner" => Some(ReferenceKind::Owner),
            "record" => Some(ReferenceKind::Record),
            _ => None,
        }
    }
}

/// Schema and view metadata provider, consumed at compile time (field
/// resolution) and by view-backed getters at evaluation time.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// Resolve a field by name within a process. Absent fields are a
    /// schema error: configuration naming them is invalid.
    async fn field_by_name(&self, process_id: i64, name: &str) -> Result<FieldMeta>;

    /// Fetch the rows of a named view.
    async fn view_rows(&self, process_id: i64, view: &str) -> Result<Vec<Record>>;
}

/// Record and entity data provider, consumed at evaluation time.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Resolve an external entity by id or name.
    async fn resolve_reference(&self, kind: ReferenceKind, key: &Value) -> Result<Value>;

    /// Fetch a linked record by id, for reference-chain traversal.
    async fn fetch_record(&self, record_id: &Value) -> Result<Record>;
}
