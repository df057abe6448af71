//! formbridge Core - shared types for the formbridge integration engine
//!
//! This crate provides the fundamental types used across the formbridge
//! ecosystem:
//! - Runtime `Value` type
//! - Record / field / table-row data model
//! - Schema metadata consumed at compile time
//! - Patch fragments produced by setters
//! - Raw configuration structures (the platform's wire format)
//! - Error types

pub mod config;
pub mod error;
pub mod patch;
pub mod record;
pub mod schema;
pub mod value;

// Re-export commonly used types
pub use error::{EngineError, Result};
pub use patch::{FieldPatch, PatchFragment, RowPatch};
pub use record::{FieldValue, Record, TableRow};
pub use schema::{FieldKind, FieldMeta, FieldType};
pub use value::Value;
