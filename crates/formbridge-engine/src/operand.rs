//! Operand resolution
//!
//! The shared primitive of all three engines. A raw operand configuration
//! is discriminated once, at compile time, into a tagged union; field
//! names are resolved to uids through the schema collaborator there.
//! Evaluation never re-inspects configuration keys.

use crate::context::CompileContext;
use formbridge_core::config::OperandConf;
use formbridge_core::{EngineError, Record, Result, Value};

/// Default sub-property read by field operands.
const DEFAULT_PROPERTY: &str = "Value";

/// A compiled operand, bound to the schema it was compiled against.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A literal value
    Literal(Value),
    /// A record field sub-property, addressed by resolved uid
    Field {
        /// Resolved field uid
        uid: String,
        /// Sub-property name ("Value", "ID", "Rows")
        property: String,
    },
    /// A nested property path over the record's properties
    Property {
        /// Path segments
        path: Vec<String>,
        /// Demand presence instead of tolerating absence
        required: bool,
    },
}

impl Operand {
    /// Compile a raw operand. Field names resolve to uids through the
    /// schema collaborator; literals and paths compile without I/O.
    pub async fn compile(conf: &OperandConf, cx: &CompileContext<'_>) -> Result<Operand> {
        match conf {
            OperandConf::Literal(c) => Ok(Operand::Literal(c.value.clone())),
            OperandConf::Field(c) => {
                let meta = cx.schema.field_by_name(cx.process_id, &c.field).await?;
                Ok(Operand::Field {
                    uid: meta.uid,
                    property: c
                        .property
                        .clone()
                        .unwrap_or_else(|| DEFAULT_PROPERTY.to_string()),
                })
            }
            OperandConf::Property(c) => Ok(Operand::Property {
                path: c.property.split('.').map(str::to_string).collect(),
                required: c.required,
            }),
        }
    }

    /// Resolve the operand against a record.
    ///
    /// `Ok(None)` is "exactly undefined": an absent field, sub-property
    /// or path. A required path that resolves to nothing is an error.
    pub fn resolve(&self, record: &Record) -> Result<Option<Value>> {
        match self {
            Operand::Literal(value) => Ok(Some(value.clone())),
            Operand::Field { uid, property } => Ok(record
                .field(uid)
                .and_then(|field| field.property(property))),
            Operand::Property { path, required } => match record.prop_path(path) {
                Some(value) => Ok(Some(value)),
                None if *required => Err(EngineError::NotFound(path.join("."))),
                None => Ok(None),
            },
        }
    }
}
