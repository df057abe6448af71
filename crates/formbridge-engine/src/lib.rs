//! Rule evaluation and data mapping engines.
//!
//! Four engines share one compile/evaluate model: a configuration is
//! compiled once against a process schema (async, may call collaborators)
//! and the compiled form is then evaluated against any number of records.
//!
//! - [`condition`]: predicates over records
//! - [`getter`]: value extraction, including table flattening
//! - [`setter`]: field patch computation, including row reconciliation
//! - [`pipeline`]: staged batch conversion
//!
//! Collaborators are injected through the [`providers`] traits and
//! threaded through explicit [`context`] values.

pub mod condition;
pub mod context;
pub mod getter;
pub mod operand;
pub mod pipeline;
pub mod providers;
pub mod setter;

#[cfg(test)]
pub(crate) mod test_support;

pub use condition::operators::PairwiseOps;
pub use condition::CompiledCondition;
pub use context::{CompileContext, EngineCaches, EvalContext};
pub use getter::CompiledGetter;
pub use operand::Operand;
pub use pipeline::{CompiledStage, StageImpl, StageRegistry};
pub use providers::{DataProvider, ReferenceKind, SchemaProvider};
pub use setter::{CompiledSetter, RowMatchMode};
