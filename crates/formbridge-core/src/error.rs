//! Engine error taxonomy
//!
//! Compile-time failures (unresolvable names) are always fatal. Value
//! errors are recoverable at the slots designed for them (field-level
//! diagnostics, stage error capture). `PipelineBreak` is a control
//! sentinel, not a real failure, and must always re-propagate through
//! generic error handling.

use thiserror::Error;

/// Engine error
#[derive(Error, Debug)]
pub enum EngineError {
    /// Unresolvable field/operator/getter/setter/stage name; fatal,
    /// surfaces at compile time
    #[error("Schema error: {0}")]
    Schema(String),

    /// A supplied value cannot be coerced or validated for its
    /// destination; recoverable at designated capture slots
    #[error("Value error: {0}")]
    ValueFormat(String),

    /// A demanded property or record was absent at evaluation time
    #[error("Not found: {0}")]
    NotFound(String),

    /// Deliberate early termination of a conversion pipeline
    #[error("Pipeline break")]
    PipelineBreak,

    /// Opaque failure from an external collaborator
    #[error("Collaborator error: {0}")]
    Collaborator(String),
}

impl EngineError {
    /// Whether this is the pipeline break sentinel.
    pub fn is_break(&self) -> bool {
        matches!(self, EngineError::PipelineBreak)
    }

    /// Whether this is a recoverable value error.
    pub fn is_value_error(&self) -> bool {
        matches!(self, EngineError::ValueFormat(_))
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::Schema("unknown field: Amount".to_string());
        assert_eq!(err.to_string(), "Schema error: unknown field: Amount");
    }

    #[test]
    fn test_classification() {
        assert!(EngineError::PipelineBreak.is_break());
        assert!(EngineError::ValueFormat("x".to_string()).is_value_error());
        assert!(!EngineError::Collaborator("x".to_string()).is_value_error());
    }
}
