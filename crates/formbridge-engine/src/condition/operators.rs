//! Extensible pairwise operator table
//!
//! The equality/ordering family beyond the built-in condition operators
//! lives here so integrations can register their own comparisons without
//! touching the closed operator enum. Names are resolved at compile time;
//! an unknown name is a fatal schema error.

use formbridge_core::{Result, Value};
use std::collections::HashMap;

/// A pairwise comparison over two resolved operand values.
pub type PairwiseFn = fn(&Value, &Value) -> Result<bool>;

/// Registry of named pairwise operators.
#[derive(Debug, Clone)]
pub struct PairwiseOps {
    table: HashMap<String, PairwiseFn>,
}

impl Default for PairwiseOps {
    fn default() -> Self {
        let mut ops = Self {
            table: HashMap::new(),
        };
        ops.register("less", |a, b| Ok(ordering(a, b, |o| o == std::cmp::Ordering::Less)));
        ops.register("lessOrEqual", |a, b| {
            Ok(ordering(a, b, |o| o != std::cmp::Ordering::Greater))
        });
        ops.register("greater", |a, b| {
            Ok(ordering(a, b, |o| o == std::cmp::Ordering::Greater))
        });
        ops.register("greaterOrEqual", |a, b| {
            Ok(ordering(a, b, |o| o != std::cmp::Ordering::Less))
        });
        ops.register("notEqual", |a, b| Ok(!a.loose_eq(b)));
        ops
    }
}

impl PairwiseOps {
    /// Table with the built-in ordering family registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an operator under a name.
    pub fn register(&mut self, name: impl Into<String>, func: PairwiseFn) {
        self.table.insert(name.into(), func);
    }

    /// Whether a name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    /// Look up an operator.
    pub fn get(&self, name: &str) -> Option<PairwiseFn> {
        self.table.get(name).copied()
    }
}

/// Compare two values: numerically when both coerce to numbers, else as
/// strings when both are strings. Incomparable pairs satisfy nothing.
fn ordering(a: &Value, b: &Value, accept: fn(std::cmp::Ordering) -> bool) -> bool {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y).map(accept).unwrap_or(false);
    }
    if let (Value::String(x), Value::String(y)) = (a, b) {
        return accept(x.cmp(y));
    }
    false
}
