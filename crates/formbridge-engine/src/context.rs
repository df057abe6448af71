//! Compile and evaluation contexts
//!
//! Collaborator handles are threaded explicitly through every compile and
//! evaluate call; nothing in the engines reaches for ambient state. The
//! caches are owned by the pipeline invoker and handed in, with an
//! explicit reset, so their lifetime policy is visible at the call site.

use crate::condition::operators::PairwiseOps;
use crate::providers::{DataProvider, SchemaProvider};
use chrono::{DateTime, Utc};
use formbridge_core::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Context for the compile phase of every engine.
pub struct CompileContext<'a> {
    /// Process whose schema resolves field names
    pub process_id: i64,
    /// Schema collaborator
    pub schema: &'a dyn SchemaProvider,
    /// Extensible pairwise operator table
    pub operators: &'a PairwiseOps,
}

impl<'a> CompileContext<'a> {
    /// Create a compile context.
    pub fn new(process_id: i64, schema: &'a dyn SchemaProvider, operators: &'a PairwiseOps) -> Self {
        Self {
            process_id,
            schema,
            operators,
        }
    }
}

/// Context for the evaluate phase of every engine.
pub struct EvalContext<'a> {
    /// Schema collaborator (view-backed getters)
    pub schema: &'a dyn SchemaProvider,
    /// Data collaborator (references, linked records)
    pub data: &'a dyn DataProvider,
    /// Pairwise operator table, shared with the compile phase
    pub operators: &'a PairwiseOps,
    /// Invoker-owned caches
    pub caches: &'a EngineCaches,
    /// Evaluation instant for the date operators; pinned in tests
    pub now: DateTime<Utc>,
}

impl<'a> EvalContext<'a> {
    /// Create an evaluation context stamped with the current instant.
    pub fn new(
        schema: &'a dyn SchemaProvider,
        data: &'a dyn DataProvider,
        operators: &'a PairwiseOps,
        caches: &'a EngineCaches,
    ) -> Self {
        Self {
            schema,
            data,
            operators,
            caches,
            now: Utc::now(),
        }
    }

    /// Pin the evaluation instant.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

/// Explicit, invoker-owned caches that outlive single evaluate calls.
///
/// The engines themselves populate only the lookup store (view rows and
/// similar resolved lists, cached once and shared by handle). The
/// de-duplication store is invoker-facing API: host converters reach it
/// through [`EvalContext`] for cross-batch duplicate suppression, so the
/// store has a visible owner and reset point instead of living in a
/// process global. It is keyed defensively by an explicit type tag
/// supplied by configuration, never by bare keys.
#[derive(Default)]
pub struct EngineCaches {
    dedup: Mutex<HashMap<(String, String), Value>>,
    lookups: Mutex<HashMap<String, Arc<Vec<Value>>>>,
}

impl EngineCaches {
    /// Fresh caches.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a key under a type tag; returns true if it was already
    /// present (a duplicate).
    pub fn dedup_seen(&self, tag: &str, key: &str, value: Value) -> bool {
        let mut store = self.dedup.lock().expect("dedup cache poisoned");
        store
            .insert((tag.to_string(), key.to_string()), value)
            .is_some()
    }

    /// Fetch a previously de-duplicated value.
    pub fn dedup_get(&self, tag: &str, key: &str) -> Option<Value> {
        let store = self.dedup.lock().expect("dedup cache poisoned");
        store.get(&(tag.to_string(), key.to_string())).cloned()
    }

    /// Fetch a cached lookup list.
    pub fn lookup_get(&self, name: &str) -> Option<Arc<Vec<Value>>> {
        let store = self.lookups.lock().expect("lookup cache poisoned");
        store.get(name).cloned()
    }

    /// Store a lookup list, returning the shared handle.
    pub fn lookup_put(&self, name: &str, rows: Vec<Value>) -> Arc<Vec<Value>> {
        let handle = Arc::new(rows);
        let mut store = self.lookups.lock().expect("lookup cache poisoned");
        store.insert(name.to_string(), handle.clone());
        handle
    }

    /// Drop everything; the invoker decides when a cache generation ends.
    pub fn reset(&self) {
        self.dedup.lock().expect("dedup cache poisoned").clear();
        self.lookups.lock().expect("lookup cache poisoned").clear();
    }
}
