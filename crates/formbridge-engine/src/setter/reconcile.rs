//! Table row reconciliation
//!
//! Matches desired logical rows against existing physical rows while
//! preserving row identity. Every existing row is accounted for exactly
//! once: matched, re-emitted as a keep-only placeholder (full sync), or
//! left untouched at the storage layer. Every desired row is either
//! matched or becomes a new row (id 0) when creation is enabled.

use formbridge_core::{EngineError, Result, TableRow, Value};
use std::collections::{HashMap, HashSet, VecDeque};

/// How desired rows are matched to existing physical rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowMatchMode {
    /// Consume existing rows strictly in original order
    Positional,
    /// Match by the value of a designated key column (by uid), FIFO
    /// within each key group
    ByKeyField(String),
    /// Interpret the desired key directly as a target physical row id
    ByRowId,
}

/// Desired logical rows, normalized once from the source getter output.
#[derive(Debug)]
pub(crate) enum DesiredRows {
    /// Ordered rows without business keys
    List(Vec<Value>),
    /// Key-sorted entries (maps carry no inherent order; sorting keeps
    /// downstream side effects deterministic)
    Keyed(Vec<(String, Value)>),
}

impl DesiredRows {
    pub(crate) fn from_value(value: Value) -> Result<DesiredRows> {
        match value {
            Value::Array(items) => Ok(DesiredRows::List(items)),
            Value::Object(map) => {
                let mut entries: Vec<(String, Value)> = map.into_iter().collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                Ok(DesiredRows::Keyed(entries))
            }
            other => Err(EngineError::ValueFormat(format!(
                "desired row set must be an array or object, got {other:?}"
            ))),
        }
    }

    fn into_list(self) -> Vec<Value> {
        match self {
            DesiredRows::List(items) => items,
            DesiredRows::Keyed(entries) => entries.into_iter().map(|(_, row)| row).collect(),
        }
    }
}

/// One planned output row.
#[derive(Debug)]
pub(crate) struct RowSlot {
    /// Target physical row id; 0 requests creation
    pub row_id: i64,
    /// Logical row feeding the column setters; `None` keeps the row
    /// untouched
    pub logical: Option<Value>,
    /// Key uid and value to stamp into a created row
    pub stamp_key: Option<(String, Value)>,
}

impl RowSlot {
    fn matched(row_id: i64, logical: Value) -> Self {
        Self {
            row_id,
            logical: Some(logical),
            stamp_key: None,
        }
    }

    fn keep(row_id: i64) -> Self {
        Self {
            row_id,
            logical: None,
            stamp_key: None,
        }
    }
}

/// Plan the output rows for one reconciliation pass.
pub(crate) fn assign_rows(
    desired: DesiredRows,
    existing: &[TableRow],
    mode: &RowMatchMode,
    create_rows: bool,
    full_sync: bool,
) -> Result<Vec<RowSlot>> {
    let existing_rows: Vec<&TableRow> = existing.iter().filter(|row| !row.definition).collect();

    match mode {
        RowMatchMode::Positional => {
            let items = desired.into_list();
            let consumed = items.len();
            let mut slots: Vec<RowSlot> = items
                .into_iter()
                .enumerate()
                .map(|(index, logical)| {
                    // Rows beyond the existing count are created fresh.
                    let row_id = existing_rows.get(index).map(|row| row.row_id).unwrap_or(0);
                    RowSlot::matched(row_id, logical)
                })
                .collect();
            if full_sync {
                for row in existing_rows.iter().skip(consumed) {
                    slots.push(RowSlot::keep(row.row_id));
                }
            }
            Ok(slots)
        }

        RowMatchMode::ByKeyField(key_uid) => {
            let entries = match desired {
                DesiredRows::Keyed(entries) => entries,
                DesiredRows::List(_) => {
                    return Err(EngineError::ValueFormat(
                        "key-field row matching requires a keyed desired set".to_string(),
                    ))
                }
            };

            let mut groups: HashMap<String, VecDeque<i64>> = HashMap::new();
            for row in &existing_rows {
                let key = row
                    .fields
                    .get(key_uid)
                    .map(|field| field.value.to_display_string())
                    .unwrap_or_default();
                groups.entry(key).or_default().push_back(row.row_id);
            }

            let mut slots = Vec::new();
            let mut deferred = Vec::new();
            let mut consumed = HashSet::new();
            for (key, logical) in entries {
                match groups.get_mut(&key).and_then(|queue| queue.pop_front()) {
                    Some(row_id) => {
                        consumed.insert(row_id);
                        slots.push(RowSlot::matched(row_id, logical));
                    }
                    None => deferred.push((key, logical)),
                }
            }

            if create_rows {
                for (key, logical) in deferred {
                    slots.push(RowSlot {
                        row_id: 0,
                        logical: Some(logical),
                        stamp_key: Some((key_uid.clone(), Value::String(key))),
                    });
                }
            } else if !deferred.is_empty() {
                tracing::debug!(
                    dropped = deferred.len(),
                    "desired rows without a matching key dropped"
                );
            }

            if full_sync {
                for row in &existing_rows {
                    if !consumed.contains(&row.row_id) {
                        slots.push(RowSlot::keep(row.row_id));
                    }
                }
            }
            Ok(slots)
        }

        RowMatchMode::ByRowId => {
            let entries = match desired {
                DesiredRows::Keyed(entries) => entries,
                DesiredRows::List(_) => {
                    return Err(EngineError::ValueFormat(
                        "row-identifier matching requires a keyed desired set".to_string(),
                    ))
                }
            };

            let mut slots = Vec::new();
            let mut targeted = HashSet::new();
            for (key, logical) in entries {
                let row_id: i64 = key.parse().map_err(|_| {
                    EngineError::ValueFormat(format!("'{key}' is not a physical row id"))
                })?;
                targeted.insert(row_id);
                slots.push(RowSlot::matched(row_id, logical));
            }

            if full_sync {
                for row in &existing_rows {
                    if !targeted.contains(&row.row_id) {
                        slots.push(RowSlot::keep(row.row_id));
                    }
                }
            }
            Ok(slots)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn row(row_id: i64, key_uid: &str, key: &str) -> TableRow {
        TableRow::new(
            row_id,
            Map::from([(
                key_uid.to_string(),
                formbridge_core::FieldValue::scalar(Value::String(key.to_string())),
            )]),
        )
    }

    fn logical(label: &str) -> Value {
        Value::Object(Map::from([(
            "label".to_string(),
            Value::String(label.to_string()),
        )]))
    }

    #[test]
    fn test_positional_reuses_ids_in_order() {
        let existing = vec![row(1, "k", "x"), row(2, "k", "y"), row(3, "k", "z")];
        let desired = DesiredRows::List(vec![logical("A"), logical("B")]);
        let slots = assign_rows(desired, &existing, &RowMatchMode::Positional, false, false).unwrap();

        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].row_id, 1);
        assert_eq!(slots[1].row_id, 2);
        // Row 3 is not referenced: it stays untouched at the storage layer.
        assert!(slots.iter().all(|slot| slot.row_id != 3));
    }

    #[test]
    fn test_positional_overflow_creates_rows() {
        let existing = vec![row(1, "k", "x")];
        let desired = DesiredRows::List(vec![logical("A"), logical("B"), logical("C")]);
        let slots = assign_rows(desired, &existing, &RowMatchMode::Positional, false, false).unwrap();

        assert_eq!(
            slots.iter().map(|slot| slot.row_id).collect::<Vec<_>>(),
            vec![1, 0, 0]
        );
    }

    #[test]
    fn test_keyed_matching_is_fifo_within_group() {
        let existing = vec![row(1, "k", "dup"), row(2, "k", "dup"), row(3, "k", "other")];
        let desired = DesiredRows::Keyed(vec![
            ("dup".to_string(), logical("first")),
            ("dup".to_string(), logical("second")),
        ]);
        let slots = assign_rows(
            desired,
            &existing,
            &RowMatchMode::ByKeyField("k".to_string()),
            false,
            false,
        )
        .unwrap();

        assert_eq!(slots[0].row_id, 1);
        assert_eq!(slots[1].row_id, 2);
    }

    #[test]
    fn test_keyed_creation_stamps_key() {
        let desired = DesiredRows::Keyed(vec![("k1".to_string(), logical("new"))]);
        let slots = assign_rows(
            desired,
            &[],
            &RowMatchMode::ByKeyField("c-key".to_string()),
            true,
            false,
        )
        .unwrap();

        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].row_id, 0);
        assert_eq!(
            slots[0].stamp_key,
            Some(("c-key".to_string(), Value::String("k1".to_string())))
        );
    }

    #[test]
    fn test_full_sync_keeps_unmatched_existing_rows() {
        let existing = vec![row(1, "k", "a"), row(2, "k", "b")];
        let desired = DesiredRows::Keyed(vec![("a".to_string(), logical("A"))]);
        let slots = assign_rows(
            desired,
            &existing,
            &RowMatchMode::ByKeyField("k".to_string()),
            false,
            true,
        )
        .unwrap();

        assert_eq!(slots.len(), 2);
        assert_eq!(slots[1].row_id, 2);
        assert!(slots[1].logical.is_none());
    }

    #[test]
    fn test_row_id_mode_targets_rows_directly() {
        let desired = DesiredRows::Keyed(vec![("7".to_string(), logical("update"))]);
        let slots = assign_rows(desired, &[], &RowMatchMode::ByRowId, false, false).unwrap();
        assert_eq!(slots[0].row_id, 7);

        let bad = DesiredRows::Keyed(vec![("seven".to_string(), logical("update"))]);
        assert!(assign_rows(bad, &[], &RowMatchMode::ByRowId, false, false).is_err());
    }

    #[test]
    fn test_definition_rows_never_consumed() {
        let mut definition = row(1, "k", "a");
        definition.definition = true;
        let existing = vec![definition, row(2, "k", "a")];
        let desired = DesiredRows::List(vec![logical("A")]);
        let slots = assign_rows(desired, &existing, &RowMatchMode::Positional, false, false).unwrap();
        assert_eq!(slots[0].row_id, 2);
    }
}
