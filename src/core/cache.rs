//! Subscription registry and value cache.
//!
//! [`DatarefTable`] owns the wire-index assignments and the last known value
//! per subscribed key. It is a plain data structure; the client wraps it in
//! the coordinating lock, so every resolve-round-compare-store sequence is
//! atomic with respect to readers.

use crate::core::types::{ChangeSet, DatarefKey, DatarefValue, Subscription, ValueTransform};
use std::collections::HashMap;

struct Entry {
    key: DatarefKey,
    transform: ValueTransform,
    value: Option<DatarefValue>,
}

/// Wire-index assignments plus last known values for the subscribed set.
///
/// Indices are assigned in declaration order and are never reused for a
/// different key: a key keeps its index for the lifetime of the table, and a
/// re-subscribe after reconnect re-sends the same assignments. The cache
/// never holds a key that was not subscribed.
#[derive(Default)]
pub struct DatarefTable {
    entries: Vec<Entry>,
    by_key: HashMap<String, usize>,
    refresh_all: bool,
}

impl DatarefTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register subscriptions, assigning each new key the next wire-index.
    ///
    /// Keys already present keep their index and transform; declaring a key
    /// twice is not an error.
    pub fn subscribe(&mut self, subscriptions: impl IntoIterator<Item = Subscription>) {
        for sub in subscriptions {
            if self.by_key.contains_key(sub.key.as_str()) {
                continue;
            }
            let index = self.entries.len();
            self.by_key.insert(sub.key.as_str().to_string(), index);
            self.entries.push(Entry {
                key: sub.key,
                transform: sub.transform,
                value: None,
            });
        }
    }

    /// Number of subscribed keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of keys with a known value
    pub fn known(&self) -> usize {
        self.entries.iter().filter(|e| e.value.is_some()).count()
    }

    /// (wire-index, wire name) for every subscription, in index order.
    /// This is what the subscribe worker sends after every endpoint change.
    pub fn wire_entries(&self) -> Vec<(i32, String)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i as i32, e.key.wire_name().to_string()))
            .collect()
    }

    /// Last known value for a key, or `None` if never received.
    pub fn get(&self, key: &str) -> Option<DatarefValue> {
        self.by_key
            .get(key)
            .and_then(|&i| self.entries[i].value.clone())
    }

    /// Arm the refresh-all flag: the next update delivers every known key in
    /// its ChangeSet regardless of change detection.
    pub fn mark_refresh(&mut self) {
        self.refresh_all = true;
    }

    /// Apply one decoded update datagram.
    ///
    /// Each wire-index resolves through the registry; unknown indices are
    /// logged and skipped. Raw values pass through the key's transform, then
    /// its rounding precision, before being compared with the cached value —
    /// round first, compare second. Returns the keys whose value changed
    /// (unknown→known counts as changed).
    pub fn apply_update(&mut self, pairs: &[(i32, f32)]) -> ChangeSet {
        let mut changes = ChangeSet::new();

        for &(index, raw) in pairs {
            let entry = match usize::try_from(index).ok().and_then(|i| self.entries.get_mut(i)) {
                Some(entry) => entry,
                None => {
                    log::warn!("update for unknown wire-index {}, skipping", index);
                    continue;
                }
            };

            let value = DatarefValue::Scalar(entry.key.round(entry.transform.apply(raw)));
            if entry.value.as_ref() != Some(&value) {
                changes.insert(entry.key.clone(), value.clone());
            }
            entry.value = Some(value);
        }

        if self.refresh_all {
            self.refresh_all = false;
            log::info!("refresh-all armed, delivering full cache");
            for entry in &self.entries {
                if let Some(value) = &entry.value {
                    changes.insert(entry.key.clone(), value.clone());
                }
            }
        }

        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ValueTransform;

    fn table(specs: &[&str]) -> DatarefTable {
        let mut table = DatarefTable::new();
        table.subscribe(
            specs
                .iter()
                .map(|s| Subscription::new(DatarefKey::parse(s).unwrap())),
        );
        table
    }

    #[test]
    fn test_indices_follow_declaration_order() {
        let table = table(&["sim/a", "sim/b", "sim/c"]);
        let entries = table.wire_entries();
        assert_eq!(entries[0], (0, "sim/a".to_string()));
        assert_eq!(entries[1], (1, "sim/b".to_string()));
        assert_eq!(entries[2], (2, "sim/c".to_string()));
    }

    #[test]
    fn test_duplicate_subscribe_keeps_index() {
        let mut table = table(&["sim/a", "sim/b"]);
        table.subscribe([
            Subscription::new(DatarefKey::parse("sim/b").unwrap()),
            Subscription::new(DatarefKey::parse("sim/d").unwrap()),
        ]);
        let entries = table.wire_entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1], (1, "sim/b".to_string()));
        assert_eq!(entries[2], (2, "sim/d".to_string()));
    }

    #[test]
    fn test_update_then_get() {
        let mut table = table(&["sim/a", "sim/b"]);
        let changes = table.apply_update(&[(0, 12.5), (1, 7.0)]);

        assert_eq!(changes.len(), 2);
        assert_eq!(changes.get("sim/a"), Some(&DatarefValue::Scalar(12.5)));
        assert_eq!(changes.get("sim/b"), Some(&DatarefValue::Scalar(7.0)));
        assert_eq!(table.get("sim/a"), Some(DatarefValue::Scalar(12.5)));
        assert_eq!(table.known(), 2);
    }

    #[test]
    fn test_identical_update_is_idempotent() {
        let mut table = table(&["sim/a", "sim/b"]);
        let first = table.apply_update(&[(0, 12.5), (1, 7.0)]);
        assert_eq!(first.len(), 2);

        let second = table.apply_update(&[(0, 12.5), (1, 7.0)]);
        assert!(second.is_empty());
    }

    #[test]
    fn test_rounding_suppresses_sub_precision_changes() {
        let mut table = table(&["sim/c,1"]);

        let first = table.apply_update(&[(0, 3.04)]);
        assert_eq!(first.get("sim/c,1"), Some(&DatarefValue::Scalar(3.0)));

        let second = table.apply_update(&[(0, 3.06)]);
        assert_eq!(second.get("sim/c,1"), Some(&DatarefValue::Scalar(3.1)));

        // 3.08 also rounds to 3.1: no third notification
        let third = table.apply_update(&[(0, 3.08)]);
        assert!(third.is_empty());
    }

    #[test]
    fn test_transform_applies_before_rounding() {
        let mut table = DatarefTable::new();
        table.subscribe([Subscription::with_transform(
            DatarefKey::parse("sim/baro,0").unwrap(),
            ValueTransform::from_name("inhg_to_hpa").unwrap(),
        )]);

        let changes = table.apply_update(&[(0, 29.92)]);
        assert_eq!(changes.get("sim/baro,0"), Some(&DatarefValue::Scalar(1013.0)));
    }

    #[test]
    fn test_unknown_index_is_skipped() {
        let mut table = table(&["sim/a"]);
        let changes = table.apply_update(&[(5, 1.0), (-1, 2.0), (0, 3.0)]);
        assert_eq!(changes.len(), 1);
        assert_eq!(table.get("sim/a"), Some(DatarefValue::Scalar(3.0)));
    }

    #[test]
    fn test_unsubscribed_key_never_cached() {
        let table = table(&["sim/a"]);
        assert_eq!(table.get("sim/zulu"), None);
    }

    #[test]
    fn test_refresh_all_delivers_full_cache_once() {
        let mut table = table(&["sim/a", "sim/b"]);
        table.apply_update(&[(0, 1.0), (1, 2.0)]);

        table.mark_refresh();
        // Unchanged values, but refresh-all forces the full cache out
        let changes = table.apply_update(&[(0, 1.0)]);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes.get("sim/b"), Some(&DatarefValue::Scalar(2.0)));

        // Flag is one-shot
        let after = table.apply_update(&[(0, 1.0)]);
        assert!(after.is_empty());
    }
}
