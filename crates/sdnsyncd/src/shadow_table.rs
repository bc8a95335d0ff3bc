//! Shadow route table
//!
//! A prefix-keyed mirror of the routes this protocol has decided to track,
//! owned exclusively by the synchronization engine and independent of the
//! host table's entry lifetimes. Absent keys are a normal outcome, never an
//! error.

use std::collections::HashMap;

use crate::types::{Prefix, RouteEntry};

#[derive(Debug, Default)]
pub struct ShadowTable {
    entries: HashMap<Prefix, RouteEntry>,
}

impl ShadowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install an entry, replacing any existing entry for the same key.
    ///
    /// Replacement is delete-then-insert: the displaced entry is returned
    /// whole, never mutated in place.
    pub fn upsert(&mut self, entry: RouteEntry) -> Option<RouteEntry> {
        self.entries.insert(entry.prefix, entry)
    }

    /// Delete the entry for `key` if present.
    pub fn remove(&mut self, key: &Prefix) -> Option<RouteEntry> {
        self.entries.remove(key)
    }

    /// Exact-match lookup.
    pub fn find(&self, key: &Prefix) -> Option<&RouteEntry> {
        self.entries.get(key)
    }

    /// Lazy, finite, restartable walk over all entries.
    ///
    /// Order is table-defined and may change across insert/delete churn;
    /// callers must tolerate any order.
    pub fn walk(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn entry(prefix: &str, metric: u32) -> RouteEntry {
        let now = Instant::now();
        RouteEntry {
            prefix: prefix.parse().unwrap(),
            next_hop: None,
            metric,
            tag: 0,
            originator: None,
            created_at: now,
            last_updated_at: now,
            flags: 0,
        }
    }

    #[test]
    fn test_upsert_replaces_existing_key() {
        let mut table = ShadowTable::new();
        assert!(table.upsert(entry("10.0.0.0/24", 1)).is_none());
        let displaced = table.upsert(entry("10.0.0.0/24", 7)).unwrap();
        assert_eq!(displaced.metric, 1);
        assert_eq!(table.len(), 1);
        assert_eq!(table.find(&"10.0.0.0/24".parse().unwrap()).unwrap().metric, 7);
    }

    #[test]
    fn test_same_address_different_length_are_distinct_keys() {
        let mut table = ShadowTable::new();
        table.upsert(entry("10.0.0.0/24", 1));
        table.upsert(entry("10.0.0.0/16", 2));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_remove_absent_key_is_noop() {
        let mut table = ShadowTable::new();
        assert!(table.remove(&"10.0.0.0/24".parse().unwrap()).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_walk_visits_every_entry_once() {
        let mut table = ShadowTable::new();
        table.upsert(entry("10.0.0.0/24", 1));
        table.upsert(entry("10.0.1.0/24", 2));
        table.upsert(entry("10.0.2.0/24", 3));
        let mut seen: Vec<String> = table.walk().map(|e| e.prefix.to_string()).collect();
        seen.sort();
        assert_eq!(seen, vec!["10.0.0.0/24", "10.0.1.0/24", "10.0.2.0/24"]);
        // restartable
        assert_eq!(table.walk().count(), 3);
    }
}
