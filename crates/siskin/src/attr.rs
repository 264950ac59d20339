use ahash::AHashMap;

use crate::{heap::HeapId, value::Value};

/// An object-identity-keyed mapping with weak keys.
///
/// Keys are heap object references compared by identity (`HeapId`), never
/// by structural equality. The table does not keep its keys alive: during
/// collection, entries whose keys are unreachable through all strong paths
/// are pruned before the table can be observed again, and values are kept
/// alive only through a live key (ephemeron semantics).
///
/// The printer uses the same structure, stack-allocated, as its traversal
/// scratch; as a `HeapData::Attr` object it is the user-visible weak table.
#[derive(Debug, Default)]
pub struct AttrTable {
    map: AHashMap<HeapId, Value>,
}

impl AttrTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn has(&self, key: HeapId) -> bool {
        self.map.contains_key(&key)
    }

    #[must_use]
    pub fn get(&self, key: HeapId) -> Option<Value> {
        self.map.get(&key).copied()
    }

    pub fn set(&mut self, key: HeapId, value: Value) {
        self.map.insert(key, value);
    }

    /// Removes an entry, returning true when it existed.
    pub fn del(&mut self, key: HeapId) -> bool {
        self.map.remove(&key).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iteration order is unspecified.
    pub fn iter(&self) -> impl Iterator<Item = (HeapId, Value)> + '_ {
        self.map.iter().map(|(&k, &v)| (k, v))
    }

    /// Drops every entry whose key fails the predicate. Called by the
    /// collector after marking, before the sweep.
    pub(crate) fn retain_keys(&mut self, mut live: impl FnMut(HeapId) -> bool) {
        self.map.retain(|&k, _| live(k));
    }

    /// Drops every entry whose value fails the predicate. Used by the
    /// printer to narrow visit counts down to genuinely shared nodes.
    pub(crate) fn retain_values(&mut self, mut keep: impl FnMut(Value) -> bool) {
        self.map.retain(|_, &mut v| keep(v));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: usize) -> HeapId {
        HeapId::from_index(n)
    }

    #[test]
    fn set_get_del() {
        let mut table = AttrTable::new();
        assert!(!table.has(id(0)));
        table.set(id(0), Value::Int(1));
        table.set(id(1), Value::Int(2));
        assert_eq!(table.get(id(0)), Some(Value::Int(1)));
        assert_eq!(table.len(), 2);
        assert!(table.del(id(0)));
        assert!(!table.del(id(0)));
        assert!(!table.has(id(0)));
    }

    #[test]
    fn set_overwrites() {
        let mut table = AttrTable::new();
        table.set(id(3), Value::Int(0));
        table.set(id(3), Value::Int(1));
        assert_eq!(table.get(id(3)), Some(Value::Int(1)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn retain_keys_prunes() {
        let mut table = AttrTable::new();
        table.set(id(0), Value::Nil);
        table.set(id(1), Value::Nil);
        table.retain_keys(|k| k == id(1));
        assert!(!table.has(id(0)));
        assert!(table.has(id(1)));
    }
}
