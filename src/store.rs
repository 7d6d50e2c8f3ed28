//! Ordered lock-entry store for one table.
//!
//! Keys are opaque byte sequences compared lexicographically. A width>1
//! range is stored as exactly two boundary entries; everything between is
//! implicitly covered and holds no entry. The store is not thread-safe:
//! all access happens under the owning table's critical section.

use std::collections::BTreeMap;
use std::ops::Bound;

use bytes::Bytes;

use crate::types::TxnId;
use crate::waiter::WaiterQueue;

/// What a stored boundary entry marks.
///
/// Replaces the flag bitmask of older designs with a tagged variant: a
/// width-1 range is its own variant rather than two flags on one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A standalone single-key lock.
    Row,
    /// Low boundary of a width>1 range.
    RangeStart,
    /// High boundary of a width>1 range.
    RangeEnd,
    /// A single key that is both the low and high boundary of a range.
    RangePoint,
}

impl EntryKind {
    /// Whether this entry marks the low boundary of a range.
    pub fn is_range_start(&self) -> bool {
        matches!(self, EntryKind::RangeStart | EntryKind::RangePoint)
    }

    /// Whether this entry marks the high boundary of a range.
    pub fn is_range_end(&self) -> bool {
        matches!(self, EntryKind::RangeEnd | EntryKind::RangePoint)
    }
}

/// One stored boundary entry.
///
/// Ownership is recorded on both boundary entries of a range; the
/// canonical waiter queue lives on the high boundary (`RangeEnd`), and a
/// `RangeStart` entry's queue stays empty.
#[derive(Debug)]
pub(crate) struct LockEntry {
    pub(crate) kind: EntryKind,
    pub(crate) owner: Option<TxnId>,
    pub(crate) waiters: WaiterQueue,
}

impl LockEntry {
    pub(crate) fn new(kind: EntryKind, owner: Option<TxnId>) -> Self {
        Self {
            kind,
            owner,
            waiters: WaiterQueue::new(),
        }
    }

    pub(crate) fn row(owner: TxnId) -> Self {
        Self::new(EntryKind::Row, Some(owner))
    }

    pub(crate) fn owned_by(&self, txn: &TxnId) -> bool {
        self.owner.as_ref() == Some(txn)
    }
}

/// Ordered map from boundary key to lock entry.
#[derive(Debug, Default)]
pub(crate) struct LockStore {
    entries: BTreeMap<Bytes, LockEntry>,
}

impl LockStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn get(&self, key: &Bytes) -> Option<&LockEntry> {
        self.entries.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &Bytes) -> Option<&mut LockEntry> {
        self.entries.get_mut(key)
    }

    pub(crate) fn insert(&mut self, key: Bytes, entry: LockEntry) {
        self.entries.insert(key, entry);
    }

    pub(crate) fn remove(&mut self, key: &Bytes) -> Option<LockEntry> {
        self.entries.remove(key)
    }

    /// Ascending iteration over all entries.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&Bytes, &LockEntry)> {
        self.entries.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&Bytes, &mut LockEntry)> {
        self.entries.iter_mut()
    }

    /// Keys of all entries within the closed interval `[lo, hi]`,
    /// ascending.
    pub(crate) fn keys_in(&self, lo: &Bytes, hi: &Bytes) -> Vec<Bytes> {
        self.entries
            .range::<Bytes, _>((Bound::Included(lo), Bound::Included(hi)))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// The greatest entry with key strictly below `key`.
    pub(crate) fn prev_entry(&self, key: &Bytes) -> Option<(&Bytes, &LockEntry)> {
        self.entries
            .range::<Bytes, _>((Bound::Unbounded, Bound::Excluded(key)))
            .next_back()
    }

    /// The smallest key strictly above `key`.
    pub(crate) fn next_key_after(&self, key: &Bytes) -> Option<Bytes> {
        self.entries
            .range::<Bytes, _>((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(k, _)| k.clone())
    }

    /// Take every entry out of the store, ascending. Used by close.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = (Bytes, LockEntry)> {
        std::mem::take(&mut self.entries).into_iter()
    }

    /// Remove a queued waiter by sequence id, wherever its queue ended up
    /// after merges. Returns the key of the entry it was queued on.
    pub(crate) fn remove_waiter(&mut self, seq: u64) -> Option<Bytes> {
        for (key, entry) in self.entries.iter_mut() {
            if entry.waiters.remove(seq).is_some() {
                return Some(key.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(b: u8) -> Bytes {
        Bytes::copy_from_slice(&[b])
    }

    fn txn(s: &str) -> TxnId {
        TxnId::new(s.as_bytes().to_vec())
    }

    #[test]
    fn test_ascending_iteration() {
        let mut store = LockStore::new();
        store.insert(key(3), LockEntry::row(txn("a")));
        store.insert(key(1), LockEntry::row(txn("a")));
        store.insert(key(2), LockEntry::row(txn("a")));
        let keys: Vec<Bytes> = store.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![key(1), key(2), key(3)]);
    }

    #[test]
    fn test_keys_in_closed_interval() {
        let mut store = LockStore::new();
        for b in [1u8, 3, 5, 7] {
            store.insert(key(b), LockEntry::row(txn("a")));
        }
        assert_eq!(store.keys_in(&key(3), &key(5)), vec![key(3), key(5)]);
        assert_eq!(store.keys_in(&key(2), &key(2)), Vec::<Bytes>::new());
        assert_eq!(store.keys_in(&key(0), &key(9)).len(), 4);
    }

    #[test]
    fn test_prev_and_next_queries() {
        let mut store = LockStore::new();
        store.insert(key(2), LockEntry::row(txn("a")));
        store.insert(key(6), LockEntry::row(txn("a")));

        let (k, _) = store.prev_entry(&key(5)).unwrap();
        assert_eq!(k, &key(2));
        assert!(store.prev_entry(&key(2)).is_none());

        assert_eq!(store.next_key_after(&key(2)), Some(key(6)));
        assert_eq!(store.next_key_after(&key(6)), None);
    }

    #[test]
    fn test_entry_kind_predicates() {
        assert!(EntryKind::RangePoint.is_range_start());
        assert!(EntryKind::RangePoint.is_range_end());
        assert!(EntryKind::RangeStart.is_range_start());
        assert!(!EntryKind::RangeStart.is_range_end());
        assert!(!EntryKind::Row.is_range_start());
    }
}
