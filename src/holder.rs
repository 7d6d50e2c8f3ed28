//! Active-transaction bookkeeping: which boundary keys each transaction
//! currently owns, per table. Consulted on grant (record) and on unlock
//! (drain) so release knows exactly which store entries to touch.

use std::collections::HashMap;
use std::collections::HashSet;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::types::TableId;
use crate::types::TxnId;

/// One lock a transaction holds: a single row key or a closed range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeldLock {
    /// A standalone row key.
    Row(Bytes),
    /// A closed interval `[lo, hi]`; `lo == hi` for a point range.
    Range(Bytes, Bytes),
}

impl HeldLock {
    /// The boundary keys this lock pins in the store.
    pub fn boundary_keys(&self) -> Vec<Bytes> {
        match self {
            HeldLock::Row(k) => vec![k.clone()],
            HeldLock::Range(lo, hi) if lo == hi => vec![lo.clone()],
            HeldLock::Range(lo, hi) => vec![lo.clone(), hi.clone()],
        }
    }

    fn subsumed_by(&self, keys: &HashSet<&Bytes>) -> bool {
        match self {
            HeldLock::Row(k) => keys.contains(k),
            HeldLock::Range(lo, hi) => keys.contains(lo) && keys.contains(hi),
        }
    }
}

/// In-memory held-lock records for all live transactions.
#[derive(Debug, Default)]
pub(crate) struct TxnHolder {
    held: Mutex<HashMap<TxnId, HashMap<TableId, Vec<HeldLock>>>>,
}

impl TxnHolder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record a granted lock. Idempotent.
    pub(crate) fn record_held(&self, txn: &TxnId, table: TableId, lock: HeldLock) {
        let mut held = self.held.lock();
        let locks = held
            .entry(txn.clone())
            .or_default()
            .entry(table)
            .or_default();
        if !locks.contains(&lock) {
            locks.push(lock);
        }
    }

    /// Drop records whose boundary keys were all folded into a widened
    /// range by a merge. Called just before the widened range is
    /// recorded.
    pub(crate) fn subsume(&self, txn: &TxnId, table: TableId, keys: &[Bytes]) {
        if keys.is_empty() {
            return;
        }
        let set: HashSet<&Bytes> = keys.iter().collect();
        let mut held = self.held.lock();
        if let Some(tables) = held.get_mut(txn)
            && let Some(locks) = tables.get_mut(&table)
        {
            locks.retain(|l| !l.subsumed_by(&set));
        }
    }

    /// Atomically take everything the transaction holds, across tables.
    /// The record is gone afterwards; unlock drives releases from the
    /// returned map.
    pub(crate) fn take_held(&self, txn: &TxnId) -> HashMap<TableId, Vec<HeldLock>> {
        self.held.lock().remove(txn).unwrap_or_default()
    }

    /// Current holdings of a transaction on one table.
    pub(crate) fn list_held(&self, txn: &TxnId, table: TableId) -> Vec<HeldLock> {
        self.held
            .lock()
            .get(txn)
            .and_then(|tables| tables.get(&table))
            .cloned()
            .unwrap_or_default()
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
    fn test_record_is_idempotent() {
        let holder = TxnHolder::new();
        let t = txn("a");
        holder.record_held(&t, TableId::new(1), HeldLock::Row(key(1)));
        holder.record_held(&t, TableId::new(1), HeldLock::Row(key(1)));
        assert_eq!(holder.list_held(&t, TableId::new(1)).len(), 1);
    }

    #[test]
    fn test_subsume_drops_fully_covered_locks() {
        let holder = TxnHolder::new();
        let t = txn("a");
        let table = TableId::new(1);
        holder.record_held(&t, table, HeldLock::Row(key(1)));
        holder.record_held(&t, table, HeldLock::Row(key(2)));
        holder.record_held(&t, table, HeldLock::Row(key(4)));

        // Rows 1 and 2 fold into [1,3]; row 4 stays.
        holder.subsume(&t, table, &[key(1), key(2)]);
        holder.record_held(&t, table, HeldLock::Range(key(1), key(3)));

        let held = holder.list_held(&t, table);
        assert_eq!(
            held,
            vec![HeldLock::Row(key(4)), HeldLock::Range(key(1), key(3))]
        );
    }

    #[test]
    fn test_take_held_drains_all_tables() {
        let holder = TxnHolder::new();
        let t = txn("a");
        holder.record_held(&t, TableId::new(1), HeldLock::Row(key(1)));
        holder.record_held(&t, TableId::new(2), HeldLock::Range(key(1), key(5)));

        let taken = holder.take_held(&t);
        assert_eq!(taken.len(), 2);
        assert!(holder.take_held(&t).is_empty());
        assert!(holder.list_held(&t, TableId::new(1)).is_empty());
    }

    #[test]
    fn test_boundary_keys_of_point_range() {
        let lock = HeldLock::Range(key(3), key(3));
        assert_eq!(lock.boundary_keys(), vec![key(3)]);
    }
}
