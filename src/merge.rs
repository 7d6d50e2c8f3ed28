//! Range-merge engine.
//!
//! Folds a row/range lock request together with every existing entry it
//! overlaps or touches into one canonical interval. Intervals merge iff
//! they overlap or share a literal boundary key; keys are opaque bytes,
//! so there is no notion of numeric adjacency.

use bytes::Bytes;

use crate::store::EntryKind;
use crate::store::LockEntry;
use crate::store::LockStore;
use crate::types::TxnId;
use crate::waiter::WaiterQueue;

/// The fixed point of expanding a requested interval over the store.
#[derive(Debug)]
pub(crate) struct ResolvedInterval {
    /// Final low boundary.
    pub(crate) lo: Bytes,
    /// Final high boundary.
    pub(crate) hi: Bytes,
    /// Keys of every existing entry inside `[lo, hi]`, ascending.
    pub(crate) involved: Vec<Bytes>,
}

/// Expand `[lo, hi]` until it absorbs every overlapping or touching
/// entry.
///
/// One pass is not enough: newly widened bounds may capture further
/// entries, so expansion repeats until neither bound moves.
pub(crate) fn resolve_interval(store: &LockStore, lo: Bytes, hi: Bytes) -> ResolvedInterval {
    let mut lo = lo;
    let mut hi = hi;
    loop {
        let mut changed = false;

        // A range whose start lies strictly below `lo` covers `lo` iff
        // the nearest entry below is its start boundary.
        if let Some((key, entry)) = store.prev_entry(&lo)
            && entry.kind == EntryKind::RangeStart
        {
            lo = key.clone();
            changed = true;
        }

        for key in store.keys_in(&lo, &hi) {
            let Some(entry) = store.get(&key) else { continue };
            match entry.kind {
                EntryKind::RangeEnd => {
                    // Companion start is the nearest entry below; nothing
                    // is stored strictly inside a range.
                    if let Some((start, _)) = store.prev_entry(&key)
                        && *start < lo
                    {
                        lo = start.clone();
                        changed = true;
                    }
                }
                EntryKind::RangeStart => {
                    if let Some(end) = store.next_key_after(&key)
                        && end > hi
                    {
                        hi = end;
                        changed = true;
                    }
                }
                EntryKind::Row | EntryKind::RangePoint => {}
            }
        }

        if !changed {
            break;
        }
    }

    let involved = store.keys_in(&lo, &hi);
    ResolvedInterval { lo, hi, involved }
}

/// First involved entry (ascending) the requester must wait behind, if
/// any. Returns the key whose entry carries the queue to join.
///
/// An entry conflicts when another live transaction owns it, or — for a
/// fresh request only — when it is unowned but other requesters are
/// already queued on it. A woken request (`woken`) was popped as the
/// designated head of such a queue and is entitled to claim unowned
/// entries ahead of the remaining waiters.
pub(crate) fn first_conflict(
    store: &LockStore,
    involved: &[Bytes],
    txn: &TxnId,
    woken: bool,
) -> Option<Bytes> {
    for key in involved {
        let Some(entry) = store.get(key) else { continue };
        let queue_key = queue_key_for(store, key, entry.kind);
        match &entry.owner {
            Some(owner) if owner == txn => {}
            Some(_) => return Some(queue_key),
            None => {
                if !woken {
                    let queued = store
                        .get(&queue_key)
                        .is_some_and(|e| !e.waiters.is_empty());
                    if queued {
                        return Some(queue_key);
                    }
                }
            }
        }
    }
    None
}

/// The key of the entry carrying the canonical waiter queue for `key`:
/// the companion high boundary for a `RangeStart`, the key itself
/// otherwise.
pub(crate) fn queue_key_for(store: &LockStore, key: &Bytes, kind: EntryKind) -> Bytes {
    if kind == EntryKind::RangeStart
        && let Some(end) = store.next_key_after(key)
    {
        return end;
    }
    key.clone()
}

/// Result of rewriting the store for a merged interval.
#[derive(Debug)]
pub(crate) struct MergeOutcome {
    /// The boundary keys now owned by the requester.
    pub(crate) boundaries: Vec<Bytes>,
    /// Keys of the entries that were folded in (and no longer stand on
    /// their own), for holder bookkeeping.
    pub(crate) subsumed: Vec<Bytes>,
}

/// Rewrite the store so `[lo, hi]` is represented by exactly its two
/// boundary entries (one `RangePoint` when `lo == hi`), owned by `txn`.
///
/// The waiter queues of every involved entry are concatenated in
/// ascending key order onto the new high boundary, preserving each
/// queue's internal order. Must only be called when `first_conflict`
/// found none.
pub(crate) fn merge_range(
    store: &mut LockStore,
    lo: Bytes,
    hi: Bytes,
    involved: Vec<Bytes>,
    txn: &TxnId,
) -> MergeOutcome {
    let mut merged = WaiterQueue::new();
    for key in &involved {
        if let Some(mut entry) = store.remove(key) {
            merged.append(&mut entry.waiters);
        }
    }

    let boundaries = if lo == hi {
        let mut entry = LockEntry::new(EntryKind::RangePoint, Some(txn.clone()));
        entry.waiters = merged;
        store.insert(lo.clone(), entry);
        vec![lo]
    } else {
        store.insert(
            lo.clone(),
            LockEntry::new(EntryKind::RangeStart, Some(txn.clone())),
        );
        let mut end = LockEntry::new(EntryKind::RangeEnd, Some(txn.clone()));
        end.waiters = merged;
        store.insert(hi.clone(), end);
        vec![lo, hi]
    };

    MergeOutcome {
        boundaries,
        subsumed: involved,
    }
}
