//! The local lock table: per-table acquire/release state machine.
//!
//! One exclusive critical section guards the entry store, the merge
//! algorithm and all waiter-queue mutation; a blocked request suspends on
//! its [`Waiter`] only after the guard is dropped and re-validates under
//! a fresh guard once woken. Multi-entry merges therefore always see a
//! consistent snapshot.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use snafu::ensure;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::LockError;
use crate::error::LockTableClosedSnafu;
use crate::error::TxnAbortedSnafu;
use crate::error::WaitCancelledSnafu;
use crate::error::WaitTimeoutSnafu;
use crate::holder::HeldLock;
use crate::holder::TxnHolder;
use crate::merge::first_conflict;
use crate::merge::merge_range;
use crate::merge::queue_key_for;
use crate::merge::resolve_interval;
use crate::store::EntryKind;
use crate::store::LockEntry;
use crate::store::LockStore;
use crate::types::Granularity;
use crate::types::TableId;
use crate::types::TxnId;
use crate::waiter::WaitOutcome;
use crate::waiter::WakeReason;
use crate::waiter::Waiter;

/// Point-in-time view of one stored entry, for introspection and tests.
#[derive(Debug, Clone)]
pub struct LockEntrySnapshot {
    /// The boundary key.
    pub key: Bytes,
    /// What the entry marks.
    pub kind: EntryKind,
    /// Current owner, if any.
    pub owner: Option<TxnId>,
    /// Queued waiters, front to back.
    pub waiters: Vec<TxnId>,
}

/// Point-in-time view of a whole lock table.
#[derive(Debug, Clone)]
pub struct LockTableSnapshot {
    /// The table this lock table serves.
    pub table: TableId,
    /// Whether the table has been closed.
    pub closed: bool,
    /// All entries in ascending key order.
    pub entries: Vec<LockEntrySnapshot>,
}

struct TableState {
    closed: bool,
    store: LockStore,
}

/// Outcome of one row-acquisition attempt under the guard.
enum RowAttempt {
    /// Ownership installed; record this with the holder.
    Granted(HeldLock),
    /// Already covered by something the requester owns.
    Covered,
    /// Must wait on the queue at this key.
    Conflict(Bytes),
}

/// Lock table for a single table, living on the node that owns it.
pub(crate) struct LocalLockTable {
    table_id: TableId,
    mu: Mutex<TableState>,
}

impl LocalLockTable {
    pub(crate) fn new(table_id: TableId) -> Self {
        Self {
            table_id,
            mu: Mutex::new(TableState {
                closed: false,
                store: LockStore::new(),
            }),
        }
    }

    pub(crate) fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Acquire locks for `txn`. Returns the boundary keys now owned.
    ///
    /// Row granularity locks each key independently, in order; range
    /// granularity expects `keys == [lo, hi]` (validated by the caller).
    pub(crate) async fn lock(
        &self,
        keys: &[Bytes],
        txn: &TxnId,
        granularity: Granularity,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
        holder: &TxnHolder,
    ) -> Result<Vec<Bytes>, LockError> {
        match granularity {
            Granularity::Row => {
                let waiter = Waiter::new(txn.clone());
                let mut granted = Vec::with_capacity(keys.len());
                for key in keys {
                    self.lock_row(key, txn, &waiter, deadline, cancel, holder).await?;
                    granted.push(key.clone());
                }
                Ok(granted)
            }
            Granularity::Range => {
                self.lock_range(&keys[0], &keys[1], txn, deadline, cancel, holder).await
            }
        }
    }

    async fn lock_row(
        &self,
        key: &Bytes,
        txn: &TxnId,
        waiter: &Arc<Waiter>,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
        holder: &TxnHolder,
    ) -> Result<(), LockError> {
        let mut woken = false;
        let mut origins: Vec<Bytes> = Vec::new();
        loop {
            let queue_key = {
                let mut st = self.mu.lock();
                ensure!(!st.closed, LockTableClosedSnafu { table: self.table_id });
                match Self::try_acquire_row(&mut st.store, key, txn, woken) {
                    RowAttempt::Granted(held) => {
                        holder.record_held(txn, self.table_id, held);
                        debug!(table = %self.table_id, txn = %txn, key = ?key, "row lock granted");
                        return Ok(());
                    }
                    RowAttempt::Covered => return Ok(()),
                    RowAttempt::Conflict(queue_key) => {
                        waiter.rearm();
                        Self::enqueue(&mut st.store, &queue_key, waiter, woken);
                        queue_key
                    }
                }
            };
            debug!(table = %self.table_id, txn = %txn, key = ?key, "row lock conflict, waiting");
            self.suspend(waiter, &queue_key, &origins, deadline, cancel).await?;
            woken = true;
            if !origins.contains(&queue_key) {
                origins.push(queue_key);
            }
        }
    }

    async fn lock_range(
        &self,
        lo: &Bytes,
        hi: &Bytes,
        txn: &TxnId,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
        holder: &TxnHolder,
    ) -> Result<Vec<Bytes>, LockError> {
        let waiter = Waiter::new(txn.clone());
        let mut woken = false;
        let mut origins: Vec<Bytes> = Vec::new();
        loop {
            let queue_key = {
                let mut st = self.mu.lock();
                ensure!(!st.closed, LockTableClosedSnafu { table: self.table_id });
                let resolved = resolve_interval(&st.store, lo.clone(), hi.clone());
                match first_conflict(&st.store, &resolved.involved, txn, woken) {
                    Some(queue_key) => {
                        waiter.rearm();
                        Self::enqueue(&mut st.store, &queue_key, &waiter, woken);
                        queue_key
                    }
                    None => {
                        let final_lo = resolved.lo.clone();
                        let final_hi = resolved.hi.clone();
                        let outcome = merge_range(
                            &mut st.store,
                            resolved.lo,
                            resolved.hi,
                            resolved.involved,
                            txn,
                        );
                        holder.subsume(txn, self.table_id, &outcome.subsumed);
                        holder.record_held(
                            txn,
                            self.table_id,
                            HeldLock::Range(final_lo, final_hi),
                        );
                        debug!(
                            table = %self.table_id,
                            txn = %txn,
                            boundaries = ?outcome.boundaries,
                            "range lock granted"
                        );
                        return Ok(outcome.boundaries);
                    }
                }
            };
            debug!(table = %self.table_id, txn = %txn, "range lock conflict, waiting");
            self.suspend(&waiter, &queue_key, &origins, deadline, cancel).await?;
            woken = true;
            if !origins.contains(&queue_key) {
                origins.push(queue_key);
            }
        }
    }

    /// Park outside the guard; `Ok` means woken for a retry. `origins`
    /// are the keys this request was previously popped from and still
    /// owes a wakeup should it abandon.
    async fn suspend(
        &self,
        waiter: &Arc<Waiter>,
        queue_key: &Bytes,
        origins: &[Bytes],
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<(), LockError> {
        match waiter.wait(deadline, cancel).await {
            WaitOutcome::Woken(WakeReason::Retry) => Ok(()),
            WaitOutcome::Woken(WakeReason::Closed) => {
                LockTableClosedSnafu { table: self.table_id }.fail()
            }
            WaitOutcome::Woken(WakeReason::Aborted) => TxnAbortedSnafu {
                txn: waiter.txn_id().clone(),
            }
            .fail(),
            WaitOutcome::TimedOut => {
                self.abandon_wait(waiter, queue_key, origins);
                WaitTimeoutSnafu { table: self.table_id }.fail()
            }
            WaitOutcome::Cancelled => {
                self.abandon_wait(waiter, queue_key, origins);
                WaitCancelledSnafu { table: self.table_id }.fail()
            }
        }
    }

    /// One row-acquisition attempt. `woken` marks a request that was
    /// popped as the designated head of a queue and may claim unowned
    /// entries ahead of the remaining waiters.
    fn try_acquire_row(
        store: &mut LockStore,
        key: &Bytes,
        txn: &TxnId,
        woken: bool,
    ) -> RowAttempt {
        if let Some(entry) = store.get(key) {
            let kind = entry.kind;
            let mine = entry.owned_by(txn);
            let free = entry.owner.is_none();
            let queue_key = queue_key_for(store, key, kind);
            if mine {
                return RowAttempt::Covered;
            }
            if !free {
                return RowAttempt::Conflict(queue_key);
            }
            if !woken
                && store.get(&queue_key).is_some_and(|e| !e.waiters.is_empty())
            {
                return RowAttempt::Conflict(queue_key);
            }
            return Self::claim_unowned(store, key, kind, txn);
        }

        // No entry at the key itself; it may lie inside a stored range.
        if let Some((start, entry)) = store.prev_entry(key)
            && entry.kind == EntryKind::RangeStart
        {
            let start = start.clone();
            let mine = entry.owned_by(txn);
            let free = entry.owner.is_none();
            let Some(end) = store.next_key_after(&start) else {
                return RowAttempt::Conflict(start);
            };
            if mine {
                return RowAttempt::Covered;
            }
            if !free {
                return RowAttempt::Conflict(end);
            }
            if !woken && store.get(&end).is_some_and(|e| !e.waiters.is_empty()) {
                return RowAttempt::Conflict(end);
            }
            return Self::claim_range(store, &start, &end, txn);
        }

        store.insert(key.clone(), LockEntry::row(txn.clone()));
        RowAttempt::Granted(HeldLock::Row(key.clone()))
    }

    /// Take ownership of an unowned entry, claiming the full shape it
    /// belongs to.
    fn claim_unowned(
        store: &mut LockStore,
        key: &Bytes,
        kind: EntryKind,
        txn: &TxnId,
    ) -> RowAttempt {
        match kind {
            EntryKind::Row => {
                if let Some(entry) = store.get_mut(key) {
                    entry.owner = Some(txn.clone());
                }
                RowAttempt::Granted(HeldLock::Row(key.clone()))
            }
            EntryKind::RangePoint => {
                if let Some(entry) = store.get_mut(key) {
                    entry.owner = Some(txn.clone());
                }
                RowAttempt::Granted(HeldLock::Range(key.clone(), key.clone()))
            }
            EntryKind::RangeStart => match store.next_key_after(key) {
                Some(end) => Self::claim_range(store, key, &end, txn),
                None => {
                    if let Some(entry) = store.get_mut(key) {
                        entry.owner = Some(txn.clone());
                    }
                    RowAttempt::Granted(HeldLock::Row(key.clone()))
                }
            },
            EntryKind::RangeEnd => match store.prev_entry(key).map(|(k, _)| k.clone()) {
                Some(start) => Self::claim_range(store, &start, key, txn),
                None => {
                    if let Some(entry) = store.get_mut(key) {
                        entry.owner = Some(txn.clone());
                    }
                    RowAttempt::Granted(HeldLock::Row(key.clone()))
                }
            },
        }
    }

    fn claim_range(store: &mut LockStore, start: &Bytes, end: &Bytes, txn: &TxnId) -> RowAttempt {
        if let Some(entry) = store.get_mut(start) {
            entry.owner = Some(txn.clone());
        }
        if let Some(entry) = store.get_mut(end) {
            entry.owner = Some(txn.clone());
        }
        RowAttempt::Granted(HeldLock::Range(start.clone(), end.clone()))
    }

    fn enqueue(store: &mut LockStore, queue_key: &Bytes, waiter: &Arc<Waiter>, woken: bool) {
        if let Some(entry) = store.get_mut(queue_key) {
            if woken {
                entry.waiters.push_front(waiter.clone());
            } else {
                entry.waiters.push_back(waiter.clone());
            }
        }
    }

    /// A queued wait ended in timeout or cancellation. Remove the waiter
    /// without disturbing the others' order, then hand on every wakeup
    /// this request still owes: the current queue if it had already been
    /// popped and woken, and each entry it was popped from on an earlier
    /// retry and re-queued away from. Those earlier entries sit unowned
    /// with parked waiters until this request merges them or, here,
    /// passes the baton.
    fn abandon_wait(&self, waiter: &Arc<Waiter>, queue_key: &Bytes, origins: &[Bytes]) {
        let mut st = self.mu.lock();
        if st.closed {
            return;
        }
        let removed_at = st.store.remove_waiter(waiter.seq());
        match &removed_at {
            Some(at) => Self::cleanup_entry(&mut st.store, at),
            None => {
                if waiter.was_woken() && !origins.contains(queue_key) {
                    Self::pass_wakeup(&mut st.store, queue_key);
                }
            }
        }
        for origin in origins {
            if removed_at.as_ref() == Some(origin) {
                continue;
            }
            Self::pass_wakeup(&mut st.store, origin);
        }
    }

    /// Drop an entry nothing pins anymore (no owner, no waiters),
    /// together with an unowned companion range boundary.
    fn cleanup_entry(store: &mut LockStore, key: &Bytes) {
        let Some(entry) = store.get(key) else { return };
        if entry.owner.is_some() || !entry.waiters.is_empty() {
            return;
        }
        let kind = entry.kind;
        store.remove(key);
        if kind == EntryKind::RangeEnd
            && let Some((start, s)) = store.prev_entry(key)
            && s.kind == EntryKind::RangeStart
            && s.owner.is_none()
        {
            let start = start.clone();
            store.remove(&start);
        }
    }

    /// Wake the next head behind an entry whose designated head bailed.
    fn pass_wakeup(store: &mut LockStore, hint: &Bytes) {
        if let Some(entry) = store.get_mut(hint) {
            if entry.owner.is_some() {
                // Someone claimed it; their unlock will wake the queue.
                return;
            }
            match entry.waiters.pop_front() {
                Some(next) => next.wake(WakeReason::Retry),
                None => Self::cleanup_entry(store, hint),
            }
            return;
        }
        // The entry we waited on was merged away; wake the head of the
        // first unowned queue so no grant is stranded.
        let key = store
            .iter()
            .find(|(_, e)| e.owner.is_none() && !e.waiters.is_empty())
            .map(|(k, _)| k.clone());
        if let Some(key) = key
            && let Some(entry) = store.get_mut(&key)
            && let Some(next) = entry.waiters.pop_front()
        {
            next.wake(WakeReason::Retry);
        }
    }

    /// Release everything `txn` holds on this table. Clears ownership and
    /// wakes exactly the head of each affected queue, all under one
    /// guard: no request observes a half-released state.
    pub(crate) fn unlock_txn(&self, txn: &TxnId, held: &[HeldLock]) {
        let mut st = self.mu.lock();
        if st.closed {
            return;
        }
        // A finished transaction must never receive a grant later:
        // abandon any waits it still has queued, wherever they are, before
        // the releases below start waking heads.
        let mut aborted = Vec::new();
        let mut emptied = Vec::new();
        for (key, entry) in st.store.iter_mut() {
            let removed = entry.waiters.remove_txn(txn);
            if !removed.is_empty() {
                aborted.extend(removed);
                if entry.owner.is_none() && entry.waiters.is_empty() {
                    emptied.push(key.clone());
                }
            }
        }
        for w in aborted {
            w.wake(WakeReason::Aborted);
        }
        for key in emptied {
            Self::cleanup_entry(&mut st.store, &key);
        }
        for lock in held {
            match lock {
                HeldLock::Row(key) => Self::release_entry(&mut st.store, txn, None, key),
                HeldLock::Range(lo, hi) if lo == hi => {
                    Self::release_entry(&mut st.store, txn, None, lo)
                }
                HeldLock::Range(lo, hi) => Self::release_entry(&mut st.store, txn, Some(lo), hi),
            }
        }
        debug!(table = %self.table_id, txn = %txn, locks = held.len(), "released held locks");
    }

    fn release_entry(store: &mut LockStore, txn: &TxnId, start: Option<&Bytes>, key: &Bytes) {
        // Entries already merged away, or no longer ours, are treated as
        // already released.
        if !store.get(key).is_some_and(|e| e.owned_by(txn)) {
            return;
        }
        if let Some(skey) = start
            && let Some(s) = store.get_mut(skey)
            && s.owned_by(txn)
        {
            s.owner = None;
        }
        let Some(entry) = store.get_mut(key) else { return };
        entry.owner = None;
        let head = entry.waiters.pop_front();
        match head {
            Some(head) => head.wake(WakeReason::Retry),
            None => {
                store.remove(key);
                if let Some(skey) = start {
                    store.remove(skey);
                }
            }
        }
    }

    /// Close the table: release everything and fail every queued waiter.
    /// Idempotent.
    pub(crate) fn close(&self) {
        let mut st = self.mu.lock();
        if st.closed {
            return;
        }
        st.closed = true;
        let mut drained = 0usize;
        for (_, mut entry) in st.store.drain() {
            for w in entry.waiters.drain() {
                w.wake(WakeReason::Closed);
                drained += 1;
            }
        }
        debug!(table = %self.table_id, waiters = drained, "lock table closed");
    }

    pub(crate) fn snapshot(&self) -> LockTableSnapshot {
        let st = self.mu.lock();
        LockTableSnapshot {
            table: self.table_id,
            closed: st.closed,
            entries: st
                .store
                .iter()
                .map(|(key, entry)| LockEntrySnapshot {
                    key: key.clone(),
                    kind: entry.kind,
                    owner: entry.owner.clone(),
                    waiters: entry.waiters.txn_ids(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn key(b: u8) -> Bytes {
        Bytes::copy_from_slice(&[b])
    }

    fn txn(s: &str) -> TxnId {
        TxnId::new(s.as_bytes().to_vec())
    }

    async fn lock_rows(
        table: &LocalLockTable,
        holder: &TxnHolder,
        t: &TxnId,
        keys: &[Bytes],
    ) -> Result<Vec<Bytes>, LockError> {
        table
            .lock(
                keys,
                t,
                Granularity::Row,
                None,
                &CancellationToken::new(),
                holder,
            )
            .await
    }

    #[tokio::test]
    async fn test_row_lock_installs_entry() {
        let table = LocalLockTable::new(TableId::new(1));
        let holder = TxnHolder::new();
        let t = txn("a");
        lock_rows(&table, &holder, &t, &[key(1)]).await.unwrap();

        let snap = table.snapshot();
        assert_eq!(snap.entries.len(), 1);
        assert_eq!(snap.entries[0].kind, EntryKind::Row);
        assert_eq!(snap.entries[0].owner, Some(t.clone()));
        assert_eq!(holder.list_held(&t, TableId::new(1)), vec![HeldLock::Row(key(1))]);
    }

    #[tokio::test]
    async fn test_relock_own_row_is_noop() {
        let table = LocalLockTable::new(TableId::new(1));
        let holder = TxnHolder::new();
        let t = txn("a");
        lock_rows(&table, &holder, &t, &[key(1)]).await.unwrap();
        lock_rows(&table, &holder, &t, &[key(1)]).await.unwrap();
        assert_eq!(table.snapshot().entries.len(), 1);
        assert_eq!(holder.list_held(&t, TableId::new(1)).len(), 1);
    }

    #[tokio::test]
    async fn test_conflicting_row_waits_and_is_woken_by_unlock() {
        let table = Arc::new(LocalLockTable::new(TableId::new(1)));
        let holder = Arc::new(TxnHolder::new());
        let a = txn("a");
        let b = txn("b");
        lock_rows(&table, &holder, &a, &[key(1)]).await.unwrap();

        let waiter_table = table.clone();
        let waiter_holder = holder.clone();
        let b2 = b.clone();
        let blocked = tokio::spawn(async move {
            lock_rows(&waiter_table, &waiter_holder, &b2, &[key(1)]).await
        });

        // Wait until b is queued.
        loop {
            let snap = table.snapshot();
            if snap.entries.first().is_some_and(|e| e.waiters == vec![b.clone()]) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        table.unlock_txn(&a, &[HeldLock::Row(key(1))]);
        blocked.await.unwrap().unwrap();

        let snap = table.snapshot();
        assert_eq!(snap.entries[0].owner, Some(b.clone()));
        assert!(snap.entries[0].waiters.is_empty());
    }

    #[tokio::test]
    async fn test_row_inside_own_range_is_covered() {
        let table = LocalLockTable::new(TableId::new(1));
        let holder = TxnHolder::new();
        let t = txn("a");
        table
            .lock(
                &[key(1), key(5)],
                &t,
                Granularity::Range,
                None,
                &CancellationToken::new(),
                &holder,
            )
            .await
            .unwrap();

        // Key 3 lies strictly inside [1,5]; no new entry appears.
        lock_rows(&table, &holder, &t, &[key(3)]).await.unwrap();
        let snap = table.snapshot();
        assert_eq!(snap.entries.len(), 2);
        assert_eq!(
            holder.list_held(&t, TableId::new(1)),
            vec![HeldLock::Range(key(1), key(5))]
        );
    }

    #[tokio::test]
    async fn test_wait_timeout_leaves_queue_order_intact() {
        let table = Arc::new(LocalLockTable::new(TableId::new(1)));
        let holder = Arc::new(TxnHolder::new());
        let a = txn("a");
        lock_rows(&table, &holder, &a, &[key(1)]).await.unwrap();

        // b waits with a short deadline, c waits without one.
        let (tb, hb, b) = (table.clone(), holder.clone(), txn("b"));
        let short = tokio::spawn(async move {
            tb.lock(
                &[key(1)],
                &b,
                Granularity::Row,
                Some(Instant::now() + Duration::from_millis(40)),
                &CancellationToken::new(),
                &hb,
            )
            .await
        });
        loop {
            if table.snapshot().entries[0].waiters.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let (tc, hc, c) = (table.clone(), holder.clone(), txn("c"));
        let c2 = c.clone();
        let long = tokio::spawn(async move { lock_rows(&tc, &hc, &c2, &[key(1)]).await });
        loop {
            if table.snapshot().entries[0].waiters.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let err = short.await.unwrap().unwrap_err();
        assert!(matches!(err, LockError::WaitTimeout { .. }));
        assert_eq!(table.snapshot().entries[0].waiters, vec![c.clone()]);

        table.unlock_txn(&a, &[HeldLock::Row(key(1))]);
        long.await.unwrap().unwrap();
        assert_eq!(table.snapshot().entries[0].owner, Some(c));
    }

    #[tokio::test]
    async fn test_timeout_after_requeue_passes_wakeup_to_abandoned_queue() {
        let table = Arc::new(LocalLockTable::new(TableId::new(1)));
        let holder = Arc::new(TxnHolder::new());
        let a = txn("a");
        let b = txn("b");
        lock_rows(&table, &holder, &a, &[key(1)]).await.unwrap();
        lock_rows(&table, &holder, &b, &[key(3)]).await.unwrap();

        // c's range [1,3] parks at key 1 behind a.
        let (tc, hc, c) = (table.clone(), holder.clone(), txn("c"));
        let c2 = c.clone();
        let range = tokio::spawn(async move {
            tc.lock(
                &[key(1), key(3)],
                &c2,
                Granularity::Range,
                Some(Instant::now() + Duration::from_millis(150)),
                &CancellationToken::new(),
                &hc,
            )
            .await
        });
        loop {
            let snap = table.snapshot();
            if snap.entries.first().is_some_and(|e| e.waiters == vec![c.clone()]) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        // d parks behind c on the same row.
        let (td, hd, d) = (table.clone(), holder.clone(), txn("d"));
        let d2 = d.clone();
        let row = tokio::spawn(async move { lock_rows(&td, &hd, &d2, &[key(1)]).await });
        loop {
            if table.snapshot().entries[0].waiters.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        // Releasing row 1 pops c as designated head; c still conflicts on
        // b's row 3 and re-queues there, leaving key 1 unowned with d
        // parked.
        table.unlock_txn(&a, &[HeldLock::Row(key(1))]);
        loop {
            let snap = table.snapshot();
            let requeued = snap
                .entries
                .iter()
                .find(|e| e.key == key(3))
                .is_some_and(|e| e.waiters == vec![c.clone()]);
            if requeued {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        // c's deadline elapses; the wakeup it was handed for key 1 must
        // go to d, not vanish with it.
        let err = range.await.unwrap().unwrap_err();
        assert!(matches!(err, LockError::WaitTimeout { .. }));
        row.await.unwrap().unwrap();

        let snap = table.snapshot();
        let entry = snap.entries.iter().find(|e| e.key == key(1)).unwrap();
        assert_eq!(entry.owner, Some(d.clone()));
        assert!(entry.waiters.is_empty());
    }

    #[tokio::test]
    async fn test_close_fails_blocked_waiters() {
        let table = Arc::new(LocalLockTable::new(TableId::new(7)));
        let holder = Arc::new(TxnHolder::new());
        let a = txn("a");
        lock_rows(&table, &holder, &a, &[key(1)]).await.unwrap();

        let (tb, hb) = (table.clone(), holder.clone());
        let blocked = tokio::spawn(async move {
            lock_rows(&tb, &hb, &txn("b"), &[key(1)]).await
        });
        loop {
            if table.snapshot().entries[0].waiters.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        table.close();
        let err = blocked.await.unwrap().unwrap_err();
        assert!(matches!(err, LockError::LockTableClosed { .. }));

        let snap = table.snapshot();
        assert!(snap.closed);
        assert!(snap.entries.is_empty());

        // Close is idempotent and later locks fail.
        table.close();
        let err = lock_rows(&table, &holder, &txn("c"), &[key(2)]).await.unwrap_err();
        assert!(matches!(err, LockError::LockTableClosed { .. }));
    }

    #[tokio::test]
    async fn test_unlock_aborts_own_queued_waiter() {
        let table = Arc::new(LocalLockTable::new(TableId::new(1)));
        let holder = Arc::new(TxnHolder::new());
        let a = txn("a");
        let b = txn("b");
        lock_rows(&table, &holder, &a, &[key(1)]).await.unwrap();
        lock_rows(&table, &holder, &b, &[key(2)]).await.unwrap();

        // a queues behind b on key 2 while still holding key 1.
        let (ta, ha, a2) = (table.clone(), holder.clone(), a.clone());
        let blocked = tokio::spawn(async move { lock_rows(&ta, &ha, &a2, &[key(2)]).await });
        loop {
            let snap = table.snapshot();
            if snap.entries.len() == 2 && snap.entries[1].waiters.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        // a commits; its pending wait must be abandoned, not granted.
        table.unlock_txn(&a, &[HeldLock::Row(key(1))]);
        let err = blocked.await.unwrap().unwrap_err();
        assert!(matches!(err, LockError::TxnAborted { .. }));
    }
}
