//! Blocking/wakeup primitive for queued lock requests.
//!
//! A [`Waiter`] belongs to exactly one in-flight lock call. It parks the
//! caller outside the table's critical section and is woken by whoever
//! releases the conflicting entry (or by table close). Wakeups carry a
//! reason; the first reason wins. Reuse across retries re-arms the state
//! for a fresh wait epoch.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::types::TxnId;

/// Why a parked waiter was woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WakeReason {
    /// A conflicting holder released; re-validate and re-attempt.
    Retry,
    /// The lock table was closed; fail without granting.
    Closed,
    /// The waiting transaction itself finished; abandon the wait.
    Aborted,
}

/// Outcome of a single wait epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    /// Explicitly woken with a reason.
    Woken(WakeReason),
    /// The caller's deadline elapsed first.
    TimedOut,
    /// The caller's cancellation token fired first.
    Cancelled,
}

const STATE_IDLE: u8 = 0;
const STATE_RETRY: u8 = 1;
const STATE_CLOSED: u8 = 2;
const STATE_ABORTED: u8 = 3;

fn state_of(reason: WakeReason) -> u8 {
    match reason {
        WakeReason::Retry => STATE_RETRY,
        WakeReason::Closed => STATE_CLOSED,
        WakeReason::Aborted => STATE_ABORTED,
    }
}

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

/// A single queued lock request's wait/wake handle.
///
/// Identity is the process-unique `seq`, used for removal from queues;
/// queues never compare pointers.
#[derive(Debug)]
pub(crate) struct Waiter {
    txn_id: TxnId,
    seq: u64,
    state: AtomicU8,
    notify: Notify,
}

impl Waiter {
    pub(crate) fn new(txn_id: TxnId) -> Arc<Self> {
        Arc::new(Self {
            txn_id,
            seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
            state: AtomicU8::new(STATE_IDLE),
            notify: Notify::new(),
        })
    }

    pub(crate) fn txn_id(&self) -> &TxnId {
        &self.txn_id
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    /// Wake the parked caller. Idempotent; the first reason sticks.
    pub(crate) fn wake(&self, reason: WakeReason) {
        let _ = self.state.compare_exchange(
            STATE_IDLE,
            state_of(reason),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.notify.notify_one();
    }

    /// Whether a wakeup has already been delivered for this epoch.
    pub(crate) fn was_woken(&self) -> bool {
        self.state.load(Ordering::Acquire) != STATE_IDLE
    }

    /// Start a fresh wait epoch. Called under the table guard before the
    /// waiter is queued again.
    pub(crate) fn rearm(&self) {
        self.state.store(STATE_IDLE, Ordering::Release);
    }

    /// Park until woken, the deadline elapses or the token fires.
    ///
    /// Must be called without holding the table's critical section.
    pub(crate) async fn wait(
        &self,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> WaitOutcome {
        loop {
            let expire = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                _ = self.notify.notified() => {
                    match self.state.load(Ordering::Acquire) {
                        STATE_RETRY => return WaitOutcome::Woken(WakeReason::Retry),
                        STATE_CLOSED => return WaitOutcome::Woken(WakeReason::Closed),
                        STATE_ABORTED => return WaitOutcome::Woken(WakeReason::Aborted),
                        // Stale permit from a previous epoch; keep waiting.
                        _ => continue,
                    }
                }
                _ = cancel.cancelled() => return WaitOutcome::Cancelled,
                _ = expire => return WaitOutcome::TimedOut,
            }
        }
    }
}

/// Strict-FIFO queue of blocked requesters.
///
/// Merges concatenate queues preserving relative order, so no request's
/// position in line ever moves later than it already was.
#[derive(Debug, Default)]
pub(crate) struct WaiterQueue {
    inner: VecDeque<Arc<Waiter>>,
}

impl WaiterQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Queue a fresh request at the tail.
    pub(crate) fn push_back(&mut self, waiter: Arc<Waiter>) {
        self.inner.push_back(waiter);
    }

    /// Re-queue a woken-but-raced request at the head, preserving its
    /// position in line.
    pub(crate) fn push_front(&mut self, waiter: Arc<Waiter>) {
        self.inner.push_front(waiter);
    }

    pub(crate) fn pop_front(&mut self) -> Option<Arc<Waiter>> {
        self.inner.pop_front()
    }

    /// Remove a waiter by its sequence id without disturbing the order of
    /// the others.
    pub(crate) fn remove(&mut self, seq: u64) -> Option<Arc<Waiter>> {
        let idx = self.inner.iter().position(|w| w.seq() == seq)?;
        self.inner.remove(idx)
    }

    /// Remove every waiter belonging to `txn`, preserving the order of
    /// the rest.
    pub(crate) fn remove_txn(&mut self, txn: &TxnId) -> Vec<Arc<Waiter>> {
        let mut removed = Vec::new();
        self.inner.retain(|w| {
            if w.txn_id() == txn {
                removed.push(w.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Append another queue's waiters after this queue's, preserving both
    /// relative orders. Used by the merge engine.
    pub(crate) fn append(&mut self, other: &mut WaiterQueue) {
        self.inner.append(&mut other.inner);
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = Arc<Waiter>> + '_ {
        self.inner.drain(..)
    }

    /// Transaction ids of queued waiters, front to back.
    pub(crate) fn txn_ids(&self) -> Vec<TxnId> {
        self.inner.iter().map(|w| w.txn_id().clone()).collect()
    }
}
