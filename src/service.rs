//! The lock service: an explicit registry of per-table lock tables.
//!
//! Tables are created on first use and live until [`LockService::close_table`]
//! or service shutdown; there is no ambient global state. The service also
//! owns the active-transaction holder, so `unlock` knows exactly which
//! entries each transaction pinned.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use snafu::ensure;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::InvalidRangeSnafu;
use crate::error::LockError;
use crate::error::LockTableNotFoundSnafu;
use crate::error::ServiceClosedSnafu;
use crate::error::TooManyTablesSnafu;
use crate::holder::HeldLock;
use crate::holder::TxnHolder;
use crate::table::LocalLockTable;
use crate::table::LockTableSnapshot;
use crate::types::Granularity;
use crate::types::LockOptions;
use crate::types::LockResult;
use crate::types::TableId;
use crate::types::Timestamp;
use crate::types::TxnId;

/// Configuration for a [`LockService`].
#[derive(Debug, Clone)]
pub struct LockServiceConfig {
    /// Wait timeout applied when a request does not carry its own.
    /// `None` waits until woken or cancelled.
    pub default_wait_timeout: Option<Duration>,
    /// Maximum number of lock tables this service will create.
    pub max_tables: usize,
}

impl Default for LockServiceConfig {
    fn default() -> Self {
        Self {
            default_wait_timeout: None,
            max_tables: 1024,
        }
    }
}

/// Per-node lock service serializing row/range access for the tables it
/// owns.
pub struct LockService {
    config: LockServiceConfig,
    tables: RwLock<HashMap<TableId, Arc<LocalLockTable>>>,
    holder: TxnHolder,
    shutdown: CancellationToken,
}

impl LockService {
    /// Create a new service.
    pub fn new(config: LockServiceConfig) -> Self {
        Self {
            config,
            tables: RwLock::new(HashMap::new()),
            holder: TxnHolder::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Acquire row or range locks on `table` for `txn`.
    ///
    /// Returns only on grant, timeout or structural failure; there is no
    /// partial grant. Cancellation is derived from service shutdown; use
    /// [`LockService::lock_with_cancel`] to thread a caller token.
    pub async fn lock(
        &self,
        table: TableId,
        keys: Vec<Bytes>,
        txn: TxnId,
        opts: LockOptions,
    ) -> Result<LockResult, LockError> {
        let cancel = self.shutdown.child_token();
        self.lock_with_cancel(table, keys, txn, opts, &cancel).await
    }

    /// [`LockService::lock`] with an explicit cancellation token for the
    /// caller's request context.
    pub async fn lock_with_cancel(
        &self,
        table: TableId,
        keys: Vec<Bytes>,
        txn: TxnId,
        opts: LockOptions,
        cancel: &CancellationToken,
    ) -> Result<LockResult, LockError> {
        validate_keys(&keys, opts.granularity)?;
        let lock_table = self.table_for(table)?;
        let deadline = opts
            .wait_timeout
            .or(self.config.default_wait_timeout)
            .map(|timeout| Instant::now() + timeout);
        let keys = lock_table
            .lock(&keys, &txn, opts.granularity, deadline, cancel, &self.holder)
            .await?;
        Ok(LockResult { keys })
    }

    /// Release everything `txn` holds, across tables, and wake the head
    /// of each affected waiter queue.
    ///
    /// Unconditional and best-effort per entry: keys already merged away
    /// are treated as already released, and a missing table is skipped.
    pub fn unlock(&self, txn: &TxnId, commit_ts: Timestamp) -> Result<(), LockError> {
        let held = self.holder.take_held(txn);
        for (table, locks) in held {
            let lock_table = self.tables.read().get(&table).cloned();
            match lock_table {
                Some(t) => t.unlock_txn(txn, &locks),
                None => {
                    debug!(%table, %txn, "unlock on missing lock table, skipping");
                }
            }
        }
        debug!(%txn, %commit_ts, "transaction unlocked");
        Ok(())
    }

    /// Close one table's lock table: every blocked waiter fails with the
    /// closed error, nothing is granted. Idempotent; a later `lock` on
    /// the same id creates a fresh table.
    pub fn close_table(&self, table: TableId) {
        let removed = self.tables.write().remove(&table);
        if let Some(t) = removed {
            t.close();
        }
    }

    /// Shut the whole service down: cancels outstanding waits and closes
    /// every table. Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
        let tables: Vec<_> = self.tables.write().drain().map(|(_, t)| t).collect();
        for t in &tables {
            t.close();
        }
        debug!(tables = tables.len(), "lock service closed");
    }

    /// Whether the service has been shut down.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Number of live lock tables.
    pub fn table_count(&self) -> usize {
        self.tables.read().len()
    }

    /// Point-in-time view of one table's lock state.
    pub fn table_snapshot(&self, table: TableId) -> Result<LockTableSnapshot, LockError> {
        let tables = self.tables.read();
        match tables.get(&table) {
            Some(t) => Ok(t.snapshot()),
            None => LockTableNotFoundSnafu { table }.fail(),
        }
    }

    /// What `txn` currently holds on `table`, per the holder's records.
    pub fn held_locks(&self, txn: &TxnId, table: TableId) -> Vec<HeldLock> {
        self.holder.list_held(txn, table)
    }

    fn table_for(&self, table: TableId) -> Result<Arc<LocalLockTable>, LockError> {
        ensure!(!self.shutdown.is_cancelled(), ServiceClosedSnafu);
        if let Some(t) = self.tables.read().get(&table) {
            return Ok(t.clone());
        }
        let mut tables = self.tables.write();
        // Re-check under the write lock: close may have raced us.
        ensure!(!self.shutdown.is_cancelled(), ServiceClosedSnafu);
        if let Some(t) = tables.get(&table) {
            return Ok(t.clone());
        }
        ensure!(
            tables.len() < self.config.max_tables,
            TooManyTablesSnafu {
                count: tables.len(),
                max: self.config.max_tables,
            }
        );
        let t = Arc::new(LocalLockTable::new(table));
        tables.insert(table, t.clone());
        debug!(%table, "lock table created");
        Ok(t)
    }
}

fn validate_keys(keys: &[Bytes], granularity: Granularity) -> Result<(), LockError> {
    ensure!(
        !keys.is_empty(),
        InvalidRangeSnafu {
            reason: "request carries no keys",
        }
    );
    if granularity == Granularity::Range {
        ensure!(
            keys.len() == 2,
            InvalidRangeSnafu {
                reason: format!("range request takes [lo, hi], got {} keys", keys.len()),
            }
        );
        ensure!(
            keys[0] <= keys[1],
            InvalidRangeSnafu {
                reason: "range lo is greater than hi",
            }
        );
    }
    Ok(())
}
