//! Error types for the lock service.

use snafu::Snafu;

use crate::types::TableId;
use crate::types::TxnId;

/// Errors surfaced to lock service callers.
///
/// Contention is never an error: a conflicting request waits. Errors are
/// structural (table gone, service shut down), wait failures (timeout,
/// cancellation, aborted transaction) or malformed requests.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum LockError {
    /// The table has no lock table bound on this node.
    #[snafu(display("no lock table bound for {table}"))]
    LockTableNotFound {
        /// The table that was requested.
        table: TableId,
    },

    /// The lock table was closed while the request was in flight.
    #[snafu(display("lock table for {table} is closed"))]
    LockTableClosed {
        /// The table whose lock table closed.
        table: TableId,
    },

    /// The whole service has been shut down.
    #[snafu(display("lock service is closed"))]
    ServiceClosed,

    /// The wait deadline elapsed while queued behind a conflicting holder.
    #[snafu(display("lock wait timed out on {table}"))]
    WaitTimeout {
        /// The table the request was queued on.
        table: TableId,
    },

    /// The caller's cancellation token fired while queued.
    #[snafu(display("lock wait cancelled on {table}"))]
    WaitCancelled {
        /// The table the request was queued on.
        table: TableId,
    },

    /// The waiting transaction was finished (committed or rolled back)
    /// while still queued, so the pending grant was abandoned.
    #[snafu(display("transaction '{txn}' aborted while waiting"))]
    TxnAborted {
        /// The transaction whose wait was abandoned.
        txn: TxnId,
    },

    /// The request's key set does not form a valid row/range request.
    #[snafu(display("invalid lock request: {reason}"))]
    InvalidRange {
        /// What was wrong with the request.
        reason: String,
    },

    /// The service refused to create yet another lock table.
    #[snafu(display("too many lock tables: {count} (max: {max})"))]
    TooManyTables {
        /// Current table count.
        count: usize,
        /// Configured maximum.
        max: usize,
    },
}
