//! Per-table row and range locking for a distributed SQL engine.
//!
//! A [`LockService`] owns one in-memory lock table per database table.
//! Transactions acquire exclusive locks on single rows or on closed key
//! ranges; overlapping or boundary-touching locks held by the same
//! transaction are merged into one canonical range, and conflicting
//! requests park in per-entry FIFO queues until the holder releases.
//!
//! ```no_run
//! use lockservice::{LockOptions, LockService, LockServiceConfig, TableId, Timestamp, TxnId};
//!
//! # async fn example() -> Result<(), lockservice::LockError> {
//! let service = LockService::new(LockServiceConfig::default());
//! let txn = TxnId::new(&b"txn-1"[..]);
//!
//! service
//!     .lock(
//!         TableId::new(1),
//!         vec![b"k1".as_ref().into(), b"k9".as_ref().into()],
//!         txn.clone(),
//!         LockOptions::range(),
//!     )
//!     .await?;
//!
//! // ... run the transaction ...
//!
//! service.unlock(&txn, Timestamp::new(42))?;
//! # Ok(())
//! # }
//! ```

mod error;
mod holder;
mod merge;
mod service;
mod store;
mod table;
mod types;
mod waiter;

pub use error::LockError;
pub use holder::HeldLock;
pub use service::LockService;
pub use service::LockServiceConfig;
pub use store::EntryKind;
pub use table::LockEntrySnapshot;
pub use table::LockTableSnapshot;
pub use types::Granularity;
pub use types::LockOptions;
pub use types::LockResult;
pub use types::TableId;
pub use types::Timestamp;
pub use types::TxnId;
