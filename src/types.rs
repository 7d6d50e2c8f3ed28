//! Identifier and request types shared across the lock service.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

/// Identifier of a table whose rows and key ranges are being locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableId(pub u64);

impl TableId {
    /// Create a new table id.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw id value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table-{}", self.0)
    }
}

/// Opaque transaction identifier.
///
/// The lock service never interprets the bytes; equality is all that
/// matters. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(Bytes);

impl TxnId {
    /// Create a transaction id from opaque bytes.
    pub fn new(id: impl Into<Bytes>) -> Self {
        Self(id.into())
    }

    /// Get the raw id bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Commit timestamp handed to `unlock`.
///
/// The single-table core does not consume it; it is accepted for the
/// layer above and logged on release.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Create a new timestamp.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw timestamp value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ts({})", self.0)
    }
}

/// Whether a lock request targets individual keys or a closed interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Granularity {
    /// Each key in the request is locked independently.
    #[default]
    Row,
    /// The request carries exactly two keys `[lo, hi]` denoting a closed
    /// interval; every key in between is covered.
    Range,
}

/// Options for a single lock request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOptions {
    /// Row or range granularity.
    pub granularity: Granularity,
    /// Maximum time to stay queued behind a conflicting holder.
    ///
    /// `None` falls back to the service default; a service default of
    /// `None` waits until woken or cancelled.
    pub wait_timeout: Option<Duration>,
}

impl LockOptions {
    /// Options for a row-granularity request.
    pub fn row() -> Self {
        Self {
            granularity: Granularity::Row,
            ..Default::default()
        }
    }

    /// Options for a range-granularity request.
    pub fn range() -> Self {
        Self {
            granularity: Granularity::Range,
            ..Default::default()
        }
    }

    /// Set the wait timeout.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }
}

/// Outcome of a granted lock request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockResult {
    /// Boundary keys now owned by the requester: the row keys for a row
    /// request, the final (possibly widened) `[lo, hi]` for a range.
    pub keys: Vec<Bytes>,
}
