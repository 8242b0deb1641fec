//! Typed errors for the cache client and engine (§7).

use thiserror::Error;

/// Failure modes surfaced to callers of [`crate::client::CacheClient`] and
/// [`crate::engine::CacheEngine`].
///
/// A GET that comes back as a RESP error or null is deliberately *not* one of
/// these variants — per §7 that's a cache miss, not a failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache connection closed")]
    ConnectionClosed,

    #[error("cache operation timed out")]
    OpTimeout,

    #[error("RESP protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("reply arrived with no matching pending cache request")]
    PendingQueueEmpty,

    #[error("request canceled")]
    Canceled,
}
