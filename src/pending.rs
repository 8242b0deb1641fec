//! Queue entry types for C3's user-facing FIFO and C4's cache-op FIFO.
//!
//! The original C++ `PendingRequest` held a reference back into its owning
//! client so callbacks could walk connection state. Per the spec's own
//! redesign note we drop that back-reference entirely: a pending entry here
//! holds only the data it needs to deliver a reply, plus a cancel flag the
//! holder of a [`RequestHandle`] can flip independently of the queue.

use crate::error::CacheError;
use crate::resp::RespValue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub type ReplyResult = Result<RespValue, CacheError>;

/// Shared cancellation bit. Cloning gives two handles to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Handle returned to a caller of `make_request`. Dropping it has no effect;
/// `cancel()` must be called explicitly to suppress delivery of the reply.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    cancel: CancelFlag,
}

impl RequestHandle {
    pub(crate) fn new(cancel: CancelFlag) -> Self {
        Self { cancel }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Where a decoded reply for a given request should go.
///
/// `Oneshot` is used for ordinary proxied user commands, each with its own
/// one-off reply channel. `CacheEngine` is used when the cache engine itself
/// is the caller: it shares one channel across every command it issues, and
/// relies on its own `PendingCacheRequest` deque (§4.4) to know which
/// operation a given reply belongs to, exactly as `CacheImpl` relied on its
/// own `pending_requests_` deque in the original rather than per-call state.
pub enum ReplyCallback {
    Oneshot(oneshot::Sender<ReplyResult>),
    CacheEngine(mpsc::UnboundedSender<ReplyResult>),
}

/// An entry in C3's single FIFO of in-flight requests.
pub struct PendingRequest {
    pub callback: ReplyCallback,
    pub stat_name: &'static str,
    pub cancel: CancelFlag,
    pub original_request: RespValue,
}

impl PendingRequest {
    /// Deliver `result`, unless the request was canceled after it was
    /// queued. A canceled `Oneshot` request silently drops the sender
    /// (the receiving side observes a closed channel, same as any other
    /// connection-loss signal).
    pub fn deliver(self, result: ReplyResult) {
        if self.cancel.is_canceled() {
            return;
        }
        match self.callback {
            ReplyCallback::Oneshot(tx) => {
                let _ = tx.send(result);
            }
            ReplyCallback::CacheEngine(tx) => {
                let _ = tx.send(result);
            }
        }
    }
}

/// C4's cache-op FIFO entry (§3, §4.4). `Get` carries the resolution channel
/// back to whoever called `make_cache_request`; the other ops have no
/// external waiter, matching §4.4's table (SET/EXPIRE/FLUSH replies are
/// either absorbed or only drive bookkeeping).
pub enum PendingCacheRequest {
    /// `Ok(Some(value))` is a hit, `Ok(None)` is a miss (RESP error or null
    /// reply, per §7 — not a failure), `Err` is a connection failure.
    Get(oneshot::Sender<Result<Option<RespValue>, CacheError>>),
    Set,
    Expire,
    Flush,
}

impl PendingCacheRequest {
    pub fn op_name(&self) -> &'static str {
        match self {
            PendingCacheRequest::Get(_) => "GET",
            PendingCacheRequest::Set => "SET",
            PendingCacheRequest::Expire => "EXPIRE",
            PendingCacheRequest::Flush => "FLUSH",
        }
    }
}
