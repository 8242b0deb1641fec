//! C3 (pipelined cache client) and C5 (response dispatcher), combined into
//! one actor task per connection — the spec keeps both pinned to the same
//! event-loop thread, so there is no reason to split them into separate
//! Rust tasks either.
//!
//! The actor owns the transport, the write buffer, the FIFO of in-flight
//! requests, and both timers (write-coalescing flush, request-or-idle
//! timeout) exclusively; nothing mutates that state from outside its own
//! `run` loop, so — as in the original single-threaded design — no lock is
//! needed around it. External callers reach it only through the `CacheClient`
//! handle's channel, mirroring the mpsc+oneshot+VecDeque shape in
//! redis-rs's `aio::multiplexed_connection`.

use crate::codec::RespCodec;
use crate::commands::{auth_request, client_tracking_request, hello_request, RespVersion};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::pending::{CancelFlag, PendingRequest, ReplyCallback, RequestHandle};
use crate::resp::{Frame, RespValue};
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

/// Connection lifecycle events a host can subscribe to, per §6's
/// "owner reopens, this crate never retries inline" contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    RemoteClose,
    LocalClose,
}

/// Cheap, cloneable handle to a running connection actor.
#[derive(Clone)]
pub struct CacheClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    in_flight: Arc<AtomicUsize>,
    events_tx: broadcast::Sender<ConnectionEvent>,
}

enum Command {
    MakeRequest {
        request: RespValue,
        callback: ReplyCallback,
        stat_name: &'static str,
        cancel: CancelFlag,
        respond: oneshot::Sender<bool>,
    },
    Close,
}

impl CacheClient {
    /// Spawns the actor task that owns `transport` and returns a handle to
    /// it. `push_tx` receives one entry per `CLIENT TRACKING` invalidation
    /// push, already unwrapped to the shape `CacheEngine::expire` takes:
    /// `Some(keys)` for a targeted invalidation, `None` for a bcast-mode
    /// flush-all. Push frames that aren't an `invalidate` message are
    /// logged and dropped — this connection has no other use for RESP3
    /// push frames.
    pub fn spawn<T>(transport: T, config: &CacheConfig, push_tx: mpsc::UnboundedSender<Option<Vec<RespValue>>>) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(16);
        let in_flight = Arc::new(AtomicUsize::new(0));

        let actor = ClientActor {
            framed: Framed::new(transport, RespCodec),
            pending: VecDeque::new(),
            cmd_rx,
            push_tx,
            events_tx: events_tx.clone(),
            in_flight: in_flight.clone(),
            closed: false,
            unflushed: 0,
            max_buffer_size_before_flush: config.max_buffer_size_before_flush.max(1),
            buffer_flush_timeout: config.buffer_flush_timeout,
            op_timeout: config.op_timeout,
            flush_due_at: None,
            op_due_at: None,
        };
        tokio::spawn(actor.run());

        Self { cmd_tx, in_flight, events_tx }
    }

    /// Enqueues `request`, returning a handle if the connection accepted it
    /// (still open) or `None` if it was already closed — the moral
    /// equivalent of `makeRequest` returning `false`.
    pub async fn make_request(
        &self,
        request: RespValue,
        callback: ReplyCallback,
        stat_name: &'static str,
    ) -> Option<RequestHandle> {
        let cancel = CancelFlag::new();
        let (respond_tx, respond_rx) = oneshot::channel();
        let cmd = Command::MakeRequest {
            request,
            callback,
            stat_name,
            cancel: cancel.clone(),
            respond: respond_tx,
        };
        if self.cmd_tx.send(cmd).is_err() {
            return None;
        }
        match respond_rx.await {
            Ok(true) => Some(RequestHandle::new(cancel)),
            _ => None,
        }
    }

    /// Fails all outstanding requests and tears down the connection. Does
    /// not attempt to reconnect — per §6, that decision belongs to the
    /// owner.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }

    /// True iff any request is currently in flight on this connection.
    pub fn active(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) > 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events_tx.subscribe()
    }

    /// `AUTH` (optional) + `HELLO 3` + `CLIENT TRACKING`, sent through the
    /// ordinary user queue rather than the cache engine's op queue — see
    /// `DESIGN.md`'s open-question note on this.
    pub async fn initialize(
        &self,
        credentials: Option<(Option<&str>, &str)>,
        config: &CacheConfig,
    ) -> Result<(), CacheError> {
        if let Some((username, password)) = credentials {
            self.send_and_await(auth_request(username, password), "auth").await?;
        }
        self.send_and_await(hello_request(RespVersion::Resp3), "hello").await?;
        if !config.disable_tracking {
            self.send_and_await(client_tracking_request(config.enable_bcast_mode), "client_tracking")
                .await?;
        }
        Ok(())
    }

    async fn send_and_await(&self, request: RespValue, stat_name: &'static str) -> Result<(), CacheError> {
        let (tx, rx) = oneshot::channel();
        let handle = self.make_request(request, ReplyCallback::Oneshot(tx), stat_name).await;
        if handle.is_none() {
            return Err(CacheError::ConnectionClosed);
        }
        match rx.await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(CacheError::ConnectionClosed),
        }
    }
}

struct ClientActor<T> {
    framed: Framed<T, RespCodec>,
    pending: VecDeque<PendingRequest>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    push_tx: mpsc::UnboundedSender<Option<Vec<RespValue>>>,
    events_tx: broadcast::Sender<ConnectionEvent>,
    in_flight: Arc<AtomicUsize>,
    closed: bool,
    unflushed: usize,
    max_buffer_size_before_flush: usize,
    buffer_flush_timeout: std::time::Duration,
    op_timeout: std::time::Duration,
    flush_due_at: Option<Instant>,
    op_due_at: Option<Instant>,
}

impl<T> ClientActor<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn run(mut self) {
        let _ = self.events_tx.send(ConnectionEvent::Connected);

        loop {
            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(Command::MakeRequest { request, callback, stat_name, cancel, respond }) => {
                            self.handle_make_request(request, callback, stat_name, cancel, respond).await;
                        }
                        Some(Command::Close) => {
                            self.fail_all(CacheError::ConnectionClosed);
                            self.shutdown(ConnectionEvent::LocalClose).await;
                            return;
                        }
                        None => {
                            self.fail_all(CacheError::ConnectionClosed);
                            self.shutdown(ConnectionEvent::LocalClose).await;
                            return;
                        }
                    }
                }

                frame = self.framed.next() => {
                    match frame {
                        Some(Ok(Frame::Push(payload))) => {
                            match parse_invalidation(&payload) {
                                Some(invalidation) => {
                                    let _ = self.push_tx.send(invalidation);
                                }
                                None => debug!(?payload, "ignoring non-invalidate push frame"),
                            }
                        }
                        Some(Ok(Frame::Reply(value))) => {
                            if let Err(err) = self.dispatch_reply(value) {
                                warn!(error = %err, "closing cache connection after protocol violation");
                                self.fail_all(err);
                                self.shutdown(ConnectionEvent::LocalClose).await;
                                return;
                            }
                        }
                        Some(Err(err)) => {
                            warn!(error = %err, "cache connection decode error");
                            self.fail_all(err);
                            self.shutdown(ConnectionEvent::RemoteClose).await;
                            return;
                        }
                        None => {
                            debug!("cache connection closed by remote");
                            self.fail_all(CacheError::ConnectionClosed);
                            self.shutdown(ConnectionEvent::RemoteClose).await;
                            return;
                        }
                    }
                }

                () = tokio::time::sleep_until(self.flush_due_at.unwrap_or_else(Instant::now)), if self.flush_due_at.is_some() => {
                    self.flush_due_at = None;
                    let _ = self.framed.flush().await;
                    self.unflushed = 0;
                }

                () = tokio::time::sleep_until(self.op_due_at.unwrap_or_else(Instant::now)), if self.op_due_at.is_some() => {
                    warn!("cache operation timed out, closing connection");
                    self.fail_all(CacheError::OpTimeout);
                    self.shutdown(ConnectionEvent::LocalClose).await;
                    return;
                }
            }
        }
    }

    async fn handle_make_request(
        &mut self,
        request: RespValue,
        callback: ReplyCallback,
        stat_name: &'static str,
        cancel: CancelFlag,
        respond: oneshot::Sender<bool>,
    ) {
        if self.closed {
            let _ = respond.send(false);
            return;
        }

        if self.framed.feed(request.clone()).await.is_err() {
            self.closed = true;
            let _ = respond.send(false);
            return;
        }

        self.pending.push_back(PendingRequest {
            callback,
            stat_name,
            cancel,
            original_request: request,
        });
        self.in_flight.store(self.pending.len(), Ordering::Release);
        if self.op_due_at.is_none() {
            self.op_due_at = Some(Instant::now() + self.op_timeout);
        }

        self.unflushed += 1;
        if self.unflushed >= self.max_buffer_size_before_flush {
            let _ = self.framed.flush().await;
            self.unflushed = 0;
            self.flush_due_at = None;
        } else if self.flush_due_at.is_none() {
            self.flush_due_at = Some(Instant::now() + self.buffer_flush_timeout);
        }

        let _ = respond.send(true);
    }

    /// §4.4/§7: pops the FIFO front and delivers. An empty deque on a reply
    /// is a protocol violation — never a process abort, just a connection
    /// close, per the REDESIGN FLAG replacing the original's assertion.
    fn dispatch_reply(&mut self, value: RespValue) -> Result<(), CacheError> {
        match self.pending.pop_front() {
            Some(pending) => {
                pending.deliver(Ok(value));
                self.in_flight.store(self.pending.len(), Ordering::Release);
                self.op_due_at = if self.pending.is_empty() {
                    None
                } else {
                    Some(Instant::now() + self.op_timeout)
                };
                Ok(())
            }
            None => Err(CacheError::PendingQueueEmpty),
        }
    }

    fn fail_all(&mut self, err: CacheError) {
        while let Some(pending) = self.pending.pop_front() {
            pending.deliver(Err(err.clone()));
        }
        self.in_flight.store(0, Ordering::Release);
        self.op_due_at = None;
        self.flush_due_at = None;
    }

    async fn shutdown(mut self, event: ConnectionEvent) {
        self.closed = true;
        let _ = self.framed.flush().await;
        let _ = self.events_tx.send(event);
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            if let Command::MakeRequest { respond, .. } = cmd {
                let _ = respond.send(false);
            }
        }
    }
}

/// §4.3/§4.5: recognizes a `CLIENT TRACKING` invalidation push — a push
/// frame whose first element is `invalidate` (case-insensitive) — and
/// unwraps its second element into the shape `CacheEngine::expire` wants.
/// A missing or null second element is treated as a flush-all, the
/// conservative reading per §7 rather than a silently ignored push.
/// Anything else (no `invalidate` tag, not an array at all) isn't ours to
/// interpret and is returned as `None` so the caller can drop it.
fn parse_invalidation(payload: &RespValue) -> Option<Option<Vec<RespValue>>> {
    let RespValue::Array(Some(items)) = payload else {
        return None;
    };
    let (tag, rest) = items.split_first()?;
    if !tag.eq_ignore_ascii_case("invalidate") {
        return None;
    }
    match rest.first() {
        None | Some(RespValue::Null) | Some(RespValue::Array(None)) => Some(None),
        Some(RespValue::Array(Some(keys))) => Some(Some(keys.clone())),
        Some(_) => Some(None),
    }
}
