//! C4: the cache engine. Near-literal port of `CacheImpl`'s control flow —
//! decide whether a request is cacheable, issue the matching cache-node
//! command, and interpret the eventual reply according to which op it was.
//!
//! `pending` is this module's `PendingCacheRequest` FIFO (§3/§4.4). Because
//! external callers (arbitrary proxy-request tasks) can call `make_cache_request`/
//! `set`/`expire`/`clear_cache` concurrently, the deque is guarded by a
//! `tokio::sync::Mutex` held across both "push the op" and "hand the command
//! to the client" — a short, await-free-in-spirit critical section that
//! plays the role the original's single event-loop thread played for free.
//! The deque is popped only from the dispatch loop below, so its contents
//! are never observed out of order with the replies they describe.

use crate::classifier::{is_cacheable, IgnorePrefixSet};
use crate::client::CacheClient;
use crate::commands::{flushall_request, get_request, set_request, unlink_request};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::pending::{PendingCacheRequest, ReplyCallback, ReplyResult};
use crate::resp::RespValue;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

pub struct CacheEngine {
    client: CacheClient,
    ignore_key_prefixes: IgnorePrefixSet,
    ttl: std::time::Duration,
    disable_flushing: bool,
    pending: Arc<Mutex<VecDeque<PendingCacheRequest>>>,
    reply_tx: mpsc::UnboundedSender<ReplyResult>,
}

impl CacheEngine {
    /// Wraps `client` with cache orchestration, per §4.4. Spawns the one
    /// background task that drains cache-internal replies in FIFO order.
    pub fn new(client: CacheClient, config: &CacheConfig) -> Self {
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Mutex::new(VecDeque::new()));
        tokio::spawn(run_dispatch_loop(pending.clone(), reply_rx));
        Self {
            client,
            ignore_key_prefixes: config.ignore_key_prefixes.clone(),
            ttl: config.ttl,
            disable_flushing: config.disable_flushing,
            pending,
            reply_tx,
        }
    }

    /// Establishes the connection's cache preconditions: optional `AUTH`,
    /// `HELLO 3`, and `CLIENT TRACKING` unless disabled. These commands go
    /// through `CacheClient::initialize`'s own user queue, not this
    /// engine's `PendingCacheRequest` deque (see `DESIGN.md`).
    ///
    /// If `clear_on_init`, issues a synchronous `FLUSHALL` immediately
    /// after, per §4.4/§6 — a fresh connection has no way to know whether
    /// invalidations it missed while disconnected left the local cache
    /// stale, so the owning proxy asks for a clean slate up front. This is
    /// the only site gated by `cache-disable-flushing`: that flag suppresses
    /// the on-reconnect flush, not cache population or coherence flushes.
    pub async fn initialize(
        &self,
        credentials: Option<(Option<&str>, &str)>,
        config: &CacheConfig,
        clear_on_init: bool,
    ) -> Result<(), CacheError> {
        self.client.initialize(credentials, config).await?;
        if clear_on_init && !self.disable_flushing {
            self.clear_cache(true).await;
        }
        Ok(())
    }

    /// §4.4 `makeCacheRequest`: if `request` is cacheable, issues a `GET`
    /// and returns a receiver for the eventual hit/miss/failure. Returns
    /// `None` if the request isn't cacheable — the caller should just
    /// forward it upstream.
    pub async fn make_cache_request(
        &self,
        request: &RespValue,
    ) -> Option<oneshot::Receiver<Result<Option<RespValue>, CacheError>>> {
        if !is_cacheable(request, &self.ignore_key_prefixes) {
            return None;
        }
        let key = crate::classifier::extract_key(request)?;
        let (tx, rx) = oneshot::channel();

        // Held across both the push and the handoff to the client so no
        // other engine caller's command can land between them and desync
        // the queue from the replies it describes.
        let mut guard = self.pending.lock().await;
        let handle = self
            .client
            .make_request(get_request(key), ReplyCallback::CacheEngine(self.reply_tx.clone()), "get")
            .await;
        handle.as_ref()?;
        guard.push_back(PendingCacheRequest::Get(tx));
        drop(guard);
        Some(rx)
    }

    /// §4.4 `set`: populates the cache with an origin response for a
    /// request that was previously found cacheable. Absorbs SET failures
    /// (§7) — a failed populate is not surfaced to the caller.
    pub async fn set(&self, request: &RespValue, origin_response: &RespValue) {
        let Some(key) = crate::classifier::extract_key(request) else {
            return;
        };
        if !RespValue::is_bulk_string(origin_response) {
            return;
        }
        let Some(value) = origin_response.as_bytes() else {
            return;
        };
        let ttl_ms = u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX);

        let mut guard = self.pending.lock().await;
        let handle = self
            .client
            .make_request(
                set_request(key, value, ttl_ms),
                ReplyCallback::CacheEngine(self.reply_tx.clone()),
                "set",
            )
            .await;
        if handle.is_some() {
            guard.push_back(PendingCacheRequest::Set);
        }
    }

    /// §4.4 `expire`: invoked when a `CLIENT TRACKING` invalidation push
    /// arrives. `keys == None` is a bcast-mode flush notification (the
    /// tracking table overflowed upstream) and is treated the same as an
    /// explicit `clearCache(true)` — a `FLUSHALL SYNC` against the cache
    /// node, since every locally cached entry must now be considered stale.
    pub async fn expire(&self, keys: Option<Vec<RespValue>>) {
        let Some(keys) = keys else {
            debug!("received flush-all invalidation push");
            self.clear_cache(true).await;
            return;
        };
        let key_bytes: Vec<&[u8]> = keys.iter().filter_map(RespValue::as_bytes).collect();
        if key_bytes.is_empty() {
            return;
        }

        let mut guard = self.pending.lock().await;
        let handle = self
            .client
            .make_request(
                unlink_request(key_bytes),
                ReplyCallback::CacheEngine(self.reply_tx.clone()),
                "unlink",
            )
            .await;
        if handle.is_some() {
            guard.push_back(PendingCacheRequest::Expire);
        }
    }

    /// §4.4 `clearCache`: unconditional `FLUSHALL SYNC` or `FLUSHALL ASYNC`
    /// — called directly for an explicit flush request, and from `expire`
    /// for the server-flush coherence path (`Push["invalidate", Null]`).
    /// Not gated by `cache-disable-flushing`: that flag only suppresses the
    /// on-reconnect flush issued from `initialize`, never this one — a
    /// suppressed coherence flush here would leave the cache silently
    /// stale, contradicting §7's "degrade to a conservative flush, never a
    /// user-visible error."
    pub async fn clear_cache(&self, synchronous: bool) {
        let mut guard = self.pending.lock().await;
        let handle = self
            .client
            .make_request(
                flushall_request(synchronous),
                ReplyCallback::CacheEngine(self.reply_tx.clone()),
                "flushall",
            )
            .await;
        if handle.is_some() {
            guard.push_back(PendingCacheRequest::Flush);
        }
    }
}

async fn run_dispatch_loop(
    pending: Arc<Mutex<VecDeque<PendingCacheRequest>>>,
    mut reply_rx: mpsc::UnboundedReceiver<ReplyResult>,
) {
    while let Some(result) = reply_rx.recv().await {
        let entry = {
            let mut guard = pending.lock().await;
            guard.pop_front()
        };
        match entry {
            None => {
                warn!("cache reply arrived with an empty PendingCacheRequest queue");
                break;
            }
            Some(PendingCacheRequest::Get(tx)) => {
                let resolved = match result {
                    Err(err) => Err(err),
                    Ok(RespValue::Error(_)) | Ok(RespValue::Null) | Ok(RespValue::BulkString(None)) => Ok(None),
                    Ok(value) => Ok(Some(value)),
                };
                let _ = tx.send(resolved);
            }
            Some(PendingCacheRequest::Set) => {
                if let Ok(RespValue::Error(msg)) = &result {
                    debug!(error = %msg, "cache SET rejected, absorbed");
                }
            }
            Some(PendingCacheRequest::Expire) => {
                if let Ok(RespValue::Error(msg)) = &result {
                    debug!(error = %msg, "cache UNLINK rejected, absorbed");
                }
            }
            Some(PendingCacheRequest::Flush) => {
                if let Ok(RespValue::Error(msg)) = &result {
                    debug!(error = %msg, "cache FLUSHALL rejected, absorbed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resp::RespValue;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_config() -> CacheConfig {
        CacheConfig {
            ttl: std::time::Duration::from_secs(30),
            op_timeout: std::time::Duration::from_secs(5),
            max_buffer_size_before_flush: 1,
            buffer_flush_timeout: std::time::Duration::from_millis(1),
            ..CacheConfig::default()
        }
    }

    fn get(key: &[u8]) -> RespValue {
        RespValue::array(vec![
            RespValue::bulk(&b"GET"[..]),
            RespValue::bulk(bytes::Bytes::copy_from_slice(key)),
        ])
    }

    #[tokio::test]
    async fn make_cache_request_delivers_hit() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);
        let (push_tx, _push_rx) = mpsc::unbounded_channel();
        let config = test_config();
        let client = CacheClient::spawn(client_io, &config, push_tx);
        let engine = CacheEngine::new(client, &config);

        let rx = engine.make_cache_request(&get(b"foo")).await.unwrap();

        let mut buf = [0u8; 256];
        let n = server_io.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).contains("foo"));
        server_io.write_all(b"$3\r\nbar\r\n").await.unwrap();

        assert_eq!(rx.await.unwrap().unwrap(), Some(RespValue::bulk(&b"bar"[..])));
    }

    #[tokio::test]
    async fn make_cache_request_error_reply_is_a_miss_not_a_failure() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);
        let (push_tx, _push_rx) = mpsc::unbounded_channel();
        let config = test_config();
        let client = CacheClient::spawn(client_io, &config, push_tx);
        let engine = CacheEngine::new(client, &config);

        let rx = engine.make_cache_request(&get(b"foo")).await.unwrap();
        let mut buf = [0u8; 256];
        let _ = server_io.read(&mut buf).await.unwrap();
        server_io.write_all(b"-ERR boom\r\n").await.unwrap();

        assert_eq!(rx.await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn non_cacheable_request_is_rejected_up_front() {
        let (client_io, _server_io) = tokio::io::duplex(4096);
        let (push_tx, _push_rx) = mpsc::unbounded_channel();
        let config = test_config();
        let client = CacheClient::spawn(client_io, &config, push_tx);
        let engine = CacheEngine::new(client, &config);

        let set_cmd = RespValue::array(vec![
            RespValue::bulk(&b"SET"[..]),
            RespValue::bulk(&b"foo"[..]),
            RespValue::bulk(&b"bar"[..]),
        ]);
        assert!(engine.make_cache_request(&set_cmd).await.is_none());
    }

    #[tokio::test]
    async fn ignored_prefix_is_never_looked_up() {
        let (client_io, _server_io) = tokio::io::duplex(4096);
        let (push_tx, _push_rx) = mpsc::unbounded_channel();
        let mut config = test_config();
        config.ignore_key_prefixes = IgnorePrefixSet::new([bytes::Bytes::from_static(b"tmp:")]);
        let client = CacheClient::spawn(client_io, &config, push_tx);
        let engine = CacheEngine::new(client, &config);

        assert!(engine.make_cache_request(&get(b"tmp:foo")).await.is_none());
    }

    #[tokio::test]
    async fn expire_issues_unlink_for_targeted_keys() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);
        let (push_tx, _push_rx) = mpsc::unbounded_channel();
        let config = test_config();
        let client = CacheClient::spawn(client_io, &config, push_tx);
        let engine = CacheEngine::new(client, &config);

        engine.expire(Some(vec![RespValue::bulk(&b"foo"[..])])).await;

        let mut buf = [0u8; 256];
        let n = server_io.read(&mut buf).await.unwrap();
        let sent = String::from_utf8_lossy(&buf[..n]);
        assert!(sent.to_lowercase().contains("unlink"));
        assert!(sent.contains("foo"));
    }

    #[tokio::test]
    async fn expire_with_null_payload_flushes_everything() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);
        let (push_tx, _push_rx) = mpsc::unbounded_channel();
        let config = test_config();
        let client = CacheClient::spawn(client_io, &config, push_tx);
        let engine = CacheEngine::new(client, &config);

        engine.expire(None).await;

        let mut buf = [0u8; 256];
        let n = server_io.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).to_lowercase().contains("flushall"));
    }

    #[tokio::test]
    async fn initialize_does_not_touch_cache_queue() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);
        let (push_tx, _push_rx) = mpsc::unbounded_channel();
        let config = test_config();
        let client = CacheClient::spawn(client_io, &config, push_tx);
        let engine = CacheEngine::new(client, &config);

        let init = tokio::spawn(async move { engine.initialize(None, &test_config(), false).await });

        let mut buf = [0u8; 256];
        // HELLO
        let n = server_io.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).to_lowercase().contains("hello"));
        server_io.write_all(b"+OK\r\n").await.unwrap();
        // CLIENT TRACKING
        let n = server_io.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).to_lowercase().contains("tracking"));
        server_io.write_all(b"+OK\r\n").await.unwrap();

        assert!(init.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn initialize_with_clear_on_init_flushes_after_handshake() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);
        let (push_tx, _push_rx) = mpsc::unbounded_channel();
        let config = test_config();
        let client = CacheClient::spawn(client_io, &config, push_tx);
        let engine = CacheEngine::new(client, &config);

        let init = tokio::spawn(async move { engine.initialize(None, &test_config(), true).await });

        let mut buf = [0u8; 256];
        let n = server_io.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).to_lowercase().contains("hello"));
        server_io.write_all(b"+OK\r\n").await.unwrap();
        let n = server_io.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).to_lowercase().contains("tracking"));
        server_io.write_all(b"+OK\r\n").await.unwrap();
        let n = server_io.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).to_lowercase().contains("flushall"));
        server_io.write_all(b"+OK\r\n").await.unwrap();

        assert!(init.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn disable_flushing_suppresses_only_the_reconnect_flush() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);
        let (push_tx, _push_rx) = mpsc::unbounded_channel();
        let mut config = test_config();
        config.disable_flushing = true;
        let client = CacheClient::spawn(client_io, &config, push_tx);
        let engine = CacheEngine::new(client, &config);

        let init = tokio::spawn(async move { engine.initialize(None, &test_config(), true).await });
        let mut buf = [0u8; 256];
        let n = server_io.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).to_lowercase().contains("hello"));
        server_io.write_all(b"+OK\r\n").await.unwrap();
        let n = server_io.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).to_lowercase().contains("tracking"));
        server_io.write_all(b"+OK\r\n").await.unwrap();
        assert!(init.await.unwrap().is_ok());

        // No FLUSHALL follows the handshake: disable_flushing suppressed it.
        engine.set(&get(b"foo"), &RespValue::bulk(&b"bar"[..])).await;
        let n = server_io.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).to_lowercase().contains("set"));
    }

    #[tokio::test]
    async fn set_is_not_gated_by_disable_flushing() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);
        let (push_tx, _push_rx) = mpsc::unbounded_channel();
        let mut config = test_config();
        config.disable_flushing = true;
        let client = CacheClient::spawn(client_io, &config, push_tx);
        let engine = CacheEngine::new(client, &config);

        engine.set(&get(b"foo"), &RespValue::bulk(&b"bar"[..])).await;

        let mut buf = [0u8; 256];
        let n = server_io.read(&mut buf).await.unwrap();
        let sent = String::from_utf8_lossy(&buf[..n]);
        assert!(sent.to_lowercase().contains("set"));
        assert!(sent.contains("foo"));
        assert!(sent.contains("bar"));
    }

    #[tokio::test]
    async fn clear_cache_is_not_gated_by_disable_flushing() {
        let (client_io, mut server_io) = tokio::io::duplex(4096);
        let (push_tx, _push_rx) = mpsc::unbounded_channel();
        let mut config = test_config();
        config.disable_flushing = true;
        let client = CacheClient::spawn(client_io, &config, push_tx);
        let engine = CacheEngine::new(client, &config);

        engine.clear_cache(true).await;

        let mut buf = [0u8; 256];
        let n = server_io.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).to_lowercase().contains("flushall"));
    }
}
