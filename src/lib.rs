//! Client-side Redis read-through cache with RESP3 server-assisted
//! invalidation (`CLIENT TRACKING`), meant to sit inside a network proxy in
//! front of an upstream Redis cluster.
//!
//! [`CacheFilter`] is the facade: it bundles one [`CacheEngine`] per shard
//! (each wrapping its own [`CacheClient`] connection to a cache node) behind
//! a [`ShardRouter`].

pub mod classifier;
pub mod client;
pub mod codec;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod pending;
pub mod resp;
pub mod shard;

pub use client::{CacheClient, ConnectionEvent};
pub use config::CacheConfig;
pub use engine::CacheEngine;
pub use error::CacheError;
pub use resp::{CompositeArray, Frame, RespValue};
pub use shard::ShardRouter;

use tokio::sync::oneshot;

/// Top-level entry point a proxy embeds: routes each cacheable request to
/// the shard that owns its key, and exposes the per-shard engines directly
/// for connection-level concerns (initialization, invalidation pushes)
/// that are inherently tied to one connection rather than the whole fleet.
pub struct CacheFilter {
    engines: Vec<CacheEngine>,
    router: ShardRouter,
}

impl CacheFilter {
    /// Builds a filter over one engine per already-connected client. The
    /// order of `clients` determines shard index `0..clients.len()`.
    pub fn new(clients: Vec<CacheClient>, config: &CacheConfig) -> Self {
        let router = ShardRouter::new(clients.len() as u32);
        let engines = clients.into_iter().map(|client| CacheEngine::new(client, config)).collect();
        Self { engines, router }
    }

    pub fn shard_count(&self) -> usize {
        self.engines.len()
    }

    /// The engine owning the connection a given key would be routed to.
    pub fn engine_for_key(&self, key: &[u8]) -> &CacheEngine {
        &self.engines[self.router.shard_for_key(key)]
    }

    /// Direct access to one shard's engine, e.g. for wiring up its
    /// invalidation-push loop at startup.
    pub fn engine(&self, shard_index: usize) -> Option<&CacheEngine> {
        self.engines.get(shard_index)
    }

    /// §4.4 `makeCacheRequest`, routed to the shard owning the request's
    /// key.
    pub async fn make_cache_request(
        &self,
        request: &RespValue,
    ) -> Option<oneshot::Receiver<Result<Option<RespValue>, CacheError>>> {
        let key = classifier::extract_key(request)?;
        self.engine_for_key(key).make_cache_request(request).await
    }

    /// §4.4 `set`, routed to the shard owning the request's key.
    pub async fn set(&self, request: &RespValue, origin_response: &RespValue) {
        let Some(key) = classifier::extract_key(request) else {
            return;
        };
        self.engine_for_key(key).set(request, origin_response).await;
    }

    /// §4.4 `clearCache`, broadcast to every shard — a flush is global by
    /// definition.
    pub async fn clear_cache(&self, synchronous: bool) {
        for engine in &self.engines {
            engine.clear_cache(synchronous).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::get_request;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;

    fn test_config() -> CacheConfig {
        CacheConfig {
            cache_shards: 2,
            op_timeout: std::time::Duration::from_secs(5),
            max_buffer_size_before_flush: 1,
            buffer_flush_timeout: std::time::Duration::from_millis(1),
            ..CacheConfig::default()
        }
    }

    #[tokio::test]
    async fn routes_get_to_a_stable_shard() {
        let config = test_config();
        let (client_a_io, mut server_a) = tokio::io::duplex(4096);
        let (client_b_io, mut server_b) = tokio::io::duplex(4096);
        let (push_tx_a, _push_rx_a) = mpsc::unbounded_channel();
        let (push_tx_b, _push_rx_b) = mpsc::unbounded_channel();
        let client_a = CacheClient::spawn(client_a_io, &config, push_tx_a);
        let client_b = CacheClient::spawn(client_b_io, &config, push_tx_b);
        let filter = CacheFilter::new(vec![client_a, client_b], &config);
        assert_eq!(filter.shard_count(), 2);

        let request = get_request(b"user:42");
        let shard = filter.router.shard_for_key(b"user:42");
        let rx = filter.make_cache_request(&request).await.unwrap();

        let mut buf = [0u8; 256];
        let server = if shard == 0 { &mut server_a } else { &mut server_b };
        let n = server.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).contains("user:42"));
        server.write_all(b"$3\r\nfoo\r\n").await.unwrap();

        assert_eq!(rx.await.unwrap().unwrap(), Some(RespValue::bulk(&b"foo"[..])));
    }

    #[tokio::test]
    async fn clear_cache_flushes_every_shard() {
        let config = test_config();
        let (client_a_io, mut server_a) = tokio::io::duplex(4096);
        let (client_b_io, mut server_b) = tokio::io::duplex(4096);
        let (push_tx_a, _push_rx_a) = mpsc::unbounded_channel();
        let (push_tx_b, _push_rx_b) = mpsc::unbounded_channel();
        let client_a = CacheClient::spawn(client_a_io, &config, push_tx_a);
        let client_b = CacheClient::spawn(client_b_io, &config, push_tx_b);
        let filter = CacheFilter::new(vec![client_a, client_b], &config);

        let clear = tokio::spawn(async move { filter.clear_cache(true).await });

        let mut buf = [0u8; 256];
        let n = server_a.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).to_lowercase().contains("flushall"));
        server_a.write_all(b"+OK\r\n").await.unwrap();

        let n = server_b.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).to_lowercase().contains("flushall"));
        server_b.write_all(b"+OK\r\n").await.unwrap();

        clear.await.unwrap();
    }
}
