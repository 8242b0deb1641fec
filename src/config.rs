//! Engine/client configuration, loaded from environment variables the way
//! the teacher's `L2Cache::new`/`RedisCache::with_url` read `REDIS_URL`.

use crate::classifier::IgnorePrefixSet;
use bytes::Bytes;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub cache_cluster: String,
    pub op_timeout: Duration,
    pub ttl: Duration,
    pub enable_bcast_mode: bool,
    pub ignore_key_prefixes: IgnorePrefixSet,
    pub cache_shards: u32,
    pub disable_tracking: bool,
    pub disable_flushing: bool,
    pub max_buffer_size_before_flush: usize,
    pub buffer_flush_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_cluster: String::new(),
            op_timeout: Duration::from_millis(250),
            ttl: Duration::from_secs(60),
            enable_bcast_mode: false,
            ignore_key_prefixes: IgnorePrefixSet::default(),
            cache_shards: 1,
            disable_tracking: false,
            disable_flushing: false,
            max_buffer_size_before_flush: 16 * 1024,
            buffer_flush_timeout: Duration::from_millis(1),
        }
    }
}

impl CacheConfig {
    /// Loads configuration from environment variables, falling back to
    /// [`CacheConfig::default`] values for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_cluster: std::env::var("CACHE_CLUSTER").unwrap_or(defaults.cache_cluster),
            op_timeout: env_millis("CACHE_OP_TIMEOUT_MS", defaults.op_timeout),
            ttl: env_millis("CACHE_TTL_MS", defaults.ttl),
            enable_bcast_mode: env_bool("CACHE_ENABLE_BCAST_MODE", defaults.enable_bcast_mode),
            ignore_key_prefixes: env_ignore_prefixes("CACHE_IGNORE_KEY_PREFIXES"),
            cache_shards: env_parse("CACHE_SHARDS", defaults.cache_shards),
            disable_tracking: env_bool("CACHE_DISABLE_TRACKING", defaults.disable_tracking),
            disable_flushing: env_bool("CACHE_DISABLE_FLUSHING", defaults.disable_flushing),
            max_buffer_size_before_flush: env_parse(
                "CACHE_MAX_BUFFER_SIZE_BEFORE_FLUSH",
                defaults.max_buffer_size_before_flush,
            ),
            buffer_flush_timeout: env_millis("CACHE_BUFFER_FLUSH_TIMEOUT_MS", defaults.buffer_flush_timeout),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_ignore_prefixes(key: &str) -> IgnorePrefixSet {
    match std::env::var(key) {
        Ok(v) => IgnorePrefixSet::new(
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Bytes::from(s.as_bytes().to_vec())),
        ),
        Err(_) => IgnorePrefixSet::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = CacheConfig::default();
        assert_eq!(config.cache_shards, 1);
        assert!(!config.disable_tracking);
        assert!(config.ignore_key_prefixes.is_empty());
    }
}
