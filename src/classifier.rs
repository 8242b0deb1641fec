//! C1: decides which proxied requests are cacheable, and extracts the key
//! that caches/invalidates against.

use crate::resp::RespValue;
use bytes::Bytes;

/// Extracts the key a request addresses, if it has exactly one.
///
/// Only `GET` is read-through cacheable per §1/§4.1; everything else
/// (including multi-key commands) returns `None` here even if it happens to
/// carry a recognizable key, because the engine only ever looks this up for
/// cacheability decisions on reads.
pub fn extract_key(request: &RespValue) -> Option<&[u8]> {
    match request {
        RespValue::Array(Some(items)) => {
            let command = items.first()?;
            if command.eq_ignore_ascii_case("get") {
                items.get(1)?.as_bytes()
            } else {
                None
            }
        }
        RespValue::CompositeArray(composite) => {
            if composite.command.eq_ignore_ascii_case("get") {
                composite.base.get(composite.begin + 1)?.as_bytes()
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Configured set of key prefixes the cache never reads or writes through
/// for (§9 Open Question: resolved as `startsWith`, not the original's
/// position-0-only `rfind` check).
#[derive(Debug, Clone, Default)]
pub struct IgnorePrefixSet(Vec<Bytes>);

impl IgnorePrefixSet {
    pub fn new(prefixes: impl IntoIterator<Item = Bytes>) -> Self {
        Self(prefixes.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, key: &[u8]) -> bool {
        self.0.iter().any(|prefix| key.starts_with(prefix.as_ref()))
    }
}

/// Whether `request` should be served/populated through the cache.
pub fn is_cacheable(request: &RespValue, ignore: &IgnorePrefixSet) -> bool {
    match extract_key(request) {
        Some(key) => !ignore.matches(key),
        None => false,
    }
}
