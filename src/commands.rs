//! C2: RESP command builders plus the interned singleton requests.
//!
//! Token casing follows §4.2's note that the reimplementation emits
//! lowercase command tokens throughout, rather than the mixed casing the
//! original source happens to use in different files.

use crate::resp::RespValue;
use bytes::Bytes;
use std::sync::LazyLock;

fn str_array(parts: &[&str]) -> RespValue {
    RespValue::array(
        parts
            .iter()
            .map(|p| RespValue::bulk(Bytes::copy_from_slice(p.as_bytes())))
            .collect(),
    )
}

/// Interned `GET` command token, reused as the head of every GET request
/// this crate builds (§9 "Shared singletons").
pub static GET_TOKEN: LazyLock<RespValue> = LazyLock::new(|| RespValue::bulk(&b"get"[..]));

/// Interned `SET` command token.
pub static SET_TOKEN: LazyLock<RespValue> = LazyLock::new(|| RespValue::bulk(&b"set"[..]));

/// `READONLY` request, sent once per connection to cluster-mode replicas.
pub static READONLY_REQUEST: LazyLock<RespValue> = LazyLock::new(|| str_array(&["readonly"]));

/// `ASKING` request, issued ahead of a single redirected command.
pub static ASKING_REQUEST: LazyLock<RespValue> = LazyLock::new(|| str_array(&["asking"]));

/// RESP protocol version requested via `HELLO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespVersion {
    Resp2,
    Resp3,
}

/// `AUTH <password>` or `AUTH <username> <password>`.
pub fn auth_request(username: Option<&str>, password: &str) -> RespValue {
    let mut parts = vec!["auth".to_string()];
    if let Some(username) = username {
        parts.push(username.to_string());
    }
    parts.push(password.to_string());
    RespValue::array(
        parts
            .into_iter()
            .map(|p| RespValue::bulk(Bytes::from(p.into_bytes())))
            .collect(),
    )
}

/// `HELLO 2` or `HELLO 3`.
pub fn hello_request(version: RespVersion) -> RespValue {
    let version = match version {
        RespVersion::Resp2 => "2",
        RespVersion::Resp3 => "3",
    };
    str_array(&["hello", version])
}

/// `CLIENT TRACKING ON NOLOOP [BCAST]`.
pub fn client_tracking_request(enable_bcast_mode: bool) -> RespValue {
    if enable_bcast_mode {
        str_array(&["client", "tracking", "on", "noloop", "bcast"])
    } else {
        str_array(&["client", "tracking", "on", "noloop"])
    }
}

/// `SET <key> <value> PX <ttl-ms>` (§4.2).
pub fn set_request(key: &[u8], value: &[u8], ttl_ms: u64) -> RespValue {
    RespValue::array(vec![
        SET_TOKEN.clone(),
        RespValue::bulk(Bytes::copy_from_slice(key)),
        RespValue::bulk(Bytes::copy_from_slice(value)),
        RespValue::bulk(&b"px"[..]),
        RespValue::bulk(Bytes::from(ttl_ms.to_string().into_bytes())),
    ])
}

/// `UNLINK <key> [<key> ...]` (§4.2, used for targeted invalidation).
pub fn unlink_request<'a>(keys: impl IntoIterator<Item = &'a [u8]>) -> RespValue {
    let mut items = vec![RespValue::bulk(&b"unlink"[..])];
    items.extend(keys.into_iter().map(|k| RespValue::bulk(Bytes::copy_from_slice(k))));
    RespValue::array(items)
}

/// `FLUSHALL SYNC` or `FLUSHALL ASYNC` (§4.2/§4.4).
pub fn flushall_request(synchronous: bool) -> RespValue {
    let mode = if synchronous { "sync" } else { "async" };
    str_array(&["flushall", mode])
}

/// Builds the `GET <key>` request the cache engine issues on a miss path.
pub fn get_request(key: &[u8]) -> RespValue {
    RespValue::array(vec![GET_TOKEN.clone(), RespValue::bulk(Bytes::copy_from_slice(key))])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_strings(v: &RespValue) -> Vec<String> {
        match v {
            RespValue::Array(Some(items)) => items
                .iter()
                .map(|i| String::from_utf8(i.as_bytes().unwrap().to_vec()).unwrap())
                .collect(),
            _ => panic!("expected array"),
        }
    }

    #[test]
    fn auth_without_username() {
        assert_eq!(as_strings(&auth_request(None, "hunter2")), vec!["auth", "hunter2"]);
    }

    #[test]
    fn auth_with_username() {
        assert_eq!(
            as_strings(&auth_request(Some("default"), "hunter2")),
            vec!["auth", "default", "hunter2"]
        );
    }

    #[test]
    fn hello_picks_protocol_version() {
        assert_eq!(as_strings(&hello_request(RespVersion::Resp3)), vec!["hello", "3"]);
    }

    #[test]
    fn tracking_request_adds_bcast_when_enabled() {
        assert_eq!(
            as_strings(&client_tracking_request(true)),
            vec!["client", "tracking", "on", "noloop", "bcast"]
        );
        assert_eq!(
            as_strings(&client_tracking_request(false)),
            vec!["client", "tracking", "on", "noloop"]
        );
    }

    #[test]
    fn set_request_uses_px_ttl() {
        assert_eq!(
            as_strings(&set_request(b"k", b"v", 5_000)),
            vec!["set", "k", "v", "px", "5000"]
        );
    }

    #[test]
    fn unlink_request_lists_all_keys() {
        assert_eq!(
            as_strings(&unlink_request([b"a".as_slice(), b"b".as_slice()])),
            vec!["unlink", "a", "b"]
        );
    }

    #[test]
    fn flushall_request_picks_mode() {
        assert_eq!(as_strings(&flushall_request(true)), vec!["flushall", "sync"]);
        assert_eq!(as_strings(&flushall_request(false)), vec!["flushall", "async"]);
    }

    #[test]
    fn singleton_tokens_compare_case_insensitively() {
        assert!(GET_TOKEN.eq_ignore_ascii_case("GET"));
        assert!(SET_TOKEN.eq_ignore_ascii_case("Set"));
    }
}
