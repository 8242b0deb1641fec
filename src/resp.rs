//! RESP value tree and the reply/push tagged union.
//!
//! This is the data model from the spec: a tagged tree mirroring RESP2/RESP3,
//! plus `CompositeArray`, a view into a larger array used when one physical
//! frame carries several logical commands (pipelined inline commands sharing
//! a single incoming buffer).

use bytes::Bytes;
use std::sync::Arc;

/// A decoded RESP value.
///
/// Text comparisons against command names are always ASCII case-insensitive;
/// use [`RespValue::eq_ignore_ascii_case`] rather than comparing `as_bytes()`
/// directly.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    /// `None` is a RESP2 null bulk string (`$-1\r\n`).
    BulkString(Option<Bytes>),
    /// `None` is a RESP2 null array (`*-1\r\n`).
    Array(Option<Vec<RespValue>>),
    /// A command plus a `[begin, end)` slice into a shared base array.
    CompositeArray(CompositeArray),
    /// A RESP3 out-of-band push message.
    Push(Vec<RespValue>),
    /// A RESP3 null (`_\r\n`).
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositeArray {
    pub command: Box<RespValue>,
    pub base: Arc<Vec<RespValue>>,
    pub begin: usize,
    pub end: usize,
}

impl RespValue {
    pub fn bulk(bytes: impl Into<Bytes>) -> Self {
        RespValue::BulkString(Some(bytes.into()))
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(Some(values))
    }

    /// The raw bytes behind a string-ish variant, if any.
    ///
    /// `SimpleString` and `Error` are included because command names can
    /// legally arrive as either, not just `BulkString`.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(Some(b)) => Some(b.as_ref()),
            RespValue::SimpleString(s) => Some(s.as_bytes()),
            RespValue::Error(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// ASCII case-insensitive comparison against a command/token name.
    pub fn eq_ignore_ascii_case(&self, other: &str) -> bool {
        self.as_bytes()
            .is_some_and(|b| b.eq_ignore_ascii_case(other.as_bytes()))
    }

    pub fn is_bulk_string(&self) -> bool {
        matches!(self, RespValue::BulkString(Some(_)))
    }
}

/// Tagged union the decoder emits, per the spec's design note: the dispatcher
/// should be total over variants with no runtime type peek.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Reply(RespValue),
    Push(RespValue),
}
