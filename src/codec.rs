//! Minimal RESP2/RESP3 wire framing over `tokio_util::codec`.
//!
//! Out of the five core components this belongs to none of them directly —
//! it is the "something concrete" the pipelined client needs to actually
//! read and write bytes. Grounded on the framing shape in redis-rs's
//! `aio::multiplexed_connection`: a decoder that hands back a tagged frame,
//! with push messages (`>`) distinguished from ordinary replies at the
//! parse layer rather than sniffed later.

use crate::error::CacheError;
use crate::resp::{Frame, RespValue};
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

#[derive(Debug, Default)]
pub struct RespCodec;

impl Encoder<RespValue> for RespCodec {
    type Error = CacheError;

    fn encode(&mut self, item: RespValue, dst: &mut BytesMut) -> Result<(), CacheError> {
        encode_value(&item, dst);
        Ok(())
    }
}

impl Decoder for RespCodec {
    type Item = Frame;
    type Error = CacheError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CacheError> {
        match parse_value(src)? {
            None => Ok(None),
            Some((value, consumed)) => {
                src.advance(consumed);
                Ok(Some(match value {
                    RespValue::Push(items) => Frame::Push(RespValue::Array(Some(items))),
                    other => Frame::Reply(other),
                }))
            }
        }
    }
}

fn encode_value(value: &RespValue, dst: &mut BytesMut) {
    use std::fmt::Write as _;
    match value {
        RespValue::SimpleString(s) => {
            dst.extend_from_slice(b"+");
            dst.extend_from_slice(s.as_bytes());
            dst.extend_from_slice(b"\r\n");
        }
        RespValue::Error(s) => {
            dst.extend_from_slice(b"-");
            dst.extend_from_slice(s.as_bytes());
            dst.extend_from_slice(b"\r\n");
        }
        RespValue::Integer(n) => {
            let mut header = String::with_capacity(16);
            let _ = write!(header, ":{n}\r\n");
            dst.extend_from_slice(header.as_bytes());
        }
        RespValue::BulkString(Some(b)) => {
            let mut header = String::with_capacity(16);
            let _ = write!(header, "${}\r\n", b.len());
            dst.extend_from_slice(header.as_bytes());
            dst.extend_from_slice(b);
            dst.extend_from_slice(b"\r\n");
        }
        RespValue::BulkString(None) => dst.extend_from_slice(b"$-1\r\n"),
        RespValue::Null => dst.extend_from_slice(b"$-1\r\n"),
        RespValue::Array(Some(items)) => {
            let mut header = String::with_capacity(16);
            let _ = write!(header, "*{}\r\n", items.len());
            dst.extend_from_slice(header.as_bytes());
            for item in items {
                encode_value(item, dst);
            }
        }
        RespValue::Array(None) => dst.extend_from_slice(b"*-1\r\n"),
        RespValue::CompositeArray(composite) => {
            let slice = &composite.base[composite.begin..composite.end];
            let mut header = String::with_capacity(16);
            let _ = write!(header, "*{}\r\n", slice.len());
            dst.extend_from_slice(header.as_bytes());
            for item in slice {
                encode_value(item, dst);
            }
        }
        RespValue::Push(items) => {
            let mut header = String::with_capacity(16);
            let _ = write!(header, ">{}\r\n", items.len());
            dst.extend_from_slice(header.as_bytes());
            for item in items {
                encode_value(item, dst);
            }
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn parse_line(buf: &[u8]) -> Option<(&[u8], usize)> {
    let pos = find_crlf(buf)?;
    Some((&buf[..pos], pos + 2))
}

fn protocol_error(msg: impl Into<String>) -> CacheError {
    CacheError::ProtocolViolation(msg.into())
}

/// Parses one complete RESP value from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` doesn't yet hold a complete value, so the
/// caller can wait for more bytes rather than treating partial frames as
/// errors.
fn parse_value(buf: &[u8]) -> Result<Option<(RespValue, usize)>, CacheError> {
    let Some(&tag) = buf.first() else {
        return Ok(None);
    };
    let rest = &buf[1..];
    match tag {
        b'+' => match parse_line(rest) {
            Some((line, len)) => Ok(Some((
                RespValue::SimpleString(String::from_utf8_lossy(line).into_owned()),
                1 + len,
            ))),
            None => Ok(None),
        },
        b'-' => match parse_line(rest) {
            Some((line, len)) => Ok(Some((
                RespValue::Error(String::from_utf8_lossy(line).into_owned()),
                1 + len,
            ))),
            None => Ok(None),
        },
        b':' => match parse_line(rest) {
            Some((line, len)) => {
                let n = parse_i64(line)?;
                Ok(Some((RespValue::Integer(n), 1 + len)))
            }
            None => Ok(None),
        },
        b'_' => match parse_line(rest) {
            Some((_, len)) => Ok(Some((RespValue::Null, 1 + len))),
            None => Ok(None),
        },
        b'$' => match parse_line(rest) {
            Some((line, len)) => {
                let n = parse_i64(line)?;
                if n < 0 {
                    return Ok(Some((RespValue::BulkString(None), 1 + len)));
                }
                let payload_len = n as usize;
                let header_len = 1 + len;
                let total = header_len + payload_len + 2;
                if buf.len() < total {
                    return Ok(None);
                }
                let payload = Bytes::copy_from_slice(&buf[header_len..header_len + payload_len]);
                if &buf[header_len + payload_len..total] != b"\r\n" {
                    return Err(protocol_error("bulk string missing trailing CRLF"));
                }
                Ok(Some((RespValue::BulkString(Some(payload)), total)))
            }
            None => Ok(None),
        },
        b'*' | b'>' => match parse_line(rest) {
            Some((line, len)) => {
                let n = parse_i64(line)?;
                let mut offset = 1 + len;
                if n < 0 {
                    return Ok(Some((RespValue::Array(None), offset)));
                }
                let mut items = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    match parse_value(&buf[offset..])? {
                        Some((item, consumed)) => {
                            items.push(item);
                            offset += consumed;
                        }
                        None => return Ok(None),
                    }
                }
                let value = if tag == b'>' { RespValue::Push(items) } else { RespValue::Array(Some(items)) };
                Ok(Some((value, offset)))
            }
            None => Ok(None),
        },
        other => Err(protocol_error(format!("unrecognized RESP tag byte {other:#x}"))),
    }
}

fn parse_i64(line: &[u8]) -> Result<i64, CacheError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| protocol_error("expected integer"))
}
