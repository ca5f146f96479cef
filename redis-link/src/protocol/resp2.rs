//! RESP2 protocol implementation
//!
//! This module implements the Redis Serialization Protocol (RESP2) for
//! encoding commands and decoding replies.

use crate::core::{
    error::{RedisError, RedisResult},
    value::RespValue,
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;

const CRLF: &[u8] = b"\r\n";

/// Deepest array nesting accepted in a reply
pub const MAX_DEPTH: usize = 512;

/// Encodes RESP values and commands into bytes
pub struct RespEncoder;

impl RespEncoder {
    /// Encode a RESP value into a buffer
    pub fn encode(value: &RespValue, buf: &mut BytesMut) {
        match value {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Error(e) => {
                buf.put_u8(b'-');
                buf.put_slice(e.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Integer(i) => {
                buf.put_u8(b':');
                buf.put_slice(i.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::BulkString(data) => Self::put_bulk(data, buf),
            RespValue::Null => buf.put_slice(b"$-1\r\n"),
            RespValue::Array(arr) => {
                buf.put_u8(b'*');
                buf.put_slice(arr.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                for item in arr {
                    Self::encode(item, buf);
                }
            }
            RespValue::NullArray => buf.put_slice(b"*-1\r\n"),
        }
    }

    /// Encode a command as a multi-bulk of the verb followed by its arguments
    ///
    /// Every argument is written as a bulk string of its raw bytes.
    pub fn encode_command(command: &str, args: &[Bytes]) -> Bytes {
        let mut buf = BytesMut::with_capacity(
            16 + command.len() + args.iter().map(|a| a.len() + 16).sum::<usize>(),
        );

        buf.put_u8(b'*');
        buf.put_slice((1 + args.len()).to_string().as_bytes());
        buf.put_slice(CRLF);

        Self::put_bulk(command.as_bytes(), &mut buf);
        for arg in args {
            Self::put_bulk(arg, &mut buf);
        }

        buf.freeze()
    }

    fn put_bulk(data: &[u8], buf: &mut BytesMut) {
        buf.put_u8(b'$');
        buf.put_slice(data.len().to_string().as_bytes());
        buf.put_slice(CRLF);
        buf.put_slice(data);
        buf.put_slice(CRLF);
    }
}

/// Decodes RESP values from bytes
pub struct RespDecoder;

impl RespDecoder {
    /// Decode one RESP value from a buffer
    ///
    /// Returns `Ok(None)` when the buffer holds only part of a value; the
    /// cursor position is then meaningless and the caller retries once more
    /// bytes arrived.
    ///
    /// # Errors
    ///
    /// Fails with a protocol error on malformed input or arrays nested deeper
    /// than [`MAX_DEPTH`].
    pub fn decode(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        Self::decode_at(buf, 0)
    }

    fn decode_at(buf: &mut Cursor<&[u8]>, depth: usize) -> RedisResult<Option<RespValue>> {
        if !buf.has_remaining() {
            return Ok(None);
        }

        let type_byte = buf.chunk()[0];
        buf.advance(1);

        match type_byte {
            b'+' => Ok(Self::read_line(buf)?
                .map(|line| RespValue::SimpleString(String::from_utf8_lossy(&line).into_owned()))),
            b'-' => Ok(Self::read_line(buf)?
                .map(|line| RespValue::Error(String::from_utf8_lossy(&line).into_owned()))),
            b':' => match Self::read_line(buf)? {
                Some(line) => Ok(Some(RespValue::Integer(Self::parse_number(&line)?))),
                None => Ok(None),
            },
            b'$' => Self::decode_bulk_string(buf),
            b'*' => Self::decode_array(buf, depth + 1),
            _ => Err(RedisError::Protocol(format!(
                "Invalid RESP type byte: {:?}",
                type_byte as char
            ))),
        }
    }

    fn decode_bulk_string(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        let len = match Self::read_line(buf)? {
            Some(line) => Self::parse_number(&line)?,
            None => return Ok(None),
        };

        if len == -1 {
            return Ok(Some(RespValue::Null));
        }
        let len = usize::try_from(len)
            .map_err(|_| RedisError::Protocol(format!("Invalid bulk string length: {}", len)))?;

        // Check if we have the payload and its CRLF
        if buf.remaining() < len + 2 {
            return Ok(None);
        }

        let data = Bytes::copy_from_slice(&buf.chunk()[..len]);
        buf.advance(len);

        if &buf.chunk()[..2] != CRLF {
            return Err(RedisError::Protocol(
                "Bulk string not terminated by CRLF".to_string(),
            ));
        }
        buf.advance(2);

        Ok(Some(RespValue::BulkString(data)))
    }

    fn decode_array(buf: &mut Cursor<&[u8]>, depth: usize) -> RedisResult<Option<RespValue>> {
        if depth > MAX_DEPTH {
            return Err(nesting_too_deep());
        }
        let len = match Self::read_line(buf)? {
            Some(line) => Self::parse_number(&line)?,
            None => return Ok(None),
        };

        if len == -1 {
            return Ok(Some(RespValue::NullArray));
        }
        let len = usize::try_from(len)
            .map_err(|_| RedisError::Protocol(format!("Invalid array length: {}", len)))?;

        let mut arr = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            match Self::decode_at(buf, depth)? {
                Some(value) => arr.push(value),
                None => return Ok(None),
            }
        }

        Ok(Some(RespValue::Array(arr)))
    }

    pub(crate) fn parse_number(line: &[u8]) -> RedisResult<i64> {
        std::str::from_utf8(line)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| {
                RedisError::Protocol(format!(
                    "Invalid integer: {:?}",
                    String::from_utf8_lossy(line)
                ))
            })
    }

    fn read_line(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<Vec<u8>>> {
        let start = buf.position() as usize;
        let slice = buf.get_ref();

        // Find CRLF
        for i in start..slice.len().saturating_sub(1) {
            if slice[i] == b'\r' && slice[i + 1] == b'\n' {
                let line = slice[start..i].to_vec();
                buf.set_position((i + 2) as u64);
                return Ok(Some(line));
            }
        }

        Ok(None)
    }
}

pub(crate) fn nesting_too_deep() -> RedisError {
    RedisError::Protocol(format!("Reply nested deeper than {MAX_DEPTH} arrays"))
}
