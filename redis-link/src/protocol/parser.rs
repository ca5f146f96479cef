//! Incremental reply parser
//!
//! Bytes arrive from the socket in arbitrary chunks. [`ReplyParser`] buffers
//! them and emits each complete reply exactly once, in wire order.
//!
//! The frame at the head of the buffer is scanned incrementally: every feed
//! resumes where the previous one stopped, and a reply is only decoded once
//! its last byte has arrived.

use super::resp2::{nesting_too_deep, RespDecoder, MAX_DEPTH};
use crate::core::{
    error::{RedisError, RedisResult},
    value::RespValue,
};
use bytes::{Buf, BytesMut};
use std::io::Cursor;

/// Progress through the frame at the head of the buffer
#[derive(Debug, Default)]
struct Scan {
    /// Bytes of the head frame known to belong to finished elements
    offset: usize,
    /// Elements still missing from each open array, innermost last
    open: Vec<usize>,
}

/// Stateful RESP reply decoder
#[derive(Debug, Default)]
pub struct ReplyParser {
    buffer: BytesMut,
    scan: Scan,
}

impl ReplyParser {
    /// Create an empty parser
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            scan: Scan::default(),
        }
    }

    /// Feed a chunk and hand every reply it completes to `on_reply`
    ///
    /// # Errors
    ///
    /// Returns a protocol error when the stream is malformed. Replies
    /// completed before the malformed one have already been delivered.
    pub fn feed<F>(&mut self, data: &[u8], mut on_reply: F) -> RedisResult<()>
    where
        F: FnMut(RespValue),
    {
        self.buffer.extend_from_slice(data);

        while let Some(end) = self.scan_frame()? {
            let mut cursor = Cursor::new(&self.buffer[..end]);
            let reply = RespDecoder::decode(&mut cursor)?;
            let consumed = cursor.position() as usize;
            match reply {
                Some(reply) if consumed == end => {
                    self.buffer.advance(end);
                    on_reply(reply);
                }
                _ => {
                    return Err(RedisError::Protocol(
                        "Reply does not match its framing".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Feed a chunk and collect the replies it completes
    ///
    /// # Errors
    ///
    /// Returns a protocol error when the stream is malformed.
    pub fn feed_collect(&mut self, data: &[u8]) -> RedisResult<Vec<RespValue>> {
        let mut replies = Vec::new();
        self.feed(data, |reply| replies.push(reply))?;
        Ok(replies)
    }

    /// Discard any partially received reply
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.scan = Scan::default();
    }

    /// Number of buffered bytes not yet forming a complete reply
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Advance the scan over whole elements and return the length of the
    /// head frame once it is complete.
    fn scan_frame(&mut self) -> RedisResult<Option<usize>> {
        loop {
            let start = self.scan.offset;
            let Some(&type_byte) = self.buffer.get(start) else {
                return Ok(None);
            };
            if !matches!(type_byte, b'+' | b'-' | b':' | b'$' | b'*') {
                return Err(RedisError::Protocol(format!(
                    "Invalid RESP type byte: {:?}",
                    type_byte as char
                )));
            }
            if type_byte == b'*' && self.scan.open.len() >= MAX_DEPTH {
                return Err(nesting_too_deep());
            }
            let Some(line_end) = find_crlf(&self.buffer, start + 1) else {
                return Ok(None);
            };
            let line = &self.buffer[start + 1..line_end];
            let mut next = line_end + 2;

            match type_byte {
                b':' => {
                    RespDecoder::parse_number(line)?;
                }
                b'$' => {
                    let len = RespDecoder::parse_number(line)?;
                    if len != -1 {
                        let len = usize::try_from(len).map_err(|_| {
                            RedisError::Protocol(format!("Invalid bulk string length: {}", len))
                        })?;
                        if self.buffer.len() < next + len + 2 {
                            return Ok(None);
                        }
                        next += len + 2;
                    }
                }
                b'*' => {
                    let len = RespDecoder::parse_number(line)?;
                    if len > 0 {
                        let len = usize::try_from(len).map_err(|_| {
                            RedisError::Protocol(format!("Invalid array length: {}", len))
                        })?;
                        self.scan.open.push(len);
                        self.scan.offset = next;
                        continue;
                    }
                    if len < -1 {
                        return Err(RedisError::Protocol(format!(
                            "Invalid array length: {}",
                            len
                        )));
                    }
                }
                _ => {}
            }

            self.scan.offset = next;
            if self.close_element() {
                let end = self.scan.offset;
                self.scan.offset = 0;
                return Ok(Some(end));
            }
        }
    }

    /// Count one finished element against the open arrays; `true` when the
    /// head frame is complete.
    fn close_element(&mut self) -> bool {
        while let Some(remaining) = self.scan.open.last_mut() {
            *remaining -= 1;
            if *remaining > 0 {
                return false;
            }
            self.scan.open.pop();
        }
        true
    }
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| from + i)
}
