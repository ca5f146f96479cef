//! Commands and their completion
//!
//! A [`Request`] describes what the caller wants sent. Once bound to a text
//! encoding it becomes a [`Command`]: the encoded frame plus the bookkeeping
//! needed to match its reply (or replies) and resolve its
//! [`ResponseFuture`] exactly once.

use crate::core::{
    error::{RedisError, RedisResult},
    types::{RedisValue, ResponseTransform, ReturnType, TextEncoding},
    value::RespValue,
};
use crate::protocol::RespEncoder;
use crate::pubsub::SubscriptionOp;
use crate::transform::{transform, transform_for};
use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// A single command argument
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Text, encoded with the connection encoding
    Text(String),
    /// Raw bytes, sent as-is
    Binary(Bytes),
    /// Integer, sent in decimal
    Int(i64),
    /// Floating point number
    Float(f64),
}

impl Arg {
    /// Wire bytes of this argument
    #[must_use]
    pub fn to_bytes(&self, encoding: TextEncoding) -> Bytes {
        match self {
            Self::Text(s) => encoding.encode(s),
            Self::Binary(b) => b.clone(),
            Self::Int(i) => Bytes::from(i.to_string()),
            Self::Float(f) => Bytes::from(f.to_string()),
        }
    }

    /// Text form, used for channel and pattern names
    #[must_use]
    pub fn to_text(&self, encoding: TextEncoding) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Binary(b) => encoding.decode(b),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&String> for Arg {
    fn from(s: &String) -> Self {
        Self::Text(s.clone())
    }
}

impl From<i64> for Arg {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Arg {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u32> for Arg {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<usize> for Arg {
    fn from(i: usize) -> Self {
        i64::try_from(i).map_or_else(|_| Self::Text(i.to_string()), Self::Int)
    }
}

impl From<f64> for Arg {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<Vec<u8>> for Arg {
    fn from(b: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(b))
    }
}

impl From<&[u8]> for Arg {
    fn from(b: &[u8]) -> Self {
        Self::Binary(Bytes::copy_from_slice(b))
    }
}

impl From<Bytes> for Arg {
    fn from(b: Bytes) -> Self {
        Self::Binary(b)
    }
}

/// A command to send, before it is bound to a connection
#[derive(Debug, Clone)]
pub struct Request {
    verb: String,
    args: Vec<Arg>,
    return_type: ReturnType,
    binary: bool,
}

impl Request {
    /// Start a request for `verb` (case-insensitive)
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into().to_ascii_uppercase(),
            args: Vec::new(),
            return_type: ReturnType::default(),
            binary: false,
        }
    }

    /// Append one argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    #[must_use]
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the shape scalar replies are decoded into
    #[must_use]
    pub const fn returning(mut self, return_type: ReturnType) -> Self {
        self.return_type = return_type;
        self
    }

    /// Treat text arguments and replies 8-bit clean (ISO-8859-1)
    #[must_use]
    pub const fn binary(mut self) -> Self {
        self.binary = true;
        self
    }

    /// The upper-cased verb
    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// The arguments, in order
    pub fn arg_list(&self) -> &[Arg] {
        &self.args
    }

    /// The decode target
    pub const fn return_type(&self) -> ReturnType {
        self.return_type
    }

    /// Whether the request is binary
    pub const fn is_binary(&self) -> bool {
        self.binary
    }
}

/// Resolves once the command's replies arrived or it was failed
#[derive(Debug)]
pub struct ResponseFuture {
    rx: oneshot::Receiver<RedisResult<RedisValue>>,
}

impl Future for ResponseFuture {
    type Output = RedisResult<RedisValue>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.unwrap_or_else(|_| {
                Err(RedisError::Connection(
                    "Connection task stopped".to_string(),
                ))
            })
        })
    }
}

/// A command bound to a text encoding, owned by one connection until resolved
pub struct Command {
    verb: String,
    frame: Bytes,
    expected_replies: usize,
    received: usize,
    transform: ResponseTransform,
    return_type: ReturnType,
    encoding: TextEncoding,
    subscription: Option<SubscriptionOp>,
    results: Vec<RedisValue>,
    error: Option<RedisError>,
    completion: Option<oneshot::Sender<RedisResult<RedisValue>>>,
}

impl Command {
    /// Encode `request` and create the future its result is delivered to
    pub fn new(request: Request, encoding: TextEncoding) -> (Self, ResponseFuture) {
        let encoding = if request.binary {
            TextEncoding::Latin1
        } else {
            encoding
        };
        let args: Vec<Bytes> = request.args.iter().map(|a| a.to_bytes(encoding)).collect();
        let frame = RespEncoder::encode_command(&request.verb, &args);
        let (tx, rx) = oneshot::channel();

        let command = Self {
            transform: transform_for(&request.verb),
            verb: request.verb,
            frame,
            expected_replies: 1,
            received: 0,
            return_type: request.return_type,
            encoding,
            subscription: None,
            results: Vec::new(),
            error: None,
            completion: Some(tx),
        };

        (command, ResponseFuture { rx })
    }

    /// Attach a subscription registry change, applied right before dispatch
    #[must_use]
    pub fn with_subscription(mut self, op: SubscriptionOp) -> Self {
        self.subscription = Some(op);
        self
    }

    /// Expect `replies` replies (at least one) before resolving
    #[must_use]
    pub fn with_expected_replies(mut self, replies: usize) -> Self {
        self.set_expected_replies(replies);
        self
    }

    /// The upper-cased verb
    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// The encoded multi-bulk frame
    pub fn frame(&self) -> &Bytes {
        &self.frame
    }

    /// Replies this command consumes from the wire
    pub const fn expected_replies(&self) -> usize {
        self.expected_replies
    }

    /// Replies still to be consumed
    pub const fn remaining_replies(&self) -> usize {
        self.expected_replies.saturating_sub(self.received)
    }

    pub(crate) fn set_expected_replies(&mut self, replies: usize) {
        self.expected_replies = replies.max(1);
    }

    pub(crate) fn take_subscription(&mut self) -> Option<SubscriptionOp> {
        self.subscription.take()
    }

    pub(crate) fn is_quit(&self) -> bool {
        self.verb == "QUIT"
    }

    /// Record one reply; returns true once every expected reply arrived
    pub(crate) fn accept(&mut self, reply: RespValue) -> bool {
        self.received += 1;
        match transform(reply, self.transform, self.return_type, self.encoding) {
            Ok(value) => self.results.push(value),
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(e);
                }
            }
        }
        self.received >= self.expected_replies
    }

    pub(crate) fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Resolve with the collected replies
    pub(crate) fn complete(mut self) {
        let result = match self.error.take() {
            Some(e) => Err(e),
            None if self.expected_replies == 1 => Ok(self.results.pop().unwrap_or(RedisValue::Nil)),
            None => Ok(RedisValue::Array(std::mem::take(&mut self.results))),
        };
        self.resolve(result);
    }

    /// Resolve with `error`
    pub(crate) fn fail(mut self, error: RedisError) {
        self.resolve(Err(error));
    }

    fn resolve(&mut self, result: RedisResult<RedisValue>) {
        if let Some(tx) = self.completion.take() {
            // The caller may have dropped the future
            let _ = tx.send(result);
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("verb", &self.verb)
            .field("expected_replies", &self.expected_replies)
            .field("received", &self.received)
            .field("transform", &self.transform)
            .field("return_type", &self.return_type)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder_encodes_frame() {
        let request = Request::new("set").arg("key").arg(42i64).arg(vec![0u8, 1]);
        assert_eq!(request.verb(), "SET");
        let (command, _response) = Command::new(request, TextEncoding::Utf8);
        assert_eq!(
            &command.frame()[..],
            b"*4\r\n$3\r\nSET\r\n$3\r\nkey\r\n$2\r\n42\r\n$2\r\n\x00\x01\r\n"
        );
    }

    #[test]
    fn test_integer_arguments_share_one_variant() {
        assert_eq!(Arg::from(7usize), Arg::Int(7));
        assert_eq!(Arg::from(7u32), Arg::from(7usize));
        assert_eq!(Arg::from(7usize).to_bytes(TextEncoding::Utf8), Bytes::from("7"));
    }

    #[test]
    fn test_binary_request_uses_latin1() {
        let request = Request::new("SET").arg("k").arg("\u{e9}").binary();
        let (command, _response) = Command::new(request, TextEncoding::Utf8);
        assert_eq!(&command.frame()[..], b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\n\xe9\r\n");
    }

    #[tokio::test]
    async fn test_single_reply_resolves_with_value() {
        let request = Request::new("GET").arg("k");
        let (mut command, response) = Command::new(request, TextEncoding::Utf8);
        assert!(command.accept(RespValue::from("v")));
        command.complete();
        assert_eq!(response.await.unwrap(), RedisValue::from("v"));
    }

    #[tokio::test]
    async fn test_multi_reply_collects_every_reply() {
        let (command, response) = Command::new(
            Request::new("SUBSCRIBE").args(["a", "b"]).returning(ReturnType::List),
            TextEncoding::Utf8,
        );
        let mut command = command.with_expected_replies(2);
        assert_eq!(command.remaining_replies(), 2);
        let ack = |channel: &str, count| {
            RespValue::Array(vec![
                RespValue::from("subscribe"),
                RespValue::from(channel),
                RespValue::Integer(count),
            ])
        };
        assert!(!command.accept(ack("a", 1)));
        assert_eq!(command.remaining_replies(), 1);
        assert!(command.accept(ack("b", 2)));
        command.complete();

        let acks = response.await.unwrap();
        assert_eq!(acks.as_array().map(<[RedisValue]>::len), Some(2));
    }

    #[tokio::test]
    async fn test_multi_reply_fails_with_first_error() {
        let request = Request::new("SUBSCRIBE").args(["a", "b"]);
        let (command, response) = Command::new(request, TextEncoding::Utf8);
        let mut command = command.with_expected_replies(2);
        command.accept(RespValue::Error("ERR first".into()));
        command.accept(RespValue::Error("ERR second".into()));
        command.complete();
        let err = response.await.unwrap_err();
        assert_eq!(err.server_message(), Some("ERR first"));
    }

    #[test]
    fn test_expected_replies_is_at_least_one() {
        let (command, _response) = Command::new(Request::new("UNSUBSCRIBE"), TextEncoding::Utf8);
        assert_eq!(command.with_expected_replies(0).expected_replies(), 1);
    }

    #[tokio::test]
    async fn test_dropped_command_reports_connection_error() {
        let (command, response) = Command::new(Request::new("PING"), TextEncoding::Utf8);
        drop(command);
        assert!(matches!(response.await, Err(RedisError::Connection(_))));
    }
}
