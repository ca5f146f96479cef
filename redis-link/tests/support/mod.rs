//! In-memory Redis peers for integration tests
//!
//! `MockConnector` hands the client one end of a duplex pipe per connect
//! and forwards the other end, wrapped in a `MockServer`, to the test.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use redis_link::protocol::{ReplyParser, RespEncoder};
use redis_link::transport::{BoxedStream, Connector};
use redis_link::{ConnectionConfig, RespValue};
use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct Dials {
    attempts: Vec<String>,
    refused: HashSet<String>,
}

pub struct MockConnector {
    dials: Mutex<Dials>,
    accepted: mpsc::UnboundedSender<MockServer>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockServer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            dials: Mutex::new(Dials::default()),
            accepted: tx,
        });
        (connector, rx)
    }

    pub fn refuse(&self, addr: &str) {
        self.dials.lock().unwrap().refused.insert(addr.to_string());
    }

    pub fn attempts(&self) -> Vec<String> {
        self.dials.lock().unwrap().attempts.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, host: &str, port: u16) -> io::Result<BoxedStream> {
        let addr = format!("{host}:{port}");
        {
            let mut dials = self.dials.lock().unwrap();
            dials.attempts.push(addr.clone());
            if dials.refused.contains(&addr) {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, addr));
            }
        }

        let (client, server) = tokio::io::duplex(64 * 1024);
        self.accepted
            .send(MockServer {
                addr,
                stream: server,
                parser: ReplyParser::new(),
                received: VecDeque::new(),
            })
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "test dropped the acceptor"))?;
        Ok(Box::new(client))
    }
}

/// Server side of one accepted connection
pub struct MockServer {
    pub addr: String,
    stream: DuplexStream,
    parser: ReplyParser,
    received: VecDeque<RespValue>,
}

impl MockServer {
    /// Next command written by the client, as text
    pub async fn read_command(&mut self) -> Vec<String> {
        let frame = timeout(WAIT, self.next_frame())
            .await
            .unwrap_or_else(|_| panic!("{}: no command within {:?}", self.addr, WAIT));
        match frame {
            RespValue::Array(items) => items.iter().map(|item| item.as_string().unwrap()).collect(),
            other => panic!("{}: not a command frame: {other:?}", self.addr),
        }
    }

    /// Read the next command and assert it equals `expected`
    pub async fn expect(&mut self, expected: &[&str]) {
        let command = self.read_command().await;
        assert_eq!(command, expected, "unexpected command on {}", self.addr);
    }

    async fn next_frame(&mut self) -> RespValue {
        let mut buf = BytesMut::with_capacity(4096);
        loop {
            if let Some(frame) = self.received.pop_front() {
                return frame;
            }
            buf.clear();
            let n = self.stream.read_buf(&mut buf).await.unwrap();
            assert!(n > 0, "{}: client closed the connection", self.addr);
            let frames = self.parser.feed_collect(&buf).unwrap();
            self.received.extend(frames);
        }
    }

    pub async fn reply(&mut self, value: RespValue) {
        let mut buf = BytesMut::new();
        RespEncoder::encode(&value, &mut buf);
        self.reply_raw(&buf).await;
    }

    pub async fn reply_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    /// Wait until the client drops its end
    pub async fn closed_by_client(&mut self) -> bool {
        let mut buf = [0u8; 64];
        matches!(timeout(WAIT, self.stream.read(&mut buf)).await, Ok(Ok(0)))
    }
}

pub async fn accept(servers: &mut mpsc::UnboundedReceiver<MockServer>) -> MockServer {
    timeout(WAIT, servers.recv())
        .await
        .expect("no connection within timeout")
        .expect("connector dropped")
}

pub fn bulk(s: &str) -> RespValue {
    RespValue::BulkString(Bytes::copy_from_slice(s.as_bytes()))
}

pub fn ok() -> RespValue {
    RespValue::SimpleString("OK".to_string())
}

pub fn array(items: Vec<RespValue>) -> RespValue {
    RespValue::Array(items)
}

pub fn mock_config() -> ConnectionConfig {
    ConnectionConfig::new("redis://mock:6379")
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
