//! Redis Sentinel support
//!
//! In Sentinel mode a connection never dials a fixed address. Every connect
//! walks the Sentinel list in order, asks each Sentinel for the current
//! master and dials the first address that answers. The Sentinel that
//! produced a verified master (its `ROLE` reply says `master`) is moved to
//! the front so the next connect asks it first.
//!
//! # Examples
//!
//! ```no_run
//! use redis_link::{Client, ConnectionConfig, LocalBus, SentinelEndpoint};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConnectionConfig::default().with_sentinel(
//!     "mymaster",
//!     vec![
//!         SentinelEndpoint::new("127.0.0.1", 26379),
//!         SentinelEndpoint::new("127.0.0.1", 26380),
//!     ],
//! );
//! let client = Client::new(config, Arc::new(LocalBus::new()))?;
//!
//! // Resolved through the Sentinels on first use
//! client.set("key", "value").await?;
//! # Ok(())
//! # }
//! ```

use crate::command::{Command, Request};
use crate::connection::{ConnectionRole, RedisConnection};
use crate::core::{
    config::{ConnectionConfig, SentinelEndpoint},
    error::{RedisError, RedisResult},
    types::{RedisValue, ReturnType, TextEncoding},
    value::RespValue,
};
use crate::protocol::{ReplyParser, RespEncoder};
use crate::transport::{connect_within, BoxedStream, Connector, TcpConnector};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Ordered Sentinel endpoints; the front is asked first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelList {
    sentinels: Vec<SentinelEndpoint>,
}

impl SentinelList {
    /// Create a list in the given order
    pub fn new(sentinels: Vec<SentinelEndpoint>) -> Self {
        Self { sentinels }
    }

    /// The list configured by `config`, if it is in Sentinel mode
    pub fn from_config(config: &ConnectionConfig) -> Option<Self> {
        config
            .is_sentinel_mode()
            .then(|| Self::new(config.sentinels.clone()))
    }

    /// Number of Sentinels
    pub fn len(&self) -> usize {
        self.sentinels.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.sentinels.is_empty()
    }

    /// Endpoint at `index`
    pub fn get(&self, index: usize) -> Option<&SentinelEndpoint> {
        self.sentinels.get(index)
    }

    /// Endpoints in the current order
    pub fn endpoints(&self) -> &[SentinelEndpoint] {
        &self.sentinels
    }

    /// Move the Sentinel at `index` to the front, keeping the relative order
    /// of the others. Returns `false` for an out-of-range index.
    pub fn move_to_front(&mut self, index: usize) -> bool {
        if index >= self.sentinels.len() {
            return false;
        }
        if index > 0 {
            let sentinel = self.sentinels.remove(index);
            self.sentinels.insert(0, sentinel);
        }
        true
    }
}

/// Decode a `SENTINEL get-master-addr-by-name` reply into host and port
pub fn parse_master_addr(reply: RespValue) -> RedisResult<(String, u16)> {
    match reply {
        RespValue::Array(items) if items.len() == 2 => {
            let host = items[0].as_string()?;
            let port = items[1].as_string()?;
            let port = port
                .parse::<u16>()
                .map_err(|_| RedisError::Sentinel(format!("Invalid master port: {port}")))?;
            Ok((host, port))
        }
        RespValue::Null | RespValue::NullArray => {
            Err(RedisError::Sentinel("Sentinel does not know the master".to_string()))
        }
        RespValue::Error(msg) => Err(RedisError::Sentinel(msg)),
        other => Err(RedisError::UnexpectedResponse(format!("{other:?}"))),
    }
}

/// Ask one Sentinel for the address of `master_name`.
///
/// Uses a dedicated short-lived stream, bounded by `limit` end to end.
pub async fn query_master_addr(
    connector: &dyn Connector,
    sentinel: &SentinelEndpoint,
    master_name: &str,
    limit: Duration,
) -> RedisResult<(String, u16)> {
    timeout(limit, ask_master_addr(connector, sentinel, master_name))
        .await
        .map_err(|_| RedisError::Timeout)?
}

async fn ask_master_addr(
    connector: &dyn Connector,
    sentinel: &SentinelEndpoint,
    master_name: &str,
) -> RedisResult<(String, u16)> {
    let mut stream = connector.connect(&sentinel.host, sentinel.port).await?;
    let frame = RespEncoder::encode_command(
        "SENTINEL",
        &[
            Bytes::from_static(b"get-master-addr-by-name"),
            Bytes::copy_from_slice(master_name.as_bytes()),
        ],
    );
    stream.write_all(&frame).await?;
    stream.flush().await?;

    let mut parser = ReplyParser::new();
    let mut buf = BytesMut::with_capacity(512);
    loop {
        buf.clear();
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(RedisError::Connection(
                "Sentinel closed the connection".to_string(),
            ));
        }
        let mut replies = parser.feed_collect(&buf)?;
        if !replies.is_empty() {
            return parse_master_addr(replies.swap_remove(0));
        }
    }
}

/// Resolve the master through `sentinels` in order and dial it.
///
/// Returns the stream and the index of the Sentinel that answered. A
/// Sentinel that cannot be queried, or whose answer cannot be dialled, is
/// skipped.
pub(crate) async fn connect_via_sentinels(
    connector: &dyn Connector,
    config: &ConnectionConfig,
    sentinels: &[SentinelEndpoint],
) -> RedisResult<(BoxedStream, usize)> {
    let master = config.master_name.as_deref().unwrap_or_default();

    for (index, sentinel) in sentinels.iter().enumerate() {
        let (host, port) =
            match query_master_addr(connector, sentinel, master, config.sentinel_timeout).await {
                Ok(addr) => addr,
                Err(e) => {
                    warn!("Sentinel {} failed to resolve {}: {}", sentinel.address(), master, e);
                    continue;
                }
            };
        debug!("Sentinel {} reports master {} at {}:{}", sentinel.address(), master, host, port);

        match connect_within(connector, &host, port, config.connect_timeout).await {
            Ok(stream) => return Ok((stream, index)),
            Err(e) => warn!(
                "Master {}:{} reported by {} is unreachable: {}",
                host,
                port,
                sentinel.address(),
                e
            ),
        }
    }

    Err(RedisError::Sentinel("failed to connect sentinels".to_string()))
}

/// Administrative client for a single Sentinel
pub struct SentinelClient {
    connection: RedisConnection,
    encoding: TextEncoding,
}

impl SentinelClient {
    /// Client for the Sentinel at `endpoint`, over TCP
    pub fn new(endpoint: &SentinelEndpoint) -> RedisResult<Self> {
        let config = ConnectionConfig {
            host: endpoint.host.clone(),
            port: endpoint.port,
            ..ConnectionConfig::default()
        };
        let connector = Arc::new(TcpConnector::from_config(&config));
        Self::with_connector(config, connector)
    }

    /// Client for the Sentinel at `config.host:config.port`
    ///
    /// Sentinel-mode settings in `config` are ignored; the Sentinel itself is
    /// dialled directly.
    pub fn with_connector(
        mut config: ConnectionConfig,
        connector: Arc<dyn Connector>,
    ) -> RedisResult<Self> {
        config.master_name = None;
        config.sentinels.clear();
        config.validate()?;
        info!("Sentinel client for {}:{}", config.host, config.port);

        let encoding = config.encoding;
        let connection =
            RedisConnection::spawn(Arc::new(config), connector, ConnectionRole::Command);
        Ok(Self { connection, encoding })
    }

    /// The underlying connection
    pub fn connection(&self) -> &RedisConnection {
        &self.connection
    }

    async fn execute(&self, request: Request) -> RedisResult<RedisValue> {
        let (command, response) = Command::new(request, self.encoding);
        self.connection.send(command);
        response.await
    }

    async fn sentinel(
        &self,
        subcommand: &str,
        name: Option<&str>,
        return_type: ReturnType,
    ) -> RedisResult<RedisValue> {
        let request = Request::new("SENTINEL")
            .arg(subcommand)
            .args(name)
            .returning(return_type);
        self.execute(request).await
    }

    /// `SENTINEL masters`
    pub async fn masters(&self) -> RedisResult<Vec<RedisValue>> {
        self.sentinel("masters", None, ReturnType::List).await?.try_into()
    }

    /// `SENTINEL master <name>`
    pub async fn master(&self, name: &str) -> RedisResult<Vec<RedisValue>> {
        self.sentinel("master", Some(name), ReturnType::List).await?.try_into()
    }

    /// `SENTINEL slaves <name>`
    pub async fn slaves(&self, name: &str) -> RedisResult<Vec<RedisValue>> {
        self.sentinel("slaves", Some(name), ReturnType::List).await?.try_into()
    }

    /// `SENTINEL sentinels <name>`
    pub async fn sentinels(&self, name: &str) -> RedisResult<Vec<RedisValue>> {
        self.sentinel("sentinels", Some(name), ReturnType::List).await?.try_into()
    }

    /// `SENTINEL get-master-addr-by-name <name>`; `None` when unknown
    pub async fn get_master_addr_by_name(&self, name: &str) -> RedisResult<Option<(String, u16)>> {
        let reply = self
            .sentinel("get-master-addr-by-name", Some(name), ReturnType::List)
            .await?;
        match reply {
            RedisValue::Nil => Ok(None),
            RedisValue::Array(items) => match items.as_slice() {
                [RedisValue::String(host), RedisValue::String(port)] => {
                    let port = port
                        .parse::<u16>()
                        .map_err(|_| RedisError::Sentinel(format!("Invalid master port: {port}")))?;
                    Ok(Some((host.clone(), port)))
                }
                _ => Err(RedisError::UnexpectedResponse(format!("{items:?}"))),
            },
            other => Err(RedisError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// `SENTINEL reset <pattern>`
    pub async fn reset(&self, pattern: &str) -> RedisResult<()> {
        self.sentinel("reset", Some(pattern), ReturnType::Unit).await?;
        Ok(())
    }

    /// `SENTINEL failover <name>`
    pub async fn failover(&self, name: &str) -> RedisResult<String> {
        self.sentinel("failover", Some(name), ReturnType::String).await?.try_into()
    }

    /// `SENTINEL ckquorum <name>`
    pub async fn ckquorum(&self, name: &str) -> RedisResult<String> {
        self.sentinel("ckquorum", Some(name), ReturnType::String).await?.try_into()
    }

    /// `SENTINEL flushconfig`
    pub async fn flush_config(&self) -> RedisResult<()> {
        self.sentinel("flushconfig", None, ReturnType::Unit).await?;
        Ok(())
    }

    /// `INFO`, parsed into sections
    pub async fn info(&self) -> RedisResult<HashMap<String, RedisValue>> {
        self.execute(Request::new("INFO")).await?.try_into()
    }

    /// Send `QUIT` and wait for the connection to close
    pub async fn close(&self) {
        self.connection.disconnect().await;
    }
}
