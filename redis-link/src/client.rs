//! High-level Redis client
//!
//! A [`Client`] owns two connections built from the same configuration: one
//! for regular commands and one dedicated to pub/sub. Commands are routed by
//! verb, so a subscription never blocks regular traffic.

use crate::command::{Arg, Command, Request, ResponseFuture};
use crate::connection::{ConnectionRole, ConnectionStats, RedisConnection};
use crate::core::{
    config::ConnectionConfig,
    error::RedisResult,
    types::{RedisValue, ReturnType, TextEncoding},
};
use crate::pubsub::{
    delivery_address, BusMessage, MessageBus, MessageHandler, PubSubMessage, SubscriptionKind,
    SubscriptionOp,
};
use crate::transport::{Connector, TcpConnector};
use futures_util::future::{self, BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Redis client over a command connection and a pub/sub connection
///
/// Cloning is cheap; clones share both connections.
#[derive(Clone)]
pub struct Client {
    config: Arc<ConnectionConfig>,
    redis: RedisConnection,
    pubsub: RedisConnection,
    bus: Arc<dyn MessageBus>,
}

impl Client {
    /// Create a client that connects over TCP on first use
    ///
    /// Messages received on subscriptions are published to `bus`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use redis_link::{Client, ConnectionConfig, LocalBus};
    /// use std::sync::Arc;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = ConnectionConfig::new("redis://localhost:6379");
    /// let client = Client::new(config, Arc::new(LocalBus::new()))?;
    ///
    /// client.set("mykey", "hello").await?;
    /// assert_eq!(client.get("mykey").await?, Some("hello".to_string()));
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: ConnectionConfig, bus: Arc<dyn MessageBus>) -> RedisResult<Self> {
        let connector = Arc::new(TcpConnector::from_config(&config));
        Self::with_connector(config, connector, bus)
    }

    /// Create a client on a custom transport
    pub fn with_connector(
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
        bus: Arc<dyn MessageBus>,
    ) -> RedisResult<Self> {
        config.validate()?;
        if config.is_sentinel_mode() {
            info!(
                "Creating client for master {} via {} sentinel(s)",
                config.master_name.as_deref().unwrap_or_default(),
                config.sentinels.len()
            );
        } else {
            info!("Creating client for {}:{}", config.host, config.port);
        }

        let config = Arc::new(config);
        let redis =
            RedisConnection::spawn(config.clone(), connector.clone(), ConnectionRole::Command);
        let pubsub = RedisConnection::spawn(config.clone(), connector, ConnectionRole::PubSub);

        Ok(Self {
            config,
            redis,
            pubsub,
            bus,
        })
    }

    /// The configuration both connections were built from
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// The bus subscriptions publish to
    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    /// The connection regular commands go to
    pub fn connection(&self) -> &RedisConnection {
        &self.redis
    }

    /// The connection subscriptions go to
    pub fn pubsub_connection(&self) -> &RedisConnection {
        &self.pubsub
    }

    /// Snapshots of the command and pub/sub connections
    pub async fn stats(&self) -> RedisResult<(ConnectionStats, ConnectionStats)> {
        let (redis, pubsub) = future::join(self.redis.stats(), self.pubsub.stats()).await;
        Ok((redis?, pubsub?))
    }

    /// Send an arbitrary command.
    ///
    /// The command is queued before this returns, so commands sent one after
    /// another are written in that order even if their futures are polled
    /// out of order.
    ///
    /// `SUBSCRIBE`, `PSUBSCRIBE`, `UNSUBSCRIBE` and `PUNSUBSCRIBE` go to the
    /// pub/sub connection, `QUIT` goes to both connections and resolves once
    /// both acknowledged, everything else goes to the command connection.
    pub fn send(&self, request: Request) -> BoxFuture<'static, RedisResult<RedisValue>> {
        match request.verb() {
            "SUBSCRIBE" => self.send_subscribe(request, SubscriptionKind::Channel),
            "PSUBSCRIBE" => self.send_subscribe(request, SubscriptionKind::Pattern),
            "UNSUBSCRIBE" => self.send_unsubscribe(request, SubscriptionKind::Channel),
            "PUNSUBSCRIBE" => self.send_unsubscribe(request, SubscriptionKind::Pattern),
            "QUIT" => {
                let (to_redis, redis_done) = Command::new(request.clone(), self.config.encoding);
                let (to_pubsub, pubsub_done) = Command::new(request, self.config.encoding);
                self.redis.send(to_redis);
                self.pubsub.send(to_pubsub);
                future::join(redis_done, pubsub_done)
                    .map(|(redis, pubsub)| redis.and(pubsub))
                    .boxed()
            }
            _ => Self::enqueue(&self.redis, request, self.config.encoding).boxed(),
        }
    }

    fn enqueue(
        connection: &RedisConnection,
        request: Request,
        encoding: TextEncoding,
    ) -> ResponseFuture {
        let (command, response) = Command::new(request, encoding);
        connection.send(command);
        response
    }

    fn send_subscribe(
        &self,
        request: Request,
        kind: SubscriptionKind,
    ) -> BoxFuture<'static, RedisResult<RedisValue>> {
        let encoding = self.config.encoding;
        let handlers = request
            .arg_list()
            .iter()
            .map(|arg| {
                let key = arg.to_text(encoding);
                let handler = self.delivery_handler(&key);
                (key, handler)
            })
            .collect();

        let (command, response) = Command::new(request, encoding);
        self.pubsub
            .send(command.with_subscription(SubscriptionOp::Subscribe { kind, handlers }));
        response.boxed()
    }

    fn send_unsubscribe(
        &self,
        request: Request,
        kind: SubscriptionKind,
    ) -> BoxFuture<'static, RedisResult<RedisValue>> {
        let encoding = self.config.encoding;
        let keys = request
            .arg_list()
            .iter()
            .map(|arg| arg.to_text(encoding))
            .collect();

        let (command, response) = Command::new(request, encoding);
        self.pubsub
            .send(command.with_subscription(SubscriptionOp::Unsubscribe { kind, keys }));
        response.boxed()
    }

    fn delivery_handler(&self, key: &str) -> MessageHandler {
        let bus = self.bus.clone();
        let address = delivery_address(&self.config.address, key);
        debug!("Deliveries for {} go to {}", key, address);
        Arc::new(move |message: PubSubMessage| bus.publish(&address, BusMessage::from(message)))
    }

    /// Ping the server
    pub async fn ping(&self) -> RedisResult<String> {
        self.send(Request::new("PING")).await?.try_into()
    }

    /// Get the value of a key
    pub async fn get(&self, key: impl Into<String>) -> RedisResult<Option<String>> {
        self.send(Request::new("GET").arg(Arg::Text(key.into()))).await?.try_into()
    }

    /// Set the value of a key
    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>) -> RedisResult<()> {
        let request = Request::new("SET")
            .arg(Arg::Text(key.into()))
            .arg(Arg::Text(value.into()))
            .returning(ReturnType::Unit);
        self.send(request).await?;
        Ok(())
    }

    /// Delete keys, returning how many existed
    pub async fn del<K: AsRef<str>>(&self, keys: &[K]) -> RedisResult<i64> {
        let request = Request::new("DEL")
            .args(keys.iter().map(AsRef::as_ref))
            .returning(ReturnType::Integer);
        self.send(request).await?.try_into()
    }

    /// Increment the integer value of a key by one
    pub async fn incr(&self, key: impl Into<String>) -> RedisResult<i64> {
        let request = Request::new("INCR")
            .arg(Arg::Text(key.into()))
            .returning(ReturnType::Integer);
        self.send(request).await?.try_into()
    }

    /// Publish a message, returning the number of receivers
    pub async fn publish(
        &self,
        channel: impl Into<String>,
        message: impl Into<String>,
    ) -> RedisResult<i64> {
        let request = Request::new("PUBLISH")
            .arg(Arg::Text(channel.into()))
            .arg(Arg::Text(message.into()))
            .returning(ReturnType::Integer);
        self.send(request).await?.try_into()
    }

    /// Server information, one map per section
    pub async fn info(&self, section: Option<&str>) -> RedisResult<HashMap<String, RedisValue>> {
        self.send(Request::new("INFO").args(section)).await?.try_into()
    }

    /// All fields and values of a hash
    pub async fn hgetall(
        &self,
        key: impl Into<String>,
    ) -> RedisResult<HashMap<String, RedisValue>> {
        self.send(Request::new("HGETALL").arg(Arg::Text(key.into())))
            .await?
            .try_into()
    }

    /// Run a Lua script; the result is always a list
    pub async fn eval<K, A>(
        &self,
        script: &str,
        keys: &[K],
        args: &[A],
    ) -> RedisResult<Vec<RedisValue>>
    where
        K: AsRef<str>,
        A: AsRef<str>,
    {
        let request = Request::new("EVAL")
            .arg(script)
            .arg(keys.len())
            .args(keys.iter().map(AsRef::as_ref))
            .args(args.iter().map(AsRef::as_ref));
        self.send(request).await?.try_into()
    }

    /// Subscribe to channels; messages go to `"<address>.<channel>"` on the bus
    pub async fn subscribe<C: AsRef<str>>(&self, channels: &[C]) -> RedisResult<()> {
        let request = Request::new("SUBSCRIBE")
            .args(channels.iter().map(AsRef::as_ref))
            .returning(ReturnType::List);
        self.send(request).await?;
        Ok(())
    }

    /// Subscribe to patterns; messages go to `"<address>.<pattern>"` on the bus
    pub async fn psubscribe<P: AsRef<str>>(&self, patterns: &[P]) -> RedisResult<()> {
        let request = Request::new("PSUBSCRIBE")
            .args(patterns.iter().map(AsRef::as_ref))
            .returning(ReturnType::List);
        self.send(request).await?;
        Ok(())
    }

    /// Unsubscribe from channels, or from all of them with an empty slice
    pub async fn unsubscribe<C: AsRef<str>>(&self, channels: &[C]) -> RedisResult<()> {
        let request = Request::new("UNSUBSCRIBE")
            .args(channels.iter().map(AsRef::as_ref))
            .returning(ReturnType::List);
        self.send(request).await?;
        Ok(())
    }

    /// Unsubscribe from patterns, or from all of them with an empty slice
    pub async fn punsubscribe<P: AsRef<str>>(&self, patterns: &[P]) -> RedisResult<()> {
        let request = Request::new("PUNSUBSCRIBE")
            .args(patterns.iter().map(AsRef::as_ref))
            .returning(ReturnType::List);
        self.send(request).await?;
        Ok(())
    }

    /// Send `QUIT` on both connections
    pub async fn quit(&self) -> RedisResult<()> {
        self.send(Request::new("QUIT").returning(ReturnType::Unit)).await?;
        Ok(())
    }

    /// Close both connections and wait until both are done
    ///
    /// Closing an idle or already closed client completes immediately.
    pub async fn close(&self) {
        info!("Closing client");
        tokio::join!(self.redis.disconnect(), self.pubsub.disconnect());
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("redis", &self.redis)
            .field("pubsub", &self.pubsub)
            .finish_non_exhaustive()
    }
}
