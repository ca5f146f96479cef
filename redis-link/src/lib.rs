//! Async Redis client with pipelining, pub/sub and Sentinel failover
//!
//! `redis-link` speaks RESP over a single logical connection per purpose.
//! Commands are written as soon as they are sent, without waiting for
//! earlier replies, and replies are matched back in send order. A client
//! keeps regular traffic and subscriptions on separate connections, and in
//! Sentinel mode resolves the current master before every connect.
//!
//! # Features
//!
//! - Lazy connect: nothing is dialled until the first command
//! - Pipelining with strict FIFO reply matching
//! - AUTH / SELECT handshake on every connect
//! - Pub/sub deliveries forwarded to a message bus
//! - Sentinel master resolution with failover across Sentinels
//!
//! # Quick Start
//!
//! ```no_run
//! use redis_link::{Client, ConnectionConfig, LocalBus};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::new("redis://localhost:6379");
//!     let client = Client::new(config, Arc::new(LocalBus::new()))?;
//!
//!     client.set("mykey", "myvalue").await?;
//!     let value: Option<String> = client.get("mykey").await?;
//!     println!("Value: {:?}", value);
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::future_not_send)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::large_enum_variant)]
#![allow(clippy::manual_let_else)]

pub mod client;
pub mod command;
pub mod connection;
pub mod protocol;
pub mod pubsub;
pub mod sentinel;
pub mod transform;
pub mod transport;

pub use redis_link_core as core;

pub use client::Client;
pub use command::{Arg, Command, Request, ResponseFuture};
pub use connection::{ConnectionRole, ConnectionState, ConnectionStats, RedisConnection};
pub use pubsub::{BusMessage, Delivery, LocalBus, MessageBus, PubSubMessage};
pub use sentinel::{SentinelClient, SentinelList};
pub use transport::{BoxedStream, Connector, TcpConnector};

pub use crate::core::{
    config::{ConnectionConfig, SentinelEndpoint},
    error::{RedisError, RedisResult},
    types::{RedisValue, ResponseTransform, ReturnType, TextEncoding},
    value::RespValue,
};
