//! Pub/Sub support
//!
//! The pub/sub connection keeps a registry of handlers keyed by channel and
//! by pattern. Incoming `message` and `pmessage` pushes are routed to the
//! matching handler before any waiting command sees them, so a push never
//! consumes another command's reply slot.
//!
//! The client facade registers handlers that forward every delivery to a
//! [`MessageBus`] under `"<base address>.<channel or pattern>"`.
//!
//! # Examples
//!
//! ```no_run
//! use redis_link::{Client, ConnectionConfig, LocalBus};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = Arc::new(LocalBus::new());
//! let config = ConnectionConfig::new("redis://localhost:6379").with_address("app");
//! let client = Client::new(config, bus.clone())?;
//!
//! let mut news = bus.listen("app.news");
//! client.subscribe(&["news"]).await?;
//!
//! while let Some(message) = news.recv().await {
//!     println!("{} on {}", message.value.message, message.value.channel);
//! }
//! # Ok(())
//! # }
//! ```

use crate::core::{types::TextEncoding, value::RespValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// A message received from a Redis channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    /// The channel the message was published to
    pub channel: String,
    /// The message payload
    pub payload: String,
    /// The pattern that matched (for pattern subscriptions)
    pub pattern: Option<String>,
}

/// Callback invoked for every message on a subscribed channel or pattern
pub type MessageHandler = Arc<dyn Fn(PubSubMessage) + Send + Sync>;

/// Channel or pattern subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    /// `SUBSCRIBE` / `UNSUBSCRIBE`
    Channel,
    /// `PSUBSCRIBE` / `PUNSUBSCRIBE`
    Pattern,
}

/// A registry change carried by a (un)subscribe command
#[derive(Clone)]
pub enum SubscriptionOp {
    /// Register one handler per key
    Subscribe {
        /// Channel or pattern
        kind: SubscriptionKind,
        /// Key and its handler
        handlers: Vec<(String, MessageHandler)>,
    },
    /// Remove the listed keys, or every key of `kind` when empty
    Unsubscribe {
        /// Channel or pattern
        kind: SubscriptionKind,
        /// Keys to remove
        keys: Vec<String>,
    },
}

impl fmt::Debug for SubscriptionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscribe { kind, handlers } => f
                .debug_struct("Subscribe")
                .field("kind", kind)
                .field("keys", &handlers.iter().map(|(k, _)| k).collect::<Vec<_>>())
                .finish(),
            Self::Unsubscribe { kind, keys } => f
                .debug_struct("Unsubscribe")
                .field("kind", kind)
                .field("keys", keys)
                .finish(),
        }
    }
}

/// Handler registry of a pub/sub connection
#[derive(Default)]
pub struct Subscriptions {
    channels: HashMap<String, MessageHandler>,
    patterns: HashMap<String, MessageHandler>,
}

impl Subscriptions {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `channel`
    pub fn register_channel(&mut self, channel: impl Into<String>, handler: MessageHandler) {
        self.channels.insert(channel.into(), handler);
    }

    /// Register (or replace) the handler for `pattern`
    pub fn register_pattern(&mut self, pattern: impl Into<String>, handler: MessageHandler) {
        self.patterns.insert(pattern.into(), handler);
    }

    /// Remove one channel handler, or all of them with `None`
    pub fn unregister_channel(&mut self, channel: Option<&str>) {
        match channel {
            Some(channel) => {
                self.channels.remove(channel);
            }
            None => self.channels.clear(),
        }
    }

    /// Remove one pattern handler, or all of them with `None`
    pub fn unregister_pattern(&mut self, pattern: Option<&str>) {
        match pattern {
            Some(pattern) => {
                self.patterns.remove(pattern);
            }
            None => self.patterns.clear(),
        }
    }

    /// Drop every channel and pattern handler
    pub fn clear(&mut self) {
        self.channels.clear();
        self.patterns.clear();
    }

    /// Number of channel handlers
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of pattern handlers
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Whether `channel` has a handler
    pub fn has_channel(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    /// Whether `pattern` has a handler
    pub fn has_pattern(&self, pattern: &str) -> bool {
        self.patterns.contains_key(pattern)
    }

    /// Apply a registry change and return how many acknowledgements the
    /// command that carried it will receive.
    ///
    /// Unsubscribing from everything is acknowledged once per registered key,
    /// or once when nothing was registered.
    pub fn apply(&mut self, op: SubscriptionOp) -> usize {
        match op {
            SubscriptionOp::Subscribe { kind, handlers } => {
                let expected = handlers.len();
                for (key, handler) in handlers {
                    match kind {
                        SubscriptionKind::Channel => self.register_channel(key, handler),
                        SubscriptionKind::Pattern => self.register_pattern(key, handler),
                    }
                }
                expected.max(1)
            }
            SubscriptionOp::Unsubscribe { kind, keys } if keys.is_empty() => {
                let registered = match kind {
                    SubscriptionKind::Channel => self.channel_count(),
                    SubscriptionKind::Pattern => self.pattern_count(),
                };
                match kind {
                    SubscriptionKind::Channel => self.unregister_channel(None),
                    SubscriptionKind::Pattern => self.unregister_pattern(None),
                }
                registered.max(1)
            }
            SubscriptionOp::Unsubscribe { kind, keys } => {
                for key in &keys {
                    match kind {
                        SubscriptionKind::Channel => self.unregister_channel(Some(key)),
                        SubscriptionKind::Pattern => self.unregister_pattern(Some(key)),
                    }
                }
                keys.len()
            }
        }
    }

    /// Route a reply that is a `message` or `pmessage` push.
    ///
    /// Returns `false` when `reply` is not a push and must be matched against
    /// a waiting command. A push for a key without a handler is consumed and
    /// dropped.
    pub fn dispatch(&self, reply: &RespValue, encoding: TextEncoding) -> bool {
        let RespValue::Array(items) = reply else {
            return false;
        };

        match items.as_slice() {
            [kind, channel, payload] if kind.is_bulk("message") => {
                let channel = text(channel, encoding);
                match self.channels.get(&channel) {
                    Some(handler) => handler(PubSubMessage {
                        payload: text(payload, encoding),
                        channel,
                        pattern: None,
                    }),
                    None => debug!("No handler for message on channel {}", channel),
                }
                true
            }
            [kind, pattern, channel, payload] if kind.is_bulk("pmessage") => {
                let pattern = text(pattern, encoding);
                match self.patterns.get(&pattern) {
                    Some(handler) => handler(PubSubMessage {
                        channel: text(channel, encoding),
                        payload: text(payload, encoding),
                        pattern: Some(pattern),
                    }),
                    None => debug!("No handler for pmessage on pattern {}", pattern),
                }
                true
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriptions")
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .field("patterns", &self.patterns.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn text(value: &RespValue, encoding: TextEncoding) -> String {
    match value {
        RespValue::BulkString(b) => encoding.decode(b),
        RespValue::SimpleString(s) => s.clone(),
        RespValue::Integer(i) => i.to_string(),
        _ => String::new(),
    }
}

/// Envelope published on the bus for every delivered message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Always `"ok"`
    pub status: String,
    /// The delivery itself
    pub value: Delivery,
}

/// Channel, message and, for pattern subscriptions, the matching pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    /// Matching pattern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Channel the message was published to
    pub channel: String,
    /// Payload
    pub message: String,
}

impl From<PubSubMessage> for BusMessage {
    fn from(message: PubSubMessage) -> Self {
        Self {
            status: "ok".to_string(),
            value: Delivery {
                pattern: message.pattern,
                channel: message.channel,
                message: message.payload,
            },
        }
    }
}

/// Bus address for deliveries on `key` (a channel or a pattern)
pub fn delivery_address(base: &str, key: &str) -> String {
    format!("{base}.{key}")
}

/// Where the client publishes pub/sub deliveries
pub trait MessageBus: Send + Sync {
    /// Publish `message` to every listener of `address`
    fn publish(&self, address: &str, message: BusMessage);
}

/// In-process bus backed by unbounded channels
#[derive(Debug, Default)]
pub struct LocalBus {
    listeners: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<BusMessage>>>>,
}

impl LocalBus {
    /// Create a bus with no listeners
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every message published to `address` from now on
    pub fn listen(&self, address: impl Into<String>) -> mpsc::UnboundedReceiver<BusMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        listeners.entry(address.into()).or_default().push(tx);
        rx
    }

    /// Number of live listeners on `address`
    pub fn listener_count(&self, address: &str) -> usize {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        listeners
            .get(address)
            .map_or(0, |senders| senders.iter().filter(|s| !s.is_closed()).count())
    }
}

impl MessageBus for LocalBus {
    fn publish(&self, address: &str, message: BusMessage) {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(senders) = listeners.get_mut(address) else {
            debug!("No bus listener for {}", address);
            return;
        };
        senders.retain(|tx| tx.send(message.clone()).is_ok());
        if senders.is_empty() {
            listeners.remove(address);
        }
    }
}
