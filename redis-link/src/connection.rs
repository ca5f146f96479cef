//! Connection lifecycle
//!
//! A [`RedisConnection`] is a cheap handle to a task that owns one logical
//! connection. The task holds every piece of mutable state: the lifecycle
//! state, the `pending` queue of commands submitted before the connection was
//! usable, the `waiting` queue of commands written to the socket in send
//! order, the incremental reply parser and, in Sentinel mode, the Sentinel
//! list. Socket reads, connect attempts and retry timers run as separate
//! tasks that report back as events, tagged with the socket generation
//! (`epoch`) they belong to, so a stale socket can never touch the queues.
//!
//! Lifecycle:
//!
//! ```text
//! DISCONNECTED --send--> CONNECTING --handshake ok--> CONNECTED
//!       ^                    |                            |
//!       |                    +------ failure -----+-------+
//!       |                                         v
//!       +---------------------------------------ERROR
//! ```
//!
//! The handshake runs in a fixed order before anything else is written:
//! `AUTH` when a password is set, `ROLE` in Sentinel mode, then `SELECT`
//! when a database is set.

use crate::command::{Command, Request};
use crate::core::{
    config::{ConnectionConfig, SentinelEndpoint},
    error::{RedisError, RedisResult},
    types::ReturnType,
    value::RespValue,
};
use crate::protocol::{ReplyParser, RespEncoder};
use crate::pubsub::Subscriptions;
use crate::sentinel::{connect_via_sentinels, SentinelList};
use crate::transport::{connect_within, BoxedStream, Connector};
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket; the next command starts a connect
    Disconnected,
    /// Connecting or running the handshake
    Connecting,
    /// Ready; commands are written immediately
    Connected,
    /// Transient state while queues are being failed
    Error,
}

impl ConnectionState {
    /// Connecting or connected
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// What a connection is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// Regular commands
    Command,
    /// Subscriptions; routes `message`/`pmessage` pushes to handlers
    PubSub,
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => f.write_str("command"),
            Self::PubSub => f.write_str("pubsub"),
        }
    }
}

/// Point-in-time view of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Lifecycle state
    pub state: ConnectionState,
    /// Commands queued until the connection is usable
    pub pending: usize,
    /// Replies still expected from the socket
    pub waiting: usize,
    /// Registered channel handlers
    pub channels: usize,
    /// Registered pattern handlers
    pub patterns: usize,
    /// Sentinels in the order the next connect will try them
    pub sentinels: Vec<SentinelEndpoint>,
    /// Connect attempts started so far
    pub connect_attempts: u64,
}

enum Event {
    Send(Command),
    Disconnect(oneshot::Sender<()>),
    Attached {
        epoch: u64,
        stream: BoxedStream,
        sentinel: Option<usize>,
    },
    ConnectFailed {
        epoch: u64,
        error: RedisError,
        retry: bool,
    },
    Data {
        epoch: u64,
        chunk: Bytes,
    },
    Closed {
        epoch: u64,
    },
    ReadFailed {
        epoch: u64,
        error: io::Error,
    },
    Retry,
    Stats(oneshot::Sender<ConnectionStats>),
    Shutdown,
}

struct Shared {
    role: ConnectionRole,
    events: mpsc::UnboundedSender<Event>,
    state: watch::Receiver<ConnectionState>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let _ = self.events.send(Event::Shutdown);
    }
}

/// Handle to a connection task
///
/// Clones share the same connection. The task stops, failing whatever is
/// still queued, once the last handle is dropped.
#[derive(Clone)]
pub struct RedisConnection {
    shared: Arc<Shared>,
}

impl fmt::Debug for RedisConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConnection")
            .field("role", &self.shared.role)
            .field("state", &self.state())
            .finish()
    }
}

impl RedisConnection {
    /// Start the task for a connection described by `config`.
    ///
    /// Nothing is dialled until the first command is sent. Must be called
    /// from within a Tokio runtime.
    pub fn spawn(
        config: Arc<ConnectionConfig>,
        connector: Arc<dyn Connector>,
        role: ConnectionRole,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let task = ConnectionTask {
            role,
            sentinels: SentinelList::from_config(&config),
            subscriptions: (role == ConnectionRole::PubSub).then(Subscriptions::new),
            config,
            connector,
            events: events_tx.clone(),
            state: ConnectionState::Disconnected,
            state_tx,
            epoch: 0,
            connect_attempts: 0,
            pending: VecDeque::new(),
            waiting: VecDeque::new(),
            parser: ReplyParser::new(),
            writer: None,
            reader: None,
        };
        tokio::spawn(task.run(events_rx));

        Self {
            shared: Arc::new(Shared {
                role,
                events: events_tx,
                state: state_rx,
            }),
        }
    }

    /// What this connection is used for
    pub fn role(&self) -> ConnectionRole {
        self.shared.role
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Subscribe to lifecycle state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.clone()
    }

    /// Submit `command`. A disconnected connection starts connecting and
    /// queues it; a connecting one queues it; a connected one writes it.
    pub fn send(&self, command: Command) {
        if let Err(mpsc::error::SendError(event)) = self.shared.events.send(Event::Send(command)) {
            if let Event::Send(command) = event {
                command.fail(RedisError::Connection("Connection task stopped".to_string()));
            }
        }
    }

    /// Gracefully close: send `QUIT` and wait for its acknowledgement.
    ///
    /// Completes immediately when the connection is not active. Errors are
    /// ignored; the connection ends up disconnected either way.
    pub async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();
        if self.shared.events.send(Event::Disconnect(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Snapshot of the queues and state
    pub async fn stats(&self) -> RedisResult<ConnectionStats> {
        let (tx, rx) = oneshot::channel();
        self.shared
            .events
            .send(Event::Stats(tx))
            .map_err(|_| RedisError::Connection("Connection task stopped".to_string()))?;
        rx.await
            .map_err(|_| RedisError::Connection("Connection task stopped".to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
enum Handshake {
    Auth { sentinel: Option<usize> },
    Role { sentinel: usize },
    Select,
}

enum Waiter {
    Command(Command),
    Handshake(Handshake),
}

impl Waiter {
    fn slots(&self) -> usize {
        match self {
            Self::Command(command) => command.remaining_replies(),
            Self::Handshake(_) => 1,
        }
    }
}

struct ConnectionTask {
    role: ConnectionRole,
    config: Arc<ConnectionConfig>,
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedSender<Event>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    epoch: u64,
    connect_attempts: u64,
    pending: VecDeque<Command>,
    waiting: VecDeque<Waiter>,
    parser: ReplyParser,
    writer: Option<WriteHalf<BoxedStream>>,
    reader: Option<JoinHandle<()>>,
    sentinels: Option<SentinelList>,
    subscriptions: Option<Subscriptions>,
}

impl ConnectionTask {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = events.recv().await {
            match event {
                Event::Send(command) => self.on_send(command).await,
                Event::Disconnect(done) => self.on_disconnect(done).await,
                Event::Attached {
                    epoch,
                    stream,
                    sentinel,
                } => {
                    if epoch == self.epoch {
                        self.on_attached(stream, sentinel).await;
                    } else {
                        debug!("[{}] Dropping socket from a superseded connect", self.role);
                    }
                }
                Event::ConnectFailed {
                    epoch,
                    error,
                    retry,
                } => {
                    if epoch == self.epoch {
                        self.fail_connection(error, retry);
                    }
                }
                Event::Data { epoch, chunk } => {
                    if epoch == self.epoch {
                        self.on_data(&chunk).await;
                    }
                }
                Event::Closed { epoch } => {
                    if epoch == self.epoch {
                        self.fail_connection(
                            RedisError::Connection("Connection closed by peer".to_string()),
                            false,
                        );
                    }
                }
                Event::ReadFailed { epoch, error } => {
                    if epoch == self.epoch {
                        self.fail_connection(RedisError::Io(error), false);
                    }
                }
                Event::Retry => {
                    if self.state == ConnectionState::Disconnected {
                        self.connect();
                    }
                }
                Event::Stats(reply) => {
                    let _ = reply.send(self.stats());
                }
                Event::Shutdown => {
                    self.shutdown();
                    break;
                }
            }
        }
        debug!("[{}] Connection task finished", self.role);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("[{}] {} -> {}", self.role, self.state, state);
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }

    fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            state: self.state,
            pending: self.pending.len(),
            waiting: self.waiting.iter().map(Waiter::slots).sum(),
            channels: self.subscriptions.as_ref().map_or(0, Subscriptions::channel_count),
            patterns: self.subscriptions.as_ref().map_or(0, Subscriptions::pattern_count),
            sentinels: self
                .sentinels
                .as_ref()
                .map(|list| list.endpoints().to_vec())
                .unwrap_or_default(),
            connect_attempts: self.connect_attempts,
        }
    }

    async fn on_send(&mut self, mut command: Command) {
        if let Some(op) = command.take_subscription() {
            let Some(subscriptions) = self.subscriptions.as_mut() else {
                let message = format!("{} must be sent on the pub/sub connection", command.verb());
                command.fail(RedisError::Config(message));
                return;
            };
            let expected = subscriptions.apply(op);
            command.set_expected_replies(expected);
        }

        match self.state {
            ConnectionState::Connected => {
                self.dispatch(command).await;
            }
            ConnectionState::Disconnected => {
                self.pending.push_back(command);
                self.connect();
            }
            ConnectionState::Connecting | ConnectionState::Error => {
                self.pending.push_back(command);
            }
        }
    }

    async fn on_disconnect(&mut self, done: oneshot::Sender<()>) {
        if !self.state.is_active() {
            let _ = done.send(());
            return;
        }

        let quit = Request::new("QUIT").returning(ReturnType::Unit);
        let (command, response) = Command::new(quit, self.config.encoding);
        tokio::spawn(async move {
            let _ = response.await;
            let _ = done.send(());
        });
        self.on_send(command).await;
    }

    fn connect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            return;
        }
        self.set_state(ConnectionState::Connecting);
        self.epoch += 1;
        self.connect_attempts += 1;
        self.parser.reset();

        let epoch = self.epoch;
        let events = self.events.clone();
        let connector = self.connector.clone();
        let config = self.config.clone();
        let sentinels = self.sentinels.as_ref().map(|list| list.endpoints().to_vec());

        match &sentinels {
            Some(list) => info!(
                "[{}] Resolving master {} through {} sentinel(s)",
                self.role,
                config.master_name.as_deref().unwrap_or_default(),
                list.len()
            ),
            None => info!("[{}] Connecting to {}:{}", self.role, config.host, config.port),
        }

        tokio::spawn(async move {
            let event = match sentinels {
                Some(list) => {
                    match connect_via_sentinels(connector.as_ref(), &config, &list).await {
                        Ok((stream, index)) => Event::Attached {
                            epoch,
                            stream,
                            sentinel: Some(index),
                        },
                        Err(error) => Event::ConnectFailed {
                            epoch,
                            error,
                            retry: true,
                        },
                    }
                }
                None => match connect_within(
                    connector.as_ref(),
                    &config.host,
                    config.port,
                    config.connect_timeout,
                )
                .await
                {
                    Ok(stream) => Event::Attached {
                        epoch,
                        stream,
                        sentinel: None,
                    },
                    Err(error) => Event::ConnectFailed {
                        epoch,
                        error,
                        retry: false,
                    },
                },
            };
            let _ = events.send(event);
        });
    }

    async fn on_attached(&mut self, stream: BoxedStream, sentinel: Option<usize>) {
        if self.state != ConnectionState::Connecting {
            return;
        }
        debug!("[{}] Socket attached", self.role);

        let (reader, writer) = tokio::io::split(stream);
        self.writer = Some(writer);
        self.reader = Some(spawn_reader(reader, self.epoch, self.events.clone()));
        self.parser.reset();

        // Nothing written on an earlier socket can be answered on this one
        self.fail_waiting(&RedisError::Connection("Connection lost".to_string()));

        self.begin_auth(sentinel).await;
    }

    async fn begin_auth(&mut self, sentinel: Option<usize>) {
        match self.config.password.as_deref() {
            Some(password) => {
                let args = [self.config.encoding.encode(password)];
                self.write_handshake(Handshake::Auth { sentinel }, "AUTH", &args)
                    .await;
            }
            None => self.begin_role_check(sentinel).await,
        }
    }

    async fn begin_role_check(&mut self, sentinel: Option<usize>) {
        match sentinel {
            Some(index) => {
                self.write_handshake(Handshake::Role { sentinel: index }, "ROLE", &[])
                    .await;
            }
            None => self.begin_select().await,
        }
    }

    async fn begin_select(&mut self) {
        match self.config.database {
            Some(db) => {
                let args = [Bytes::from(db.to_string())];
                self.write_handshake(Handshake::Select, "SELECT", &args).await;
            }
            None => self.finish_handshake().await,
        }
    }

    async fn write_handshake(&mut self, step: Handshake, verb: &str, args: &[Bytes]) {
        debug!("[{}] Handshake {}", self.role, verb);
        self.waiting.push_back(Waiter::Handshake(step));
        self.write(RespEncoder::encode_command(verb, args)).await;
    }

    async fn on_handshake_reply(&mut self, step: Handshake, reply: RespValue) {
        match step {
            Handshake::Auth { sentinel } => {
                if let RespValue::Error(msg) = reply {
                    warn!("[{}] AUTH rejected: {}", self.role, msg);
                    self.fail_connection(RedisError::Auth(msg), false);
                } else {
                    self.begin_role_check(sentinel).await;
                }
            }
            Handshake::Role { sentinel } => {
                if is_master_role(&reply) {
                    if let Some(list) = self.sentinels.as_mut() {
                        list.move_to_front(sentinel);
                    }
                    self.begin_select().await;
                } else {
                    warn!("[{}] Resolved peer is not a master: {:?}", self.role, reply);
                    self.fail_connection(
                        RedisError::Sentinel("Resolved peer is not a master".to_string()),
                        true,
                    );
                }
            }
            Handshake::Select => {
                if let RespValue::Error(msg) = reply {
                    warn!("[{}] SELECT rejected: {}", self.role, msg);
                    self.fail_connection(RedisError::Server(msg), false);
                } else {
                    self.finish_handshake().await;
                }
            }
        }
    }

    async fn finish_handshake(&mut self) {
        if self.state != ConnectionState::Connecting {
            return;
        }
        self.set_state(ConnectionState::Connected);
        info!("[{}] Connected, flushing {} pending command(s)", self.role, self.pending.len());

        while let Some(command) = self.pending.pop_front() {
            if !self.dispatch(command).await {
                break;
            }
        }
    }

    async fn dispatch(&mut self, command: Command) -> bool {
        let frame = command.frame().clone();
        self.waiting.push_back(Waiter::Command(command));
        self.write(frame).await
    }

    async fn write(&mut self, frame: Bytes) -> bool {
        let result = match self.writer.as_mut() {
            Some(writer) => match writer.write_all(&frame).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            },
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "socket not attached")),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                self.fail_connection(RedisError::Io(e), false);
                false
            }
        }
    }

    async fn on_data(&mut self, chunk: &[u8]) {
        let mut replies = Vec::new();
        let parsed = self.parser.feed(chunk, |reply| replies.push(reply));

        let epoch = self.epoch;
        for reply in replies {
            if self.epoch != epoch {
                break;
            }
            self.on_reply(reply).await;
        }

        if let Err(e) = parsed {
            if self.epoch == epoch {
                error!("[{}] Malformed reply stream: {}", self.role, e);
                self.fail_connection(e, false);
            }
        }
    }

    async fn on_reply(&mut self, reply: RespValue) {
        if let Some(subscriptions) = &self.subscriptions {
            if subscriptions.dispatch(&reply, self.config.encoding) {
                return;
            }
        }

        let complete = match self.waiting.front_mut() {
            None => {
                error!("[{}] No handler waiting for message: {:?}", self.role, reply);
                return;
            }
            Some(Waiter::Handshake(_)) => {
                if let Some(Waiter::Handshake(step)) = self.waiting.pop_front() {
                    self.on_handshake_reply(step, reply).await;
                }
                return;
            }
            Some(Waiter::Command(command)) => command.accept(reply),
        };

        if !complete {
            return;
        }
        if let Some(Waiter::Command(command)) = self.waiting.pop_front() {
            if command.is_quit() && command.succeeded() {
                self.close_gracefully();
            }
            command.complete();
        }
    }

    fn close_gracefully(&mut self) {
        if self.state != ConnectionState::Connected {
            return;
        }
        info!("[{}] Connection closed", self.role);
        self.teardown(&RedisError::Connection("Connection closed".to_string()));
    }

    fn fail_connection(&mut self, error: RedisError, retry: bool) {
        if !self.state.is_active() {
            return;
        }
        warn!("[{}] Connection failed: {}", self.role, error);
        self.teardown(&error);

        if retry {
            let events = self.events.clone();
            let delay = self.config.retry_interval;
            debug!("[{}] Reconnecting in {:?}", self.role, delay);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = events.send(Event::Retry);
            });
        }
    }

    fn teardown(&mut self, error: &RedisError) {
        self.set_state(ConnectionState::Error);
        self.fail_waiting(error);
        self.fail_pending(error);
        self.release_socket();
        if let Some(subscriptions) = self.subscriptions.as_mut() {
            // The server forgets every subscription with the socket.
            subscriptions.clear();
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn release_socket(&mut self) {
        self.writer = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.epoch += 1;
        self.parser.reset();
    }

    fn fail_waiting(&mut self, error: &RedisError) {
        for waiter in self.waiting.drain(..) {
            if let Waiter::Command(command) = waiter {
                command.fail(error.duplicate());
            }
        }
    }

    fn fail_pending(&mut self, error: &RedisError) {
        for command in self.pending.drain(..) {
            command.fail(error.duplicate());
        }
    }

    fn shutdown(&mut self) {
        let error = RedisError::Connection("Connection dropped".to_string());
        self.fail_waiting(&error);
        self.fail_pending(&error);
        self.release_socket();
        self.set_state(ConnectionState::Disconnected);
    }
}

fn is_master_role(reply: &RespValue) -> bool {
    match reply {
        RespValue::Array(items) => items.first().is_some_and(|role| {
            role.is_bulk("master") || matches!(role, RespValue::SimpleString(s) if s == "master")
        }),
        _ => false,
    }
}

fn spawn_reader(
    mut reader: ReadHalf<BoxedStream>,
    epoch: u64,
    events: mpsc::UnboundedSender<Event>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(8192);
        loop {
            match reader.read_buf(&mut buf).await {
                Ok(0) => {
                    let _ = events.send(Event::Closed { epoch });
                    break;
                }
                Ok(_) => {
                    let chunk = buf.split().freeze();
                    if events.send(Event::Data { epoch, chunk }).is_err() {
                        break;
                    }
                    buf.reserve(8192);
                }
                Err(error) => {
                    let _ = events.send(Event::ReadFailed { epoch, error });
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_master_role_detection() {
        let master = RespValue::Array(vec![
            RespValue::BulkString(Bytes::from_static(b"master")),
            RespValue::Integer(0),
            RespValue::Array(vec![]),
        ]);
        assert!(is_master_role(&master));

        let replica = RespValue::Array(vec![RespValue::BulkString(Bytes::from_static(b"slave"))]);
        assert!(!is_master_role(&replica));
        assert!(!is_master_role(&RespValue::Error("ERR".into())));
    }

    #[test]
    fn test_state_activity() {
        assert!(ConnectionState::Connecting.is_active());
        assert!(ConnectionState::Connected.is_active());
        assert!(!ConnectionState::Disconnected.is_active());
        assert!(!ConnectionState::Error.is_active());
        assert_eq!(ConnectionState::Connected.to_string(), "CONNECTED");
    }
}
