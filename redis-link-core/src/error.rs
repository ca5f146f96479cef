//! Error types for Redis operations

use std::io;
use thiserror::Error;

/// Result type for Redis operations
pub type RedisResult<T> = Result<T, RedisError>;

/// Comprehensive error type for Redis operations
#[derive(Error, Debug)]
pub enum RedisError {
    /// IO error during network operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Protocol parsing error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server returned an error reply
    #[error("Server error: {0}")]
    Server(String),

    /// Connection error: connect failure, socket closed or connection lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Type conversion error
    #[error("Type conversion error: {0}")]
    Type(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Sentinel error
    #[error("Sentinel error: {0}")]
    Sentinel(String),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Unexpected response from server
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl RedisError {
    /// Produce an equivalent error value.
    ///
    /// A connection failure fails every queued command with the same cause;
    /// io errors are re-created from their kind and message.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        match self {
            Self::Io(e) => Self::Io(io::Error::new(e.kind(), e.to_string())),
            Self::Protocol(m) => Self::Protocol(m.clone()),
            Self::Server(m) => Self::Server(m.clone()),
            Self::Connection(m) => Self::Connection(m.clone()),
            Self::Timeout => Self::Timeout,
            Self::Type(m) => Self::Type(m.clone()),
            Self::Config(m) => Self::Config(m.clone()),
            Self::Sentinel(m) => Self::Sentinel(m.clone()),
            Self::Auth(m) => Self::Auth(m.clone()),
            Self::UnexpectedResponse(m) => Self::UnexpectedResponse(m.clone()),
        }
    }

    /// Check if this error is a connection-level failure
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Connection(_) | Self::Timeout)
    }

    /// The error text sent by the server, if this is a server error reply
    #[must_use]
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Server(msg) => Some(msg),
            _ => None,
        }
    }
}
