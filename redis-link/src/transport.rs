//! Byte-stream transport
//!
//! Connections only need something that reads and writes bytes. The
//! [`Connector`] trait hands them such a stream for a host and port, which
//! lets tests substitute in-memory pipes for TCP.

use crate::core::{
    config::ConnectionConfig,
    error::{RedisError, RedisResult},
};
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// A bidirectional byte stream
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Type-erased stream returned by a [`Connector`]
pub type BoxedStream = Box<dyn AsyncStream>;

/// Opens byte streams to Redis servers and Sentinels
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a stream to `host:port`
    async fn connect(&self, host: &str, port: u16) -> io::Result<BoxedStream>;
}

/// Plain TCP connector
#[derive(Debug, Clone)]
pub struct TcpConnector {
    nodelay: bool,
    keepalive: Option<Duration>,
}

impl TcpConnector {
    /// Create a connector with explicit socket options
    pub const fn new(nodelay: bool, keepalive: Option<Duration>) -> Self {
        Self { nodelay, keepalive }
    }

    /// Take socket options from `config`
    pub const fn from_config(config: &ConnectionConfig) -> Self {
        Self::new(config.tcp_nodelay, config.tcp_keepalive)
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::from_config(&ConnectionConfig::default())
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> io::Result<BoxedStream> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(self.nodelay)?;

        let Some(keepalive) = self.keepalive else {
            return Ok(Box::new(stream));
        };

        let socket = socket2::Socket::from(stream.into_std()?);
        socket.set_tcp_keepalive(&socket2::TcpKeepalive::new().with_time(keepalive))?;
        let stream = TcpStream::from_std(socket.into())?;
        Ok(Box::new(stream))
    }
}

/// Connect through `connector`, bounded by `limit`
pub(crate) async fn connect_within(
    connector: &dyn Connector,
    host: &str,
    port: u16,
    limit: Duration,
) -> RedisResult<BoxedStream> {
    debug!("Connecting to Redis at {}:{}", host, port);
    timeout(limit, connector.connect(host, port))
        .await
        .map_err(|_| RedisError::Timeout)?
        .map_err(|e| RedisError::Connection(format!("Failed to connect to {host}:{port}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    struct Refusing;

    #[async_trait]
    impl Connector for Refusing {
        async fn connect(&self, _host: &str, _port: u16) -> io::Result<BoxedStream> {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
        }
    }

    struct Hanging;

    #[async_trait]
    impl Connector for Hanging {
        async fn connect(&self, _host: &str, _port: u16) -> io::Result<BoxedStream> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_tcp_connector_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let connector = TcpConnector::new(true, Some(Duration::from_secs(30)));
        let mut stream = connector.connect("127.0.0.1", port).await.unwrap();
        stream.write_all(b"PING").await.unwrap();
        let mut echo = [0u8; 4];
        stream.read_exact(&mut echo).await.unwrap();
        assert_eq!(&echo, b"PING");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_within_maps_errors() {
        let err = connect_within(&Refusing, "h", 1, Duration::from_secs(1)).await.err().unwrap();
        assert!(matches!(err, RedisError::Connection(_)));

        let err = connect_within(&Hanging, "h", 1, Duration::from_millis(10)).await.err().unwrap();
        assert!(matches!(err, RedisError::Timeout));
    }
}
