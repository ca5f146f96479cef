//! Configuration types for Redis connections

use crate::error::{RedisError, RedisResult};
use crate::types::TextEncoding;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default Redis port
pub const DEFAULT_PORT: u16 = 6379;

/// Delay before a failed Sentinel resolution is retried
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(300);

/// Sentinel endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SentinelEndpoint {
    /// Sentinel host
    #[serde(alias = "ip")]
    pub host: String,
    /// Sentinel port
    pub port: u16,
}

impl SentinelEndpoint {
    /// Create a new sentinel endpoint
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse from address string (host:port)
    ///
    /// # Errors
    ///
    /// Returns an error if the address format is invalid.
    pub fn from_address(addr: &str) -> RedisResult<Self> {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| RedisError::Config(format!("Invalid sentinel address: {}", addr)))?;

        if host.is_empty() {
            return Err(RedisError::Config(format!(
                "Invalid sentinel address: {}",
                addr
            )));
        }

        let port = port.parse::<u16>().map_err(|_| {
            RedisError::Config(format!("Invalid port in sentinel address: {}", addr))
        })?;

        Ok(Self::new(host, port))
    }

    /// Get the address string
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration for a Redis client
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server host (ignored in Sentinel mode)
    pub host: String,

    /// Server port (ignored in Sentinel mode)
    pub port: u16,

    /// Encoding for textual arguments and replies
    pub encoding: TextEncoding,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// TCP keepalive idle time, `None` disables keepalive
    pub tcp_keepalive: Option<Duration>,

    /// Disable Nagle's algorithm
    pub tcp_nodelay: bool,

    /// Optional password, sent with AUTH on every connect
    pub password: Option<String>,

    /// Logical database, selected on every connect
    pub database: Option<u32>,

    /// Name of the master monitored by the Sentinels; enables Sentinel mode
    pub master_name: Option<String>,

    /// Sentinel endpoints, tried in order
    pub sentinels: Vec<SentinelEndpoint>,

    /// Base address for pub/sub deliveries (`address.channel`)
    pub address: String,

    /// Delay before reconnecting after Sentinel resolution fails
    pub retry_interval: Duration,

    /// Upper bound on a single Sentinel master-address query
    pub sentinel_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            encoding: TextEncoding::Utf8,
            connect_timeout: Duration::from_secs(5),
            tcp_keepalive: Some(Duration::from_secs(60)),
            tcp_nodelay: true,
            password: None,
            database: None,
            master_name: None,
            sentinels: Vec::new(),
            address: "redis-link".to_string(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            sentinel_timeout: DEFAULT_RETRY_INTERVAL,
        }
    }
}

impl ConnectionConfig {
    /// Create a configuration from a connection string
    ///
    /// Accepts `host`, `host:port` and `redis://host:port/db`. Unparseable
    /// parts fall back to the defaults; [`validate`](Self::validate) reports
    /// what remains invalid.
    pub fn new(connection_string: impl AsRef<str>) -> Self {
        let conn_str = connection_string.as_ref().trim();
        let addr_part = conn_str.strip_prefix("redis://").unwrap_or(conn_str);

        let (endpoint, database) = match addr_part.split_once('/') {
            Some((endpoint, db)) => (endpoint, db.parse::<u32>().ok()),
            None => (addr_part, None),
        };

        let mut config = Self {
            database,
            ..Default::default()
        };

        // Parse host:port
        if let Some((host, port_str)) = endpoint.rsplit_once(':') {
            if let Ok(port) = port_str.parse::<u16>() {
                config.host = host.to_string();
                config.port = port;
                return config;
            }
        }

        if !endpoint.is_empty() {
            config.host = endpoint.to_string();
        }
        config
    }

    /// Set the password for authentication
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database number
    #[must_use]
    pub const fn with_database(mut self, database: u32) -> Self {
        self.database = Some(database);
        self
    }

    /// Set the text encoding
    #[must_use]
    pub const fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set the connection timeout
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set TCP keepalive, `None` disables it
    #[must_use]
    pub const fn with_tcp_keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.tcp_keepalive = keepalive;
        self
    }

    /// Enable or disable TCP_NODELAY
    #[must_use]
    pub const fn with_tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }

    /// Resolve the master through Sentinels
    #[must_use]
    pub fn with_sentinel(
        mut self,
        master_name: impl Into<String>,
        sentinels: Vec<SentinelEndpoint>,
    ) -> Self {
        self.master_name = Some(master_name.into());
        self.sentinels = sentinels;
        self
    }

    /// Add a sentinel endpoint given as `host:port`
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn add_sentinel(mut self, addr: impl AsRef<str>) -> RedisResult<Self> {
        self.sentinels
            .push(SentinelEndpoint::from_address(addr.as_ref())?);
        Ok(self)
    }

    /// Set the base pub/sub delivery address
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Set the Sentinel retry interval
    #[must_use]
    pub const fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the per-query Sentinel timeout
    #[must_use]
    pub const fn with_sentinel_timeout(mut self, timeout: Duration) -> Self {
        self.sentinel_timeout = timeout;
        self
    }

    /// Whether the master is discovered through Sentinels
    #[must_use]
    pub fn is_sentinel_mode(&self) -> bool {
        self.master_name.as_deref().is_some_and(|m| !m.is_empty())
    }

    /// Check the configuration before any connection is started
    ///
    /// # Errors
    ///
    /// Returns a configuration error when Sentinel mode has no endpoints or
    /// the direct endpoint is unusable.
    pub fn validate(&self) -> RedisResult<()> {
        if self.is_sentinel_mode() {
            if self.sentinels.is_empty() {
                return Err(RedisError::Config(
                    "Sentinel mode requires at least one sentinel".to_string(),
                ));
            }
            return Ok(());
        }

        if self.host.is_empty() {
            return Err(RedisError::Config("No host specified".to_string()));
        }
        if self.port == 0 {
            return Err(RedisError::Config("Port must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connection_string() {
        let config = ConnectionConfig::new("redis://10.0.0.1:6380/2");
        assert_eq!(config.host, "10.0.0.1");
        assert_eq!(config.port, 6380);
        assert_eq!(config.database, Some(2));

        let config = ConnectionConfig::new("cache.local");
        assert_eq!(config.host, "cache.local");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.database, None);
    }

    #[test]
    fn test_sentinel_mode_requires_endpoints() {
        let config = ConnectionConfig::default().with_sentinel("mymaster", Vec::new());
        assert!(config.is_sentinel_mode());
        assert!(matches!(config.validate(), Err(RedisError::Config(_))));

        let config = ConnectionConfig::default()
            .with_sentinel("mymaster", vec![SentinelEndpoint::new("127.0.0.1", 26379)]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sentinel_endpoint_from_address() {
        let endpoint = SentinelEndpoint::from_address("127.0.0.1:26379").unwrap();
        assert_eq!(endpoint.host, "127.0.0.1");
        assert_eq!(endpoint.port, 26379);
        assert_eq!(endpoint.address(), "127.0.0.1:26379");

        assert!(SentinelEndpoint::from_address("invalid").is_err());
        assert!(SentinelEndpoint::from_address(":26379").is_err());
        assert!(SentinelEndpoint::from_address("host:port").is_err());
    }

    #[test]
    fn test_sentinel_endpoint_accepts_ip_field() {
        let endpoint: SentinelEndpoint =
            serde_json::from_str(r#"{"ip":"10.1.1.1","port":26380}"#).unwrap();
        assert_eq!(endpoint, SentinelEndpoint::new("10.1.1.1", 26380));
    }

    #[test]
    fn test_builder() {
        let config = ConnectionConfig::new("localhost:6379")
            .with_password("secret")
            .with_database(3)
            .with_address("app.redis")
            .with_retry_interval(Duration::from_millis(50))
            .add_sentinel("127.0.0.1:26379")
            .unwrap();

        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.database, Some(3));
        assert_eq!(config.address, "app.redis");
        assert_eq!(config.sentinels.len(), 1);
        assert!(!config.is_sentinel_mode());
    }
}
