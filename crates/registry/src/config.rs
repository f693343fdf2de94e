//! Messaging configuration as stored on disk.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8080"
//!
//! [incoming.amounts]
//! connector = "websocket"
//! path = "/amounts"
//! buffer-size = 8
//!
//! [outgoing.converted]
//! connector = "websocket"
//! url = "ws://localhost:9090/converted"
//! maxRetries = 1
//! jitter = 0.5
//! delay = "2s"
//! ```
//!
//! Channel tables are kept loosely typed here; [`Channel`](crate::Channel)
//! validates them per direction when they are registered.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::channel::bounded_duration;
use crate::duration;
use crate::error::ConfigError;

/// Name reported in errors about the `[server]` table.
const SERVER_TABLE: &str = "[server]";

/// Top-level messaging configuration.
///
/// Unknown top-level tables are ignored so applications can keep their own
/// settings in the same file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagingConfig {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub incoming: BTreeMap<String, ChannelConfig>,

    #[serde(default)]
    pub outgoing: BTreeMap<String, ChannelConfig>,
}

impl MessagingConfig {
    /// Reads and parses a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(
            path = %path.display(),
            incoming = config.incoming.len(),
            outgoing = config.outgoing.len(),
            "messaging configuration loaded"
        );
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

/// Listener shared by every incoming channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct ServerSettings {
    /// Address the WebSocket listener binds to (port 0 = OS-assigned).
    pub bind: SocketAddr,

    /// Interval between server pings on idle connections.
    #[serde(deserialize_with = "duration::deserialize")]
    pub ping_interval: Duration,

    /// Upper bound for a single WebSocket message.
    pub max_message_size: usize,

    /// How long shutdown waits for connections to drain.
    #[serde(deserialize_with = "duration::deserialize")]
    pub shutdown_grace: Duration,
}

impl ServerSettings {
    /// Rejects listener settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_interval.is_zero() {
            return Err(ConfigError::invalid(SERVER_TABLE, "ping-interval", "must be positive"));
        }
        bounded_duration(SERVER_TABLE, "ping-interval", self.ping_interval)?;
        bounded_duration(SERVER_TABLE, "shutdown-grace", self.shutdown_grace)?;
        if self.max_message_size == 0 {
            return Err(ConfigError::invalid(
                SERVER_TABLE,
                "max-message-size",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            ping_interval: Duration::from_secs(30),
            max_message_size: wsbridge_protocol::DEFAULT_MAX_MESSAGE_SIZE,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Raw, string-keyed settings of one channel.
///
/// Keys of both directions are accepted by the parser; registering the
/// channel rejects keys that do not belong to its direction.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    pub connector: Option<String>,

    pub serializer: Option<String>,

    pub path: Option<String>,

    #[serde(rename = "buffer-size")]
    pub buffer_size: Option<usize>,

    pub url: Option<String>,

    #[serde(rename = "maxRetries", alias = "max-retries")]
    pub max_retries: Option<u32>,

    pub jitter: Option<f64>,

    #[serde(default, deserialize_with = "duration::deserialize_option")]
    pub delay: Option<Duration>,

    #[serde(rename = "backoff-factor")]
    pub backoff_factor: Option<f64>,

    #[serde(
        rename = "max-delay",
        default,
        deserialize_with = "duration::deserialize_option"
    )]
    pub max_delay: Option<Duration>,

    #[serde(
        rename = "connect-timeout",
        default,
        deserialize_with = "duration::deserialize_option"
    )]
    pub connect_timeout: Option<Duration>,

    #[serde(
        rename = "send-timeout",
        default,
        deserialize_with = "duration::deserialize_option"
    )]
    pub send_timeout: Option<Duration>,

    #[serde(rename = "queue-size")]
    pub queue_size: Option<usize>,
}

impl ChannelConfig {
    /// Minimal incoming channel bound to `path`.
    pub fn incoming(path: impl Into<String>) -> Self {
        Self {
            connector: Some(wsbridge_protocol::CONNECTOR_NAME.into()),
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Minimal outgoing channel targeting `url`.
    pub fn outgoing(url: impl Into<String>) -> Self {
        Self {
            connector: Some(wsbridge_protocol::CONNECTOR_NAME.into()),
            url: Some(url.into()),
            ..Self::default()
        }
    }
}
