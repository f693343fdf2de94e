//! Validated channel definitions.

use std::fmt;
use std::time::Duration;

use wsbridge_protocol::CodecKind;

use crate::config::ChannelConfig;
use crate::error::ConfigError;

/// Connector identifiers accepted in the `connector` key.
const SUPPORTED_CONNECTORS: &[&str] = &[wsbridge_protocol::CONNECTOR_NAME, "smallrye-websocket"];

pub const DEFAULT_BUFFER_SIZE: usize = 8;
pub const DEFAULT_MAX_RETRIES: u32 = 1;
pub const DEFAULT_JITTER: f64 = 0.5;
pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.0;
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_QUEUE_SIZE: usize = 64;

/// Longest value accepted for any configured delay, timeout or interval.
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Rejects durations above [`MAX_DURATION`].
pub(crate) fn bounded_duration(
    scope: &str,
    key: &'static str,
    value: Duration,
) -> Result<Duration, ConfigError> {
    if value > MAX_DURATION {
        return Err(ConfigError::invalid(scope, key, "must not exceed 24h"));
    }
    Ok(value)
}

/// Direction of a channel, seen from the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Frames arrive from WebSocket clients and flow to a subscriber.
    Incoming,
    /// Messages produced by the application flow to a remote WebSocket server.
    Outgoing,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Incoming => f.write_str("incoming"),
            Direction::Outgoing => f.write_str("outgoing"),
        }
    }
}

/// Settings of an incoming channel.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingSettings {
    /// HTTP upgrade path, always starting with `/`.
    pub path: String,
    /// Per-connection buffer capacity.
    pub buffer_size: usize,
    pub serializer: CodecKind,
}

impl IncomingSettings {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            serializer: CodecKind::default(),
        }
    }
}

/// Settings of an outgoing channel.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingSettings {
    /// Target `ws://` or `wss://` URL.
    pub url: String,
    pub serializer: CodecKind,
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Relative jitter in `[0, 1]` applied to each retry delay.
    pub jitter: f64,
    /// Base delay before the first retry.
    pub delay: Duration,
    /// Multiplier applied to the base delay for each further retry.
    pub backoff_factor: f64,
    /// Cap for the (pre-jitter) retry delay.
    pub max_delay: Duration,
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    /// Capacity of the queue between the application and the publisher.
    pub queue_size: usize,
}

impl OutgoingSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            serializer: CodecKind::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            jitter: DEFAULT_JITTER,
            delay: DEFAULT_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_delay: DEFAULT_MAX_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSettings {
    Incoming(IncomingSettings),
    Outgoing(OutgoingSettings),
}

/// A named, unidirectional channel. Immutable once registered.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    name: String,
    settings: ChannelSettings,
}

impl Channel {
    /// Validates `config` for the given direction.
    pub fn from_config(
        name: &str,
        direction: Direction,
        config: &ChannelConfig,
    ) -> Result<Self, ConfigError> {
        if name.trim().is_empty() {
            return Err(ConfigError::invalid(name, "name", "channel name is empty"));
        }

        let connector = config
            .connector
            .as_deref()
            .ok_or_else(|| ConfigError::missing(name, "connector"))?;
        if !SUPPORTED_CONNECTORS.contains(&connector) {
            return Err(ConfigError::UnsupportedConnector {
                channel: name.to_string(),
                connector: connector.to_string(),
            });
        }

        let serializer = match config.serializer.as_deref() {
            Some(id) => id
                .parse::<CodecKind>()
                .map_err(|e| ConfigError::invalid(name, "serializer", e.to_string()))?,
            None => CodecKind::default(),
        };

        let settings = match direction {
            Direction::Incoming => ChannelSettings::Incoming(incoming(name, config, serializer)?),
            Direction::Outgoing => ChannelSettings::Outgoing(outgoing(name, config, serializer)?),
        };

        Ok(Self {
            name: name.to_string(),
            settings,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        match self.settings {
            ChannelSettings::Incoming(_) => Direction::Incoming,
            ChannelSettings::Outgoing(_) => Direction::Outgoing,
        }
    }

    pub fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    pub fn as_incoming(&self) -> Option<&IncomingSettings> {
        match &self.settings {
            ChannelSettings::Incoming(s) => Some(s),
            ChannelSettings::Outgoing(_) => None,
        }
    }

    pub fn as_outgoing(&self) -> Option<&OutgoingSettings> {
        match &self.settings {
            ChannelSettings::Outgoing(s) => Some(s),
            ChannelSettings::Incoming(_) => None,
        }
    }

    /// Endpoint the channel is bound to: path (incoming) or URL (outgoing).
    pub fn endpoint(&self) -> &str {
        match &self.settings {
            ChannelSettings::Incoming(s) => &s.path,
            ChannelSettings::Outgoing(s) => &s.url,
        }
    }
}

fn reject_foreign(
    name: &str,
    direction: Direction,
    keys: &[(&'static str, bool)],
) -> Result<(), ConfigError> {
    match keys.iter().find(|(_, present)| *present) {
        Some((key, _)) => Err(ConfigError::invalid(
            name,
            *key,
            format!("not valid on {direction} channels"),
        )),
        None => Ok(()),
    }
}

fn incoming(
    name: &str,
    config: &ChannelConfig,
    serializer: CodecKind,
) -> Result<IncomingSettings, ConfigError> {
    reject_foreign(
        name,
        Direction::Incoming,
        &[
            ("url", config.url.is_some()),
            ("maxRetries", config.max_retries.is_some()),
            ("jitter", config.jitter.is_some()),
            ("delay", config.delay.is_some()),
            ("backoff-factor", config.backoff_factor.is_some()),
            ("max-delay", config.max_delay.is_some()),
            ("connect-timeout", config.connect_timeout.is_some()),
            ("send-timeout", config.send_timeout.is_some()),
            ("queue-size", config.queue_size.is_some()),
        ],
    )?;

    let path = config
        .path
        .as_deref()
        .ok_or_else(|| ConfigError::missing(name, "path"))?;
    if !path.starts_with('/') {
        return Err(ConfigError::invalid(name, "path", "must start with '/'"));
    }
    if path.contains('?') || path.contains('#') {
        return Err(ConfigError::invalid(
            name,
            "path",
            "must not contain a query or fragment",
        ));
    }

    let buffer_size = config.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
    if buffer_size == 0 {
        return Err(ConfigError::invalid(name, "buffer-size", "must be greater than 0"));
    }

    Ok(IncomingSettings {
        path: path.to_string(),
        buffer_size,
        serializer,
    })
}

fn outgoing(
    name: &str,
    config: &ChannelConfig,
    serializer: CodecKind,
) -> Result<OutgoingSettings, ConfigError> {
    reject_foreign(
        name,
        Direction::Outgoing,
        &[
            ("path", config.path.is_some()),
            ("buffer-size", config.buffer_size.is_some()),
        ],
    )?;

    let url = config
        .url
        .as_deref()
        .ok_or_else(|| ConfigError::missing(name, "url"))?;
    validate_ws_url(url).map_err(|reason| ConfigError::invalid(name, "url", reason))?;

    let jitter = config.jitter.unwrap_or(DEFAULT_JITTER);
    if !(0.0..=1.0).contains(&jitter) {
        return Err(ConfigError::invalid(name, "jitter", "must be within [0, 1]"));
    }

    let backoff_factor = config.backoff_factor.unwrap_or(DEFAULT_BACKOFF_FACTOR);
    if !backoff_factor.is_finite() || backoff_factor < 1.0 {
        return Err(ConfigError::invalid(
            name,
            "backoff-factor",
            "must be a finite number >= 1.0",
        ));
    }

    let delay = bounded_duration(name, "delay", config.delay.unwrap_or(DEFAULT_DELAY))?;
    let max_delay = bounded_duration(
        name,
        "max-delay",
        config.max_delay.unwrap_or(DEFAULT_MAX_DELAY.max(delay)),
    )?;
    if max_delay < delay {
        return Err(ConfigError::invalid(
            name,
            "max-delay",
            "must not be shorter than 'delay'",
        ));
    }

    let connect_timeout = bounded_duration(
        name,
        "connect-timeout",
        config.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
    )?;
    if connect_timeout.is_zero() {
        return Err(ConfigError::invalid(name, "connect-timeout", "must be positive"));
    }
    let send_timeout = bounded_duration(
        name,
        "send-timeout",
        config.send_timeout.unwrap_or(DEFAULT_SEND_TIMEOUT),
    )?;
    if send_timeout.is_zero() {
        return Err(ConfigError::invalid(name, "send-timeout", "must be positive"));
    }

    let queue_size = config.queue_size.unwrap_or(DEFAULT_QUEUE_SIZE);
    if queue_size == 0 {
        return Err(ConfigError::invalid(name, "queue-size", "must be greater than 0"));
    }

    Ok(OutgoingSettings {
        url: url.to_string(),
        serializer,
        max_retries: config.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        jitter,
        delay,
        backoff_factor,
        max_delay,
        connect_timeout,
        send_timeout,
        queue_size,
    })
}

fn validate_ws_url(url: &str) -> Result<(), String> {
    let rest = url
        .strip_prefix("ws://")
        .or_else(|| url.strip_prefix("wss://"))
        .ok_or_else(|| format!("'{url}' is not a ws:// or wss:// URL"))?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if authority.is_empty() {
        return Err(format!("'{url}' has no host"));
    }
    if authority.chars().any(char::is_whitespace) {
        return Err(format!("'{url}' contains whitespace"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incoming_defaults() {
        let channel =
            Channel::from_config("amounts", Direction::Incoming, &ChannelConfig::incoming("/a"))
                .unwrap();
        assert_eq!(channel.name(), "amounts");
        assert_eq!(channel.direction(), Direction::Incoming);
        assert_eq!(channel.endpoint(), "/a");

        let settings = channel.as_incoming().unwrap();
        assert_eq!(settings.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(settings.serializer, CodecKind::Json);
        assert!(channel.as_outgoing().is_none());
    }

    #[test]
    fn outgoing_defaults() {
        let channel = Channel::from_config(
            "converted",
            Direction::Outgoing,
            &ChannelConfig::outgoing("ws://localhost:9090/out"),
        )
        .unwrap();
        let settings = channel.as_outgoing().unwrap();
        assert_eq!(settings, &OutgoingSettings::new("ws://localhost:9090/out"));
        assert_eq!(settings.max_retries, 1);
        assert!((settings.jitter - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_connector_is_rejected() {
        let config = ChannelConfig {
            path: Some("/a".into()),
            ..ChannelConfig::default()
        };
        let err = Channel::from_config("a", Direction::Incoming, &config).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "connector", .. }));
    }

    #[test]
    fn foreign_connector_is_rejected() {
        let config = ChannelConfig {
            connector: Some("smallrye-kafka".into()),
            ..ChannelConfig::incoming("/a")
        };
        let err = Channel::from_config("a", Direction::Incoming, &config).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedConnector { .. }));
    }

    #[test]
    fn missing_path_and_url_are_rejected() {
        let bare = ChannelConfig {
            connector: Some("websocket".into()),
            ..ChannelConfig::default()
        };
        assert!(matches!(
            Channel::from_config("a", Direction::Incoming, &bare),
            Err(ConfigError::Missing { key: "path", .. })
        ));
        assert!(matches!(
            Channel::from_config("a", Direction::Outgoing, &bare),
            Err(ConfigError::Missing { key: "url", .. })
        ));
    }

    #[test]
    fn zero_buffer_size_is_rejected() {
        let config = ChannelConfig {
            buffer_size: Some(0),
            ..ChannelConfig::incoming("/a")
        };
        let err = Channel::from_config("a", Direction::Incoming, &config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "buffer-size", .. }));
    }

    #[test]
    fn relative_path_is_rejected() {
        let err = Channel::from_config("a", Direction::Incoming, &ChannelConfig::incoming("a"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "path", .. }));
    }

    #[test]
    fn jitter_out_of_range_is_rejected() {
        for jitter in [-0.1, 1.5, f64::NAN] {
            let config = ChannelConfig {
                jitter: Some(jitter),
                ..ChannelConfig::outgoing("ws://h")
            };
            let err = Channel::from_config("o", Direction::Outgoing, &config).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { key: "jitter", .. }));
        }
    }

    #[test]
    fn oversized_delays_are_rejected() {
        let config = ChannelConfig {
            max_delay: Some(Duration::from_secs(u64::MAX / 2)),
            ..ChannelConfig::outgoing("ws://h")
        };
        let err = Channel::from_config("o", Direction::Outgoing, &config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "max-delay", .. }));

        let config = ChannelConfig {
            delay: Some(MAX_DURATION + Duration::from_secs(1)),
            ..ChannelConfig::outgoing("ws://h")
        };
        let err = Channel::from_config("o", Direction::Outgoing, &config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "delay", .. }));

        let config = ChannelConfig {
            delay: Some(MAX_DURATION),
            max_delay: Some(MAX_DURATION),
            ..ChannelConfig::outgoing("ws://h")
        };
        assert!(Channel::from_config("o", Direction::Outgoing, &config).is_ok());
    }

    #[test]
    fn non_websocket_url_is_rejected() {
        for url in ["http://h/x", "ws://", "ws:///path", "localhost:80"] {
            let err =
                Channel::from_config("o", Direction::Outgoing, &ChannelConfig::outgoing(url))
                    .unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { key: "url", .. }), "{url}");
        }
        assert!(
            Channel::from_config(
                "o",
                Direction::Outgoing,
                &ChannelConfig::outgoing("wss://example.com:443/feed?x=1")
            )
            .is_ok()
        );
    }

    #[test]
    fn keys_of_the_other_direction_are_rejected() {
        let config = ChannelConfig {
            url: Some("ws://h".into()),
            ..ChannelConfig::incoming("/a")
        };
        let err = Channel::from_config("a", Direction::Incoming, &config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "url", .. }));

        let config = ChannelConfig {
            buffer_size: Some(4),
            ..ChannelConfig::outgoing("ws://h")
        };
        let err = Channel::from_config("o", Direction::Outgoing, &config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "buffer-size", .. }));
    }

    #[test]
    fn max_delay_shorter_than_delay_is_rejected() {
        let config = ChannelConfig {
            delay: Some(Duration::from_secs(5)),
            max_delay: Some(Duration::from_secs(1)),
            ..ChannelConfig::outgoing("ws://h")
        };
        let err = Channel::from_config("o", Direction::Outgoing, &config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "max-delay", .. }));
    }

    #[test]
    fn long_delay_raises_default_cap() {
        let config = ChannelConfig {
            delay: Some(Duration::from_secs(60)),
            ..ChannelConfig::outgoing("ws://h")
        };
        let channel = Channel::from_config("o", Direction::Outgoing, &config).unwrap();
        assert_eq!(channel.as_outgoing().unwrap().max_delay, Duration::from_secs(60));
    }

    #[test]
    fn unknown_serializer_is_rejected() {
        let config = ChannelConfig {
            serializer: Some("avro".into()),
            ..ChannelConfig::incoming("/a")
        };
        let err = Channel::from_config("a", Direction::Incoming, &config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "serializer", .. }));
    }
}
