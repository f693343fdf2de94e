use std::path::PathBuf;

use crate::channel::Direction;

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("channel '{channel}': missing required key '{key}'")]
    Missing { channel: String, key: &'static str },

    /// `channel` is the channel name, or `[server]` for listener settings.
    #[error("'{channel}': invalid value for '{key}': {reason}")]
    Invalid {
        channel: String,
        key: &'static str,
        reason: String,
    },

    #[error("channel '{channel}': unsupported connector '{connector}'")]
    UnsupportedConnector { channel: String, connector: String },

    #[error("no configuration for channel '{0}'")]
    UnknownChannel(String),

    #[error("channel '{channel}' is configured as {configured} but wired as {wired}")]
    DirectionMismatch {
        channel: String,
        configured: Direction,
        wired: Direction,
    },

    #[error("channel '{0}' is configured more than once")]
    DuplicateChannel(String),

    #[error("path '{path}' is bound by both '{first}' and '{second}'")]
    DuplicatePath {
        path: String,
        first: String,
        second: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(channel: &str, key: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            channel: channel.to_string(),
            key,
            reason: reason.into(),
        }
    }

    pub(crate) fn missing(channel: &str, key: &'static str) -> Self {
        ConfigError::Missing {
            channel: channel.to_string(),
            key,
        }
    }
}
