//! Channel configuration and registry.
//!
//! Loads the messaging configuration (TOML), validates every channel for its
//! direction and freezes them into an immutable [`Registry`] that the
//! connectors resolve channels from.

mod channel;
mod config;
pub mod duration;
mod error;
mod registry;

pub use channel::{
    Channel, ChannelSettings, DEFAULT_BACKOFF_FACTOR, DEFAULT_BUFFER_SIZE, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_DELAY, DEFAULT_JITTER, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES, DEFAULT_QUEUE_SIZE,
    DEFAULT_SEND_TIMEOUT, Direction, IncomingSettings, MAX_DURATION, OutgoingSettings,
};
pub use config::{ChannelConfig, MessagingConfig, ServerSettings};
pub use error::ConfigError;
pub use registry::{Registry, RegistryBuilder};
