//! Application-facing wiring for WebSocket channels.
//!
//! A [`BridgeBuilder`] collects the application's subscribers (incoming
//! channels) and emitters (outgoing channels). [`BridgeBuilder::start`]
//! validates that wiring against the configured channels before anything is
//! bound, then starts the inbound server and one publisher per outgoing
//! channel.

mod bridge;

pub use bridge::{BridgeBuilder, RunningBridge, ShutdownReport};

pub use wsbridge_inbound::{ConnectionMeta, ServerError};
pub use wsbridge_outbound::{DropReason, EmitError, Emitter, PublishEvent, PublishStats};
pub use wsbridge_protocol::{Codec, CodecError, CodecKind, Message, Metadata};
pub use wsbridge_registry::{ConfigError, Direction, MessagingConfig};

/// Errors from wiring and starting a bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("server error: {0}")]
    Server(#[from] ServerError),

    #[error("channel '{0}' is wired more than once")]
    AlreadyWired(String),
}
