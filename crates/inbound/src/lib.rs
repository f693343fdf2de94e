//! Inbound WebSocket connector.
//!
//! Accepts client connections on the paths of the configured incoming
//! channels and turns their frames into per-channel message streams. Each
//! connection is buffered separately; a full buffer stops reading from that
//! socket until the subscriber catches up, so frames are never dropped for
//! lack of space.

pub mod buffer;
mod connection;
pub mod endpoint;
mod server;
mod subscription;

pub use buffer::{BufferClosed, SUSTAINED_BACKPRESSURE};
pub use connection::{CloseReason, ConnectionMeta};
pub use endpoint::Endpoint;
pub use server::InboundServer;
pub use subscription::Subscription;

/// Errors from the inbound server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("path {path} is already bound to channel '{channel}'")]
    PathInUse { path: String, channel: String },

    #[error("WebSocket handshake timed out")]
    HandshakeTimeout,

    #[error("endpoint for channel '{0}' is closed")]
    EndpointClosed(String),

    #[error("route table lock poisoned")]
    Poisoned,
}
