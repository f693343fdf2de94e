//! Outbound WebSocket connector.
//!
//! Applications publish through an [`Emitter`]; a [`Publisher`] drains the
//! emitter queue and writes each message to the channel's remote URL,
//! strictly one send at a time, retrying failed sends with back-off and
//! jitter before giving up on the message.

mod connection;
pub mod emitter;
mod events;
mod publisher;
pub mod retry;

use std::time::Duration;

pub use connection::OutboundConnection;
pub use emitter::{EmitError, Emitter, Outbox};
pub use events::{DropReason, PublishEvent, PublishStats};
pub use publisher::Publisher;
pub use retry::RetryPolicy;

/// Errors from a single delivery attempt.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("{url} rejected the upgrade with HTTP {status}")]
    Rejected { url: String, status: u16 },

    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("send failed: {0}")]
    Send(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("connection closed")]
    Closed,
}
