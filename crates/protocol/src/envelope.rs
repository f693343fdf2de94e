use std::fmt;

use chrono::{DateTime, Utc};

/// Identifier of a single inbound WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Optional metadata carried alongside a payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    /// Channel the message travelled on.
    pub channel: Option<String>,
    /// Inbound connection the message was received from.
    pub connection: Option<ConnectionId>,
    /// When the frame carrying the message was received.
    pub received_at: Option<DateTime<Utc>>,
}

/// Envelope for every message flowing through a channel.
///
/// The payload is opaque to the connectors; it only ever passes through a
/// [`Codec`](crate::Codec).
#[derive(Debug, Clone, PartialEq)]
pub struct Message<T> {
    pub payload: T,
    pub metadata: Metadata,
}

impl<T> Message<T> {
    /// Creates a message with empty metadata.
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            metadata: Metadata::default(),
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.metadata.channel = Some(channel.into());
        self
    }

    pub fn with_connection(mut self, id: ConnectionId) -> Self {
        self.metadata.connection = Some(id);
        self
    }

    /// Stamps the message with the current time.
    pub fn received_now(mut self) -> Self {
        self.metadata.received_at = Some(Utc::now());
        self
    }

    pub fn channel(&self) -> Option<&str> {
        self.metadata.channel.as_deref()
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.metadata.connection
    }

    /// Transforms the payload while keeping the metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Message<U> {
        Message {
            payload: f(self.payload),
            metadata: self.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn new_message_has_empty_metadata() {
        let msg = Message::new(42);
        assert_eq!(msg.payload, 42);
        assert_eq!(msg.metadata, Metadata::default());
        assert!(msg.connection().is_none());
        assert!(msg.channel().is_none());
    }

    #[test]
    fn builder_methods_fill_metadata() {
        let id = ConnectionId::new();
        let msg = Message::new("x")
            .with_channel("prices")
            .with_connection(id)
            .received_now();
        assert_eq!(msg.channel(), Some("prices"));
        assert_eq!(msg.connection(), Some(id));
        assert!(msg.metadata.received_at.is_some());
    }

    #[test]
    fn map_keeps_metadata() {
        let id = ConnectionId::new();
        let msg = Message::new(2).with_connection(id).map(|v| v * 10);
        assert_eq!(msg.payload, 20);
        assert_eq!(msg.connection(), Some(id));
    }
}
