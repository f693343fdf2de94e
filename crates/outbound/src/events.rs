use std::time::Duration;

/// Progress notifications emitted by a running publisher.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishEvent {
    /// A connection to the channel's URL was (re-)established.
    Connected { channel: String, url: String },
    /// A message was written to the connection.
    Sent { channel: String },
    /// A send attempt failed; the next attempt follows after `delay`.
    Retrying {
        channel: String,
        retry: u32,
        delay: Duration,
        error: String,
    },
    /// A message was given up on.
    Dropped {
        channel: String,
        reason: DropReason,
    },
}

/// Why a message was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The payload could not be serialized.
    Serialization(String),
    /// Every attempt failed; carries the last error.
    RetriesExhausted { retries: u32, error: String },
    /// Shutdown's grace period ran out before the message was sent.
    Shutdown,
}

/// Counters returned when a publisher stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub sent: u64,
    pub retries: u64,
    pub dropped: u64,
}
