//! Wire-level building blocks shared by the wsbridge connectors.
//!
//! - [`Frame`]: a single text or binary WebSocket data frame.
//! - [`Message`]: the envelope handed to application subscribers and
//!   accepted from application publishers.
//! - [`Codec`]: the pluggable serializer/deserializer that converts between
//!   frames and typed payloads. [`JsonCodec`] is the default,
//!   [`TextCodec`] passes primitives through as plain text.

pub mod codec;
pub mod envelope;
pub mod frame;

pub use codec::{Codec, CodecError, CodecKind, JsonCodec, TextCodec};
pub use envelope::{ConnectionId, Message, Metadata};
pub use frame::Frame;

/// Connector identifier accepted in the `connector` configuration key.
pub const CONNECTOR_NAME: &str = "websocket";

/// Default upper bound for a single WebSocket message, in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
