//! Pluggable payload serialization.
//!
//! A [`Codec`] converts typed payloads to [`Frame`]s and back. Channels pick
//! one through the `serializer` configuration key ([`CodecKind`]) or receive
//! a custom implementation from the application wiring.

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::frame::Frame;

/// Errors produced while converting between frames and payloads.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("deserialization failed: {0}")]
    Deserialize(#[source] serde_json::Error),

    #[error("frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("payload is not a primitive value ({0})")]
    NotPrimitive(&'static str),

    #[error("unknown serializer '{0}'")]
    UnknownSerializer(String),
}

/// Serializer/deserializer for a channel payload type.
pub trait Codec<T>: Send + Sync + 'static {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    fn serialize(&self, payload: &T) -> Result<Frame, CodecError>;

    fn deserialize(&self, frame: &Frame) -> Result<T, CodecError>;
}

/// JSON object mapping.
///
/// Emits text frames unless built with [`JsonCodec::binary`]; accepts both
/// text and binary frames on the way in.
pub struct JsonCodec<T> {
    binary: bool,
    _payload: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            binary: false,
            _payload: PhantomData,
        }
    }

    /// Emits JSON inside binary frames instead of text frames.
    pub fn binary() -> Self {
        Self {
            binary: true,
            _payload: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Codec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize(&self, payload: &T) -> Result<Frame, CodecError> {
        if self.binary {
            let data = serde_json::to_vec(payload).map_err(CodecError::Serialize)?;
            Ok(Frame::Binary(data))
        } else {
            let text = serde_json::to_string(payload).map_err(CodecError::Serialize)?;
            Ok(Frame::Text(text))
        }
    }

    fn deserialize(&self, frame: &Frame) -> Result<T, CodecError> {
        match frame {
            Frame::Text(text) => serde_json::from_str(text).map_err(CodecError::Deserialize),
            Frame::Binary(data) => serde_json::from_slice(data).map_err(CodecError::Deserialize),
        }
    }
}

/// Plain text passthrough for primitive payloads (strings, numbers, booleans).
///
/// A string payload is sent verbatim, without JSON quoting. Numbers and
/// booleans use their literal form.
pub struct TextCodec<T> {
    _payload: PhantomData<fn() -> T>,
}

impl<T> TextCodec<T> {
    pub fn new() -> Self {
        Self {
            _payload: PhantomData,
        }
    }
}

impl<T> Default for TextCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Codec<T> for TextCodec<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn name(&self) -> &'static str {
        "text"
    }

    fn serialize(&self, payload: &T) -> Result<Frame, CodecError> {
        match serde_json::to_value(payload).map_err(CodecError::Serialize)? {
            Value::String(text) => Ok(Frame::Text(text)),
            literal @ (Value::Number(_) | Value::Bool(_)) => Ok(Frame::Text(literal.to_string())),
            Value::Null => Err(CodecError::NotPrimitive("null")),
            Value::Array(_) => Err(CodecError::NotPrimitive("array")),
            Value::Object(_) => Err(CodecError::NotPrimitive("object")),
        }
    }

    fn deserialize(&self, frame: &Frame) -> Result<T, CodecError> {
        let text = match frame {
            Frame::Text(text) => text.as_str(),
            Frame::Binary(data) => std::str::from_utf8(data)?,
        };

        // The raw text first (string payloads), then as a literal (numbers, booleans).
        match serde_json::from_value(Value::String(text.to_owned())) {
            Ok(payload) => Ok(payload),
            Err(_) => serde_json::from_str(text.trim()).map_err(CodecError::Deserialize),
        }
    }
}

/// Built-in codecs selectable by the `serializer` configuration key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CodecKind {
    #[default]
    Json,
    Text,
}

impl CodecKind {
    /// Instantiates the codec for payload type `T`.
    pub fn build<T>(self) -> Arc<dyn Codec<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        match self {
            CodecKind::Json => Arc::new(JsonCodec::<T>::new()),
            CodecKind::Text => Arc::new(TextCodec::<T>::new()),
        }
    }
}

impl FromStr for CodecKind {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" | "wsbridge::json" | "application/json" => Ok(CodecKind::Json),
            "text" | "wsbridge::text" | "text/plain" => Ok(CodecKind::Text),
            _ => Err(CodecError::UnknownSerializer(s.to_string())),
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecKind::Json => f.write_str("json"),
            CodecKind::Text => f.write_str("text"),
        }
    }
}
