use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

/// A WebSocket data frame, stripped of control-frame concerns.
///
/// Codecs only ever see text or binary frames; ping/pong/close frames are
/// handled by the connection pumps and never reach a [`Codec`](crate::Codec).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Returns the raw bytes of the frame regardless of its kind.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Frame::Text(text) => text.as_bytes(),
            Frame::Binary(data) => data,
        }
    }

    /// Returns the text content, if this is a text frame.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Frame::Text(text) => Some(text),
            Frame::Binary(_) => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Frame::Text(_))
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Extracts a data frame from a tungstenite message.
    ///
    /// Returns `None` for control frames (ping, pong, close, raw).
    pub fn from_ws(msg: WsMessage) -> Option<Self> {
        match msg {
            WsMessage::Text(text) => Some(Frame::Text(text.to_string())),
            WsMessage::Binary(data) => Some(Frame::Binary(data.to_vec())),
            _ => None,
        }
    }
}

impl From<Frame> for WsMessage {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => WsMessage::Text(text.into()),
            Frame::Binary(data) => WsMessage::Binary(data.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frame_accessors() {
        let frame = Frame::Text("hello".into());
        assert!(frame.is_text());
        assert_eq!(frame.as_text(), Some("hello"));
        assert_eq!(frame.as_bytes(), b"hello");
        assert_eq!(frame.len(), 5);
    }

    #[test]
    fn binary_frame_has_no_text() {
        let frame = Frame::Binary(vec![1, 2, 3]);
        assert!(!frame.is_text());
        assert!(frame.as_text().is_none());
        assert!(!frame.is_empty());
    }

    #[test]
    fn control_frames_are_not_data() {
        assert!(Frame::from_ws(WsMessage::Ping(Vec::new().into())).is_none());
        assert!(Frame::from_ws(WsMessage::Close(None)).is_none());
    }

    #[test]
    fn converts_to_and_from_ws_message() {
        let ws: WsMessage = Frame::Text("{}".into()).into();
        assert!(matches!(ws, WsMessage::Text(_)));
        assert_eq!(Frame::from_ws(ws), Some(Frame::Text("{}".into())));

        let ws: WsMessage = Frame::Binary(vec![0xff]).into();
        assert_eq!(Frame::from_ws(ws), Some(Frame::Binary(vec![0xff])));
    }
}
