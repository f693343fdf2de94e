//! Single outbound WebSocket connection.

use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use wsbridge_protocol::Frame;

use crate::ConnectionError;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// Client connection to a remote WebSocket server.
///
/// Frames sent by the remote end are read and discarded by a background
/// task; a close frame or read error marks the connection broken.
pub struct OutboundConnection {
    url: String,
    sink: WsSink,
    broken: CancellationToken,
    reader: JoinHandle<()>,
}

impl OutboundConnection {
    /// Opens a connection to `url`, giving up after `connect_timeout`.
    pub async fn connect(
        url: &str,
        connect_timeout: Duration,
        max_message_size: usize,
    ) -> Result<Self, ConnectionError> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(max_message_size);
        ws_config.max_frame_size = Some(max_message_size);

        let connecting = tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false);
        let (ws_stream, _) = tokio::time::timeout(connect_timeout, connecting)
            .await
            .map_err(|_| ConnectionError::Timeout {
                op: "connect",
                after: connect_timeout,
            })?
            .map_err(|e| match e {
                tungstenite::Error::Http(resp) => ConnectionError::Rejected {
                    url: url.to_string(),
                    status: resp.status().as_u16(),
                },
                source => ConnectionError::Connect {
                    url: url.to_string(),
                    source,
                },
            })?;

        let (sink, mut stream) = ws_stream.split();
        let broken = CancellationToken::new();

        let reader = {
            let broken = broken.clone();
            let url = url.to_string();
            tokio::spawn(async move {
                while let Some(frame) = stream.next().await {
                    match frame {
                        Ok(WsMessage::Close(_)) => {
                            debug!(%url, "remote closed outbound connection");
                            break;
                        }
                        Ok(other) => trace!(%url, len = other.len(), "ignoring remote frame"),
                        Err(e) => {
                            debug!(%url, "outbound read error: {e}");
                            break;
                        }
                    }
                }
                broken.cancel();
            })
        };

        Ok(Self {
            url: url.to_string(),
            sink,
            broken,
            reader,
        })
    }

    /// Returns `true` once the remote end closed or the read side failed.
    pub fn is_broken(&self) -> bool {
        self.broken.is_cancelled()
    }

    /// Sends one frame and flushes it, bounded by `send_timeout`.
    pub async fn send(&mut self, frame: Frame, send_timeout: Duration) -> Result<(), ConnectionError> {
        if self.is_broken() {
            return Err(ConnectionError::Closed);
        }

        tokio::time::timeout(send_timeout, self.sink.send(frame.into()))
            .await
            .map_err(|_| ConnectionError::Timeout {
                op: "send",
                after: send_timeout,
            })?
            .map_err(|e| match e {
                tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                    ConnectionError::Closed
                }
                other => ConnectionError::Send(other),
            })
    }

    /// Sends a close frame and stops the reader.
    pub async fn close(mut self) {
        debug!(url = %self.url, "closing outbound connection");
        let _ = tokio::time::timeout(Duration::from_secs(1), self.sink.close()).await;
    }
}

impl Drop for OutboundConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
