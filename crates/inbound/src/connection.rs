//! Accepted connection: read pump, ping pump and close bookkeeping.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_util::sync::CancellationToken;
use wsbridge_protocol::{ConnectionId, Frame};

use crate::endpoint::ConnectionFeed;

/// Metadata about an accepted client.
#[derive(Debug, Clone)]
pub struct ConnectionMeta {
    pub id: ConnectionId,
    pub channel: String,
    pub peer: SocketAddr,
}

/// Why a connection stopped being served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent a close frame or the TCP stream ended.
    ClientClosed,
    /// Nothing was heard from the client within two ping intervals.
    Timeout,
    /// The channel's subscription was dropped.
    SubscriberGone,
    /// The server is shutting down.
    Shutdown,
    /// Protocol or I/O error while reading.
    Error(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientClosed => f.write_str("closed by client"),
            Self::Timeout => f.write_str("client timed out"),
            Self::SubscriberGone => f.write_str("subscriber gone"),
            Self::Shutdown => f.write_str("server shutdown"),
            Self::Error(e) => write!(f, "read error: {e}"),
        }
    }
}

/// Serves one upgraded connection until it closes.
///
/// Data frames are delivered to `feed` one at a time; while the feed waits
/// for buffer space the socket is not read, so the client is throttled by
/// TCP flow control.
pub(crate) async fn serve<S>(
    ws: S,
    feed: &mut dyn ConnectionFeed,
    ping_interval: Duration,
    cancel: CancellationToken,
) -> CloseReason
where
    S: Stream<Item = Result<WsMessage, WsError>> + Sink<WsMessage, Error = WsError> + Send + 'static,
{
    let (sink, stream) = ws.split();

    let pinger = tokio::spawn(ping_pump(sink, ping_interval, cancel.clone()));
    let reason = read_pump(stream, feed, ping_interval * 2, &cancel).await;

    // Stops the ping pump, which then sends the close frame.
    cancel.cancel();
    let _ = pinger.await;
    reason
}

async fn ping_pump<S>(mut sink: S, period: Duration, cancel: CancellationToken)
where
    S: Sink<WsMessage, Error = WsError> + Send + Unpin,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::debug!("ping failed: {e}");
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}

async fn read_pump<S>(
    mut stream: S,
    feed: &mut dyn ConnectionFeed,
    silence_limit: Duration,
    cancel: &CancellationToken,
) -> CloseReason
where
    S: Stream<Item = Result<WsMessage, WsError>> + Send + Unpin,
{
    let deadline = tokio::time::sleep(silence_limit);
    tokio::pin!(deadline);

    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => return CloseReason::Shutdown,
            _ = &mut deadline => return CloseReason::Timeout,
            msg = stream.next() => msg,
        };

        let msg = match msg {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => return CloseReason::Error(e.to_string()),
            None => return CloseReason::ClientClosed,
        };

        match msg {
            WsMessage::Close(_) => return CloseReason::ClientClosed,
            // Ping replies are queued by tungstenite and flushed on the next
            // read or write.
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            data => {
                if let Some(frame) = Frame::from_ws(data) {
                    let delivered = tokio::select! {
                        _ = cancel.cancelled() => return CloseReason::Shutdown,
                        delivered = feed.deliver(frame) => delivered,
                    };
                    if delivered.is_err() {
                        return CloseReason::SubscriberGone;
                    }
                }
            }
        }

        deadline.as_mut().reset(Instant::now() + silence_limit);
    }
}
