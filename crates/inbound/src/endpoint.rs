//! Incoming channel endpoints.
//!
//! An [`Endpoint`] owns the decoder and buffer size of one incoming channel.
//! Every accepted connection gets its own bounded buffer; the consumer halves
//! are handed to the channel's [`Subscription`], which merges them.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use wsbridge_protocol::{Codec, ConnectionId, Frame, Message};

use crate::buffer::{self, BufferClosed, BufferConsumer, BufferProducer};
use crate::subscription::Subscription;

/// Boxed future returned by [`ConnectionFeed::deliver`].
pub type FeedFuture<'a> = Pin<Box<dyn Future<Output = Result<(), BufferClosed>> + Send + 'a>>;

/// Type-erased view of an endpoint, as seen by the acceptor.
pub trait Route: Send + Sync + 'static {
    fn channel(&self) -> &str;

    fn path(&self) -> &str;

    /// Opens a feed for a freshly accepted connection, or `None` once the
    /// endpoint has been closed.
    fn open(&self, connection: ConnectionId) -> Option<Box<dyn ConnectionFeed>>;

    /// Stops handing out feeds. The subscription ends once the existing
    /// connections have drained.
    fn close(&self);
}

/// Per-connection sink for data frames.
pub trait ConnectionFeed: Send {
    /// Decodes and buffers one frame, waiting while the buffer is full.
    ///
    /// Frames that fail to decode are logged and skipped; an error means the
    /// subscriber is gone and the connection should be closed.
    fn deliver(&mut self, frame: Frame) -> FeedFuture<'_>;
}

pub struct Endpoint<T> {
    channel: Arc<str>,
    path: String,
    buffer_size: usize,
    codec: Arc<dyn Codec<T>>,
    connections: Mutex<Option<mpsc::UnboundedSender<BufferConsumer<Message<T>>>>>,
}

impl<T: Send + 'static> Endpoint<T> {
    /// Creates the endpoint for `path` together with its message stream.
    pub fn bind(
        channel: &str,
        path: &str,
        buffer_size: usize,
        codec: Arc<dyn Codec<T>>,
    ) -> (Arc<Self>, Subscription<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let endpoint = Arc::new(Self {
            channel: Arc::from(channel),
            path: path.to_string(),
            buffer_size,
            codec,
            connections: Mutex::new(Some(tx)),
        });
        (endpoint, Subscription::new(channel, rx))
    }
}

impl<T: Send + 'static> Route for Endpoint<T> {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn open(&self, connection: ConnectionId) -> Option<Box<dyn ConnectionFeed>> {
        let guard = self.connections.lock().ok()?;
        let sender = guard.as_ref()?;

        let (producer, consumer) =
            buffer::bounded(self.buffer_size, self.channel.clone(), connection);
        sender.send(consumer).ok()?;

        Some(Box::new(Feed {
            channel: self.channel.clone(),
            connection,
            codec: self.codec.clone(),
            producer,
            rejected: 0,
        }))
    }

    fn close(&self) {
        if let Ok(mut guard) = self.connections.lock()
            && guard.take().is_some()
        {
            debug!(channel = %self.channel, path = %self.path, "endpoint closed");
        }
    }
}

struct Feed<T> {
    channel: Arc<str>,
    connection: ConnectionId,
    codec: Arc<dyn Codec<T>>,
    producer: BufferProducer<Message<T>>,
    rejected: u64,
}

impl<T: Send + 'static> ConnectionFeed for Feed<T> {
    fn deliver(&mut self, frame: Frame) -> FeedFuture<'_> {
        Box::pin(async move {
            let payload = match self.codec.deserialize(&frame) {
                Ok(payload) => payload,
                Err(e) => {
                    self.rejected += 1;
                    warn!(
                        channel = %self.channel,
                        connection = %self.connection,
                        serializer = self.codec.name(),
                        len = frame.len(),
                        rejected = self.rejected,
                        error = %e,
                        "dropping frame that failed to decode"
                    );
                    return Ok(());
                }
            };

            let message = Message::new(payload)
                .with_channel(self.channel.as_ref())
                .with_connection(self.connection)
                .received_now();
            self.producer.push(message).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use wsbridge_protocol::{JsonCodec, TextCodec};

    #[tokio::test]
    async fn feed_decodes_and_tags_messages() {
        let (endpoint, mut messages) =
            Endpoint::bind("numbers", "/numbers", 4, Arc::new(JsonCodec::<u32>::new()));
        let id = ConnectionId::new();
        let mut feed = endpoint.open(id).unwrap();

        feed.deliver(Frame::Text("7".into())).await.unwrap();

        let message = messages.next().await.unwrap();
        assert_eq!(message.payload, 7);
        assert_eq!(message.channel(), Some("numbers"));
        assert_eq!(message.connection(), Some(id));
        assert!(message.metadata.received_at.is_some());
    }

    #[tokio::test]
    async fn undecodable_frame_is_skipped() {
        let (endpoint, mut messages) =
            Endpoint::bind("numbers", "/numbers", 4, Arc::new(TextCodec::<u32>::new()));
        let mut feed = endpoint.open(ConnectionId::new()).unwrap();

        feed.deliver(Frame::Text("not a number".into())).await.unwrap();
        feed.deliver(Frame::Text("12".into())).await.unwrap();

        assert_eq!(messages.next().await.unwrap().payload, 12);
    }

    #[tokio::test]
    async fn closed_endpoint_refuses_new_connections() {
        let (endpoint, mut messages) =
            Endpoint::bind("numbers", "/numbers", 4, Arc::new(JsonCodec::<u32>::new()));
        let mut feed = endpoint.open(ConnectionId::new()).unwrap();
        endpoint.close();

        assert!(endpoint.open(ConnectionId::new()).is_none());

        // Connections opened before the close still drain.
        feed.deliver(Frame::Text("1".into())).await.unwrap();
        drop(feed);
        assert_eq!(messages.next().await.unwrap().payload, 1);
        assert!(messages.next().await.is_none());
    }

    #[tokio::test]
    async fn feed_fails_once_subscription_is_dropped() {
        let (endpoint, messages) =
            Endpoint::bind("numbers", "/numbers", 1, Arc::new(JsonCodec::<u32>::new()));
        let mut feed = endpoint.open(ConnectionId::new()).unwrap();
        drop(messages);

        assert!(feed.deliver(Frame::Text("1".into())).await.is_err());
    }
}
