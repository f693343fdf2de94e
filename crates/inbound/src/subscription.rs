use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::SelectAll;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use wsbridge_protocol::Message;

use crate::buffer::BufferConsumer;

/// Stream of decoded messages for one incoming channel.
///
/// Messages of a single connection arrive in the order the client sent them;
/// messages of different connections are interleaved in arrival order. The
/// stream ends after the endpoint is closed and every connection's buffer has
/// drained.
pub struct Subscription<T> {
    channel: String,
    pending: mpsc::UnboundedReceiver<BufferConsumer<Message<T>>>,
    accepting: bool,
    active: SelectAll<BufferConsumer<Message<T>>>,
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("accepting", &self.accepting)
            .finish_non_exhaustive()
    }
}

impl<T> Subscription<T> {
    pub(crate) fn new(
        channel: &str,
        pending: mpsc::UnboundedReceiver<BufferConsumer<Message<T>>>,
    ) -> Self {
        Self {
            channel: channel.to_string(),
            pending,
            accepting: true,
            active: SelectAll::new(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Connections currently feeding this subscription.
    pub fn connections(&self) -> usize {
        self.active.len()
    }

    /// Waits for the next message.
    pub async fn recv(&mut self) -> Option<Message<T>> {
        self.next().await
    }
}

impl<T> Stream for Subscription<T> {
    type Item = Message<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        while this.accepting {
            match this.pending.poll_recv(cx) {
                Poll::Ready(Some(consumer)) => {
                    tracing::trace!(
                        channel = %this.channel,
                        connection = %consumer.connection(),
                        "connection joined subscription"
                    );
                    this.active.push(consumer);
                }
                Poll::Ready(None) => this.accepting = false,
                Poll::Pending => break,
            }
        }

        match this.active.poll_next_unpin(cx) {
            Poll::Ready(Some(message)) => Poll::Ready(Some(message)),
            // An empty SelectAll reports end-of-stream; it only counts once
            // no more connections can join.
            Poll::Ready(None) | Poll::Pending => {
                if !this.accepting && this.active.is_empty() {
                    Poll::Ready(None)
                } else {
                    Poll::Pending
                }
            }
        }
    }
}
