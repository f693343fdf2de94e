//! Application-side handle for publishing on an outgoing channel.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use wsbridge_protocol::Message;

/// Error returned when the publisher behind an [`Emitter`] has stopped.
#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("channel '{0}' is closed")]
    Closed(String),

    #[error("queue of channel '{0}' is full")]
    Full(String),
}

/// Creates a bounded queue feeding the publisher of `channel`.
pub fn queue<T>(channel: &str, capacity: usize) -> (Emitter<T>, Outbox<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        Emitter {
            channel: Arc::from(channel),
            tx,
        },
        Outbox { rx },
    )
}

/// Cloneable publishing function of an outgoing channel.
///
/// Messages from one emitter are published in the order they were emitted.
pub struct Emitter<T> {
    channel: Arc<str>,
    tx: mpsc::Sender<Message<T>>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<T> Emitter<T> {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Queues a payload, waiting while the queue is full.
    pub async fn emit(&self, payload: T) -> Result<(), EmitError> {
        self.send(Message::new(payload).with_channel(self.channel.as_ref()))
            .await
    }

    /// Queues a message with caller-provided metadata.
    pub async fn send(&self, message: Message<T>) -> Result<(), EmitError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| EmitError::Closed(self.channel.to_string()))
    }

    /// Queues a payload without waiting.
    pub fn try_emit(&self, payload: T) -> Result<(), EmitError> {
        let message = Message::new(payload).with_channel(self.channel.as_ref());
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => EmitError::Full(self.channel.to_string()),
            TrySendError::Closed(_) => EmitError::Closed(self.channel.to_string()),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Publisher side of an emitter queue.
///
/// Ends once every [`Emitter`] clone has been dropped and the queue is empty.
pub struct Outbox<T> {
    rx: mpsc::Receiver<Message<T>>,
}

impl<T> Outbox<T> {
    /// Stops accepting new messages; queued ones are still yielded.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl<T> futures_util::Stream for Outbox<T> {
    type Item = Message<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
