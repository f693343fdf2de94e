//! Per-connection bounded buffer between the frame reader and the subscriber.
//!
//! Single producer (the connection's read pump), single consumer (the
//! channel subscription). When the buffer is full the producer waits for
//! the consumer to drain, which in turn stops reading from the socket.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use wsbridge_protocol::ConnectionId;

/// Backpressure lasting longer than this is reported at `warn` level.
pub const SUSTAINED_BACKPRESSURE: Duration = Duration::from_secs(1);

/// Returned when the consumer side of the buffer is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("buffer closed: subscriber is gone")]
pub struct BufferClosed;

/// Creates a buffer holding at most `capacity` undelivered items.
pub fn bounded<T>(
    capacity: usize,
    channel: Arc<str>,
    connection: ConnectionId,
) -> (BufferProducer<T>, BufferConsumer<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        BufferProducer {
            tx,
            channel,
            connection,
            stalls: 0,
        },
        BufferConsumer { rx, connection },
    )
}

/// Writing half, owned by the connection's read pump.
pub struct BufferProducer<T> {
    tx: mpsc::Sender<T>,
    channel: Arc<str>,
    connection: ConnectionId,
    stalls: u64,
}

impl<T> BufferProducer<T> {
    /// Pushes an item, waiting for free space when the buffer is full.
    ///
    /// Items are never dropped or reordered; the only failure is a consumer
    /// that went away.
    pub async fn push(&mut self, item: T) -> Result<(), BufferClosed> {
        let item = match self.tx.try_send(item) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Closed(_)) => return Err(BufferClosed),
            Err(TrySendError::Full(item)) => item,
        };

        self.stalls += 1;
        debug!(
            channel = %self.channel,
            connection = %self.connection,
            capacity = self.capacity(),
            "buffer full, holding frames until the subscriber catches up"
        );

        let started = Instant::now();
        let reserve = self.tx.reserve();
        tokio::pin!(reserve);
        let permit = tokio::select! {
            permit = &mut reserve => permit,
            _ = tokio::time::sleep(SUSTAINED_BACKPRESSURE) => {
                warn!(
                    channel = %self.channel,
                    connection = %self.connection,
                    waited_ms = SUSTAINED_BACKPRESSURE.as_millis() as u64,
                    "subscriber lagging, sustained backpressure"
                );
                reserve.await
            }
        }
        .map_err(|_| BufferClosed)?;

        permit.send(item);
        trace!(
            connection = %self.connection,
            waited_ms = started.elapsed().as_millis() as u64,
            "buffer space freed"
        );
        Ok(())
    }

    /// Number of undelivered items currently held.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// How many pushes had to wait for space.
    pub fn stalls(&self) -> u64 {
        self.stalls
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Reading half, merged into the channel's subscription stream.
pub struct BufferConsumer<T> {
    rx: mpsc::Receiver<T>,
    connection: ConnectionId,
}

impl<T> BufferConsumer<T> {
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }
}

impl<T> futures_util::Stream for BufferConsumer<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
