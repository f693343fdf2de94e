//! Outbound publisher loop.
//!
//! Consumes a stream of messages one at a time and writes each to the
//! channel's remote URL. The connection is opened lazily, reused while it
//! works and dropped on the first failure; the next attempt reconnects.
//! Failed sends are retried with [`RetryPolicy`] delays, then dropped.
//! Every message taken from the outbox ends up either sent or counted as
//! dropped.

use std::sync::Arc;

use futures_util::StreamExt;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wsbridge_protocol::{Codec, DEFAULT_MAX_MESSAGE_SIZE, Frame, Message};
use wsbridge_registry::OutgoingSettings;

use crate::ConnectionError;
use crate::connection::OutboundConnection;
use crate::emitter::Outbox;
use crate::events::{DropReason, PublishEvent, PublishStats};
use crate::retry::RetryPolicy;

pub struct Publisher<T> {
    channel: String,
    settings: OutgoingSettings,
    codec: Arc<dyn Codec<T>>,
    policy: RetryPolicy,
    max_message_size: usize,
    events: Option<mpsc::UnboundedSender<PublishEvent>>,
    rng: StdRng,
    connection: Option<OutboundConnection>,
    stats: PublishStats,
}

impl<T: Send + 'static> Publisher<T> {
    pub fn new(channel: &str, settings: &OutgoingSettings, codec: Arc<dyn Codec<T>>) -> Self {
        Self {
            channel: channel.to_string(),
            settings: settings.clone(),
            codec,
            policy: RetryPolicy::from_settings(settings),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            events: None,
            rng: StdRng::from_entropy(),
            connection: None,
            stats: PublishStats::default(),
        }
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Uses a fixed random source for jitter.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Reports events to a sender shared with other publishers.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<PublishEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Returns a receiver for this publisher's [`PublishEvent`]s.
    pub fn events(&mut self) -> mpsc::UnboundedReceiver<PublishEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    /// Publishes the messages of `outbox` until every emitter is dropped or
    /// shutdown completes.
    ///
    /// `stop` closes the outbox: emitters are refused from then on, while
    /// messages already queued are still delivered, retries included.
    /// `abort` ends delivery early: the message in flight (including one
    /// waiting out a retry delay) and everything still queued are dropped
    /// with [`DropReason::Shutdown`].
    pub async fn publish(
        mut self,
        mut outbox: Outbox<T>,
        stop: CancellationToken,
        abort: CancellationToken,
    ) -> PublishStats {
        info!(channel = %self.channel, url = %self.settings.url, "publisher started");

        let channel = self.channel.clone();
        let mut stopping = false;
        loop {
            let next = tokio::select! {
                biased;
                _ = abort.cancelled() => break,
                _ = stop.cancelled(), if !stopping => None,
                message = outbox.next() => match message {
                    Some(message) => Some(message),
                    None => break,
                },
            };
            let Some(message) = next else {
                stopping = stop_accepting(&mut outbox, &channel);
                continue;
            };

            // The outbox must close on stop even while a message is retried.
            let delivery = self.deliver(message, &abort);
            tokio::pin!(delivery);
            if !stopping {
                tokio::select! {
                    biased;
                    () = &mut delivery => continue,
                    _ = stop.cancelled() => stopping = stop_accepting(&mut outbox, &channel),
                }
            }
            delivery.await;
        }

        outbox.close();
        let mut left = 0u64;
        while outbox.next().await.is_some() {
            left += 1;
            self.dropped(DropReason::Shutdown);
        }
        if left > 0 {
            warn!(channel = %self.channel, dropped = left, "dropping queued messages at shutdown");
        }

        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }

        info!(
            channel = %self.channel,
            sent = self.stats.sent,
            retries = self.stats.retries,
            dropped = self.stats.dropped,
            "publisher stopped"
        );
        self.stats
    }

    async fn deliver(&mut self, message: Message<T>, abort: &CancellationToken) {
        let frame = match self.codec.serialize(&message.payload) {
            Ok(frame) => frame,
            Err(e) => {
                error!(
                    channel = %self.channel,
                    serializer = self.codec.name(),
                    error = %e,
                    "dropping message that failed to serialize"
                );
                self.dropped(DropReason::Serialization(e.to_string()));
                return;
            }
        };

        let mut retries = 0;
        loop {
            let attempted = tokio::select! {
                biased;
                _ = abort.cancelled() => None,
                result = self.attempt(frame.clone()) => Some(result),
            };
            let err = match attempted {
                Some(Ok(())) => {
                    self.stats.sent += 1;
                    self.notify(PublishEvent::Sent {
                        channel: self.channel.clone(),
                    });
                    return;
                }
                Some(Err(e)) => e,
                None => {
                    // An interrupted attempt leaves the connection unusable.
                    self.connection = None;
                    self.abandon(retries);
                    return;
                }
            };

            // A failed connection is never reused.
            self.connection = None;

            if !self.policy.allows(retries) {
                warn!(
                    channel = %self.channel,
                    url = %self.settings.url,
                    retries,
                    error = %err,
                    "dropping message after exhausting retries"
                );
                self.dropped(DropReason::RetriesExhausted {
                    retries,
                    error: err.to_string(),
                });
                return;
            }

            retries += 1;
            self.stats.retries += 1;
            let delay = self.policy.delay_for_retry(retries, &mut self.rng);
            warn!(
                channel = %self.channel,
                retry = retries,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "send failed, retrying"
            );
            self.notify(PublishEvent::Retrying {
                channel: self.channel.clone(),
                retry: retries,
                delay,
                error: err.to_string(),
            });

            let aborted = tokio::select! {
                _ = abort.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if aborted {
                self.abandon(retries);
                return;
            }
        }
    }

    async fn attempt(&mut self, frame: Frame) -> Result<(), ConnectionError> {
        if self.connection.as_ref().is_some_and(|c| c.is_broken()) {
            debug!(channel = %self.channel, "outbound connection broken, reconnecting");
            self.connection = None;
        }

        if self.connection.is_none() {
            let connection = OutboundConnection::connect(
                &self.settings.url,
                self.settings.connect_timeout,
                self.max_message_size,
            )
            .await?;
            info!(channel = %self.channel, url = %self.settings.url, "outbound connection established");
            self.notify(PublishEvent::Connected {
                channel: self.channel.clone(),
                url: self.settings.url.clone(),
            });
            self.connection = Some(connection);
        }

        let Some(connection) = self.connection.as_mut() else {
            return Err(ConnectionError::Closed);
        };
        connection.send(frame, self.settings.send_timeout).await
    }

    fn abandon(&mut self, retries: u32) {
        warn!(
            channel = %self.channel,
            url = %self.settings.url,
            retries,
            "dropping message in flight at shutdown"
        );
        self.dropped(DropReason::Shutdown);
    }

    fn dropped(&mut self, reason: DropReason) {
        self.stats.dropped += 1;
        self.notify(PublishEvent::Dropped {
            channel: self.channel.clone(),
            reason,
        });
    }

    fn notify(&self, event: PublishEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

fn stop_accepting<T>(outbox: &mut Outbox<T>, channel: &str) -> bool {
    outbox.close();
    debug!(%channel, "publisher stopping, draining queued messages");
    true
}
