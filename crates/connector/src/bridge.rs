use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use wsbridge_inbound::{ConnectionMeta, InboundServer};
use wsbridge_outbound::{Emitter, Outbox, PublishEvent, PublishStats, Publisher, emitter};
use wsbridge_protocol::{Codec, Message};
use wsbridge_registry::{DEFAULT_QUEUE_SIZE, Direction, IncomingSettings, MessagingConfig, Registry};

use crate::BridgeError;

/// How long a publisher gets to drop its remaining messages once the grace
/// period is over. Covers closing its outbound connection.
const PUBLISHER_ABORT_WAIT: Duration = Duration::from_secs(2);

/// Everything a deferred binding needs once the registry is validated.
struct Wiring<'a> {
    registry: &'a Registry,
    server: &'a Arc<InboundServer>,
    consumers: &'a TaskTracker,
    publishers: &'a mut Vec<(String, JoinHandle<PublishStats>)>,
    publish_stop: &'a CancellationToken,
    publish_abort: &'a CancellationToken,
    events: Option<&'a mpsc::UnboundedSender<PublishEvent>>,
    max_message_size: usize,
}

type Binding = Box<dyn FnOnce(&mut Wiring<'_>) -> Result<(), BridgeError> + Send>;

/// Collects the application's channel wiring.
pub struct BridgeBuilder {
    config: MessagingConfig,
    wired: Vec<(String, Direction)>,
    bindings: Vec<Binding>,
    events: Option<mpsc::UnboundedSender<PublishEvent>>,
}

impl BridgeBuilder {
    pub fn new(config: MessagingConfig) -> Self {
        Self {
            config,
            wired: Vec::new(),
            bindings: Vec::new(),
            events: None,
        }
    }

    /// Calls `handler` for every message of an incoming channel, decoded
    /// with the channel's configured serializer.
    ///
    /// Messages are handled one at a time; a slow handler applies
    /// backpressure to the channel's clients.
    pub fn subscribe<T, F, Fut>(&mut self, channel: &str, handler: F) -> &mut Self
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: Fn(Message<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe_inner(channel, |s| s.serializer.build::<T>(), handler)
    }

    /// Like [`subscribe`](Self::subscribe) with a caller-provided codec.
    pub fn subscribe_with<T, F, Fut>(
        &mut self,
        channel: &str,
        codec: Arc<dyn Codec<T>>,
        handler: F,
    ) -> &mut Self
    where
        T: Send + 'static,
        F: Fn(Message<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe_inner(channel, move |_| codec, handler)
    }

    /// Returns the publishing function of an outgoing channel, encoded with
    /// the channel's configured serializer.
    ///
    /// Messages emitted before [`start`](Self::start) are queued.
    pub fn emitter<T>(&mut self, channel: &str) -> Emitter<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let (emitter, outbox) = emitter::queue(channel, self.queue_size(channel));
        let name = channel.to_string();
        self.bind_outgoing(channel, move |w| {
            let codec = w.registry.resolve_outgoing(&name)?.serializer.build::<T>();
            spawn_publisher(w, name, codec, outbox)
        });
        emitter
    }

    /// Like [`emitter`](Self::emitter) with a caller-provided codec.
    pub fn emitter_with<T: Send + 'static>(
        &mut self,
        channel: &str,
        codec: Arc<dyn Codec<T>>,
    ) -> Emitter<T> {
        let (emitter, outbox) = emitter::queue(channel, self.queue_size(channel));
        let name = channel.to_string();
        self.bind_outgoing(channel, move |w| spawn_publisher(w, name, codec, outbox));
        emitter
    }

    /// Returns a receiver for the events of every publisher.
    pub fn publish_events(&mut self) -> mpsc::UnboundedReceiver<PublishEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    /// Validates the wiring and starts serving.
    ///
    /// Configuration problems (invalid channels, unknown or misdirected
    /// channel names, channels wired twice) are reported before the listener
    /// is bound.
    pub async fn start(self) -> Result<RunningBridge, BridgeError> {
        let registry = Registry::from_config(&self.config)?;

        let mut seen = HashSet::new();
        for (name, _) in &self.wired {
            if !seen.insert(name.as_str()) {
                return Err(BridgeError::AlreadyWired(name.clone()));
            }
        }
        registry.validate(self.wired.iter().map(|(n, d)| (n.as_str(), *d)))?;

        for channel in registry.channels() {
            if !seen.contains(channel.name()) {
                warn!(channel = %channel.name(), direction = %channel.direction(), "configured channel is not wired");
            }
        }

        let server = InboundServer::new(self.config.server.clone());
        let consumers = TaskTracker::new();
        let publish_stop = CancellationToken::new();
        let publish_abort = CancellationToken::new();
        let mut publishers = Vec::new();

        {
            let mut wiring = Wiring {
                registry: &registry,
                server: &server,
                consumers: &consumers,
                publishers: &mut publishers,
                publish_stop: &publish_stop,
                publish_abort: &publish_abort,
                events: self.events.as_ref(),
                max_message_size: self.config.server.max_message_size,
            };
            for bind in self.bindings {
                if let Err(e) = bind(&mut wiring) {
                    server.close_endpoints();
                    publish_abort.cancel();
                    return Err(e);
                }
            }
        }

        let has_incoming = self.wired.iter().any(|(_, d)| *d == Direction::Incoming);
        let server_task = if has_incoming {
            let listener = match server.listen().await {
                Ok(listener) => listener,
                Err(e) => {
                    server.close_endpoints();
                    publish_abort.cancel();
                    return Err(e.into());
                }
            };
            let serving = Arc::clone(&server);
            Some(tokio::spawn(async move {
                if let Err(e) = serving.serve(listener).await {
                    tracing::error!("inbound server error: {e}");
                }
            }))
        } else {
            debug!("no incoming channels wired, listener not started");
            None
        };

        info!(
            incoming = registry.incoming().count(),
            outgoing = registry.outgoing().count(),
            "bridge started"
        );

        Ok(RunningBridge {
            server,
            server_task,
            consumers,
            publishers,
            publish_stop,
            publish_abort,
            grace: self.config.server.shutdown_grace,
        })
    }

    fn subscribe_inner<T, C, F, Fut>(&mut self, channel: &str, codec: C, handler: F) -> &mut Self
    where
        T: Send + 'static,
        C: FnOnce(&IncomingSettings) -> Arc<dyn Codec<T>> + Send + 'static,
        F: Fn(Message<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = channel.to_string();
        self.wired.push((name.clone(), Direction::Incoming));
        self.bindings.push(Box::new(move |w: &mut Wiring<'_>| {
            let settings = w.registry.resolve_incoming(&name)?;
            let mut subscription = w.server.bind(&name, settings, codec(settings))?;

            w.consumers.spawn(async move {
                while let Some(message) = subscription.next().await {
                    handler(message).await;
                }
                debug!(channel = %name, "subscription ended");
            });
            Ok(())
        }));
        self
    }

    fn bind_outgoing<F>(&mut self, channel: &str, bind: F)
    where
        F: FnOnce(&mut Wiring<'_>) -> Result<(), BridgeError> + Send + 'static,
    {
        self.wired.push((channel.to_string(), Direction::Outgoing));
        self.bindings.push(Box::new(bind));
    }

    fn queue_size(&self, channel: &str) -> usize {
        self.config
            .outgoing
            .get(channel)
            .and_then(|c| c.queue_size)
            .unwrap_or(DEFAULT_QUEUE_SIZE)
    }
}

fn spawn_publisher<T: Send + 'static>(
    w: &mut Wiring<'_>,
    name: String,
    codec: Arc<dyn Codec<T>>,
    outbox: Outbox<T>,
) -> Result<(), BridgeError> {
    let settings = w.registry.resolve_outgoing(&name)?;
    let mut publisher = Publisher::new(&name, settings, codec)
        .with_max_message_size(w.max_message_size);
    if let Some(events) = w.events {
        publisher = publisher.with_events(events.clone());
    }
    let handle = tokio::spawn(publisher.publish(
        outbox,
        w.publish_stop.child_token(),
        w.publish_abort.child_token(),
    ));
    w.publishers.push((name, handle));
    Ok(())
}

/// A started bridge.
pub struct RunningBridge {
    server: Arc<InboundServer>,
    server_task: Option<JoinHandle<()>>,
    consumers: TaskTracker,
    publishers: Vec<(String, JoinHandle<PublishStats>)>,
    publish_stop: CancellationToken,
    publish_abort: CancellationToken,
    grace: Duration,
}

/// Outcome of [`RunningBridge::shutdown`].
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Final counters per outgoing channel. Messages still unsent when the
    /// grace period ran out are counted as dropped.
    pub published: BTreeMap<String, PublishStats>,
    /// Subscriber tasks that outlived the grace period, plus publisher tasks
    /// that did not stop after being told to drop their remaining messages.
    pub abandoned: usize,
}

impl RunningBridge {
    /// Address of the inbound listener, if one was started.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr().await
    }

    /// Currently connected inbound clients.
    pub fn connections(&self) -> Vec<ConnectionMeta> {
        self.server.connections()
    }

    /// Stops the bridge.
    ///
    /// Incoming connections are closed first and subscribers drain what was
    /// already buffered. Emitters are then closed; publishers keep delivering
    /// the messages they had accepted until the grace period runs out, after
    /// which pending retries are cut short and whatever is left is dropped
    /// and logged.
    pub async fn shutdown(self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        self.server.shutdown();
        if let Some(task) = self.server_task {
            // The server applies the grace period to its own connections.
            let _ = task.await;
        }

        self.consumers.close();
        if tokio::time::timeout(self.grace, self.consumers.wait())
            .await
            .is_err()
        {
            warn!(remaining = self.consumers.len(), "subscribers still running after grace period");
            report.abandoned += self.consumers.len();
        }

        self.publish_stop.cancel();
        let deadline = Instant::now() + self.grace;
        for (channel, mut handle) in self.publishers {
            let joined = match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    if !self.publish_abort.is_cancelled() {
                        warn!(
                            grace_ms = self.grace.as_millis() as u64,
                            "publishers still delivering after grace period, dropping the rest"
                        );
                        self.publish_abort.cancel();
                    }
                    match tokio::time::timeout(PUBLISHER_ABORT_WAIT, &mut handle).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            warn!(%channel, "publisher did not stop, aborting task");
                            handle.abort();
                            report.abandoned += 1;
                            continue;
                        }
                    }
                }
            };
            match joined {
                Ok(stats) => {
                    report.published.insert(channel, stats);
                }
                Err(e) => warn!(%channel, "publisher task failed: {e}"),
            }
        }

        info!(abandoned = report.abandoned, "bridge stopped");
        report
    }
}
