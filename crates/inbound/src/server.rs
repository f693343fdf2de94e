//! Inbound WebSocket server.
//!
//! Listens on the configured address and upgrades HTTP GET requests whose
//! path matches a bound endpoint. Requests for any other path are answered
//! with `404 Not Found` during the handshake.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use wsbridge_protocol::{Codec, ConnectionId};
use wsbridge_registry::{IncomingSettings, ServerSettings};

use crate::ServerError;
use crate::connection::{self, ConnectionMeta};
use crate::endpoint::{Endpoint, Route};
use crate::subscription::Subscription;

/// Upper bound for the HTTP upgrade exchange of a single client.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// The inbound WebSocket server.
///
/// Endpoints are bound before [`serve`](Self::serve) is called; every
/// accepted connection is served on its own task.
pub struct InboundServer {
    settings: ServerSettings,
    routes: RwLock<HashMap<String, Arc<dyn Route>>>,
    connections: Mutex<HashMap<ConnectionId, ConnectionMeta>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    local_addr: tokio::sync::Mutex<Option<SocketAddr>>,
}

impl InboundServer {
    pub fn new(settings: ServerSettings) -> Arc<Self> {
        Arc::new(Self {
            settings,
            routes: RwLock::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            local_addr: tokio::sync::Mutex::new(None),
        })
    }

    /// Binds an incoming channel to its path and returns its message stream.
    pub fn bind<T: Send + 'static>(
        &self,
        channel: &str,
        settings: &IncomingSettings,
        codec: Arc<dyn Codec<T>>,
    ) -> Result<Subscription<T>, ServerError> {
        let mut routes = self.routes.write().map_err(|_| ServerError::Poisoned)?;
        if let Some(existing) = routes.get(&settings.path) {
            return Err(ServerError::PathInUse {
                path: settings.path.clone(),
                channel: existing.channel().to_string(),
            });
        }

        let (endpoint, subscription) =
            Endpoint::bind(channel, &settings.path, settings.buffer_size, codec);
        routes.insert(settings.path.clone(), endpoint);
        tracing::info!(
            %channel,
            path = %settings.path,
            buffer_size = settings.buffer_size,
            "incoming channel bound"
        );
        Ok(subscription)
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`listen`](Self::listen) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Snapshot of the connected clients.
    pub fn connections(&self) -> Vec<ConnectionMeta> {
        self.connections
            .lock()
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Signals shutdown. [`serve`](Self::serve) returns once connections have
    /// drained or the grace period ran out.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Binds the configured address.
    pub async fn listen(&self) -> Result<TcpListener, ServerError> {
        let listener = TcpListener::bind(self.settings.bind).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("inbound server listening on {local_addr}");
        Ok(listener)
    }

    /// Accepts connections on `listener` until shutdown.
    pub async fn serve(self: &Arc<Self>, listener: TcpListener) -> Result<(), ServerError> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            self.tracker.spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::warn!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }

        drop(listener);
        self.drain().await;
        Ok(())
    }

    /// Closes every bound endpoint. Subscriptions end once the connections
    /// already feeding them are gone.
    pub fn close_endpoints(&self) {
        if let Ok(routes) = self.routes.read() {
            for route in routes.values() {
                route.close();
            }
        }
    }

    async fn drain(&self) {
        tracing::info!("inbound server shutting down");
        self.close_endpoints();

        self.tracker.close();
        let grace = self.settings.shutdown_grace;
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            tracing::warn!(
                remaining = self.tracker.len(),
                grace_ms = grace.as_millis() as u64,
                "grace period elapsed with connections still open"
            );
        }
    }

    fn route(&self, path: &str) -> Option<Arc<dyn Route>> {
        self.routes.read().ok()?.get(path).cloned()
    }

    /// Upgrades a TCP connection and serves it until it closes.
    async fn handle_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.settings.max_message_size);
        ws_config.max_frame_size = Some(self.settings.max_message_size);

        let mut matched: Option<Arc<dyn Route>> = None;
        let select_route = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let path = req.uri().path();
            match self.route(path) {
                Some(route) => {
                    matched = Some(route);
                    Ok(resp)
                }
                None => {
                    tracing::debug!(%peer_addr, %path, "no channel bound to path");
                    let mut reject = ErrorResponse::new(Some(format!("no channel at {path}")));
                    *reject.status_mut() = StatusCode::NOT_FOUND;
                    Err(reject)
                }
            }
        };

        let handshake = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            handshake = tokio::time::timeout(
                HANDSHAKE_TIMEOUT,
                accept_hdr_async_with_config(stream, select_route, Some(ws_config)),
            ) => handshake,
        };
        let ws_stream = handshake.map_err(|_| ServerError::HandshakeTimeout)??;
        // The callback records a route before accepting the upgrade.
        let Some(route) = matched else {
            return Ok(());
        };

        let id = ConnectionId::new();
        let Some(mut feed) = route.open(id) else {
            tracing::debug!(%peer_addr, channel = route.channel(), "endpoint closed, dropping connection");
            return Err(ServerError::EndpointClosed(route.channel().to_string()));
        };

        let meta = ConnectionMeta {
            id,
            channel: route.channel().to_string(),
            peer: peer_addr,
        };
        if let Ok(mut connections) = self.connections.lock() {
            connections.insert(id, meta.clone());
        }
        tracing::info!(channel = %meta.channel, connection = %id, %peer_addr, "client connected");

        let reason = connection::serve(
            ws_stream,
            feed.as_mut(),
            self.settings.ping_interval,
            self.cancel.child_token(),
        )
        .await;

        if let Ok(mut connections) = self.connections.lock() {
            connections.remove(&id);
        }
        tracing::info!(channel = %meta.channel, connection = %id, %reason, "client disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use serde::{Deserialize, Serialize};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use wsbridge_protocol::{JsonCodec, TextCodec};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Amount {
        value: f64,
        currency: String,
    }

    fn settings() -> ServerSettings {
        ServerSettings {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            shutdown_grace: Duration::from_millis(500),
            ..ServerSettings::default()
        }
    }

    fn incoming(path: &str, buffer_size: usize) -> IncomingSettings {
        let mut s = IncomingSettings::new(path);
        s.buffer_size = buffer_size;
        s
    }

    async fn start(server: &Arc<InboundServer>) -> tokio::task::JoinHandle<()> {
        let listener = server.listen().await.unwrap();
        let server = Arc::clone(server);
        tokio::spawn(async move {
            server.serve(listener).await.unwrap();
        })
    }

    async fn next<T>(subscription: &mut Subscription<T>) -> Option<wsbridge_protocol::Message<T>> {
        tokio::time::timeout(Duration::from_secs(2), subscription.next())
            .await
            .expect("timed out waiting for message")
    }

    #[tokio::test]
    async fn server_binds_dynamic_port() {
        let server = InboundServer::new(settings());
        let handle = start(&server).await;

        assert!(server.port().await > 0, "should have bound to a dynamic port");
        assert!(server.connections().is_empty());

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn delivers_frames_in_order() {
        let server = InboundServer::new(settings());
        let mut amounts = server
            .bind("amounts", &incoming("/amounts", 8), Arc::new(JsonCodec::<Amount>::new()))
            .unwrap();
        let handle = start(&server).await;
        let addr = server.local_addr().await.unwrap();

        let (mut ws, _) = connect_async(format!("ws://{addr}/amounts")).await.unwrap();
        for value in [10.0, 20.0, 30.0] {
            let json = format!(r#"{{"value": {value}, "currency": "USD"}}"#);
            ws.send(WsMessage::Text(json.into())).await.unwrap();
        }

        let mut values = Vec::new();
        for _ in 0..3 {
            let message = next(&mut amounts).await.unwrap();
            assert_eq!(message.channel(), Some("amounts"));
            assert_eq!(message.payload.currency, "USD");
            values.push(message.payload.value);
        }
        assert_eq!(values, vec![10.0, 20.0, 30.0]);
        assert_eq!(server.connections().len(), 1);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_and_connection_stays_open() {
        let server = InboundServer::new(settings());
        let mut amounts = server
            .bind("amounts", &incoming("/amounts", 8), Arc::new(JsonCodec::<Amount>::new()))
            .unwrap();
        let handle = start(&server).await;
        let addr = server.local_addr().await.unwrap();

        let (mut ws, _) = connect_async(format!("ws://{addr}/amounts")).await.unwrap();
        ws.send(WsMessage::Text("{not json".into())).await.unwrap();
        ws.send(WsMessage::Text(r#"{"value": 5.0, "currency": "EUR"}"#.into()))
            .await
            .unwrap();

        let message = next(&mut amounts).await.unwrap();
        assert_eq!(message.payload.value, 5.0);
        assert_eq!(server.connections().len(), 1);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_path_is_rejected_with_404() {
        let server = InboundServer::new(settings());
        let _amounts = server
            .bind("amounts", &incoming("/amounts", 8), Arc::new(JsonCodec::<Amount>::new()))
            .unwrap();
        let handle = start(&server).await;
        let addr = server.local_addr().await.unwrap();

        let err = connect_async(format!("ws://{addr}/elsewhere")).await.unwrap_err();
        match err {
            tokio_tungstenite::tungstenite::Error::Http(resp) => {
                assert_eq!(resp.status(), StatusCode::NOT_FOUND);
            }
            other => panic!("expected HTTP rejection, got {other}"),
        }

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn same_path_cannot_be_bound_twice() {
        let server = InboundServer::new(settings());
        let codec: Arc<dyn Codec<String>> = Arc::new(TextCodec::new());
        server.bind("a", &incoming("/p", 1), codec.clone()).unwrap();

        let err = server.bind("b", &incoming("/p", 1), codec).unwrap_err();
        assert!(matches!(err, ServerError::PathInUse { channel, .. } if channel == "a"));
    }

    #[tokio::test]
    async fn slow_subscriber_loses_nothing() {
        let server = InboundServer::new(settings());
        let mut numbers = server
            .bind("numbers", &incoming("/numbers", 3), Arc::new(TextCodec::<u32>::new()))
            .unwrap();
        let handle = start(&server).await;
        let addr = server.local_addr().await.unwrap();

        let (mut ws, _) = connect_async(format!("ws://{addr}/numbers")).await.unwrap();
        for i in 1..=5u32 {
            ws.send(WsMessage::Text(i.to_string().into())).await.unwrap();
        }

        // Let the read pump fill the buffer and block on the 4th frame.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut received = Vec::new();
        for _ in 0..5 {
            received.push(next(&mut numbers).await.unwrap().payload);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(received, vec![1, 2, 3, 4, 5]);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn connections_are_multiplexed_per_channel() {
        let server = InboundServer::new(settings());
        let mut numbers = server
            .bind("numbers", &incoming("/numbers", 8), Arc::new(JsonCodec::<u32>::new()))
            .unwrap();
        let handle = start(&server).await;
        let addr = server.local_addr().await.unwrap();

        let (mut a, _) = connect_async(format!("ws://{addr}/numbers")).await.unwrap();
        let (mut b, _) = connect_async(format!("ws://{addr}/numbers")).await.unwrap();
        for i in 0..3u32 {
            a.send(WsMessage::Text(i.to_string().into())).await.unwrap();
            b.send(WsMessage::Text((100 + i).to_string().into())).await.unwrap();
        }

        let mut by_connection: HashMap<ConnectionId, Vec<u32>> = HashMap::new();
        for _ in 0..6 {
            let message = next(&mut numbers).await.unwrap();
            by_connection
                .entry(message.connection().unwrap())
                .or_default()
                .push(message.payload);
        }

        let mut sequences: Vec<Vec<u32>> = by_connection.into_values().collect();
        sequences.sort();
        assert_eq!(sequences, vec![vec![0, 1, 2], vec![100, 101, 102]]);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_ends_subscription() {
        let server = InboundServer::new(settings());
        let mut numbers = server
            .bind("numbers", &incoming("/numbers", 8), Arc::new(JsonCodec::<u32>::new()))
            .unwrap();
        let handle = start(&server).await;
        let addr = server.local_addr().await.unwrap();

        let (mut ws, _) = connect_async(format!("ws://{addr}/numbers")).await.unwrap();
        ws.send(WsMessage::Text("1".into())).await.unwrap();
        assert_eq!(next(&mut numbers).await.unwrap().payload, 1);

        server.shutdown();
        handle.await.unwrap();

        assert!(next(&mut numbers).await.is_none());
        assert!(server.connections().is_empty());
    }
}
