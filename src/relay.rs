/// Relay server
///
/// Topic based publish/subscribe over websocket connections. Each connection
/// gets a reader loop and a writer task; published envelopes go through one
/// bounded queue drained by a single delivery worker that fans them out to
/// the current subscribers of the topic.
///
use std::fmt::Display;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::constants::RELAY_PATH;
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::rpc_types::{
    ErrorCode, JsonRpcResponse, Notification, RelayRequest, parse_request,
};
use crate::subscription::{
    ConnectionHandle, RegistryStats, SubscriptionRegistry,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

pub struct RelayServer {
    registry: Arc<SubscriptionRegistry>,
    queue: mpsc::Sender<Envelope>,
    receiver: Mutex<Option<mpsc::Receiver<Envelope>>>,
    config: RelayConfig,
}

impl RelayServer {
    /// Builds a relay whose delivery worker is not running yet. See
    /// [`RelayServer::start`].
    pub fn new(config: RelayConfig) -> Self {
        let (queue, receiver) = mpsc::channel(config.queue_capacity);
        Self {
            registry: Arc::new(SubscriptionRegistry::new()),
            queue,
            receiver: Mutex::new(Some(receiver)),
            config,
        }
    }

    /// Builds the relay and starts its delivery worker.
    pub fn spawn(config: RelayConfig) -> Arc<Self> {
        let server = Arc::new(Self::new(config));
        server.start();
        server
    }

    /// Starts the delivery worker. Returns `None` when already started.
    /// The worker exits once the server is dropped.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;

        let registry = Arc::clone(&self.registry);
        let write_timeout = self.config.write_timeout;
        Some(tokio::spawn(async move {
            run_delivery(registry, receiver, write_timeout).await;
        }))
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Queues an envelope for delivery. Waits up to `publish_timeout` for
    /// room in the queue.
    pub async fn publish(
        &self,
        topic: String,
        message: String,
        ttl: u64,
    ) -> Result<()> {
        let envelope = Envelope::new(topic, message, ttl);
        match self
            .queue
            .send_timeout(envelope, self.config.publish_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(envelope)) => {
                warn!("publish queue full, dropping message for {}", envelope.topic);
                Err(Error::Timeout("publish queue space"))
            }
            Err(SendTimeoutError::Closed(_)) => {
                Err("delivery worker is not running".into())
            }
        }
    }

    /// Handles one inbound text frame and returns the response frame.
    pub async fn handle_text(
        &self,
        connection: &ConnectionHandle,
        text: &str,
    ) -> JsonRpcResponse {
        let (id, request) = match parse_request(text) {
            Ok(parsed) => parsed,
            Err(response) => {
                debug!(
                    "rejecting frame from {}: {:?}",
                    connection.client_id, response.error
                );
                return response;
            }
        };
        let client_id = &connection.client_id;

        match request {
            RelayRequest::Subscribe(params) => {
                self.registry.subscribe(
                    &params.topic,
                    client_id,
                    connection.clone(),
                );
                debug!("{client_id} subscribed to {}", params.topic);
                JsonRpcResponse::success(id, Value::Bool(true))
            }
            RelayRequest::Unsubscribe(params) => {
                let removed =
                    self.registry.unsubscribe(&params.topic, client_id);
                debug!(
                    "{client_id} unsubscribed from {} (removed: {removed})",
                    params.topic
                );
                JsonRpcResponse::success(id, Value::Bool(true))
            }
            RelayRequest::Publish(params) => {
                match self
                    .publish(params.topic, params.message, params.ttl)
                    .await
                {
                    Ok(()) => JsonRpcResponse::success(id, Value::Bool(true)),
                    Err(e) => JsonRpcResponse::error_with_message(
                        id,
                        ErrorCode::PublishFailure,
                        e.to_string(),
                    ),
                }
            }
        }
    }
}

async fn run_delivery(
    registry: Arc<SubscriptionRegistry>,
    mut receiver: mpsc::Receiver<Envelope>,
    write_timeout: Duration,
) {
    while let Some(envelope) = receiver.recv().await {
        deliver(&registry, &envelope, write_timeout).await;
    }
    debug!("delivery worker stopped");
}

/// Fans one envelope out to the current subscribers of its topic. A
/// subscriber whose queue does not accept the write within `write_timeout`
/// loses all its subscriptions. Returns the number of notifications queued.
pub(crate) async fn deliver(
    registry: &SubscriptionRegistry,
    envelope: &Envelope,
    write_timeout: Duration,
) -> usize {
    if envelope.is_expired() {
        debug!("dropping expired message for {}", envelope.topic);
        return 0;
    }

    let subscribers = registry.subscribers(&envelope.topic);
    if subscribers.is_empty() {
        return 0;
    }

    let notification = Notification::new(&envelope.topic, &envelope.payload);
    let text = match serde_json::to_string(&notification) {
        Ok(text) => text,
        Err(e) => {
            warn!("failed to encode notification: {e}");
            return 0;
        }
    };

    let mut delivered = 0;
    for subscription in subscribers {
        match subscription
            .connection
            .sender
            .send_timeout(text.clone(), write_timeout)
            .await
        {
            Ok(()) => delivered += 1,
            Err(_) => {
                warn!(
                    "write to {} failed, dropping its subscriptions",
                    subscription.client_id
                );
                registry.unsubscribe_all(&subscription.client_id);
            }
        }
    }
    delivered
}

pub fn router(server: Arc<RelayServer>) -> Router {
    Router::new()
        .route(RELAY_PATH, get(ws_handler))
        .with_state(server)
}

pub async fn ws_handler(
    State(server): State<Arc<RelayServer>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(server, socket))
}

async fn handle_socket(server: Arc<RelayServer>, socket: WebSocket) {
    let client_id = Uuid::new_v4().to_string();
    let mut state = ConnectionState::Connecting;
    debug!("{client_id}: {state}");

    let (sink, mut stream) = socket.split();
    let (out_tx, out_rx) =
        mpsc::channel::<String>(server.config.outbound_capacity);
    let connection = ConnectionHandle::new(client_id.clone(), out_tx);

    let ping_interval = server.config.ping_interval;
    let writer_id = client_id.clone();
    let writer = tokio::spawn(async move {
        if let Err(e) = write_frames(sink, out_rx, ping_interval).await {
            warn!("{writer_id}: writer ended with error: {e}");
        }
    });

    state = ConnectionState::Open;
    info!("{client_id}: {state}");

    read_frames(&server, &connection, &mut stream).await;

    state = ConnectionState::Closing;
    debug!("{client_id}: {state}");

    let removed = server.registry.unsubscribe_all(&client_id);
    drop(connection);
    let _ = writer.await;

    state = ConnectionState::Closed;
    info!("{client_id}: {state} ({removed} subscriptions dropped)");
}

async fn read_frames(
    server: &RelayServer,
    connection: &ConnectionHandle,
    stream: &mut SplitStream<WebSocket>,
) {
    let client_id = &connection.client_id;
    let deadline = server.config.pong_timeout;

    loop {
        // any inbound frame, pongs included, re-arms the read deadline
        let next = match tokio::time::timeout(deadline, stream.next()).await
        {
            Ok(next) => next,
            Err(_) => {
                info!("{client_id}: no frames for {deadline:?}, closing");
                return;
            }
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                warn!("{client_id}: receive error: {e}");
                return;
            }
            None => return,
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => return,
            // binary frames are ignored, control frames handled by axum
            _ => continue,
        };

        let response = server.handle_text(connection, text.as_str()).await;
        let encoded = match serde_json::to_string(&response) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("{client_id}: failed to encode response: {e}");
                continue;
            }
        };
        if connection.sender.send(encoded).await.is_err() {
            return;
        }
    }
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<String>,
    ping_interval: Duration,
) -> std::result::Result<(), axum::Error> {
    let start = tokio::time::Instant::now() + ping_interval;
    let mut ticker = tokio::time::interval_at(start, ping_interval);

    loop {
        tokio::select! {
            frame = out_rx.recv() => match frame {
                Some(text) => sink.send(Message::Text(text.into())).await?,
                None => break,
            },
            _ = ticker.tick() => {
                sink.send(Message::Ping(Vec::new().into())).await?;
            }
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    Ok(())
}
