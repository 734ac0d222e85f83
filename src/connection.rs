use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use rand::Rng;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::constants::OUTBOUND_QUEUE_CAPACITY;
use crate::error::{Error, Result};
use crate::rpc_types::{
    JsonRpcRequest, JsonRpcResponse, Notification, PublishParams,
    RelayRequest, ServerFrame, SubscribeParams, UnsubscribeParams,
    parse_server_frame,
};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Client side of a relay websocket. Requests are correlated with their
/// responses by id; notifications are forwarded on the channel returned by
/// [`Connection::connect`].
pub struct Connection {
    url: String,
    id: AtomicU64,
    outbound: mpsc::Sender<String>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    request_timeout: Duration,
    reader: JoinHandle<()>,
}

impl Connection {
    pub async fn connect(
        url: &str,
        dial_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<(Self, mpsc::Receiver<Notification>)> {
        let (socket, _) = tokio::time::timeout(dial_timeout, connect_async(url))
            .await
            .map_err(|_| Error::Timeout("relay dial"))??;
        debug!("connected to relay at {url}");

        let (mut sink, mut stream) = socket.split();
        let (outbound, mut out_rx) =
            mpsc::channel::<String>(OUTBOUND_QUEUE_CAPACITY);
        let (notify_tx, notify_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let pending: Pending = Arc::default();
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!("relay write failed: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_pending = Arc::clone(&pending);
        let reader_closed = Arc::clone(&closed);
        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("relay read failed: {e}");
                        break;
                    }
                };

                match parse_server_frame(text.as_str()) {
                    Ok(ServerFrame::Response(response)) => {
                        let waiter = reader_pending
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .remove(&response.id);
                        match waiter {
                            Some(waiter) => {
                                let _ = waiter.send(response);
                            }
                            None => debug!(
                                "response for unknown request {}",
                                response.id
                            ),
                        }
                    }
                    Ok(ServerFrame::Notification(notification)) => {
                        if notify_tx.send(notification).await.is_err() {
                            debug!("notification receiver dropped");
                        }
                    }
                    Err(e) => warn!("ignoring relay frame: {e}"),
                }
            }

            reader_closed.store(true, Ordering::SeqCst);
            // dropping the waiters fails every in-flight request
            reader_pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            debug!("relay connection closed");
        });

        let initial: u32 = rand::thread_rng().r#gen();
        Ok((
            Self {
                url: url.to_string(),
                id: AtomicU64::new(u64::from(initial)),
                outbound,
                pending,
                closed,
                request_timeout,
                reader,
            },
            notify_rx,
        ))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.outbound.is_closed()
    }

    fn next_id(&self) -> u64 {
        self.id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn request(&self, request: &RelayRequest) -> Result<Value> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let id = self.next_id();
        let frame = serde_json::to_string(&JsonRpcRequest::new(id, request)?)?;

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);

        if self.outbound.send(frame).await.is_err() {
            self.forget(id);
            return Err(Error::ConnectionClosed);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response.into_result()?),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.forget(id);
                Err(Error::Timeout("relay response"))
            }
        }
    }

    fn forget(&self, id: u64) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        let request = RelayRequest::Subscribe(SubscribeParams {
            topic: topic.to_string(),
        });
        expect_true(self.request(&request).await?)
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<()> {
        let request = RelayRequest::Unsubscribe(UnsubscribeParams {
            topic: topic.to_string(),
        });
        expect_true(self.request(&request).await?)
    }

    pub async fn publish(
        &self,
        topic: &str,
        message: &str,
        ttl: u64,
    ) -> Result<()> {
        let request = RelayRequest::Publish(PublishParams {
            topic: topic.to_string(),
            message: message.to_string(),
            ttl,
        });
        expect_true(self.request(&request).await?)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn expect_true(result: Value) -> Result<()> {
    match result {
        Value::Bool(true) => Ok(()),
        other => Err(format!("unexpected relay result: {other}").into()),
    }
}
