/// Session manager
///
/// Owns the session table and one shared relay connection. Inbound relay
/// notifications are resolved to a session by topic, decrypted with that
/// session's key, and applied: a settle activates the session, a delete
/// disconnects it, and responses complete pending signature requests.
///
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use alloy::hex;
use log::{debug, info, warn};
use rand::Rng;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::ManagerConfig;
use crate::connection::Connection;
use crate::constants::DEFAULT_CHAIN_ID;
use crate::crypto::{self, SignatureDetails, decrypt_to_string, encrypt_str};
use crate::error::{Error, Result};
use crate::rpc_types::Notification;
use crate::session::{Session, SessionStatus, SessionStore};
use crate::wc_message::{
    SessionRequestParams, SessionSettleParams, WcData, WcMessage,
};

struct Waiter {
    session_id: String,
    sender: oneshot::Sender<WcData>,
}

pub struct SessionManager {
    config: ManagerConfig,
    sessions: SessionStore,
    relay: tokio::sync::Mutex<Option<Arc<Connection>>>,
    waiters: Mutex<HashMap<u64, Waiter>>,
    ids: AtomicU64,
}

impl SessionManager {
    pub fn new(config: ManagerConfig) -> Arc<Self> {
        let initial: u32 = rand::thread_rng().r#gen();
        Arc::new(Self {
            config,
            sessions: SessionStore::new(),
            relay: tokio::sync::Mutex::new(None),
            waiters: Mutex::new(HashMap::new()),
            ids: AtomicU64::new(u64::from(initial)),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Creates a pending session and returns it with its pairing URI.
    pub fn create_session(&self) -> (Session, String) {
        let session = Session::new(self.config.session_ttl);
        let relay_url = self
            .config
            .include_relay_url
            .then_some(self.config.relay_url.as_str());
        let uri = session.pairing_uri(relay_url);

        info!(
            "created session {} on pairing topic {}",
            session.id, session.pairing_topic
        );
        self.sessions.insert(session.clone());
        (session, uri)
    }

    /// Returns the live relay connection, dialing a new one if there is
    /// none or the previous one died.
    async fn relay_connection(self: &Arc<Self>) -> Result<Arc<Connection>> {
        let mut relay = self.relay.lock().await;
        if let Some(connection) = relay.as_ref() {
            if !connection.is_closed() {
                return Ok(Arc::clone(connection));
            }
            info!("relay connection lost, reconnecting");
        }

        let (connection, notifications) = Connection::connect(
            &self.config.relay_url,
            self.config.dial_timeout,
            self.config.request_timeout,
        )
        .await?;
        let connection = Arc::new(connection);
        *relay = Some(Arc::clone(&connection));
        self.spawn_dispatcher(notifications);
        Ok(connection)
    }

    async fn current_connection(&self) -> Option<Arc<Connection>> {
        self.relay
            .lock()
            .await
            .as_ref()
            .filter(|c| !c.is_closed())
            .cloned()
    }

    fn spawn_dispatcher(
        self: &Arc<Self>,
        mut notifications: mpsc::Receiver<Notification>,
    ) {
        let manager: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager
                    .handle_message(
                        &notification.params.topic,
                        &notification.params.message,
                    )
                    .await;
            }
            debug!("notification dispatcher stopped");
        });
    }

    /// Subscribes to the session's pairing topic so the wallet's settle
    /// message reaches us.
    pub async fn connect_to_relay(
        self: &Arc<Self>,
        session_id: &str,
    ) -> Result<()> {
        let session = self.get_session(session_id)?;
        let connection = self.relay_connection().await?;
        connection.subscribe(&session.pairing_topic).await?;
        info!("session {session_id} waiting for wallet on relay");
        Ok(())
    }

    /// Applies one inbound relay message. Messages that do not belong to a
    /// known session or fail to decrypt are dropped.
    pub async fn handle_message(self: &Arc<Self>, topic: &str, payload: &str) {
        let Some(session) = self.sessions.by_topic(topic) else {
            debug!("no session for topic {topic}");
            return;
        };

        let plaintext = match decrypt_to_string(payload, &session.sym_key) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!("dropping message for session {}: {e}", session.id);
                return;
            }
        };
        let message = match WcMessage::from_str(&plaintext) {
            Ok(message) => message,
            Err(e) => {
                warn!("dropping message for session {}: {e}", session.id);
                return;
            }
        };

        match message.data {
            WcData::SessionSettle(params) => {
                self.settle(&session, message.id, params);
            }
            WcData::SessionDelete(params) => {
                info!(
                    "wallet closed session {} ({}: {})",
                    session.id, params.code, params.message
                );
                self.sessions.update(&session.id, Session::disconnect);
                self.fail_waiters(&session.id);
            }
            // our own requests come back to us on the shared topic
            WcData::SessionRequest(_) => {}
            data => self.resolve(&session.id, message.id, data),
        }
    }

    /// Activates the session, then moves to its session topic and tells the
    /// wallet which topic that is in the settle acknowledgement. The
    /// dispatcher must never await a relay response, so the acknowledgement
    /// runs on its own task.
    fn settle(
        self: &Arc<Self>,
        session: &Session,
        settle_id: u64,
        params: SessionSettleParams,
    ) {
        let activated = self.sessions.update(&session.id, |s| {
            if s.status != SessionStatus::Pending {
                return false;
            }
            s.set_peer(params.peer_id.clone(), params.public_key.clone());
            if let Some(address) = params.accounts.first() {
                s.set_wallet_address(*address);
            }
            s.activate()
        });
        if activated != Some(true) {
            debug!("ignoring settle for session {}", session.id);
            return;
        }
        info!(
            "session {} active with wallet {:?}",
            session.id,
            params.accounts.first()
        );

        let manager = Arc::clone(self);
        let session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.acknowledge_settle(&session, settle_id).await
            {
                warn!("failed to acknowledge settle of {}: {e}", session.id);
            }
        });
    }

    async fn acknowledge_settle(
        self: &Arc<Self>,
        session: &Session,
        settle_id: u64,
    ) -> Result<()> {
        let connection = self.relay_connection().await?;
        connection.subscribe(&session.session_topic).await?;

        let ack = WcMessage::new(
            settle_id,
            WcData::Result(json!({ "sessionTopic": session.session_topic })),
        );
        let payload = encrypt_str(&ack.to_json()?, &session.sym_key)?;
        connection
            .publish(&session.pairing_topic, &payload, ack.ttl())
            .await
    }

    /// Completes the pending request `id`, provided it was sent on
    /// `session_id`.
    fn resolve(&self, session_id: &str, id: u64, data: WcData) {
        let waiter = {
            let mut waiters =
                self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
            match waiters.get(&id).map(|w| w.session_id == session_id) {
                Some(true) => waiters.remove(&id),
                Some(false) => {
                    warn!("response {id} arrived on foreign session {session_id}");
                    None
                }
                None => {
                    debug!("response {id} has no pending request");
                    None
                }
            }
        };
        if let Some(waiter) = waiter {
            let _ = waiter.sender.send(data);
        }
    }

    fn fail_waiters(&self, session_id: &str) {
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, waiter| waiter.session_id != session_id);
    }

    fn forget_waiter(&self, id: u64) {
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed)
    }

    /// Asks the wallet to `personal_sign` `message` and waits for the
    /// answer. The signature must recover to the session's wallet address.
    pub async fn sign_message(
        self: &Arc<Self>,
        session_id: &str,
        message: &str,
    ) -> Result<SignatureDetails> {
        let session = self.get_session(session_id)?;
        if !session.is_active() || session.is_expired() {
            return Err(Error::SessionNotActive(session_id.to_string()));
        }
        let wallet = session
            .wallet_address
            .ok_or_else(|| Error::SessionNotActive(session_id.to_string()))?;

        let id = self.next_id();
        let request = WcMessage::new(
            id,
            WcData::SessionRequest(SessionRequestParams::personal_sign(
                DEFAULT_CHAIN_ID,
                message,
                wallet,
            )),
        );
        let payload = encrypt_str(&request.to_json()?, &session.sym_key)?;

        let (sender, receiver) = oneshot::channel();
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Waiter {
                    session_id: session_id.to_string(),
                    sender,
                },
            );

        if let Err(e) = self.publish(&session, &payload, request.ttl()).await {
            self.forget_waiter(id);
            return Err(e);
        }
        debug!("sign request {id} sent for session {session_id}");

        let response =
            match tokio::time::timeout(self.config.sign_timeout, receiver).await
            {
                Ok(Ok(response)) => response,
                // waiter dropped by a disconnect
                Ok(Err(_)) => {
                    return Err(Error::SessionNotActive(session_id.to_string()));
                }
                Err(_) => {
                    self.forget_waiter(id);
                    return Err(Error::Timeout("wallet signature"));
                }
            };

        match response {
            WcData::Result(Value::String(signature)) => {
                verify_response(message, &signature, wallet)
            }
            WcData::Error { code, message } => {
                Err(Error::WalletRejected { code, message })
            }
            other => Err(Error::InternalError(format!(
                "unexpected sign response: {other:?}"
            ))),
        }
    }

    async fn publish(
        self: &Arc<Self>,
        session: &Session,
        payload: &str,
        ttl: u64,
    ) -> Result<()> {
        let connection = self.relay_connection().await?;
        connection.subscribe(&session.session_topic).await?;
        connection
            .publish(&session.session_topic, payload, ttl)
            .await
    }

    /// Drops both topic subscriptions, marks the session disconnected and
    /// fails any pending signature requests.
    pub async fn disconnect_session(&self, session_id: &str) -> Result<()> {
        let session = self.get_session(session_id)?;

        if let Some(connection) = self.current_connection().await {
            for topic in [&session.pairing_topic, &session.session_topic] {
                if let Err(e) = connection.unsubscribe(topic).await {
                    warn!("failed to unsubscribe {topic}: {e}");
                }
            }
        }

        self.sessions.update(session_id, Session::disconnect);
        self.fail_waiters(session_id);
        info!("session {session_id} disconnected");
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> Result<Session> {
        self.sessions
            .get(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    pub fn get_active_sessions(&self) -> Vec<Session> {
        self.sessions.active()
    }

    pub fn set_wallet_address(
        &self,
        session_id: &str,
        address: alloy::primitives::Address,
    ) -> Result<()> {
        self.sessions
            .update(session_id, |s| s.set_wallet_address(address))
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    pub fn signature_details(
        &self,
        message: &str,
        signature_hex: &str,
    ) -> Result<SignatureDetails> {
        crypto::signature_details(message, signature_hex)
    }

    /// Removes expired sessions and returns how many were removed.
    pub async fn cleanup_expired_sessions(&self) -> usize {
        let removed = self.sessions.cleanup_expired();
        if removed.is_empty() {
            return 0;
        }

        let connection = self.current_connection().await;
        for session in &removed {
            self.fail_waiters(&session.id);
            if let Some(connection) = &connection {
                for topic in [&session.pairing_topic, &session.session_topic] {
                    if let Err(e) = connection.unsubscribe(topic).await {
                        debug!("failed to unsubscribe {topic}: {e}");
                    }
                }
            }
        }
        info!("removed {} expired sessions", removed.len());
        removed.len()
    }

    /// Runs [`SessionManager::cleanup_expired_sessions`] every
    /// `cleanup_interval` until the manager is dropped.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        let period = self.config.cleanup_interval;
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.cleanup_expired_sessions().await;
            }
        })
    }
}

fn verify_response(
    message: &str,
    signature: &str,
    wallet: alloy::primitives::Address,
) -> Result<SignatureDetails> {
    let bytes = hex::decode(signature)?;
    let recovered = crypto::recover_address(message.as_bytes(), &bytes)?;
    if recovered != wallet {
        return Err(Error::SignatureMismatch {
            expected: wallet,
            recovered,
        });
    }
    crypto::signature_details(message, signature)
}
