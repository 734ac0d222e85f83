/// Sessions
///
/// A session ties a pairing topic and a session topic to one symmetric key
/// and one local identity key. Its status only moves forward:
/// `pending → active → disconnected`.
///
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use alloy::primitives::Address;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::crypto::{
    KeyPair, generate_key_pair, generate_symmetric_key, random_hex,
    random_topic,
};
use crate::error::Result;
use crate::utils::build_pairing_uri;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Active,
    Disconnected,
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Active => "active",
            SessionStatus::Disconnected => "disconnected",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug)]
pub struct Session {
    pub id: String,
    pub pairing_topic: String,
    pub session_topic: String,
    pub sym_key: String,
    pub key_pair: KeyPair,
    /// Address of `key_pair`.
    pub client_id: String,
    pub peer_id: Option<String>,
    pub peer_public_key: Option<String>,
    pub wallet_address: Option<Address>,
    pub status: SessionStatus,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl Session {
    pub fn new(ttl: Duration) -> Self {
        let key_pair = generate_key_pair();
        let now = OffsetDateTime::now_utc();
        Self {
            id: random_hex(32),
            pairing_topic: random_topic(),
            session_topic: random_topic(),
            sym_key: generate_symmetric_key(),
            client_id: key_pair.address().to_string(),
            key_pair,
            peer_id: None,
            peer_public_key: None,
            wallet_address: None,
            status: SessionStatus::Pending,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        }
    }

    fn touch(&mut self) {
        self.updated_at = OffsetDateTime::now_utc();
    }

    /// Moves `pending → active`. Returns whether the status changed.
    pub fn activate(&mut self) -> bool {
        if self.status != SessionStatus::Pending {
            return false;
        }
        self.status = SessionStatus::Active;
        self.touch();
        true
    }

    pub fn disconnect(&mut self) {
        self.status = SessionStatus::Disconnected;
        self.touch();
    }

    pub fn set_peer(&mut self, peer_id: String, public_key: String) {
        self.peer_id = Some(peer_id);
        self.peer_public_key = Some(public_key);
        self.touch();
    }

    pub fn set_wallet_address(&mut self, address: Address) {
        self.wallet_address = Some(address);
        self.touch();
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() >= self.expires_at
    }

    pub fn pairing_uri(&self, relay_url: Option<&str>) -> String {
        build_pairing_uri(&self.pairing_topic, &self.sym_key, relay_url)
    }

    pub fn view(&self) -> Result<SessionView> {
        Ok(SessionView {
            session_id: self.id.clone(),
            pairing_topic: self.pairing_topic.clone(),
            session_topic: self.session_topic.clone(),
            client_id: self.client_id.clone(),
            client_public_key: self.key_pair.public_key_hex(),
            peer_id: self.peer_id.clone(),
            wallet_address: self.wallet_address,
            status: self.status,
            created_at: self.created_at.format(&Rfc3339)?,
            updated_at: self.updated_at.format(&Rfc3339)?,
            expires_at: self.expires_at.format(&Rfc3339)?,
        })
    }
}

/// Secret-free projection of a [`Session`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub pairing_topic: String,
    pub session_topic: String,
    pub client_id: String,
    pub client_public_key: String,
    pub peer_id: Option<String>,
    pub wallet_address: Option<Address>,
    pub status: SessionStatus,
    pub created_at: String,
    pub updated_at: String,
    pub expires_at: String,
}

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Session) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id.clone(), session);
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Resolves a topic to its session, pairing topics first.
    pub fn by_topic(&self, topic: &str) -> Option<Session> {
        let sessions =
            self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions
            .values()
            .find(|s| s.pairing_topic == topic)
            .or_else(|| sessions.values().find(|s| s.session_topic == topic))
            .cloned()
    }

    pub fn update<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Option<R> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(id)
            .map(f)
    }

    pub fn remove(&self, id: &str) -> Option<Session> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Sessions that are active and not yet expired.
    pub fn active(&self) -> Vec<Session> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| s.is_active() && !s.is_expired())
            .cloned()
            .collect()
    }

    /// Removes every expired session regardless of status. Returns the
    /// removed sessions.
    pub fn cleanup_expired(&self) -> Vec<Session> {
        let mut sessions =
            self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let expired: Vec<String> = sessions
            .values()
            .filter(|s| s.is_expired())
            .map(|s| s.id.clone())
            .collect();
        expired
            .iter()
            .filter_map(|id| sessions.remove(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(86400);

    #[test]
    fn test_new_session() {
        let session = Session::new(DAY);
        assert_eq!(session.status, SessionStatus::Pending);
        assert_eq!(session.id.len(), 64);
        assert_eq!(session.pairing_topic.len(), 64);
        assert_ne!(session.pairing_topic, session.session_topic);
        assert_eq!(session.client_id, session.key_pair.address().to_string());
        assert_eq!(session.expires_at - session.created_at, DAY);
        assert!(!session.is_expired());
    }

    #[test]
    fn test_status_only_moves_forward() {
        let mut session = Session::new(DAY);
        assert!(session.activate());
        assert_eq!(session.status, SessionStatus::Active);
        assert!(!session.activate());

        session.disconnect();
        assert_eq!(session.status, SessionStatus::Disconnected);
        assert!(!session.activate());
        assert_eq!(session.status, SessionStatus::Disconnected);
    }

    #[test]
    fn test_pending_can_disconnect() {
        let mut session = Session::new(DAY);
        session.disconnect();
        assert!(!session.activate());
        assert_eq!(session.status, SessionStatus::Disconnected);
    }

    #[test]
    fn test_mutations_bump_updated_at() {
        let mut session = Session::new(DAY);
        let before = session.updated_at;
        std::thread::sleep(Duration::from_millis(5));
        session.set_wallet_address(Address::repeat_byte(0x11));
        assert!(session.updated_at > before);
        assert_eq!(session.created_at, before);
    }

    #[test]
    fn test_pairing_uri_shape() {
        let session = Session::new(DAY);
        let uri = session.pairing_uri(None);

        let rest = uri.strip_prefix("wc:").unwrap();
        let (topic, rest) = rest.split_once("@2?relay-protocol=irn&symKey=").unwrap();
        assert_eq!(topic.len(), 64);
        assert!(topic.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(rest.len(), 44);
        assert!(
            rest.chars()
                .all(|c| c.is_ascii_alphanumeric() || "+/=".contains(c))
        );
    }

    #[test]
    fn test_view_has_no_secrets() {
        let mut session = Session::new(DAY);
        session.activate();
        let view = session.view().unwrap();
        let json = serde_json::to_string(&view).unwrap();

        assert_eq!(view.status, SessionStatus::Active);
        assert!(json.contains("\"status\":\"active\""));
        assert!(!json.contains(&session.sym_key));
        assert_eq!(view.client_public_key.len(), 130);
        assert!(OffsetDateTime::parse(&view.expires_at, &Rfc3339).is_ok());
    }

    #[test]
    fn test_store_lookup_by_topic() {
        let store = SessionStore::new();
        let session = Session::new(DAY);
        let id = session.id.clone();
        let pairing = session.pairing_topic.clone();
        let topic = session.session_topic.clone();
        store.insert(session);

        assert_eq!(store.by_topic(&pairing).unwrap().id, id);
        assert_eq!(store.by_topic(&topic).unwrap().id, id);
        assert!(store.by_topic("unknown").is_none());
    }

    #[test]
    fn test_store_active_and_cleanup() {
        let store = SessionStore::new();

        let pending = Session::new(DAY);
        let mut active = Session::new(DAY);
        active.activate();
        let mut expired = Session::new(Duration::ZERO);
        expired.activate();

        let active_id = active.id.clone();
        let expired_id = expired.id.clone();
        store.insert(pending);
        store.insert(active);
        store.insert(expired);

        let ids: Vec<String> = store.active().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![active_id]);

        let removed = store.cleanup_expired();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, expired_id);
        assert_eq!(store.len(), 2);
        assert!(store.get(&expired_id).is_none());
    }

    #[test]
    fn test_store_update() {
        let store = SessionStore::new();
        let session = Session::new(DAY);
        let id = session.id.clone();
        store.insert(session);

        assert_eq!(store.update(&id, |s| s.activate()), Some(true));
        assert_eq!(store.get(&id).unwrap().status, SessionStatus::Active);
        assert_eq!(store.update("missing", |s| s.activate()), None);
        assert!(store.remove(&id).is_some());
        assert!(store.is_empty());
    }
}
