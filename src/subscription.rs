/// Subscription registry
///
/// Topic → subscribers and client → connection bookkeeping for the relay.
/// Both maps sit behind one lock so a client's subscriptions and its
/// connection entry never disagree. Nothing in here performs I/O; callers
/// take a snapshot and write to the returned handles after the lock is
/// released.
///
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc;

/// Write side of a relay connection's outbound queue.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    pub client_id: String,
    pub sender: mpsc::Sender<String>,
}

impl ConnectionHandle {
    pub fn new(client_id: String, sender: mpsc::Sender<String>) -> Self {
        Self { client_id, sender }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[derive(Clone, Debug)]
pub struct Subscription {
    pub topic: String,
    pub client_id: String,
    pub connection: ConnectionHandle,
    pub created_at: Instant,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub clients: usize,
    pub subscriptions: usize,
    pub topics: usize,
}

#[derive(Default)]
struct Inner {
    subscriptions: HashMap<String, Vec<Subscription>>,
    clients: HashMap<String, ConnectionHandle>,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: RwLock<Inner>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent per (topic, client). Also records the client's connection.
    pub fn subscribe(
        &self,
        topic: &str,
        client_id: &str,
        connection: ConnectionHandle,
    ) {
        let mut inner =
            self.inner.write().unwrap_or_else(PoisonError::into_inner);

        inner
            .clients
            .insert(client_id.to_string(), connection.clone());

        let subscribers =
            inner.subscriptions.entry(topic.to_string()).or_default();
        if subscribers.iter().any(|s| s.client_id == client_id) {
            return;
        }
        subscribers.push(Subscription {
            topic: topic.to_string(),
            client_id: client_id.to_string(),
            connection,
            created_at: Instant::now(),
        });
    }

    /// Returns whether a subscription was removed.
    pub fn unsubscribe(&self, topic: &str, client_id: &str) -> bool {
        let mut inner =
            self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let Some(subscribers) = inner.subscriptions.get_mut(topic) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|s| s.client_id != client_id);
        let removed = subscribers.len() != before;

        if subscribers.is_empty() {
            inner.subscriptions.remove(topic);
        }
        removed
    }

    /// Drops every subscription of `client_id` along with its connection
    /// entry. Returns the number of subscriptions removed.
    pub fn unsubscribe_all(&self, client_id: &str) -> usize {
        let mut inner =
            self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let mut removed = 0;
        inner.subscriptions.retain(|_, subscribers| {
            let before = subscribers.len();
            subscribers.retain(|s| s.client_id != client_id);
            removed += before - subscribers.len();
            !subscribers.is_empty()
        });
        inner.clients.remove(client_id);
        removed
    }

    pub fn subscribers(&self, topic: &str) -> Vec<Subscription> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.subscriptions.get(topic).cloned().unwrap_or_default()
    }

    pub fn is_subscribed(&self, topic: &str, client_id: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .subscriptions
            .get(topic)
            .is_some_and(|subs| subs.iter().any(|s| s.client_id == client_id))
    }

    pub fn connection(&self, client_id: &str) -> Option<ConnectionHandle> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.clients.get(client_id).cloned()
    }

    pub fn topics(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.subscriptions.keys().cloned().collect()
    }

    pub fn client_count(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.clients.len()
    }

    pub fn subscription_count(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.subscriptions.values().map(Vec::len).sum()
    }

    pub fn topic_count(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.subscriptions.len()
    }

    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        RegistryStats {
            clients: inner.clients.len(),
            subscriptions: inner.subscriptions.values().map(Vec::len).sum(),
            topics: inner.subscriptions.len(),
        }
    }
}
