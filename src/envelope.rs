use std::time::{Duration, Instant};

use crate::constants::MAX_TTL_SECS;

/// A published message in flight through the relay queue.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub topic: String,
    pub payload: String,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl Envelope {
    /// `ttl` is clamped to [`MAX_TTL_SECS`].
    pub fn new(topic: String, payload: String, ttl: u64) -> Self {
        let created_at = Instant::now();
        let ttl = Duration::from_secs(ttl.min(MAX_TTL_SECS));
        Self {
            topic,
            payload,
            created_at,
            expires_at: created_at.checked_add(ttl).unwrap_or(created_at),
        }
    }

    /// A zero ttl expires as soon as it is created.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    pub fn ttl(&self) -> Duration {
        self.expires_at - self.created_at
    }
}
