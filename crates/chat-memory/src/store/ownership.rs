use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Entry count past which `remember` sweeps expired entries first.
const DEFAULT_SWEEP_THRESHOLD: usize = 1024;

/// Short-lived record of `(owner, conversation)` pairs already checked
/// against the database. Entries expire lazily on read, and the whole map
/// is swept on insert once it grows past the sweep threshold.
#[derive(Clone)]
pub struct OwnershipCache {
    verified: Arc<DashMap<(String, String), Instant>>,
    ttl: Duration,
    sweep_threshold: usize,
}

impl OwnershipCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            verified: Arc::new(DashMap::new()),
            ttl,
            sweep_threshold: DEFAULT_SWEEP_THRESHOLD,
        }
    }

    pub fn with_sweep_threshold(mut self, threshold: usize) -> Self {
        self.sweep_threshold = threshold.max(1);
        self
    }

    pub fn is_verified(&self, owner_id: &str, conversation_id: &str) -> bool {
        let key = (owner_id.to_string(), conversation_id.to_string());
        let Some(entry) = self.verified.get(&key) else {
            return false;
        };
        if entry.value().elapsed() < self.ttl {
            return true;
        }
        drop(entry);
        self.verified.remove(&key);
        debug!("Ownership entry for {} expired", conversation_id);
        false
    }

    pub fn remember(&self, owner_id: &str, conversation_id: &str) {
        if self.verified.len() >= self.sweep_threshold {
            self.cleanup_expired();
        }
        self.verified.insert(
            (owner_id.to_string(), conversation_id.to_string()),
            Instant::now(),
        );
    }

    pub fn forget(&self, owner_id: &str, conversation_id: &str) {
        self.verified
            .remove(&(owner_id.to_string(), conversation_id.to_string()));
    }

    /// Returns number of entries removed.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.verified.len();
        let ttl = self.ttl;
        self.verified.retain(|_, checked_at| checked_at.elapsed() < ttl);
        let removed = before.saturating_sub(self.verified.len());
        if removed > 0 {
            info!("Dropped {} expired ownership entries", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.verified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verified.is_empty()
    }
}
