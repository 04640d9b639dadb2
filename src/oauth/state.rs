//! CSRF state tokens for the authorization flow.
//!
//! A state token binds an in-flight authorization to a (credential,
//! provider) pair for ten minutes and is consumed on first use. The store
//! is a trait so a shared table-backed implementation can replace the
//! in-memory one in multi-instance deployments without touching the flow
//! engine.

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::provider::ProviderKind;

/// Default state lifetime in seconds (10 minutes).
pub const DEFAULT_STATE_TTL_SECS: i64 = 600;

/// What a state token points at while the user is off authorizing.
#[derive(Clone, Debug)]
pub struct StateEntry {
    pub credential_id: String,
    pub provider: ProviderKind,
    pub created_at: DateTime<Utc>,
}

/// Capability interface for the state store.
pub trait StateStore: Send + Sync {
    /// Mint and store a state token for the entry.
    fn put(&self, entry: StateEntry) -> String;

    /// Validate and consume a token. Expired or replayed tokens return
    /// `None`; consumption is single-use.
    fn consume(&self, token: &str) -> Option<StateEntry>;
}

/// In-memory state store with automatic expiration.
#[derive(Clone)]
pub struct MemoryStateStore {
    states: Arc<Mutex<HashMap<String, StateEntry>>>,
    ttl: Duration,
}

impl MemoryStateStore {
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    /// Drop expired entries. Called periodically from a background task.
    pub fn cleanup_expired(&self) {
        let mut states = self.states.lock().unwrap();
        let now = Utc::now();
        states.retain(|_, entry| now - entry.created_at <= self.ttl);
    }

    pub fn count(&self) -> usize {
        self.states.lock().unwrap().len()
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_TTL_SECS)
    }
}

impl StateStore for MemoryStateStore {
    fn put(&self, entry: StateEntry) -> String {
        // 43 alphanumeric chars, comparable entropy to a 32-byte urlsafe token
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(43)
            .map(char::from)
            .collect();

        self.states.lock().unwrap().insert(token.clone(), entry);
        token
    }

    fn consume(&self, token: &str) -> Option<StateEntry> {
        let mut states = self.states.lock().unwrap();

        // Removed unconditionally: single-use even when expired
        let entry = states.remove(token)?;

        if Utc::now() - entry.created_at > self.ttl {
            return None;
        }
        Some(entry)
    }
}

/// Background task that periodically evicts expired states.
pub async fn run_state_cleanup(store: MemoryStateStore, interval_seconds: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        store.cleanup_expired();
        tracing::debug!(remaining = store.count(), "OAuth state cleanup complete");
    }
}
