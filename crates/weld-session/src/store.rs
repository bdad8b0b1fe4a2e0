//! Persistent session store.
//!
//! The cache consults a small key/value store before going to the network.
//! Store failures are never fatal to the caller — a failed read is a miss
//! and a failed write is logged, both at warning level.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SessionState;

/// A session snapshot as persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSession {
    /// The session state at fetch time.
    pub state: SessionState,
    /// When the producing fetch started.
    pub requested_at: DateTime<Utc>,
    /// End of the freshness window.
    pub fresh_until: DateTime<Utc>,
}

/// Store I/O failure.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("session store {operation} failed: {message}")]
pub struct StoreError {
    /// Operation that failed (`get`, `set`, `remove`).
    pub operation: &'static str,
    /// Human-readable message.
    pub message: String,
}

impl StoreError {
    /// Create a new store error.
    #[must_use]
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// Async key/value store for session snapshots.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Read a stored session, `None` on miss.
    async fn get(&self, key: &str) -> Result<Option<StoredSession>, StoreError>;
    /// Write a session snapshot.
    async fn set(&self, key: &str, value: StoredSession) -> Result<(), StoreError>;
    /// Delete a stored session.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory [`SessionStore`] for in-process use and tests.
#[derive(Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, StoredSession>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<StoredSession>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: StoredSession) -> Result<(), StoreError> {
        let _ = self.entries.lock().insert(key.to_owned(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _ = self.entries.lock().remove(key);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
