//! Restart-safe event synchronization.
//!
//! When the producing side restarts, events emitted before this consumer
//! attached are gone from the live stream but survive in the producer's
//! bounded log. The synchronizer fetches that log under a timeout and
//! merges it with events queued locally during the sync, without
//! duplication or gaps.
//!
//! The emitter-id comparison, not a global sequence space, is what
//! distinguishes a stale duplicate from an emitter this consumer is already
//! caught up with from fresh data from a newly-restarted emitter: when the
//! fetched log carries the same emitter id as the last delivered event,
//! everything up to that event's sequence number is a duplicate and is
//! discarded; a different emitter id means a fresh producer whose whole log
//! is news.
//!
//! A fetch timeout or failure degrades to "no additional events" with a
//! warning, never a hard failure. Polling remains available as a fallback
//! for missed notifications.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::log::TaggedEvent;

/// Default log-fetch timeout in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 3;

/// Configuration for the synchronizer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynchronizerConfig {
    /// Log-fetch timeout in seconds (default: 3).
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

impl Default for SynchronizerConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
        }
    }
}

/// Log-fetch failure.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("log fetch failed: {0}")]
pub struct LogFetchError(pub String);

/// Fetches the producer's event-log snapshot.
#[async_trait]
pub trait LogFetcher: Send + Sync {
    /// Fetch the retained events, oldest first.
    async fn fetch_log(&self) -> Result<Vec<TaggedEvent>, LogFetchError>;
}

enum SyncState {
    Emitting {
        last_emit: Option<TaggedEvent>,
    },
    Synchronizing {
        last_emit: Option<TaggedEvent>,
        queued: Vec<TaggedEvent>,
    },
}

/// Delivers events to a sink, replaying the producer's log across restarts.
pub struct EventSynchronizer {
    fetcher: Arc<dyn LogFetcher>,
    sink: mpsc::UnboundedSender<TaggedEvent>,
    config: SynchronizerConfig,
    state: Mutex<SyncState>,
}

impl EventSynchronizer {
    /// Create a synchronizer delivering into `sink`.
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn LogFetcher>,
        sink: mpsc::UnboundedSender<TaggedEvent>,
        config: SynchronizerConfig,
    ) -> Self {
        Self {
            fetcher,
            sink,
            config,
            state: Mutex::new(SyncState::Emitting { last_emit: None }),
        }
    }

    /// Deliver an event, or queue it while a sync is in progress.
    pub fn emit_soon(&self, event: TaggedEvent) {
        let mut state = self.state.lock();
        match &mut *state {
            SyncState::Synchronizing { queued, .. } => queued.push(event),
            SyncState::Emitting { last_emit } => {
                *last_emit = Some(event.clone());
                self.deliver(&event);
            }
        }
    }

    /// Re-synchronize against the producer's log.
    ///
    /// Triggered by the producer's restart notification. Fetches the log
    /// snapshot under the configured timeout (failure and timeout degrade
    /// to an empty log), merges it with events queued since, and delivers
    /// the result in order.
    pub async fn sync_logged_events(&self) {
        {
            let mut state = self.state.lock();
            match &mut *state {
                SyncState::Synchronizing { .. } => {
                    debug!("sync already in progress");
                    return;
                }
                SyncState::Emitting { last_emit } => {
                    *state = SyncState::Synchronizing {
                        last_emit: last_emit.take(),
                        queued: Vec::new(),
                    };
                }
            }
        }

        let timeout = Duration::from_secs(self.config.fetch_timeout_secs);
        let fetched = match tokio::time::timeout(timeout, self.fetcher.fetch_log()).await {
            Ok(Ok(events)) => events,
            Ok(Err(error)) => {
                warn!(%error, "log fetch failed during resync, continuing with empty log");
                Vec::new()
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.config.fetch_timeout_secs,
                    "log fetch timed out during resync, continuing with empty log"
                );
                Vec::new()
            }
        };

        let mut state = self.state.lock();
        let (last_emit, queued) = match &mut *state {
            SyncState::Synchronizing { last_emit, queued } => {
                (last_emit.take(), std::mem::take(queued))
            }
            SyncState::Emitting { .. } => return,
        };

        let to_emit = merge(fetched, queued, last_emit.as_ref());
        let new_last = to_emit.last().cloned().or(last_emit);
        for event in &to_emit {
            self.deliver(event);
        }
        debug!(delivered = to_emit.len(), "resync complete");
        *state = SyncState::Emitting {
            last_emit: new_last,
        };
    }

    fn deliver(&self, event: &TaggedEvent) {
        if self.sink.send(event.clone()).is_err() {
            debug!("event sink closed, dropping event");
        }
    }
}

/// Merge the fetched log with the events queued during the sync.
fn merge(
    fetched: Vec<TaggedEvent>,
    queued: Vec<TaggedEvent>,
    last_emit: Option<&TaggedEvent>,
) -> Vec<TaggedEvent> {
    let fence = fetched
        .last()
        .map(|event| (event.emitter_id.clone(), event.seq));

    let mut to_emit: Vec<TaggedEvent> = Vec::new();
    for event in fetched {
        // Same emitter as the last delivered event: everything at or below
        // its sequence number was already delivered live.
        let superseded = last_emit
            .is_some_and(|last| last.emitter_id == event.emitter_id && event.seq <= last.seq);
        if !superseded {
            to_emit.push(event);
        }
    }

    for event in queued {
        let duplicate = fence
            .as_ref()
            .is_some_and(|(emitter, seq)| event.emitter_id == *emitter && event.seq <= *seq);
        if !duplicate {
            to_emit.push(event);
        }
    }
    to_emit
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
