//! Retroactive disconnect tracking.
//!
//! Native close notifications are only reliably delivered to listeners
//! attached strictly before the close; many call sites attach after an
//! async setup step and would silently miss disconnects. The registry
//! attaches its own close listener at registration time and answers two
//! questions any time later: "has this channel already closed?" and "run
//! this callback when it closes, even if that already happened."
//!
//! The registry is an explicit dependency injected into whatever owns the
//! channels, never a process-wide global.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;
use weld_core::ChannelId;

use crate::channel::{Channel, ChannelError, Subscription};

type RetroListener = Box<dyn FnOnce() + Send>;

/// Per-channel disconnect state.
///
/// Lifetime matches the channel's; the record associates, it does not own.
struct DisconnectRecord {
    has_disconnected: bool,
    pending: Vec<RetroListener>,
    _close_sub: Subscription,
}

#[derive(Default)]
struct RegistryInner {
    records: Mutex<HashMap<ChannelId, DisconnectRecord>>,
}

impl RegistryInner {
    fn mark_disconnected(&self, id: &ChannelId) {
        let drained = {
            let mut records = self.records.lock();
            match records.get_mut(id) {
                Some(record) => {
                    record.has_disconnected = true;
                    std::mem::take(&mut record.pending)
                }
                None => Vec::new(),
            }
        };
        for listener in drained {
            listener();
        }
    }
}

/// Tracks per-channel disconnect state so listeners registered after the
/// close still fire.
#[derive(Clone, Default)]
pub struct DisconnectRegistry {
    inner: Arc<RegistryInner>,
}

impl DisconnectRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a channel.
    ///
    /// Idempotent: exactly one underlying close listener is attached no
    /// matter how many times the same channel is registered. A channel
    /// that is already closed at registration time is recorded as
    /// disconnected immediately.
    pub fn register(&self, channel: &Arc<Channel>) {
        let mut records = self.inner.records.lock();
        if records.contains_key(channel.id()) {
            return;
        }

        let weak: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let id = channel.id().clone();
        let close_sub = channel.on_close(move || {
            if let Some(inner) = weak.upgrade() {
                inner.mark_disconnected(&id);
            }
        });

        let _ = records.insert(
            channel.id().clone(),
            DisconnectRecord {
                has_disconnected: channel.is_closed(),
                pending: Vec::new(),
                _close_sub: close_sub,
            },
        );
        debug!(channel_id = %channel.id(), "channel registered for disconnect tracking");
    }

    /// Whether a registered channel has already disconnected.
    ///
    /// Returns [`ChannelError::NotRegistered`] for a channel that was never
    /// registered: a call site that skipped synchronous registration, not a
    /// runtime condition.
    pub fn has_disconnected(&self, channel: &Channel) -> Result<bool, ChannelError> {
        self.inner
            .records
            .lock()
            .get(channel.id())
            .map(|record| record.has_disconnected)
            .ok_or_else(|| ChannelError::NotRegistered(channel.id().clone()))
    }

    /// Run `listener` exactly once when the channel disconnects.
    ///
    /// Registers the channel if needed. If the channel has already
    /// disconnected, the listener fires on a fresh task, never inline in
    /// this call. Otherwise it is queued and fires on the underlying close,
    /// then is dropped.
    pub fn on_disconnect_retroactive(
        &self,
        channel: &Arc<Channel>,
        listener: impl FnOnce() + Send + 'static,
    ) {
        self.register(channel);

        let already_disconnected = {
            let mut records = self.inner.records.lock();
            match records.get_mut(channel.id()) {
                Some(record) if record.has_disconnected => true,
                Some(record) => {
                    record.pending.push(Box::new(listener));
                    return;
                }
                None => true,
            }
        };
        if already_disconnected {
            let _ = tokio::spawn(async move { listener() });
        }
    }
}

impl std::fmt::Debug for DisconnectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisconnectRegistry")
            .field("tracked", &self.inner.records.lock().len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
