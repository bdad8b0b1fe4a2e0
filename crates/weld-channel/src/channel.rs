//! In-process message channel with per-side close semantics.
//!
//! [`Channel::pair`] creates two linked ends. Messages sent on one end are
//! delivered, in order, to the listeners of the other. Closing either end
//! stops all traffic, but close notifications are one-direction-aware:
//! `close()` fires the *peer's* close listeners, never the local end's,
//! matching how host message ports behave.

use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use weld_core::ChannelId;

/// Errors from channel operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel (either end) has been closed.
    #[error("channel is closed")]
    Closed,
    /// The channel was never registered with the disconnect registry.
    ///
    /// This is a caller bug (registration must happen synchronously when
    /// the channel is obtained) and is never recoverable at runtime.
    #[error("channel {0} is not registered for disconnect tracking")]
    NotRegistered(ChannelId),
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscriptions & listener tables
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to a registered listener.
///
/// Unsubscribes on [`Subscription::unsubscribe`] or on drop; both are
/// idempotent.
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Remove the listener. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.lock().is_some())
            .finish()
    }
}

/// Id-keyed listener table shared between the table and its subscriptions.
pub(crate) struct ListenerTable<T> {
    entries: Arc<Mutex<Vec<(u64, T)>>>,
    next_id: AtomicU64,
}

impl<T: Clone> ListenerTable<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub(crate) fn subscribe(&self, listener: T) -> Subscription
    where
        T: Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((id, listener));
        let entries = Arc::clone(&self.entries);
        Subscription::new(move || {
            entries.lock().retain(|(entry_id, _)| *entry_id != id);
        })
    }

    /// Clone the current listeners so they can be invoked without the lock.
    pub(crate) fn snapshot(&self) -> Vec<T> {
        self.entries
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    /// Remove and return all listeners.
    pub(crate) fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *self.entries.lock())
            .into_iter()
            .map(|(_, listener)| listener)
            .collect()
    }
}

type MessageListener = Arc<dyn Fn(&Value) + Send + Sync>;
type CloseListener = Arc<dyn Fn() + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Channel
// ─────────────────────────────────────────────────────────────────────────────

/// One end of a bidirectional, order-preserving message pipe.
pub struct Channel {
    id: ChannelId,
    /// Shared by both ends; once set, no send succeeds on either.
    closed: Arc<AtomicBool>,
    peer: Mutex<Weak<Channel>>,
    messages: ListenerTable<MessageListener>,
    closers: ListenerTable<CloseListener>,
    /// Whether this end's close listeners have already been fired.
    close_fired: AtomicBool,
}

impl Channel {
    fn new(closed: Arc<AtomicBool>) -> Self {
        Self {
            id: ChannelId::new(),
            closed,
            peer: Mutex::new(Weak::new()),
            messages: ListenerTable::new(),
            closers: ListenerTable::new(),
            close_fired: AtomicBool::new(false),
        }
    }

    /// Create a linked pair of channel ends.
    #[must_use]
    pub fn pair() -> (Arc<Channel>, Arc<Channel>) {
        let closed = Arc::new(AtomicBool::new(false));
        let a = Arc::new(Channel::new(Arc::clone(&closed)));
        let b = Arc::new(Channel::new(closed));
        *a.peer.lock() = Arc::downgrade(&b);
        *b.peer.lock() = Arc::downgrade(&a);
        (a, b)
    }

    /// This end's unique identifier.
    #[must_use]
    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    /// Whether either end has closed the channel.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a message to the peer's listeners.
    ///
    /// Delivery is synchronous and in order. Fails once either end has
    /// closed, or when the peer end no longer exists.
    pub fn send(&self, message: Value) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        let Some(peer) = self.peer.lock().upgrade() else {
            return Err(ChannelError::Closed);
        };
        for listener in peer.messages.snapshot() {
            listener(&message);
        }
        Ok(())
    }

    /// Subscribe to messages arriving on this end.
    pub fn on_message(&self, listener: impl Fn(&Value) + Send + Sync + 'static) -> Subscription {
        self.messages.subscribe(Arc::new(listener))
    }

    /// Subscribe to the peer closing the channel.
    ///
    /// Fires at most once. A listener attached after the close has already
    /// been delivered never fires; use the disconnect registry when the
    /// attach may race the close.
    pub fn on_close(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.closers.subscribe(Arc::new(listener))
    }

    /// Close the channel.
    ///
    /// Idempotent. Fires the peer's close listeners exactly once; the local
    /// end's close listeners do not fire.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(peer) = self.peer.lock().upgrade() {
            peer.fire_close();
        }
    }

    /// Invoke this end's close listeners, once.
    fn fire_close(&self) {
        if self.close_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        for listener in self.closers.drain() {
            listener();
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
