//! Derived connections of a different value type.
//!
//! [`MappedConnection`] wraps any [`Connect`] source and applies a mapping
//! function once per underlying channel instance. The association between a
//! channel and its mapped value is an explicit identity-keyed table owned by
//! the wrapper — entries are removed when the underlying channel
//! disconnects, so correctness never depends on garbage collection.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::channel::{Channel, Subscription};
use crate::connection::{Connect, ConnectionError};

type MapFn<T> = Box<dyn Fn(&Arc<Channel>) -> T + Send + Sync>;

struct MapEntry<T> {
    channel: Arc<Channel>,
    mapped: Arc<T>,
}

/// A connection whose value is derived from the underlying channel.
pub struct MappedConnection<C: Connect, T: Send + Sync + 'static> {
    inner: Arc<C>,
    map_fn: MapFn<T>,
    entries: Arc<Mutex<Vec<MapEntry<T>>>>,
    _prune_sub: Subscription,
}

impl<C: Connect, T: Send + Sync + 'static> MappedConnection<C, T> {
    /// Wrap `inner`, deriving values with `map_fn`.
    #[must_use]
    pub fn new(inner: Arc<C>, map_fn: impl Fn(&Arc<Channel>) -> T + Send + Sync + 'static) -> Self {
        let entries: Arc<Mutex<Vec<MapEntry<T>>>> = Arc::new(Mutex::new(Vec::new()));
        let prune_sub = {
            let entries = Arc::clone(&entries);
            inner.on_disconnected(Arc::new(move |channel: &Arc<Channel>| {
                entries
                    .lock()
                    .retain(|entry| entry.channel.id() != channel.id());
            }))
        };
        Self {
            inner,
            map_fn: Box::new(map_fn),
            entries,
            _prune_sub: prune_sub,
        }
    }

    /// Return the mapped value for the current channel, connecting if
    /// necessary.
    ///
    /// The mapping function runs once per underlying channel; repeated calls
    /// while the same channel is current return the identical value.
    pub async fn connection(&self) -> Result<Arc<T>, ConnectionError> {
        let channel = self.inner.connection().await?;
        let mut entries = self.entries.lock();
        if let Some(entry) = entries
            .iter()
            .find(|entry| entry.channel.id() == channel.id())
        {
            return Ok(Arc::clone(&entry.mapped));
        }
        let mapped = Arc::new((self.map_fn)(&channel));
        entries.push(MapEntry {
            channel,
            mapped: Arc::clone(&mapped),
        });
        Ok(mapped)
    }

    /// Disconnect the underlying channel a mapped value belongs to.
    ///
    /// Resolves the value back to its channel by identity; unknown values
    /// (already disconnected, or from another wrapper) are a no-op.
    pub fn disconnect(&self, mapped: &Arc<T>) {
        let target = self
            .entries
            .lock()
            .iter()
            .find(|entry| Arc::ptr_eq(&entry.mapped, mapped))
            .map(|entry| Arc::clone(&entry.channel));
        if let Some(channel) = target {
            self.inner.disconnect_channel(&channel);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connector, ManagedConnection};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Wrapped {
        channel: Arc<Channel>,
    }

    fn connector() -> Connector {
        Box::new(|| {
            let (local, _remote) = Channel::pair();
            Ok(local)
        })
    }

    fn mapped_connection(
        map_count: Arc<AtomicUsize>,
    ) -> MappedConnection<ManagedConnection, Wrapped> {
        let inner = Arc::new(ManagedConnection::new(connector()));
        MappedConnection::new(inner, move |channel| {
            let _ = map_count.fetch_add(1, Ordering::SeqCst);
            Wrapped {
                channel: Arc::clone(channel),
            }
        })
    }

    #[tokio::test]
    async fn map_fn_runs_once_per_channel() {
        let count = Arc::new(AtomicUsize::new(0));
        let mapped = mapped_connection(Arc::clone(&count));

        let first = mapped.connection().await.unwrap();
        let second = mapped.connection().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disconnect_resolves_to_underlying_channel() {
        let count = Arc::new(AtomicUsize::new(0));
        let mapped = mapped_connection(Arc::clone(&count));

        let value = mapped.connection().await.unwrap();
        let channel = Arc::clone(&value.channel);
        mapped.disconnect(&value);
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn new_channel_gets_new_mapped_value() {
        let count = Arc::new(AtomicUsize::new(0));
        let mapped = mapped_connection(Arc::clone(&count));

        let first = mapped.connection().await.unwrap();
        mapped.disconnect(&first);

        let second = mapped.connection().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn entries_pruned_on_disconnect() {
        let count = Arc::new(AtomicUsize::new(0));
        let mapped = mapped_connection(Arc::clone(&count));

        let value = mapped.connection().await.unwrap();
        mapped.disconnect(&value);
        assert!(mapped.entries.lock().is_empty(), "table must not grow");

        // Disconnecting a value that is no longer tracked is a no-op.
        mapped.disconnect(&value);
    }

    #[tokio::test]
    async fn stale_value_disconnect_does_not_touch_new_channel() {
        let count = Arc::new(AtomicUsize::new(0));
        let mapped = mapped_connection(Arc::clone(&count));

        let first = mapped.connection().await.unwrap();
        mapped.disconnect(&first);
        let second = mapped.connection().await.unwrap();

        mapped.disconnect(&first);
        assert!(!second.channel.is_closed());
    }
}
