//! Managed connections: lazy connect, automatic reconnect, terminal stop.
//!
//! A managed connection wraps a connector function. `connection()` returns
//! the current channel when one exists and invokes the connector otherwise;
//! a disconnect from either side drops back to the unconnected state so the
//! next `connection()` reconnects. `stop()` is terminal.
//!
//! [`AsyncManagedConnection`] covers connectors that are themselves
//! asynchronous. A disconnect issued while a connect is in flight is not
//! lost: the attempt is marked cancelled, the just-created channel is torn
//! down the moment the connect resolves, and every caller joined on the
//! attempt observes `ConnectionError::DisconnectedWhileConnecting`. This is
//! cancellation by discarding the result, not preemption.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;
use weld_core::ChannelId;

use crate::channel::{Channel, ListenerTable, Subscription};

/// Errors from managed-connection operations.
///
/// `Clone` because callers joined on one shared connect attempt all observe
/// the same failure.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// The connection was permanently stopped.
    #[error("connection is stopped")]
    Stopped,
    /// A disconnect raced the in-flight connect and won.
    #[error("disconnected while connecting")]
    DisconnectedWhileConnecting,
    /// The connector itself failed.
    #[error("connect failed: {0}")]
    Connect(String),
}

/// Synchronous connector function.
pub type Connector = Box<dyn Fn() -> Result<Arc<Channel>, ConnectionError> + Send + Sync>;

/// Asynchronous connector function.
pub type AsyncConnector =
    Box<dyn Fn() -> BoxFuture<'static, Result<Arc<Channel>, ConnectionError>> + Send + Sync>;

type DisconnectListener = Arc<dyn Fn(&Arc<Channel>) + Send + Sync>;
type StopListener = Arc<dyn Fn() + Send + Sync>;

/// A connection source that can be wrapped by
/// [`MappedConnection`](crate::mapped::MappedConnection).
#[async_trait]
pub trait Connect: Send + Sync {
    /// Return the current channel, connecting if necessary.
    async fn connection(&self) -> Result<Arc<Channel>, ConnectionError>;

    /// Tear down `expected` if it is still the current channel; no-op for a
    /// superseded channel.
    fn disconnect_channel(&self, expected: &Arc<Channel>);

    /// Subscribe to disconnect notifications.
    fn on_disconnected(&self, listener: DisconnectListener) -> Subscription;
}

/// A connected channel plus the close hook keeping state in sync.
struct Current {
    channel: Arc<Channel>,
    _close_sub: Subscription,
}

// ─────────────────────────────────────────────────────────────────────────────
// ManagedConnection — synchronous connector
// ─────────────────────────────────────────────────────────────────────────────

struct SyncState {
    current: Option<Current>,
    stopped: bool,
}

struct SyncInner {
    connector: Connector,
    state: Mutex<SyncState>,
    disconnected: ListenerTable<DisconnectListener>,
    stop_listeners: ListenerTable<StopListener>,
}

/// Managed connection over a synchronous connector.
pub struct ManagedConnection {
    inner: Arc<SyncInner>,
}

impl ManagedConnection {
    /// Create a managed connection. No connect happens until
    /// [`ManagedConnection::connection`] is called.
    #[must_use]
    pub fn new(connector: Connector) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                connector,
                state: Mutex::new(SyncState {
                    current: None,
                    stopped: false,
                }),
                disconnected: ListenerTable::new(),
                stop_listeners: ListenerTable::new(),
            }),
        }
    }

    /// Return the current channel, invoking the connector if unconnected.
    ///
    /// Reference-stable: repeated calls without an intervening disconnect
    /// return the identical channel and invoke the connector exactly once.
    pub fn connection(&self) -> Result<Arc<Channel>, ConnectionError> {
        let mut state = self.inner.state.lock();
        if state.stopped {
            return Err(ConnectionError::Stopped);
        }
        if let Some(current) = &state.current {
            return Ok(Arc::clone(&current.channel));
        }

        let channel = (self.inner.connector)()?;
        let close_sub = wire_close(&self.inner, &channel, |inner, id| {
            disconnect_sync(inner, Some(id));
        });
        state.current = Some(Current {
            channel: Arc::clone(&channel),
            _close_sub: close_sub,
        });
        debug!(channel_id = %channel.id(), "connected");
        Ok(channel)
    }

    /// Disconnect the current channel, if any.
    pub fn disconnect(&self) {
        disconnect_sync(&self.inner, None);
    }

    /// Disconnect `expected` if it is still current; no-op otherwise.
    pub fn disconnect_channel(&self, expected: &Arc<Channel>) {
        disconnect_sync(&self.inner, Some(expected.id()));
    }

    /// Permanently stop the connection.
    ///
    /// Disconnects any current channel; every later
    /// [`ManagedConnection::connection`] fails with
    /// [`ConnectionError::Stopped`] without invoking the connector.
    pub fn stop(&self) {
        let (taken, was_stopped) = {
            let mut state = self.inner.state.lock();
            let was_stopped = std::mem::replace(&mut state.stopped, true);
            (state.current.take(), was_stopped)
        };
        if let Some(current) = taken {
            current.channel.close();
            emit_disconnected(&self.inner.disconnected, &current.channel);
        }
        if !was_stopped {
            for listener in self.inner.stop_listeners.snapshot() {
                listener();
            }
        }
    }

    /// Subscribe to disconnect notifications.
    pub fn on_disconnected(
        &self,
        listener: impl Fn(&Arc<Channel>) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.disconnected.subscribe(Arc::new(listener))
    }

    /// Subscribe to the terminal stop notification.
    pub fn on_stopped(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.inner.stop_listeners.subscribe(Arc::new(listener))
    }
}

fn disconnect_sync(inner: &Arc<SyncInner>, expected: Option<&ChannelId>) {
    let taken = {
        let mut state = inner.state.lock();
        match (&state.current, expected) {
            (Some(current), Some(id)) if current.channel.id() != id => None,
            (Some(_), _) => state.current.take(),
            (None, _) => None,
        }
    };
    if let Some(current) = taken {
        current.channel.close();
        emit_disconnected(&inner.disconnected, &current.channel);
    }
}

/// Wire a channel's close event to the owning connection's disconnect path.
fn wire_close<I: Send + Sync + 'static>(
    inner: &Arc<I>,
    channel: &Arc<Channel>,
    on_close: impl Fn(&Arc<I>, &ChannelId) + Send + Sync + 'static,
) -> Subscription {
    let weak = Arc::downgrade(inner);
    let id = channel.id().clone();
    channel.on_close(move || {
        if let Some(inner) = weak.upgrade() {
            on_close(&inner, &id);
        }
    })
}

fn emit_disconnected(table: &ListenerTable<DisconnectListener>, channel: &Arc<Channel>) {
    for listener in table.snapshot() {
        listener(channel);
    }
}

#[async_trait]
impl Connect for ManagedConnection {
    async fn connection(&self) -> Result<Arc<Channel>, ConnectionError> {
        ManagedConnection::connection(self)
    }

    fn disconnect_channel(&self, expected: &Arc<Channel>) {
        ManagedConnection::disconnect_channel(self, expected);
    }

    fn on_disconnected(&self, listener: DisconnectListener) -> Subscription {
        self.inner.disconnected.subscribe(listener)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AsyncManagedConnection — asynchronous connector
// ─────────────────────────────────────────────────────────────────────────────

type ConnectFuture = Shared<BoxFuture<'static, Result<Arc<Channel>, ConnectionError>>>;

/// One in-flight connect attempt. The cancelled flag doubles as the
/// attempt's identity: cleanup only touches the slot it still owns.
struct InFlight {
    future: ConnectFuture,
    cancelled: Arc<AtomicBool>,
}

struct AsyncState {
    current: Option<Current>,
    in_flight: Option<InFlight>,
    stopped: bool,
}

struct AsyncInner {
    connector: AsyncConnector,
    state: Mutex<AsyncState>,
    disconnected: ListenerTable<DisconnectListener>,
    stop_listeners: ListenerTable<StopListener>,
}

/// Managed connection over an asynchronous connector.
pub struct AsyncManagedConnection {
    inner: Arc<AsyncInner>,
}

impl AsyncManagedConnection {
    /// Create a managed connection. No connect happens until
    /// [`AsyncManagedConnection::connection`] is called.
    #[must_use]
    pub fn new(connector: AsyncConnector) -> Self {
        Self {
            inner: Arc::new(AsyncInner {
                connector,
                state: Mutex::new(AsyncState {
                    current: None,
                    in_flight: None,
                    stopped: false,
                }),
                disconnected: ListenerTable::new(),
                stop_listeners: ListenerTable::new(),
            }),
        }
    }

    /// Return the current channel, connecting if necessary.
    ///
    /// Callers arriving while a connect is in flight join the same attempt;
    /// the connector is invoked once per attempt.
    pub async fn connection(&self) -> Result<Arc<Channel>, ConnectionError> {
        let future = {
            let mut state = self.inner.state.lock();
            if state.stopped {
                return Err(ConnectionError::Stopped);
            }
            if let Some(current) = &state.current {
                return Ok(Arc::clone(&current.channel));
            }
            if let Some(in_flight) = &state.in_flight {
                in_flight.future.clone()
            } else {
                let (future, cancelled) = start_attempt(&self.inner);
                state.in_flight = Some(InFlight {
                    future: future.clone(),
                    cancelled,
                });
                future
            }
        };
        future.await
    }

    /// Disconnect the current channel and cancel any in-flight connect.
    pub fn disconnect(&self) {
        let taken = {
            let mut state = self.inner.state.lock();
            if let Some(in_flight) = state.in_flight.take() {
                in_flight.cancelled.store(true, Ordering::SeqCst);
            }
            state.current.take()
        };
        if let Some(current) = taken {
            current.channel.close();
            emit_disconnected(&self.inner.disconnected, &current.channel);
        }
    }

    /// Disconnect `expected` if it is still current; no-op otherwise.
    ///
    /// Does not cancel an in-flight connect: a stale callback naming a
    /// superseded channel must not interfere with a new attempt.
    pub fn disconnect_channel(&self, expected: &Arc<Channel>) {
        disconnect_async(&self.inner, Some(expected.id()));
    }

    /// Permanently stop the connection.
    pub fn stop(&self) {
        let (taken, was_stopped) = {
            let mut state = self.inner.state.lock();
            if let Some(in_flight) = state.in_flight.take() {
                in_flight.cancelled.store(true, Ordering::SeqCst);
            }
            let was_stopped = std::mem::replace(&mut state.stopped, true);
            (state.current.take(), was_stopped)
        };
        if let Some(current) = taken {
            current.channel.close();
            emit_disconnected(&self.inner.disconnected, &current.channel);
        }
        if !was_stopped {
            for listener in self.inner.stop_listeners.snapshot() {
                listener();
            }
        }
    }

    /// Subscribe to disconnect notifications.
    pub fn on_disconnected(
        &self,
        listener: impl Fn(&Arc<Channel>) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.disconnected.subscribe(Arc::new(listener))
    }

    /// Subscribe to the terminal stop notification.
    pub fn on_stopped(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.inner.stop_listeners.subscribe(Arc::new(listener))
    }
}

fn disconnect_async(inner: &Arc<AsyncInner>, expected: Option<&ChannelId>) {
    let taken = {
        let mut state = inner.state.lock();
        match (&state.current, expected) {
            (Some(current), Some(id)) if current.channel.id() != id => None,
            (Some(_), _) => state.current.take(),
            (None, _) => None,
        }
    };
    if let Some(current) = taken {
        current.channel.close();
        emit_disconnected(&inner.disconnected, &current.channel);
    }
}

/// Build one connect attempt as a shared future.
///
/// The attempt holds only a weak reference to the connection, so dropping
/// the connection mid-attempt cannot leak it.
fn start_attempt(inner: &Arc<AsyncInner>) -> (ConnectFuture, Arc<AtomicBool>) {
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancelled);
    let weak = Arc::downgrade(inner);

    let future = async move {
        let connect = {
            let Some(inner) = weak.upgrade() else {
                return Err(ConnectionError::Stopped);
            };
            (inner.connector)()
        };
        let result = connect.await;

        let Some(inner) = weak.upgrade() else {
            if let Ok(channel) = &result {
                channel.close();
            }
            return Err(ConnectionError::DisconnectedWhileConnecting);
        };

        let mut state = inner.state.lock();
        // Release the in-flight slot only if this attempt still owns it.
        if state
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| Arc::ptr_eq(&in_flight.cancelled, &flag))
        {
            state.in_flight = None;
        }

        let channel = match result {
            Ok(channel) => channel,
            Err(error) => {
                drop(state);
                return Err(error);
            }
        };

        if flag.load(Ordering::SeqCst) || state.stopped {
            drop(state);
            channel.close();
            debug!(channel_id = %channel.id(), "connect resolved after disconnect, tearing down");
            return Err(ConnectionError::DisconnectedWhileConnecting);
        }

        let close_sub = wire_close(&inner, &channel, |inner, id| {
            disconnect_async(inner, Some(id));
        });
        state.current = Some(Current {
            channel: Arc::clone(&channel),
            _close_sub: close_sub,
        });
        drop(state);
        debug!(channel_id = %channel.id(), "connected");
        Ok(channel)
    }
    .boxed()
    .shared();

    (future, cancelled)
}

#[async_trait]
impl Connect for AsyncManagedConnection {
    async fn connection(&self) -> Result<Arc<Channel>, ConnectionError> {
        AsyncManagedConnection::connection(self).await
    }

    fn disconnect_channel(&self, expected: &Arc<Channel>) {
        AsyncManagedConnection::disconnect_channel(self, expected);
    }

    fn on_disconnected(&self, listener: DisconnectListener) -> Subscription {
        self.inner.disconnected.subscribe(listener)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
