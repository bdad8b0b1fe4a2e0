//! RPC client binding.
//!
//! Binds a request/response client onto a channel. Outbound requests carry a
//! correlation id; inbound messages route to the pending-request table by
//! that id, not by arrival order. When the channel closes (observed through
//! a retroactive disconnect listener, so a close racing the bind is not
//! missed) or the client is unbound, every pending request is rejected with
//! a recognizable transport error. A caller never awaits a response forever
//! after the channel is gone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;
use weld_channel::{Channel, DisconnectRegistry, Subscription};
use weld_core::WireError;

use crate::types::RpcResponse;

/// Transport-level failures: the call never produced a peer response.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The channel closed with the request pending.
    #[error("channel closed with the request pending")]
    ChannelClosed,
    /// The client was unbound with the request pending.
    #[error("client unbound with the request pending")]
    Unbound,
}

/// Failure of a single RPC call.
#[derive(Debug, Error)]
pub enum CallError {
    /// The transport dropped the call; never auto-retried here.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The peer answered with an error payload.
    ///
    /// [`WireError::code`] resolves the integer against the shared
    /// enumeration for branching; unrecognized codes resolve to
    /// [`weld_core::ErrorCode::Unknown`] with the raw integer preserved.
    #[error("{0}")]
    Remote(WireError),
}

type PendingTable = Mutex<HashMap<u64, oneshot::Sender<Result<Value, CallError>>>>;

struct ClientInner {
    channel: Arc<Channel>,
    pending: PendingTable,
    next_id: AtomicU64,
    unbound: AtomicBool,
    subs: Mutex<Vec<Subscription>>,
}

impl ClientInner {
    fn route(&self, message: &Value) {
        if self.unbound.load(Ordering::SeqCst) {
            return;
        }
        let response: RpcResponse = match serde_json::from_value(message.clone()) {
            Ok(response) => response,
            Err(error) => {
                debug!(%error, "ignoring non-response frame");
                return;
            }
        };
        // A request frame also carries an id; only a frame with a result or
        // an error is a response.
        if response.result.is_none() && response.error.is_none() {
            debug!(id = response.id, "ignoring frame with neither result nor error");
            return;
        }
        let Some(sender) = self.pending.lock().remove(&response.id) else {
            debug!(id = response.id, "response for unknown or settled request");
            return;
        };
        let result = match response.error {
            Some(error) => Err(CallError::Remote(error)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        let _ = sender.send(result);
    }

    fn fail_all(&self, error: &TransportError) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        for (_, sender) in drained {
            let _ = sender.send(Err(CallError::Transport(error.clone())));
        }
    }
}

/// Request/response client bound to one channel.
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl RpcClient {
    /// Bind a client onto `channel`.
    ///
    /// The registry provides the retroactive close notification that
    /// cancels pending requests even when the close happened before this
    /// call.
    #[must_use]
    pub fn bind(channel: Arc<Channel>, registry: &DisconnectRegistry) -> Self {
        let inner = Arc::new(ClientInner {
            channel: Arc::clone(&channel),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            unbound: AtomicBool::new(false),
            subs: Mutex::new(Vec::new()),
        });

        let weak: Weak<ClientInner> = Arc::downgrade(&inner);
        let message_sub = channel.on_message(move |message| {
            if let Some(inner) = weak.upgrade() {
                inner.route(message);
            }
        });
        inner.subs.lock().push(message_sub);

        let weak: Weak<ClientInner> = Arc::downgrade(&inner);
        registry.on_disconnect_retroactive(&channel, move || {
            if let Some(inner) = weak.upgrade() {
                debug!("channel closed, cancelling pending requests");
                inner.fail_all(&TransportError::ChannelClosed);
            }
        });

        Self { inner }
    }

    /// Issue a request and await its response.
    pub async fn call(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<Value, CallError> {
        if self.inner.unbound.load(Ordering::SeqCst) {
            return Err(TransportError::Unbound.into());
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = oneshot::channel();
        let _ = self.inner.pending.lock().insert(id, sender);

        let mut payload = serde_json::json!({ "id": id, "method": method.into() });
        if let Some(params) = params {
            payload["params"] = params;
        }
        if self.inner.channel.send(payload).is_err() {
            let _ = self.inner.pending.lock().remove(&id);
            return Err(TransportError::ChannelClosed.into());
        }

        match receiver.await {
            Ok(result) => result,
            Err(_) => Err(TransportError::ChannelClosed.into()),
        }
    }

    /// Send a fire-and-forget notification.
    pub fn notify(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> Result<(), TransportError> {
        if self.inner.unbound.load(Ordering::SeqCst) {
            return Err(TransportError::Unbound);
        }
        let mut payload = serde_json::json!({ "method": method.into() });
        if let Some(params) = params {
            payload["params"] = params;
        }
        self.inner
            .channel
            .send(payload)
            .map_err(|_| TransportError::ChannelClosed)
    }

    /// Unbind from the channel, rejecting all pending requests.
    ///
    /// Idempotent.
    pub fn unbind(&self) {
        if self.inner.unbound.swap(true, Ordering::SeqCst) {
            return;
        }
        for sub in self.inner.subs.lock().drain(..) {
            sub.unsubscribe();
        }
        self.inner.fail_all(&TransportError::Unbound);
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::time::Duration;
    use weld_core::ErrorCode;

    fn bound_client() -> (RpcClient, Arc<Channel>, DisconnectRegistry) {
        let (local, remote) = Channel::pair();
        let registry = DisconnectRegistry::new();
        let client = RpcClient::bind(local, &registry);
        (client, remote, registry)
    }

    /// Echo server on the remote end: answers every request with its params.
    fn echo_remote(remote: &Arc<Channel>) -> Subscription {
        let reply_on = Arc::clone(remote);
        remote.on_message(move |message| {
            let id = message["id"].as_u64().unwrap();
            let _ = reply_on.send(json!({ "id": id, "result": message["params"] }));
        })
    }

    #[tokio::test]
    async fn call_resolves_with_result() {
        let (client, remote, _registry) = bound_client();
        let _echo = echo_remote(&remote);

        let result = client
            .call("session.get", Some(json!({"x": 1})))
            .await
            .unwrap();
        assert_eq!(result["x"], 1);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn responses_route_by_id_not_order() {
        let (client, remote, _registry) = bound_client();

        // Answer the second request first.
        let reply_on = Arc::clone(&remote);
        let held = Arc::new(Mutex::new(Vec::<u64>::new()));
        let held_by_listener = Arc::clone(&held);
        let _sub = remote.on_message(move |message| {
            let id = message["id"].as_u64().unwrap();
            let mut held = held_by_listener.lock();
            held.push(id);
            if held.len() == 2 {
                for id in held.iter().rev() {
                    let _ = reply_on.send(json!({ "id": id, "result": {"answered": id} }));
                }
            }
        });

        let client = Arc::new(client);
        let first = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.call("a", None).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = client.call("b", None).await.unwrap();
        let first = first.await.unwrap().unwrap();

        let ids = held.lock().clone();
        assert_eq!(first["answered"], ids[0]);
        assert_eq!(second["answered"], ids[1]);
    }

    #[tokio::test]
    async fn remote_error_surfaces_typed_code() {
        let (client, remote, _registry) = bound_client();
        let reply_on = Arc::clone(&remote);
        let _sub = remote.on_message(move |message| {
            let id = message["id"].as_u64().unwrap();
            let _ = reply_on.send(json!({
                "id": id,
                "error": { "code": 11, "message": "account is signed out" },
            }));
        });

        let error = client.call("session.get", None).await.unwrap_err();
        assert_matches!(&error, CallError::Remote(wire) if wire.code() == ErrorCode::SignedOut);
    }

    #[tokio::test]
    async fn unrecognized_code_preserves_raw_value() {
        let (client, remote, _registry) = bound_client();
        let reply_on = Arc::clone(&remote);
        let _sub = remote.on_message(move |message| {
            let id = message["id"].as_u64().unwrap();
            let _ = reply_on.send(json!({
                "id": id,
                "error": { "code": 99, "message": "novel failure" },
            }));
        });

        let error = client.call("session.get", None).await.unwrap_err();
        assert_matches!(&error, CallError::Remote(wire) => {
            assert_eq!(wire.code(), ErrorCode::Unknown);
            assert_eq!(wire.code, 99);
        });
    }

    #[tokio::test]
    async fn close_rejects_pending_call() {
        let (client, remote, _registry) = bound_client();
        let client = Arc::new(client);

        let pending = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.call("session.get", None).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        remote.close();

        let result = pending.await.unwrap();
        assert_matches!(
            result,
            Err(CallError::Transport(TransportError::ChannelClosed))
        );
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn bind_after_close_rejects_first_call() {
        // The close happened before the client existed; the retroactive
        // listener must still cancel the pending request.
        let (local, remote) = Channel::pair();
        remote.close();
        let registry = DisconnectRegistry::new();
        let client = RpcClient::bind(local, &registry);

        let result = client.call("session.get", None).await;
        assert_matches!(
            result,
            Err(CallError::Transport(TransportError::ChannelClosed))
        );
    }

    #[tokio::test]
    async fn unbind_rejects_pending_and_future_calls() {
        let (client, _remote, _registry) = bound_client();
        let client = Arc::new(client);

        let pending = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.call("session.get", None).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        client.unbind();

        assert_matches!(
            pending.await.unwrap(),
            Err(CallError::Transport(TransportError::Unbound))
        );
        assert_matches!(
            client.call("session.get", None).await,
            Err(CallError::Transport(TransportError::Unbound))
        );
    }

    #[tokio::test]
    async fn unbind_is_idempotent() {
        let (client, _remote, _registry) = bound_client();
        client.unbind();
        client.unbind();
        assert_matches!(
            client.call("x", None).await,
            Err(CallError::Transport(TransportError::Unbound))
        );
    }

    #[tokio::test]
    async fn unbound_client_ignores_late_responses() {
        let (client, remote, _registry) = bound_client();
        client.unbind();
        // A response arriving after unbind must not panic or resurrect state.
        let _ = remote.send(json!({ "id": 1, "result": {} }));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn call_on_closed_channel_fails_fast() {
        let (client, remote, _registry) = bound_client();
        remote.close();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let result = client.call("session.get", None).await;
        assert_matches!(
            result,
            Err(CallError::Transport(TransportError::ChannelClosed))
        );
    }

    #[tokio::test]
    async fn notify_sends_without_pending_entry() {
        let (client, remote, _registry) = bound_client();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = remote.on_message(move |message| sink.lock().push(message.clone()));

        client.notify(crate::types::RESTARTED_METHOD, None).unwrap();
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["method"], "service.restarted");
        assert!(seen[0].get("id").is_none());
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn request_frames_do_not_settle_pending_calls() {
        // A peer that issues its own requests shares the channel; a request
        // frame carrying the same integer id must not be mistaken for the
        // response.
        let (client, remote, _registry) = bound_client();
        let client = Arc::new(client);

        let pending = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.call("session.get", None).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        remote.send(json!({ "id": 1, "method": "peer.call" })).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(client.pending_count(), 1, "call must still be pending");

        let _ = remote.send(json!({ "id": 1, "result": {"ok": true} }));
        let result = pending.await.unwrap().unwrap();
        assert_eq!(result["ok"], true);
    }

    #[tokio::test]
    async fn correlation_ids_are_unique_per_client() {
        let (client, remote, _registry) = bound_client();
        let ids = Arc::new(Mutex::new(Vec::<u64>::new()));
        let sink = Arc::clone(&ids);
        let reply_on = Arc::clone(&remote);
        let _sub = remote.on_message(move |message| {
            let id = message["id"].as_u64().unwrap();
            sink.lock().push(id);
            let _ = reply_on.send(json!({ "id": id, "result": null }));
        });

        for _ in 0..5 {
            let _ = client.call("ping", None).await.unwrap();
        }
        let ids = ids.lock();
        let mut deduped = ids.clone();
        deduped.dedup();
        assert_eq!(deduped.len(), 5);
    }
}
