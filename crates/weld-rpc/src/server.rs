//! RPC server binding.
//!
//! Binds a method dispatcher onto a channel. Every inbound message that
//! parses as a request goes to the dispatcher; a `Some(response)` is sent
//! back on the same channel, `None` means the request was a notification.
//! Unparseable frames are logged and ignored. Unbinding is idempotent and
//! happens automatically when the channel closes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};
use weld_channel::{Channel, DisconnectRegistry, Subscription};

use crate::types::{RpcRequest, RpcResponse};

/// Handles inbound requests for a bound server.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Produce a response for `request`, or `None` for notifications.
    async fn dispatch(&self, request: RpcRequest) -> Option<RpcResponse>;
}

/// [`Dispatcher`] backed by a plain async function.
pub struct FnDispatcher<F>(F);

impl<F> FnDispatcher<F> {
    /// Wrap an async function as a dispatcher.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> Dispatcher for FnDispatcher<F>
where
    F: Fn(RpcRequest) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Option<RpcResponse>> + Send,
{
    async fn dispatch(&self, request: RpcRequest) -> Option<RpcResponse> {
        (self.0)(request).await
    }
}

struct ServerInner {
    unbound: AtomicBool,
    subs: Mutex<Vec<Subscription>>,
}

/// Method-dispatch server bound to one channel.
pub struct RpcServer {
    inner: Arc<ServerInner>,
}

impl RpcServer {
    /// Bind `dispatcher` onto `channel`.
    ///
    /// Dispatch runs on its own task per message, so slow handlers do not
    /// block the channel; responses are correlated by id, not order.
    #[must_use]
    pub fn bind(
        channel: &Arc<Channel>,
        dispatcher: Arc<dyn Dispatcher>,
        registry: &DisconnectRegistry,
    ) -> Self {
        let inner = Arc::new(ServerInner {
            unbound: AtomicBool::new(false),
            subs: Mutex::new(Vec::new()),
        });

        let weak_channel: Weak<Channel> = Arc::downgrade(channel);
        let message_sub = channel.on_message(move |message| {
            let request: RpcRequest = match serde_json::from_value(message.clone()) {
                Ok(request) => request,
                Err(error) => {
                    debug!(%error, "ignoring non-request frame");
                    return;
                }
            };
            let dispatcher = Arc::clone(&dispatcher);
            let weak_channel = weak_channel.clone();
            let _ = tokio::spawn(async move {
                let Some(response) = dispatcher.dispatch(request).await else {
                    return;
                };
                let Some(channel) = weak_channel.upgrade() else {
                    return;
                };
                match serde_json::to_value(&response) {
                    Ok(payload) => {
                        if channel.send(payload).is_err() {
                            debug!(id = response.id, "channel closed before response was sent");
                        }
                    }
                    Err(error) => warn!(%error, "failed to serialize response"),
                }
            });
        });
        inner.subs.lock().push(message_sub);

        let weak: Weak<ServerInner> = Arc::downgrade(&inner);
        registry.on_disconnect_retroactive(channel, move || {
            if let Some(inner) = weak.upgrade() {
                Self::unbind_inner(&inner);
            }
        });

        Self { inner }
    }

    /// Unbind from the channel. Idempotent.
    pub fn unbind(&self) {
        Self::unbind_inner(&self.inner);
    }

    fn unbind_inner(inner: &Arc<ServerInner>) {
        if inner.unbound.swap(true, Ordering::SeqCst) {
            return;
        }
        for sub in inner.subs.lock().drain(..) {
            sub.unsubscribe();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use weld_core::WireError;

    fn echo_dispatcher() -> Arc<dyn Dispatcher> {
        Arc::new(FnDispatcher::new(|request: RpcRequest| async move {
            let id = request.id?;
            Some(RpcResponse::success(
                id,
                json!({ "method": request.method, "params": request.params }),
            ))
        }))
    }

    async fn next_message(seen: &Arc<Mutex<Vec<Value>>>) -> Value {
        for _ in 0..100 {
            if let Some(message) = seen.lock().first().cloned() {
                return message;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("no message arrived");
    }

    #[tokio::test]
    async fn request_is_dispatched_and_answered() {
        let (server_end, client_end) = Channel::pair();
        let registry = DisconnectRegistry::new();
        let _server = RpcServer::bind(&server_end, echo_dispatcher(), &registry);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = client_end.on_message(move |message| sink.lock().push(message.clone()));

        client_end
            .send(json!({ "id": 1, "method": "session.get" }))
            .unwrap();

        let response = next_message(&seen).await;
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["method"], "session.get");
    }

    #[tokio::test]
    async fn notification_gets_no_response() {
        let (server_end, client_end) = Channel::pair();
        let registry = DisconnectRegistry::new();
        let _server = RpcServer::bind(&server_end, echo_dispatcher(), &registry);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = client_end.on_message(move |message| sink.lock().push(message.clone()));

        client_end
            .send(json!({ "method": "service.restarted" }))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn unparseable_frame_is_ignored() {
        let (server_end, client_end) = Channel::pair();
        let registry = DisconnectRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let dispatcher = Arc::new(FnDispatcher::new(move |_request: RpcRequest| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
            async { None }
        }));
        let _server = RpcServer::bind(&server_end, dispatcher, &registry);

        client_end.send(json!("not a request")).unwrap();
        client_end.send(json!({ "no": "method" })).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn error_responses_flow_back() {
        let (server_end, client_end) = Channel::pair();
        let registry = DisconnectRegistry::new();
        let dispatcher = Arc::new(FnDispatcher::new(|request: RpcRequest| async move {
            Some(RpcResponse::error(
                request.id?,
                WireError::method_not_found(&request.method),
            ))
        }));
        let _server = RpcServer::bind(&server_end, dispatcher, &registry);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = client_end.on_message(move |message| sink.lock().push(message.clone()));

        client_end
            .send(json!({ "id": 4, "method": "no.such" }))
            .unwrap();

        let response = next_message(&seen).await;
        assert_eq!(response["error"]["code"], 2);
        assert!(
            response["error"]["message"]
                .as_str()
                .unwrap()
                .contains("no.such")
        );
    }

    #[tokio::test]
    async fn unbind_stops_dispatch() {
        let (server_end, client_end) = Channel::pair();
        let registry = DisconnectRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let dispatcher = Arc::new(FnDispatcher::new(move |_request: RpcRequest| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
            async { None }
        }));
        let server = RpcServer::bind(&server_end, dispatcher, &registry);

        client_end.send(json!({ "id": 1, "method": "a" })).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        server.unbind();
        server.unbind();
        client_end.send(json!({ "id": 2, "method": "b" })).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn channel_close_unbinds() {
        let (server_end, client_end) = Channel::pair();
        let registry = DisconnectRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let dispatcher = Arc::new(FnDispatcher::new(move |_request: RpcRequest| {
            let _ = counter.fetch_add(1, Ordering::SeqCst);
            async { None }
        }));
        let _server = RpcServer::bind(&server_end, dispatcher, &registry);

        client_end.close();
        tokio::time::sleep(Duration::from_millis(10)).await;
        // Channel is closed; nothing can be dispatched any more.
        assert!(server_end.send(json!({"id": 1, "method": "a"})).is_err());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn slow_handler_does_not_block_later_requests() {
        let (server_end, client_end) = Channel::pair();
        let registry = DisconnectRegistry::new();
        let dispatcher = Arc::new(FnDispatcher::new(|request: RpcRequest| async move {
            let id = request.id?;
            if request.method == "slow" {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Some(RpcResponse::success(id, json!(request.method)))
        }));
        let _server = RpcServer::bind(&server_end, dispatcher, &registry);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = client_end.on_message(move |message| sink.lock().push(message.clone()));

        client_end.send(json!({ "id": 1, "method": "slow" })).unwrap();
        client_end.send(json!({ "id": 2, "method": "fast" })).unwrap();

        let first = next_message(&seen).await;
        assert_eq!(first["id"], 2, "fast response must not wait for the slow one");
    }
}
