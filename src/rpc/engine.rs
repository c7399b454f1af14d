// SPDX-License-Identifier: MIT
//! Bi-directional JSON-RPC 2.0 engine.
//!
//! One engine sits on each transport. It plays both roles at once:
//!
//! - **Client**: [`RpcEngine::call`] assigns a fresh monotonic id, parks the
//!   caller on a oneshot reply slot, and completes it exactly once when the
//!   matching response arrives. If the transport drops first, every pending
//!   slot fails with [`TransportError::Disconnected`] and is released.
//! - **Server**: inbound requests are routed to the handler registered under
//!   the exact method name; each request runs as its own task so concurrent
//!   in-flight calls can suspend independently (on approvals, wallet
//!   round-trips). Notifications go to listeners and never get a reply.
//!
//! Unknown response ids are logged and dropped.

use crate::error::RouterError;
use crate::rpc::{
    self, Incoming, RpcErrorObject, RpcRequest, RpcResponse,
};
use crate::transport::{Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// Failure of an outbound call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    /// The peer answered with a JSON-RPC error object.
    #[error("{0}")]
    Rpc(RpcErrorObject),
    /// The call never completed: transport down, send failed, or timed out.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Per-request context handed to method handlers.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    /// The JSON-RPC id of the inbound request (number or string).
    pub id: Value,
    /// Origin of the peer connection, when the transport knows it
    /// (WebSocket handshake `Origin` header).
    pub origin: Option<String>,
}

impl RequestMeta {
    /// The request id as a plain string (`7` → `"7"`, `"r1"` → `"r1"`),
    /// the form approval contexts are keyed by.
    pub fn id_key(&self) -> String {
        match &self.id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

fn id_key(id: &Value) -> String {
    serde_json::to_string(id).unwrap_or_default()
}

/// An inbound-request handler registered under an exact method name.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(
        &self,
        method: &str,
        params: Value,
        meta: RequestMeta,
    ) -> Result<Value, RouterError>;
}

/// Listener for inbound notifications (exact event name match).
pub type NotificationListener = Arc<dyn Fn(Value) + Send + Sync>;

/// Catch-all listener receiving `(event, params)` for every notification
/// that has no exact-name listener. The proxy registry uses this to forward
/// chain-specific events opaquely.
pub type FallbackListener = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// Identity of the peer on the far side of the transport.
#[derive(Debug, Clone, Default)]
pub struct PeerInfo {
    pub origin: Option<String>,
}

type PendingMap = Mutex<HashMap<String, oneshot::Sender<Result<Value, CallError>>>>;

pub struct RpcEngine {
    transport: Arc<dyn Transport>,
    peer: PeerInfo,
    next_id: AtomicI64,
    pending: PendingMap,
    methods: Mutex<HashMap<String, Arc<dyn MethodHandler>>>,
    listeners: Mutex<HashMap<String, Vec<NotificationListener>>>,
    fallback: Mutex<Option<FallbackListener>>,
    reader: Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Per-frame debug logging. No control-flow effect when off.
    debug: bool,
}

impl RpcEngine {
    pub fn new(transport: Arc<dyn Transport>, peer: PeerInfo, debug: bool) -> Self {
        Self {
            transport,
            peer,
            next_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
            methods: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            fallback: Mutex::new(None),
            reader: Mutex::new(None),
            debug,
        }
    }

    /// Register a handler under an exact method name. Replaces any previous
    /// handler for that name.
    pub fn register_method(&self, name: impl Into<String>, handler: Arc<dyn MethodHandler>) {
        self.methods
            .lock()
            .expect("methods lock poisoned")
            .insert(name.into(), handler);
    }

    /// Register a listener for an exact notification name.
    pub fn on_notification(&self, event: impl Into<String>, listener: NotificationListener) {
        self.listeners
            .lock()
            .expect("listeners lock poisoned")
            .entry(event.into())
            .or_default()
            .push(listener);
    }

    /// Install the catch-all notification listener.
    pub fn set_fallback_listener(&self, listener: FallbackListener) {
        *self.fallback.lock().expect("fallback lock poisoned") = Some(listener);
    }

    /// Start the reader task. Call once, after registering handlers.
    pub fn start(self: Arc<Self>) {
        let mut rx = match self.transport.take_incoming() {
            Some(rx) => rx,
            None => {
                warn!("engine started twice — inbound receiver already taken");
                return;
            }
        };
        let engine = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    TransportEvent::Connected => {
                        trace!("transport connected");
                    }
                    TransportEvent::Frame(text) => {
                        engine.handle_frame(text).await;
                    }
                    TransportEvent::Disconnected => {
                        engine.fail_pending();
                    }
                }
            }
            // Receiver closed: the transport is gone for good.
            engine.fail_pending();
        });
        *self.reader.lock().expect("reader lock poisoned") = Some(handle);
    }

    /// Stop the reader and fail anything still in flight.
    pub fn shutdown(&self) {
        if let Some(handle) = self.reader.lock().expect("reader lock poisoned").take() {
            handle.abort();
        }
        self.fail_pending();
    }

    /// Issue a request and await the correlated reply.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, CallError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id_value = json!(id);
        let key = id_key(&id_value);

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .insert(key.clone(), tx);

        let request = RpcRequest::new(id_value, method, params);
        let frame = serde_json::to_string(&request)
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        if self.debug {
            debug!(method, id, "rpc → request");
        }

        if let Err(e) = self.transport.send(frame).await {
            self.pending
                .lock()
                .expect("pending lock poisoned")
                .remove(&key);
            return Err(CallError::Transport(e));
        }

        match rx.await {
            Ok(outcome) => outcome,
            // Slot dropped without completion: disconnect raced us.
            Err(_) => Err(CallError::Transport(TransportError::Disconnected)),
        }
    }

    /// Send a notification. Never answered.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        let frame = serde_json::to_string(&RpcRequest::notification(method, params))
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        if self.debug {
            debug!(method, "rpc → notification");
        }
        self.transport.send(frame).await
    }

    /// Send a raw pre-serialized frame (broadcast fan-out path).
    pub async fn send_raw(&self, frame: String) -> Result<(), TransportError> {
        self.transport.send(frame).await
    }

    async fn handle_frame(&self, text: String) {
        if self.debug {
            debug!(len = text.len(), "rpc ← frame");
        }
        match rpc::parse_incoming(&text) {
            Ok(Incoming::Request(req)) => self.dispatch_request(req),
            Ok(Incoming::Notification(req)) => self.dispatch_notification(req),
            Ok(Incoming::Response(resp)) => self.complete_pending(resp),
            Err(error) => {
                // Id is unknowable for malformed frames; reply with null id.
                let resp = RpcResponse::failure(Value::Null, error);
                send_response(&self.transport, resp).await;
            }
        }
    }

    fn dispatch_request(&self, req: RpcRequest) {
        let id = req.id.clone().unwrap_or(Value::Null);
        let handler = self
            .methods
            .lock()
            .expect("methods lock poisoned")
            .get(&req.method)
            .cloned();

        let transport = self.transport.clone();
        let origin = self.peer.origin.clone();
        // Each request runs as its own task: a call parked on an approval
        // must not block the next frame.
        tokio::spawn(async move {
            let response = match handler {
                Some(handler) => {
                    let meta = RequestMeta {
                        id: id.clone(),
                        origin,
                    };
                    trace!(method = %req.method, "rpc dispatch");
                    match handler
                        .handle(&req.method, req.params.unwrap_or(Value::Null), meta)
                        .await
                    {
                        Ok(result) => RpcResponse::success(id, result),
                        Err(e) => RpcResponse::failure(id, e.to_error_object()),
                    }
                }
                None => RpcResponse::failure(
                    id,
                    RpcErrorObject::new(rpc::METHOD_NOT_FOUND, "Method not found"),
                ),
            };
            send_response(&transport, response).await;
        });
    }

    fn dispatch_notification(&self, req: RpcRequest) {
        let params = req.params.unwrap_or(Value::Null);
        let exact: Vec<NotificationListener> = self
            .listeners
            .lock()
            .expect("listeners lock poisoned")
            .get(&req.method)
            .cloned()
            .unwrap_or_default();

        if exact.is_empty() {
            if let Some(fallback) = self
                .fallback
                .lock()
                .expect("fallback lock poisoned")
                .clone()
            {
                fallback(&req.method, params);
            } else {
                trace!(event = %req.method, "notification with no listener — dropped");
            }
            return;
        }
        for listener in exact {
            listener(params.clone());
        }
    }

    fn complete_pending(&self, resp: RpcResponse) {
        let key = id_key(&resp.id);
        let slot = self
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(&key);
        match slot {
            Some(tx) => {
                let outcome = match resp.error {
                    Some(error) => Err(CallError::Rpc(error)),
                    None => Ok(resp.result.unwrap_or(Value::Null)),
                };
                // Receiver may have given up (caller dropped); nothing to do.
                let _ = tx.send(outcome);
            }
            None => {
                warn!(id = %key, "response for unknown request id — dropped");
            }
        }
    }

    /// Terminate every outstanding call with `Disconnected`.
    fn fail_pending(&self) {
        let drained: Vec<_> = self
            .pending
            .lock()
            .expect("pending lock poisoned")
            .drain()
            .collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "transport down — failing pending calls");
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(CallError::Transport(TransportError::Disconnected)));
        }
    }

}

async fn send_response(transport: &Arc<dyn Transport>, response: RpcResponse) {
    let frame = match serde_json::to_string(&response) {
        Ok(f) => f,
        Err(e) => {
            warn!(err = %e, "failed to serialize response");
            return;
        }
    };
    if let Err(e) = transport.send(frame).await {
        warn!(err = %e, "failed to send response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory;
    use std::sync::atomic::AtomicUsize;

    struct Echo;

    #[async_trait]
    impl MethodHandler for Echo {
        async fn handle(
            &self,
            _method: &str,
            params: Value,
            _meta: RequestMeta,
        ) -> Result<Value, RouterError> {
            Ok(params)
        }
    }

    struct Fails;

    #[async_trait]
    impl MethodHandler for Fails {
        async fn handle(
            &self,
            _method: &str,
            _params: Value,
            _meta: RequestMeta,
        ) -> Result<Value, RouterError> {
            Err(RouterError::UnknownChain("eip155:999".to_string()))
        }
    }

    fn linked_engines() -> (Arc<RpcEngine>, Arc<RpcEngine>) {
        let (a, b) = memory::pair();
        let ea = Arc::new(RpcEngine::new(Arc::new(a), PeerInfo::default(), false));
        let eb = Arc::new(RpcEngine::new(Arc::new(b), PeerInfo::default(), false));
        ea.clone().start();
        eb.clone().start();
        (ea, eb)
    }

    #[tokio::test]
    async fn call_is_correlated_by_id() {
        let (client, server) = linked_engines();
        server.register_method("echo", Arc::new(Echo));

        let r1 = client.call("echo", Some(json!("first")));
        let r2 = client.call("echo", Some(json!("second")));
        let (r1, r2) = tokio::join!(r1, r2);

        assert_eq!(r1.unwrap(), json!("first"));
        assert_eq!(r2.unwrap(), json!("second"));
    }

    #[tokio::test]
    async fn handler_error_maps_to_error_object() {
        let (client, server) = linked_engines();
        server.register_method("boom", Arc::new(Fails));

        match client.call("boom", None).await {
            Err(CallError::Rpc(e)) => assert_eq!(e.code, rpc::UNKNOWN_CHAIN),
            other => panic!("expected rpc error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unregistered_method_is_method_not_found() {
        let (client, _server) = linked_engines();
        match client.call("nope", None).await {
            Err(CallError::Rpc(e)) => assert_eq!(e.code, rpc::METHOD_NOT_FOUND),
            other => panic!("expected method-not-found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnect_fails_outstanding_calls() {
        let (a, b) = memory::pair();
        let b = Arc::new(b);
        let client = Arc::new(RpcEngine::new(Arc::new(a), PeerInfo::default(), false));
        client.clone().start();
        // No engine on the far side: the call stays pending until the drop.

        let pending = {
            let client = client.clone();
            tokio::spawn(async move { client.call("echo", None).await })
        };
        tokio::task::yield_now().await;
        b.disconnect().await.unwrap();

        match pending.await.unwrap() {
            Err(CallError::Transport(TransportError::Disconnected)) => {}
            other => panic!("expected Disconnected, got {other:?}"),
        }
        // Slot released: the pending map is empty again.
        assert!(client.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn notification_reaches_exact_listener_and_gets_no_reply() {
        let (client, server) = linked_engines();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        server.on_notification(
            "wm_walletStateChanged",
            Arc::new(move |params| {
                assert_eq!(params["chainId"], json!("eip155:1"));
                hits2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        client
            .notify("wm_walletStateChanged", Some(json!({"chainId": "eip155:1"})))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fallback_listener_sees_unmatched_notifications() {
        let (client, server) = linked_engines();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        server.set_fallback_listener(Arc::new(move |event, _params| {
            seen2.lock().unwrap().push(event.to_string());
        }));

        client.notify("solana_slotChanged", None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(seen.lock().unwrap().as_slice(), ["solana_slotChanged"]);
    }

    #[tokio::test]
    async fn unknown_response_id_is_dropped() {
        let (a, b) = memory::pair();
        let client = Arc::new(RpcEngine::new(Arc::new(a), PeerInfo::default(), false));
        client.clone().start();

        // Inject a response nobody asked for; the engine must not panic and
        // must keep serving afterwards.
        b.send(r#"{"jsonrpc":"2.0","id":424242,"result":"ghost"}"#.to_string())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(client.pending.lock().unwrap().is_empty());
    }
}
