// SPDX-License-Identifier: MIT
//! JSON-RPC backed wallet client.
//!
//! Adapts any [`Transport`] into the [`WalletClient`] contract: calls go
//! out through a dedicated engine, and every notification the wallet pushes
//! is re-emitted on the typed event channel with this client's `chainId`
//! attached.

use super::{ProxyConfig, WalletClient, WalletClientError, WalletEvent};
use crate::rpc::engine::{CallError, PeerInfo, RpcEngine};
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct RpcWalletClient {
    chain_id: String,
    engine: Arc<RpcEngine>,
    events: broadcast::Sender<WalletEvent>,
    config: ProxyConfig,
    /// Lazily fetched and cached capability list.
    supported: Mutex<Option<Vec<String>>>,
}

impl RpcWalletClient {
    /// Build a client for `chain_id` over `transport` and start its engine.
    pub fn new(
        chain_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        config: ProxyConfig,
    ) -> Arc<Self> {
        let chain_id = chain_id.into();
        let engine = Arc::new(RpcEngine::new(transport, PeerInfo::default(), config.debug));
        engine.clone().start();

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let client = Arc::new(Self {
            chain_id: chain_id.clone(),
            engine: engine.clone(),
            events: events.clone(),
            config,
            supported: Mutex::new(None),
        });

        // Every wallet notification becomes a typed event; senders never
        // block, lagging subscribers skip.
        engine.set_fallback_listener(Arc::new(move |event: &str, data: Value| {
            let _ = events.send(WalletEvent {
                chain_id: chain_id.clone(),
                event: event.to_string(),
                data,
            });
        }));

        client
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn shutdown(&self) {
        self.engine.shutdown();
    }
}

#[async_trait]
impl WalletClient for RpcWalletClient {
    async fn call(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, WalletClientError> {
        let outcome = match self.config.call_timeout {
            Some(deadline) => {
                match tokio::time::timeout(deadline, self.engine.call(method, params)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        debug!(chain_id = %self.chain_id, method, "wallet call timed out");
                        return Err(WalletClientError::Transport(TransportError::Timeout));
                    }
                }
            }
            None => self.engine.call(method, params).await,
        };
        match outcome {
            Ok(value) => Ok(value),
            Err(CallError::Rpc(error)) => Err(WalletClientError::Wallet(error)),
            Err(CallError::Transport(error)) => Err(WalletClientError::Transport(error)),
        }
    }

    async fn supported_methods(&self) -> Option<Vec<String>> {
        let mut cached = self.supported.lock().await;
        if let Some(methods) = cached.as_ref() {
            return Some(methods.clone());
        }
        match self.engine.call("wm_getSupportedMethods", None).await {
            Ok(value) => {
                let methods: Vec<String> = serde_json::from_value(value).ok()?;
                *cached = Some(methods.clone());
                Some(methods)
            }
            Err(_) => None,
        }
    }

    fn subscribe_events(&self) -> Option<broadcast::Receiver<WalletEvent>> {
        Some(self.events.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RouterError;
    use crate::rpc::engine::{MethodHandler, RequestMeta};
    use crate::transport::memory;
    use serde_json::json;

    struct Balance;

    #[async_trait]
    impl MethodHandler for Balance {
        async fn handle(
            &self,
            _method: &str,
            _params: Value,
            _meta: RequestMeta,
        ) -> Result<Value, RouterError> {
            Ok(json!("0x10"))
        }
    }

    /// Stand up an in-process "wallet" on the far end of the pair.
    fn wallet_side(transport: crate::transport::memory::MemoryTransport) -> Arc<RpcEngine> {
        let engine = Arc::new(RpcEngine::new(
            Arc::new(transport),
            PeerInfo::default(),
            false,
        ));
        engine.clone().start();
        engine
    }

    #[tokio::test]
    async fn call_roundtrips_through_the_engine() {
        let (router_side, far) = memory::pair();
        let wallet = wallet_side(far);
        wallet.register_method("eth_getBalance", Arc::new(Balance));

        let client = RpcWalletClient::new("eip155:1", Arc::new(router_side), ProxyConfig::default());
        let result = client.call("eth_getBalance", None).await.unwrap();
        assert_eq!(result, json!("0x10"));
    }

    #[tokio::test]
    async fn wallet_error_is_preserved() {
        struct Nope;

        #[async_trait]
        impl MethodHandler for Nope {
            async fn handle(
                &self,
                _method: &str,
                _params: Value,
                _meta: RequestMeta,
            ) -> Result<Value, RouterError> {
                Err(RouterError::MethodNotSupported("eth_foo".to_string()))
            }
        }

        let (router_side, far) = memory::pair();
        let wallet = wallet_side(far);
        wallet.register_method("eth_foo", Arc::new(Nope));

        let client = RpcWalletClient::new("eip155:1", Arc::new(router_side), ProxyConfig::default());
        match client.call("eth_foo", None).await {
            Err(WalletClientError::Wallet(e)) => assert_eq!(e.code, -32003),
            other => panic!("expected wallet error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn notifications_become_typed_events() {
        let (router_side, far) = memory::pair();
        let wallet = wallet_side(far);

        let client = RpcWalletClient::new("eip155:1", Arc::new(router_side), ProxyConfig::default());
        let mut events = client.subscribe_events().unwrap();

        wallet
            .notify("eth_subscription", Some(json!({"number": "0x5"})))
            .await
            .unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.chain_id, "eip155:1");
        assert_eq!(event.event, "eth_subscription");
        assert_eq!(event.data["number"], json!("0x5"));
    }
}
