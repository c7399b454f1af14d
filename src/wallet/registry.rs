// SPDX-License-Identifier: MIT
//! Wallet proxy registry.
//!
//! Maps `chainId → wallet client`. Clients can be registered eagerly or
//! created lazily by a host factory on first use; either way they are
//! cached and shared. Calls on one client are serialized (wallets are not
//! assumed safe for concurrent requests), availability can be toggled, and
//! each client's event stream is forwarded into the router's broadcast
//! channel.

use super::{MethodCall, ProxyConfig, WalletClient, WalletClientError, WalletEvent};
use crate::error::RouterError;
use crate::events::EventBroadcaster;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Host hook constructing the client for a chain on first use, from the
/// base proxy config with the chain id injected. Return `None` for chains
/// the host cannot service.
pub type WalletFactory =
    Arc<dyn Fn(&str, &ProxyConfig) -> Option<Arc<dyn WalletClient>> + Send + Sync>;

struct WalletEntry {
    client: Arc<dyn WalletClient>,
    available: bool,
    /// Serializes calls to this client.
    call_gate: Arc<Mutex<()>>,
    forwarder: Option<tokio::task::JoinHandle<()>>,
}

pub struct WalletRegistry {
    entries: RwLock<HashMap<String, WalletEntry>>,
    factory: Option<WalletFactory>,
    /// Base config every lazily-built proxy inherits.
    proxy_config: ProxyConfig,
    broadcaster: Arc<EventBroadcaster>,
}

impl WalletRegistry {
    pub fn new(
        factory: Option<WalletFactory>,
        proxy_config: ProxyConfig,
        broadcaster: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            factory,
            proxy_config,
            broadcaster,
        }
    }

    /// Register a client for `chain_id`, replacing any previous one.
    pub async fn register(&self, chain_id: impl Into<String>, client: Arc<dyn WalletClient>) {
        let chain_id = chain_id.into();
        let forwarder = self.spawn_forwarder(&chain_id, client.as_ref());
        let mut entries = self.entries.write().await;
        if let Some(old) = entries.insert(
            chain_id.clone(),
            WalletEntry {
                client,
                available: true,
                call_gate: Arc::new(Mutex::new(())),
                forwarder,
            },
        ) {
            if let Some(task) = old.forwarder {
                task.abort();
            }
        }
        info!(chain_id = %chain_id, "wallet registered");
    }

    /// Pump the client's event stream into the outbound broadcast.
    /// Router-namespaced events pass through under their own name; anything
    /// else is wrapped in the `wm_walletEvent` envelope.
    fn spawn_forwarder(
        &self,
        chain_id: &str,
        client: &dyn WalletClient,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let mut events = client.subscribe_events()?;
        let broadcaster = self.broadcaster.clone();
        let chain_id = chain_id.to_string();
        Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(WalletEvent { event, data, .. }) => {
                        if event.starts_with("wm_") {
                            broadcaster.broadcast(&event, data);
                        } else {
                            broadcaster.broadcast_wallet_event(&chain_id, &event, data);
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(chain_id = %chain_id, skipped = n, "wallet event stream lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }

    /// Mark a chain's wallet (un)available and announce the change.
    pub async fn set_available(&self, chain_id: &str, available: bool) -> bool {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(chain_id) else {
            return false;
        };
        if entry.available != available {
            entry.available = available;
            self.broadcaster.broadcast(
                "wm_walletAvailabilityChanged",
                json!({ "chainId": chain_id, "available": available }),
            );
        }
        true
    }

    pub async fn chains(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Look up (or lazily create) the client for `chain_id`.
    async fn entry_for(
        &self,
        chain_id: &str,
    ) -> Result<(Arc<dyn WalletClient>, Arc<Mutex<()>>), RouterError> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(chain_id) {
                if !entry.available {
                    return Err(RouterError::WalletNotAvailable(chain_id.to_string()));
                }
                return Ok((entry.client.clone(), entry.call_gate.clone()));
            }
        }

        let Some(factory) = &self.factory else {
            return Err(RouterError::UnknownChain(chain_id.to_string()));
        };
        let Some(client) = factory(chain_id, &self.proxy_config) else {
            return Err(RouterError::UnknownChain(chain_id.to_string()));
        };
        debug!(chain_id, "wallet client created lazily");
        self.register(chain_id, client).await;

        let entries = self.entries.read().await;
        let entry = entries
            .get(chain_id)
            .ok_or_else(|| RouterError::UnknownChain(chain_id.to_string()))?;
        Ok((entry.client.clone(), entry.call_gate.clone()))
    }

    /// Forward one call to the wallet servicing `chain_id`.
    ///
    /// Wallet-originated errors come back as `walletError` with the
    /// original code/message/data intact; an unreachable wallet surfaces as
    /// `walletNotAvailable`.
    pub async fn dispatch(&self, chain_id: &str, call: &MethodCall) -> Result<Value, RouterError> {
        let (client, gate) = self.entry_for(chain_id).await?;
        // Conservative default: one call at a time per client.
        let _serialized = gate.lock().await;
        match client.call(&call.method, call.params.clone()).await {
            Ok(value) => Ok(value),
            Err(WalletClientError::Wallet(e)) => Err(RouterError::Wallet {
                code: e.code,
                message: e.message,
                data: e.data,
            }),
            Err(WalletClientError::Transport(e)) => {
                warn!(chain_id, method = %call.method, err = %e, "wallet unreachable");
                Err(RouterError::WalletNotAvailable(chain_id.to_string()))
            }
        }
    }

    /// Aggregate capability lists: chain id → supported method names.
    pub async fn supported_methods(
        &self,
        chain_ids: Option<&[String]>,
    ) -> HashMap<String, Vec<String>> {
        let chains: Vec<String> = match chain_ids {
            Some(filter) => filter.to_vec(),
            None => self.chains().await,
        };
        let mut out = HashMap::new();
        for chain_id in chains {
            let Ok((client, _)) = self.entry_for(&chain_id).await else {
                continue;
            };
            if let Some(methods) = client.supported_methods().await {
                out.insert(chain_id, methods);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::RpcErrorObject;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;

    /// Scripted wallet: answers from a queue and records what it saw.
    struct StubWallet {
        seen: std::sync::Mutex<Vec<String>>,
        fail_on: Option<String>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        events: broadcast::Sender<WalletEvent>,
    }

    impl StubWallet {
        fn new(fail_on: Option<&str>) -> Arc<Self> {
            let (events, _) = broadcast::channel(16);
            Arc::new(Self {
                seen: std::sync::Mutex::new(Vec::new()),
                fail_on: fail_on.map(|s| s.to_string()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                events,
            })
        }
    }

    #[async_trait]
    impl WalletClient for StubWallet {
        async fn call(
            &self,
            method: &str,
            _params: Option<Value>,
        ) -> Result<Value, WalletClientError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.seen.lock().unwrap().push(method.to_string());
            if self.fail_on.as_deref() == Some(method) {
                return Err(WalletClientError::Wallet(RpcErrorObject::new(
                    -32003, "nope",
                )));
            }
            Ok(json!("ok"))
        }

        async fn supported_methods(&self) -> Option<Vec<String>> {
            Some(vec!["eth_call".to_string(), "eth_getBalance".to_string()])
        }

        fn subscribe_events(&self) -> Option<broadcast::Receiver<WalletEvent>> {
            Some(self.events.subscribe())
        }
    }

    fn registry() -> WalletRegistry {
        WalletRegistry::new(None, ProxyConfig::default(), Arc::new(EventBroadcaster::new()))
    }

    fn call(method: &str) -> MethodCall {
        MethodCall {
            method: method.to_string(),
            params: None,
        }
    }

    #[tokio::test]
    async fn unknown_chain_is_rejected() {
        let reg = registry();
        match reg.dispatch("eip155:999", &call("eth_call")).await {
            Err(RouterError::UnknownChain(chain)) => assert_eq!(chain, "eip155:999"),
            other => panic!("expected unknown chain, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unavailable_wallet_is_rejected_without_reaching_it() {
        let reg = registry();
        let wallet = StubWallet::new(None);
        reg.register("eip155:1", wallet.clone()).await;
        reg.set_available("eip155:1", false).await;

        assert!(matches!(
            reg.dispatch("eip155:1", &call("eth_call")).await,
            Err(RouterError::WalletNotAvailable(_))
        ));
        assert!(wallet.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn wallet_errors_keep_their_payload() {
        let reg = registry();
        reg.register("eip155:1", StubWallet::new(Some("eth_bad"))).await;

        match reg.dispatch("eip155:1", &call("eth_bad")).await {
            Err(RouterError::Wallet { code, message, .. }) => {
                assert_eq!(code, -32003);
                assert_eq!(message, "nope");
            }
            other => panic!("expected wallet error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn calls_on_one_client_are_serialized() {
        let reg = Arc::new(registry());
        let wallet = StubWallet::new(None);
        reg.register("eip155:1", wallet.clone()).await;

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let reg = reg.clone();
            tasks.push(tokio::spawn(async move {
                reg.dispatch("eip155:1", &call("eth_call")).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(wallet.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn factory_builds_clients_lazily() {
        let built = Arc::new(AtomicUsize::new(0));
        let built2 = built.clone();
        let factory: WalletFactory = Arc::new(move |chain_id: &str, _config: &ProxyConfig| {
            if chain_id.starts_with("eip155:") {
                built2.fetch_add(1, Ordering::SeqCst);
                let client: Arc<dyn WalletClient> = StubWallet::new(None);
                Some(client)
            } else {
                None
            }
        });
        let reg = WalletRegistry::new(
            Some(factory),
            ProxyConfig::default(),
            Arc::new(EventBroadcaster::new()),
        );

        assert!(reg.dispatch("eip155:1", &call("eth_call")).await.is_ok());
        assert!(reg.dispatch("eip155:1", &call("eth_call")).await.is_ok());
        // Cached after first construction.
        assert_eq!(built.load(Ordering::SeqCst), 1);

        assert!(matches!(
            reg.dispatch("solana:mainnet", &call("getBalance")).await,
            Err(RouterError::UnknownChain(_))
        ));
    }

    #[tokio::test]
    async fn wallet_events_reach_the_broadcast_stream() {
        let broadcaster = Arc::new(EventBroadcaster::new());
        let mut rx = broadcaster.subscribe();
        let reg = WalletRegistry::new(None, ProxyConfig::default(), broadcaster);
        let wallet = StubWallet::new(None);
        reg.register("eip155:1", wallet.clone()).await;

        // Chain-specific event: enveloped.
        wallet
            .events
            .send(WalletEvent {
                chain_id: "eip155:1".to_string(),
                event: "eth_newHeads".to_string(),
                data: json!({"number": "0x1"}),
            })
            .unwrap();
        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["method"], json!("wm_walletEvent"));
        assert_eq!(frame["params"]["event"], json!("eth_newHeads"));

        // Router-namespaced event: passed through unchanged.
        wallet
            .events
            .send(WalletEvent {
                chain_id: "eip155:1".to_string(),
                event: "wm_walletStateChanged".to_string(),
                data: json!({"chainId": "eip155:1", "changes": {}}),
            })
            .unwrap();
        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["method"], json!("wm_walletStateChanged"));
    }

    #[tokio::test]
    async fn supported_methods_aggregates_by_chain() {
        let reg = registry();
        reg.register("eip155:1", StubWallet::new(None)).await;

        let map = reg.supported_methods(None).await;
        assert_eq!(map["eip155:1"], vec!["eth_call", "eth_getBalance"]);

        let filtered = reg
            .supported_methods(Some(&["eip155:999".to_string()]))
            .await;
        assert!(filtered.is_empty());
    }
}
