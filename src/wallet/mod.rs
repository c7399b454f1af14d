// SPDX-License-Identifier: MIT
//! Wallet client contract.
//!
//! A wallet client services exactly one chain: the router looks it up by
//! `chainId` and forwards method calls to it. Events come back on a typed
//! broadcast channel per wallet (no dynamic `on`/`emit`); the registry fans
//! them into the router's single outbound stream.

pub mod registry;
pub mod rpc_client;

use crate::rpc::RpcErrorObject;
use crate::transport::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::broadcast;

/// One method invocation: `{method, params?}`. Params are passthrough; the
/// router never reinterprets them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A notification that originated inside a wallet.
#[derive(Debug, Clone)]
pub struct WalletEvent {
    pub chain_id: String,
    /// Wire event name (`wm_walletStateChanged`, `eth_subscription`, …).
    pub event: String,
    pub data: Value,
}

/// Why a wallet call failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WalletClientError {
    /// The wallet answered with a structured error; code/message/data are
    /// its own and must be preserved on the way out.
    #[error("{0}")]
    Wallet(RpcErrorObject),
    /// The wallet could not be reached at all.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// The per-chain wallet contract.
#[async_trait]
pub trait WalletClient: Send + Sync {
    /// Invoke `method` on the wallet and return its result.
    async fn call(&self, method: &str, params: Option<Value>)
        -> Result<Value, WalletClientError>;

    /// The method names this wallet services, when it can enumerate them.
    async fn supported_methods(&self) -> Option<Vec<String>> {
        None
    }

    /// Subscribe to the wallet's event stream, when it has one.
    fn subscribe_events(&self) -> Option<broadcast::Receiver<WalletEvent>> {
        None
    }
}

/// Base configuration inherited by every per-chain proxy; the registry
/// injects `chainId` when constructing a client.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    /// Per-call deadline on the wallet leg. `None` waits indefinitely.
    pub call_timeout: Option<Duration>,
    /// Per-frame debug logging on the proxy engine.
    pub debug: bool,
}
