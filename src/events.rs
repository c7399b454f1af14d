// SPDX-License-Identifier: MIT
//! Outbound event fan-out.
//!
//! All wallet- and router-originated notifications flow through one
//! broadcast channel of pre-serialized JSON-RPC notification frames; every
//! connected client subscribes and forwards. Senders never block: a slow
//! client lags and skips, it cannot stall the router.

use serde_json::{json, Value};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

/// Broadcasts JSON-RPC notification frames to every connected client.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<String>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Send a notification to all subscribers. No subscribers is fine.
    pub fn broadcast(&self, method: &str, params: Value) {
        let notification = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        let _ = self
            .tx
            .send(serde_json::to_string(&notification).unwrap_or_default());
    }

    /// Wrap a chain-specific wallet event in the router envelope.
    pub fn broadcast_wallet_event(&self, chain_id: &str, event: &str, data: Value) {
        self.broadcast(
            "wm_walletEvent",
            json!({
                "chainId": chain_id,
                "event": event,
                "data": data,
            }),
        );
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
