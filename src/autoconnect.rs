// SPDX-License-Identifier: MIT
//! Auto-connect wallet preferences.
//!
//! Small per-wallet flags persisted through the key-value storage contract
//! under one record, so a returning dApp can silently reconnect wallets the
//! user opted into. Writes are idempotent; a failed persist is logged and
//! the in-memory view stays authoritative.

use crate::storage::KeyValueStorage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

const STORAGE_KEY_SUFFIX: &str = "autoconnect";

pub struct AutoConnectStore {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
    flags: Mutex<HashMap<String, bool>>,
}

impl AutoConnectStore {
    /// Load existing preferences from storage under `<prefix>autoconnect`.
    pub async fn new(storage: Arc<dyn KeyValueStorage>, prefix: &str) -> Self {
        let key = format!("{prefix}{STORAGE_KEY_SUFFIX}");
        let flags = match storage.get(&key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!(err = %e, "failed to load auto-connect preferences");
                HashMap::new()
            }
        };
        Self {
            storage,
            key,
            flags: Mutex::new(flags),
        }
    }

    /// Set the flag for `wallet_id`. Re-setting the current value is a
    /// no-op, including the persist.
    pub async fn set_auto_connect(&self, wallet_id: &str, enabled: bool) {
        let snapshot = {
            let mut flags = self.flags.lock().await;
            if flags.get(wallet_id).copied().unwrap_or(false) == enabled {
                return;
            }
            if enabled {
                flags.insert(wallet_id.to_string(), true);
            } else {
                flags.remove(wallet_id);
            }
            flags.clone()
        };
        match serde_json::to_string(&snapshot) {
            Ok(raw) => {
                if let Err(e) = self.storage.set(&self.key, &raw).await {
                    warn!(wallet_id, err = %e, "failed to persist auto-connect preference");
                }
            }
            Err(e) => warn!(err = %e, "failed to serialize auto-connect preferences"),
        }
    }

    pub async fn is_auto_connect_enabled(&self, wallet_id: &str) -> bool {
        self.flags.lock().await.get(wallet_id).copied().unwrap_or(false)
    }

    /// Wallet ids with auto-connect on, sorted for stable output.
    pub async fn auto_connect_wallets(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.flags.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
