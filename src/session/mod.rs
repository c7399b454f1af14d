// SPDX-License-Identifier: MIT
//! Session records and lifecycle.
//!
//! A session is one authenticated connection from a dApp origin. Records move
//! through `active → expired | revoked` and are then removed by the sweep;
//! terminal records are kept briefly so concurrent validators see the real
//! reason instead of `not_found`.

pub mod security;
pub mod store;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Expired,
    Revoked,
}

/// One authenticated dApp connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Opaque, unguessable id (128 random bits, hex-encoded).
    pub id: String,
    /// scheme+host+port that created the session.
    pub origin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<String>,
    #[serde(default)]
    pub authorized_chains: Vec<String>,
    pub created_at: i64,
    pub last_activity: i64,
    pub expires_at: i64,
    pub state: SessionState,
    /// One-time reconnect secret; rotated on every successful recovery.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_token: Option<String>,
    #[serde(default)]
    pub recovery_attempts: u32,
    /// Opaque host-supplied key/value map (user agent, app metadata).
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Active but past its deadline. The store flips these to `Expired`
    /// lazily on access.
    pub fn is_past_expiry(&self, now: i64) -> bool {
        self.state == SessionState::Active && self.expires_at <= now
    }
}

/// Inputs to session creation.
#[derive(Debug, Clone, Default)]
pub struct CreateSessionRequest {
    pub origin: String,
    pub wallet_id: Option<String>,
    pub authorized_chains: Vec<String>,
    pub metadata: HashMap<String, Value>,
}
