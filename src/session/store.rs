// SPDX-License-Identifier: MIT
//! Pluggable session stores.
//!
//! [`MemorySessionStore`] keeps records in a process-local map.
//! [`PersistentSessionStore`] mirrors that map through the
//! [`KeyValueStorage`] contract so sessions survive a restart; when storage
//! is unavailable or a write fails it degrades to memory-only with a warning
//! and never fails the caller.
//!
//! Expired records are removed lazily on access and eagerly by the periodic
//! sweep (see [`security::SessionSecurity::spawn_sweeper`]).
//!
//! [`security::SessionSecurity::spawn_sweeper`]: super::security::SessionSecurity::spawn_sweeper

use super::{now_ms, Session, SessionState};
use crate::storage::KeyValueStorage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Behavior knobs shared by all store implementations.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Session lifetime used when extending on access. `None` disables
    /// extension even when `refresh_on_access` is set.
    pub lifetime_ms: Option<i64>,
    /// Extend `expires_at` by `lifetime_ms` on each `validate_and_refresh`.
    pub refresh_on_access: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            lifetime_ms: None,
            refresh_on_access: false,
        }
    }
}

/// Session persistence surface. The single source of truth for session
/// existence; every read-modify-write of a session goes through it.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace a record, keyed by `session.id`.
    async fn set(&self, session: Session);

    /// Fetch a live record. Returns `None` for missing, expired, or
    /// terminal records; an active record past its deadline is flipped to
    /// `expired` in place.
    async fn get(&self, id: &str) -> Option<Session>;

    /// Fetch any record, including terminal ones still awaiting the sweep.
    /// Validators use this to distinguish `expired`/`revoked` from
    /// `not_found`.
    async fn get_any(&self, id: &str) -> Option<Session>;

    /// All live records.
    async fn get_all(&self) -> Vec<Session>;

    /// Remove a record outright. Returns `true` when something was removed.
    async fn delete(&self, id: &str) -> bool;

    async fn clear(&self);

    /// Remove terminal and past-deadline records. Returns the removed count.
    async fn clean_expired(&self) -> usize;

    /// Like [`get`](SessionStore::get), but also bumps `last_activity` and,
    /// when configured, extends `expires_at` by the configured lifetime.
    async fn validate_and_refresh(&self, id: &str) -> Option<Session>;
}

// ─── Shared map logic ────────────────────────────────────────────────────────

/// Core map operations used by both stores; the persistent store adds a
/// write-through on top.
struct MapCore {
    entries: RwLock<HashMap<String, Session>>,
    options: StoreOptions,
}

impl MapCore {
    fn new(options: StoreOptions) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            options,
        }
    }

    async fn set(&self, session: Session) {
        self.entries
            .write()
            .await
            .insert(session.id.clone(), session);
    }

    /// Returns the live record, flipping past-deadline records to expired.
    /// The flipped record is written back so later `get_any` calls see it.
    async fn get(&self, id: &str) -> Option<Session> {
        let now = now_ms();
        let mut entries = self.entries.write().await;
        let record = entries.get_mut(id)?;
        if record.is_past_expiry(now) {
            record.state = SessionState::Expired;
            return None;
        }
        if record.state != SessionState::Active {
            return None;
        }
        Some(record.clone())
    }

    async fn get_any(&self, id: &str) -> Option<Session> {
        let now = now_ms();
        let mut entries = self.entries.write().await;
        let record = entries.get_mut(id)?;
        if record.is_past_expiry(now) {
            record.state = SessionState::Expired;
        }
        Some(record.clone())
    }

    async fn get_all(&self) -> Vec<Session> {
        let now = now_ms();
        self.entries
            .read()
            .await
            .values()
            .filter(|s| s.is_active() && !s.is_past_expiry(now))
            .cloned()
            .collect()
    }

    async fn delete(&self, id: &str) -> bool {
        self.entries.write().await.remove(id).is_some()
    }

    async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Removes terminal and past-deadline records; returns their ids.
    async fn clean_expired(&self) -> Vec<String> {
        let now = now_ms();
        let mut entries = self.entries.write().await;
        let dead: Vec<String> = entries
            .iter()
            .filter(|(_, s)| !s.is_active() || s.is_past_expiry(now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &dead {
            entries.remove(id);
        }
        dead
    }

    async fn validate_and_refresh(&self, id: &str) -> Option<Session> {
        let now = now_ms();
        let mut entries = self.entries.write().await;
        let record = entries.get_mut(id)?;
        if record.is_past_expiry(now) {
            record.state = SessionState::Expired;
            return None;
        }
        if record.state != SessionState::Active {
            return None;
        }
        record.last_activity = now;
        if self.options.refresh_on_access {
            if let Some(lifetime) = self.options.lifetime_ms {
                record.expires_at = now + lifetime;
            }
        }
        Some(record.clone())
    }
}

// ─── Memory store ────────────────────────────────────────────────────────────

/// In-process store; lost on restart.
pub struct MemorySessionStore {
    core: MapCore,
}

impl MemorySessionStore {
    pub fn new(options: StoreOptions) -> Self {
        Self {
            core: MapCore::new(options),
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(StoreOptions::default())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn set(&self, session: Session) {
        self.core.set(session).await;
    }

    async fn get(&self, id: &str) -> Option<Session> {
        self.core.get(id).await
    }

    async fn get_any(&self, id: &str) -> Option<Session> {
        self.core.get_any(id).await
    }

    async fn get_all(&self) -> Vec<Session> {
        self.core.get_all().await
    }

    async fn delete(&self, id: &str) -> bool {
        self.core.delete(id).await
    }

    async fn clear(&self) {
        self.core.clear().await;
    }

    async fn clean_expired(&self) -> usize {
        self.core.clean_expired().await.len()
    }

    async fn validate_and_refresh(&self, id: &str) -> Option<Session> {
        self.core.validate_and_refresh(id).await
    }
}

// ─── Persistent store ────────────────────────────────────────────────────────

/// Write-through store over the key-value contract.
///
/// The in-process map stays authoritative; the backing storage provides
/// durability and is reloaded at construction. Storage faults are logged and
/// the store keeps serving from memory.
pub struct PersistentSessionStore {
    core: MapCore,
    /// `None` when the availability probe failed at construction.
    storage: Option<Arc<dyn KeyValueStorage>>,
    prefix: String,
}

impl PersistentSessionStore {
    /// Probe `storage`, load any surviving session records, and return the
    /// store. A failed probe degrades to memory-only.
    pub async fn new(
        storage: Arc<dyn KeyValueStorage>,
        prefix: impl Into<String>,
        options: StoreOptions,
    ) -> Self {
        let prefix = prefix.into();
        let core = MapCore::new(options);

        let probe_key = format!("{prefix}__probe");
        let available = storage.set(&probe_key, "1").await.is_ok()
            && storage.remove(&probe_key).await.is_ok();
        if !available {
            warn!("session storage unavailable — falling back to memory only");
            return Self {
                core,
                storage: None,
                prefix,
            };
        }

        // Reload persisted sessions. Unparseable records are dropped.
        let mut loaded = 0usize;
        if let Ok(keys) = storage.keys().await {
            for key in keys.iter().filter(|k| k.starts_with(&prefix)) {
                if let Ok(Some(raw)) = storage.get(key).await {
                    match serde_json::from_str::<Session>(&raw) {
                        Ok(session) => {
                            core.set(session).await;
                            loaded += 1;
                        }
                        Err(e) => {
                            warn!(key = %key, err = %e, "dropping unparseable session record");
                            let _ = storage.remove(key).await;
                        }
                    }
                }
            }
        }
        if loaded > 0 {
            debug!(count = loaded, "reloaded persisted sessions");
        }

        Self {
            core,
            storage: Some(storage),
            prefix,
        }
    }

    fn key_for(&self, id: &str) -> String {
        format!("{}{}", self.prefix, id)
    }

    async fn persist(&self, session: &Session) {
        let Some(storage) = &self.storage else { return };
        match serde_json::to_string(session) {
            Ok(raw) => {
                if let Err(e) = storage.set(&self.key_for(&session.id), &raw).await {
                    warn!(session_id = %session.id, err = %e, "failed to persist session");
                }
            }
            Err(e) => warn!(session_id = %session.id, err = %e, "failed to serialize session"),
        }
    }

    async fn unpersist(&self, id: &str) {
        let Some(storage) = &self.storage else { return };
        if let Err(e) = storage.remove(&self.key_for(id)).await {
            warn!(session_id = %id, err = %e, "failed to remove persisted session");
        }
    }
}

#[async_trait]
impl SessionStore for PersistentSessionStore {
    async fn set(&self, session: Session) {
        self.persist(&session).await;
        self.core.set(session).await;
    }

    async fn get(&self, id: &str) -> Option<Session> {
        self.core.get(id).await
    }

    async fn get_any(&self, id: &str) -> Option<Session> {
        self.core.get_any(id).await
    }

    async fn get_all(&self) -> Vec<Session> {
        self.core.get_all().await
    }

    async fn delete(&self, id: &str) -> bool {
        self.unpersist(id).await;
        self.core.delete(id).await
    }

    async fn clear(&self) {
        if let Some(storage) = &self.storage {
            if let Ok(keys) = storage.keys().await {
                for key in keys.iter().filter(|k| k.starts_with(&self.prefix)) {
                    let _ = storage.remove(key).await;
                }
            }
        }
        self.core.clear().await;
    }

    async fn clean_expired(&self) -> usize {
        let dead = self.core.clean_expired().await;
        for id in &dead {
            self.unpersist(id).await;
        }
        dead.len()
    }

    async fn validate_and_refresh(&self, id: &str) -> Option<Session> {
        let refreshed = self.core.validate_and_refresh(id).await;
        if let Some(session) = &refreshed {
            self.persist(session).await;
        }
        refreshed
    }
}
