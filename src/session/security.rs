// SPDX-License-Identifier: MIT
//! Session creation, validation, recovery, and revocation.
//!
//! Session ids carry 128 bits of OS entropy; recovery tokens are 256-bit
//! one-time secrets rotated on each use. Origin binding is enforced at validation
//! time when enabled, and the per-origin concurrent-session cap is enforced
//! inside `create_session` so the check and the creation cannot race.

use super::store::SessionStore;
use super::{now_ms, CreateSessionRequest, Session, SessionState};
use crate::error::{RouterError, SessionFailure};
use crate::origin::OriginValidator;
use rand_core::{OsRng, RngCore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// How often the background sweep removes terminal session records.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Maximum successful recoveries before a session is force-revoked.
const MAX_RECOVERY_ATTEMPTS: u32 = 3;

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionSecurityConfig {
    /// Reject validation from any origin other than the creating one.
    ///
    /// Default: true
    pub bind_to_origin: bool,
    /// Session lifetime in milliseconds.
    ///
    /// Default: 3 600 000 (1 hour)
    pub session_timeout_ms: i64,
    /// Persist sessions through the configured key-value storage.
    ///
    /// Default: true
    pub enable_persistence: bool,
    /// Storage key prefix for persisted records.
    ///
    /// Default: "walletmesh_session_"
    pub storage_key_prefix: String,
    /// Per-origin cap; creating one more revokes the oldest.
    ///
    /// Default: 10
    pub max_concurrent_sessions: usize,
    /// Issue recovery tokens at creation.
    ///
    /// Default: true
    pub enable_recovery: bool,
    /// A recovery token is only honored within this window since the
    /// session's last activity.
    ///
    /// Default: 300 000 (5 minutes)
    pub recovery_timeout_ms: i64,
    /// Bump `last_activity` on each successful validation.
    ///
    /// Default: true
    pub track_activity: bool,
    /// Log lifecycle transitions at info level.
    ///
    /// Default: true
    pub log_events: bool,
}

impl Default for SessionSecurityConfig {
    fn default() -> Self {
        Self {
            bind_to_origin: true,
            session_timeout_ms: 3_600_000,
            enable_persistence: true,
            storage_key_prefix: "walletmesh_session_".to_string(),
            max_concurrent_sessions: 10,
            enable_recovery: true,
            recovery_timeout_ms: 300_000,
            track_activity: true,
            log_events: true,
        }
    }
}

/// Outcome of [`SessionSecurity::validate_session`].
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub valid: bool,
    pub reason: Option<SessionFailure>,
    pub session: Option<Session>,
}

impl ValidationResult {
    fn ok(session: Session) -> Self {
        Self {
            valid: true,
            reason: None,
            session: Some(session),
        }
    }

    fn fail(reason: SessionFailure) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
            session: None,
        }
    }
}

// ─── Manager ─────────────────────────────────────────────────────────────────

pub struct SessionSecurity {
    config: SessionSecurityConfig,
    store: Arc<dyn SessionStore>,
    origins: Arc<OriginValidator>,
    /// recovery token → session id. Shared with the sweep task, which
    /// prunes entries whose session is gone.
    recovery_index: Arc<RwLock<HashMap<String, String>>>,
}

impl SessionSecurity {
    pub fn new(
        config: SessionSecurityConfig,
        store: Arc<dyn SessionStore>,
        origins: Arc<OriginValidator>,
    ) -> Self {
        Self {
            config,
            store,
            origins,
            recovery_index: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Create a session for `request.origin`.
    ///
    /// The origin must pass the validator; the per-origin cap is enforced by
    /// revoking the oldest session when full.
    pub async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<Session, RouterError> {
        let decision = self.origins.validate(&request.origin).await;
        if !decision.allowed {
            warn!(origin = %request.origin, reason = %decision.reason_or_unknown(), "origin rejected");
            return Err(RouterError::invalid_request(format!(
                "origin not allowed: {}",
                decision.reason_or_unknown()
            )));
        }

        // Cap enforcement and creation are one logical step; both run under
        // the store, the single source of truth for session existence.
        if self.config.max_concurrent_sessions > 0 {
            let mut same_origin: Vec<Session> = self
                .store
                .get_all()
                .await
                .into_iter()
                .filter(|s| s.origin == request.origin)
                .collect();
            if same_origin.len() >= self.config.max_concurrent_sessions {
                same_origin.sort_by_key(|s| s.created_at);
                let oldest = &same_origin[0];
                if self.config.log_events {
                    info!(
                        session_id = %oldest.id,
                        origin = %request.origin,
                        "session cap reached — revoking oldest"
                    );
                }
                self.revoke_session(&oldest.id).await;
            }
        }

        let now = now_ms();
        let recovery_token = if self.config.enable_recovery {
            Some(generate_recovery_token())
        } else {
            None
        };

        let session = Session {
            id: generate_session_id(),
            origin: request.origin,
            wallet_id: request.wallet_id,
            authorized_chains: request.authorized_chains,
            created_at: now,
            last_activity: now,
            expires_at: now + self.config.session_timeout_ms,
            state: SessionState::Active,
            recovery_token: recovery_token.clone(),
            recovery_attempts: 0,
            metadata: request.metadata,
        };

        self.store.set(session.clone()).await;
        if let Some(token) = recovery_token {
            self.recovery_index
                .write()
                .await
                .insert(token, session.id.clone());
        }

        if self.config.log_events {
            info!(session_id = %session.id, origin = %session.origin, "session created");
        }
        Ok(session)
    }

    /// Validate `id` for a request arriving from `origin`.
    ///
    /// Checks, in order: existence, expiry (the record is flipped to
    /// `expired` on detection), revocation, then origin binding. A valid
    /// session gets its activity refreshed when tracking is enabled.
    pub async fn validate_session(&self, id: &str, origin: &str) -> ValidationResult {
        let record = match self.store.get_any(id).await {
            Some(record) => record,
            None => return ValidationResult::fail(SessionFailure::NotFound),
        };

        match record.state {
            SessionState::Expired => return ValidationResult::fail(SessionFailure::Expired),
            SessionState::Revoked => return ValidationResult::fail(SessionFailure::Revoked),
            SessionState::Active => {}
        }

        if self.config.bind_to_origin && record.origin != origin {
            warn!(session_id = %id, got = %origin, "origin mismatch");
            return ValidationResult::fail(SessionFailure::OriginMismatch);
        }

        if self.config.track_activity {
            match self.store.validate_and_refresh(id).await {
                Some(refreshed) => ValidationResult::ok(refreshed),
                // Expired between the two reads; report it as such.
                None => ValidationResult::fail(SessionFailure::Expired),
            }
        } else {
            ValidationResult::ok(record)
        }
    }

    /// Reinstate a session from a recovery token.
    ///
    /// The token must map to a live session whose last activity is within
    /// the recovery window, and the origin must match the creating one.
    /// Each successful recovery rotates the token; exceeding
    /// `MAX_RECOVERY_ATTEMPTS` force-revokes the session instead.
    pub async fn recover_session(&self, token: &str, origin: &str) -> Option<Session> {
        if !self.config.enable_recovery {
            return None;
        }

        let session_id = self.recovery_index.read().await.get(token).cloned()?;
        let mut record = self.store.get(&session_id).await?;

        if record.origin != origin {
            warn!(session_id = %session_id, "recovery refused: origin mismatch");
            return None;
        }
        let now = now_ms();
        if now - record.last_activity > self.config.recovery_timeout_ms {
            debug!(session_id = %session_id, "recovery refused: window elapsed");
            return None;
        }

        record.recovery_attempts += 1;
        if record.recovery_attempts > MAX_RECOVERY_ATTEMPTS {
            warn!(session_id = %session_id, "recovery attempts exhausted — revoking");
            self.recovery_index.write().await.remove(token);
            self.revoke_session(&session_id).await;
            return None;
        }

        // Rotate: the old token dies with this use.
        let new_token = generate_recovery_token();
        {
            let mut index = self.recovery_index.write().await;
            index.remove(token);
            index.insert(new_token.clone(), session_id.clone());
        }
        record.recovery_token = Some(new_token);
        record.last_activity = now;
        self.store.set(record.clone()).await;

        if self.config.log_events {
            info!(session_id = %session_id, attempts = record.recovery_attempts, "session recovered");
        }
        Some(record)
    }

    /// Flip a session to `revoked`. Idempotent. The record stays in the
    /// store until the sweep so concurrent validators see `revoked` rather
    /// than `not_found`.
    pub async fn revoke_session(&self, id: &str) -> bool {
        let Some(mut record) = self.store.get_any(id).await else {
            return false;
        };
        if record.state == SessionState::Revoked {
            return true;
        }
        record.state = SessionState::Revoked;
        if let Some(token) = record.recovery_token.take() {
            self.recovery_index.write().await.remove(&token);
        }
        self.store.set(record).await;
        if self.config.log_events {
            info!(session_id = %id, "session revoked");
        }
        true
    }

    /// Remove terminal records and prune dead recovery tokens. Returns the
    /// number of records removed.
    pub async fn sweep(&self) -> usize {
        sweep_once(&self.store, &self.recovery_index).await
    }

    /// Spawn the periodic sweep task.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let index = self.recovery_index.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sweep_once(&store, &index).await;
            }
        })
    }
}

/// One sweep pass: clean the store, then drop index entries whose session
/// is gone.
async fn sweep_once(
    store: &Arc<dyn SessionStore>,
    index: &RwLock<HashMap<String, String>>,
) -> usize {
    let removed = store.clean_expired().await;
    if removed > 0 {
        debug!(removed, "session sweep");
    }
    let mut index = index.write().await;
    let mut dead_tokens = Vec::new();
    for (token, id) in index.iter() {
        if store.get_any(id).await.is_none() {
            dead_tokens.push(token.clone());
        }
    }
    for token in dead_tokens {
        index.remove(&token);
    }
    removed
}

/// 128 bits from the OS RNG, hex-encoded.
fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// 256 bits from the OS RNG, hex-encoded.
fn generate_recovery_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
