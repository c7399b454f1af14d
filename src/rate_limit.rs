// SPDX-License-Identifier: MIT
//! Fixed-window request admission with burst tokens and progressive
//! penalties.
//!
//! Every key tracks `{windowStart, count, burstTokens, violations,
//! blockedUntil}`. Burst tokens absorb spikes before the window counter is
//! charged; once both are exhausted, each further request records a
//! violation and is told to retry after `window · multiplier^violations`
//! (capped). Reaching `violations_before_block` arms a hard block that
//! survives window resets.
//!
//! Keys derive from the caller's origin, optionally suffixed with the
//! operation name, or from a host-supplied generator.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Host-supplied key derivation from the origin string.
pub type KeyGenerator = Arc<dyn Fn(&str) -> String + Send + Sync>;

#[derive(Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per window (after burst tokens run out).
    ///
    /// Default: 100
    pub max_requests: u32,
    /// Window length in milliseconds.
    ///
    /// Default: 60 000
    pub window_ms: i64,
    /// Burst tokens restored at each window reset.
    ///
    /// Default: 10
    pub burst_size: u32,
    /// Penalty growth factor per recorded violation.
    ///
    /// Default: 2.0
    pub penalty_multiplier: f64,
    /// Penalty ceiling in milliseconds.
    ///
    /// Default: 300 000
    pub max_penalty_ms: i64,
    /// Violations before the key is hard-blocked.
    ///
    /// Default: 5
    pub violations_before_block: u32,
    /// Hard-block length in milliseconds.
    ///
    /// Default: 600 000
    pub block_duration_ms: i64,
    /// Track each origin separately; `false` shares one global bucket.
    ///
    /// Default: true
    pub per_origin: bool,
    /// Suffix the key with the operation name.
    ///
    /// Default: false
    pub per_operation: bool,
    pub key_generator: Option<KeyGenerator>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_ms: 60_000,
            burst_size: 10,
            penalty_multiplier: 2.0,
            max_penalty_ms: 300_000,
            violations_before_block: 5,
            block_duration_ms: 600_000,
            per_origin: true,
            per_operation: false,
            key_generator: None,
        }
    }
}

/// The admission verdict for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    /// Over the window budget; retry after the progressive penalty.
    Limited { retry_after_ms: i64 },
    /// Hard-blocked; retry after the block expires.
    Blocked { retry_after_ms: i64 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }

    /// The retry hint, when there is one.
    pub fn retry_after_ms(&self) -> Option<i64> {
        match self {
            RateDecision::Allowed => None,
            RateDecision::Limited { retry_after_ms } | RateDecision::Blocked { retry_after_ms } => {
                Some(*retry_after_ms)
            }
        }
    }
}

#[derive(Debug)]
struct Entry {
    window_start: i64,
    count: u32,
    burst_tokens: u32,
    violations: u32,
    blocked_until: Option<i64>,
    last_seen: i64,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    /// Shared with the periodic sweep task.
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Admit or reject one request from `origin` for `operation`.
    pub async fn check(&self, origin: &str, operation: Option<&str>) -> RateDecision {
        let key = self.derive_key(origin, operation);
        self.check_at(&key, chrono::Utc::now().timestamp_millis())
            .await
    }

    fn derive_key(&self, origin: &str, operation: Option<&str>) -> String {
        let base = match (&self.config.key_generator, self.config.per_origin) {
            (Some(generate), _) => generate(origin),
            (None, true) => origin.to_string(),
            (None, false) => "global".to_string(),
        };
        match (self.config.per_operation, operation) {
            (true, Some(op)) => format!("{base}:{op}"),
            _ => base,
        }
    }

    /// Core admission step with an explicit clock, so tests are
    /// deterministic.
    async fn check_at(&self, key: &str, now: i64) -> RateDecision {
        let cfg = &self.config;
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            window_start: now,
            count: 0,
            burst_tokens: cfg.burst_size,
            violations: 0,
            blocked_until: None,
            last_seen: now,
        });
        entry.last_seen = now;

        // Hard block outlives window resets.
        if let Some(until) = entry.blocked_until {
            if until > now {
                return RateDecision::Blocked {
                    retry_after_ms: until - now,
                };
            }
            entry.blocked_until = None;
        }

        if now - entry.window_start >= cfg.window_ms {
            entry.window_start = now;
            entry.count = 0;
            entry.burst_tokens = cfg.burst_size;
        }

        if entry.burst_tokens > 0 {
            entry.burst_tokens -= 1;
            return RateDecision::Allowed;
        }

        if entry.count < cfg.max_requests {
            entry.count += 1;
            return RateDecision::Allowed;
        }

        // Budget exhausted: progressive penalty, escalating to a block.
        let penalty = (cfg.window_ms as f64 * cfg.penalty_multiplier.powi(entry.violations as i32))
            .min(cfg.max_penalty_ms as f64) as i64;
        entry.violations += 1;
        if entry.violations >= cfg.violations_before_block {
            entry.blocked_until = Some(now + cfg.block_duration_ms);
            warn!(key, violations = entry.violations, "rate-limit block armed");
        } else {
            debug!(key, violations = entry.violations, retry_after_ms = penalty, "rate limited");
        }
        RateDecision::Limited {
            retry_after_ms: penalty,
        }
    }

    /// Drop idle, unblocked entries. Returns the removed count.
    pub async fn sweep(&self) -> usize {
        sweep_entries(&self.entries, self.config.window_ms).await
    }

    /// Spawn the periodic stale-entry sweep.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let entries = self.entries.clone();
        let window_ms = self.config.window_ms;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sweep_entries(&entries, window_ms).await;
            }
        })
    }
}

/// Drop entries idle for ten windows, unless a block is still armed.
async fn sweep_entries(entries: &Mutex<HashMap<String, Entry>>, window_ms: i64) -> usize {
    let now = chrono::Utc::now().timestamp_millis();
    let stale_after = window_ms.saturating_mul(10);
    let mut entries = entries.lock().await;
    let before = entries.len();
    entries.retain(|_, e| {
        e.blocked_until.map_or(false, |until| until > now) || now - e.last_seen < stale_after
    });
    before - entries.len()
}
