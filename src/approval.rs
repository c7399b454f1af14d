// SPDX-License-Identifier: MIT
//! Per-request user-approval queue.
//!
//! Sensitive methods block until the host resolves the pending entry keyed
//! by the JSON-RPC request id. The key choice is the whole point: two
//! concurrent sensitive requests can never share one approval decision,
//! because each request id owns exactly one entry and each entry reaches a
//! terminal state exactly once.
//!
//! Abandonment is safe by construction: the waiting future holds only the
//! receiving half of a oneshot channel, so a dropped caller leaks nothing;
//! the timeout resolves the entry and the sweep removes terminal records.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

/// How long terminal entries stay visible before the sweep removes them.
const TERMINAL_RETENTION: Duration = Duration::from_secs(60);

/// Host callback fired when an entry is enqueued or times out.
pub type ApprovalCallback = Arc<dyn Fn(&ApprovalContext) + Send + Sync>;

#[derive(Clone)]
pub struct ApprovalQueueConfig {
    /// Method names that require an explicit user decision per invocation.
    pub methods_requiring_approval: Vec<String>,
    /// Fired when a new entry lands in the queue; the host surfaces it to
    /// the user.
    pub on_approval_queued: Option<ApprovalCallback>,
    /// Fired when an entry times out unresolved.
    pub on_timeout: Option<ApprovalCallback>,
    /// Unresolved entries are denied after this long.
    ///
    /// Default: 5 minutes
    pub default_timeout: Duration,
}

impl Default for ApprovalQueueConfig {
    fn default() -> Self {
        Self {
            methods_requiring_approval: Vec::new(),
            on_approval_queued: None,
            on_timeout: None,
            default_timeout: Duration::from_secs(300),
        }
    }
}

/// One pending user decision.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalContext {
    /// The JSON-RPC request id (canonical string form); unique across
    /// in-flight requests.
    pub request_id: String,
    pub chain_id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub queued_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalState {
    Pending,
    Approved,
    Denied,
    Timeout,
}

/// What the waiting future resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Approved,
    Denied,
    TimedOut,
}

impl ApprovalOutcome {
    pub fn is_approved(&self) -> bool {
        matches!(self, ApprovalOutcome::Approved)
    }
}

struct Entry {
    ctx: ApprovalContext,
    state: ApprovalState,
    /// Completion handle; taken exactly once on resolution.
    tx: Option<oneshot::Sender<ApprovalOutcome>>,
    timeout_task: Option<tokio::task::JoinHandle<()>>,
    resolved_at: Option<std::time::Instant>,
}

pub struct ApprovalQueue {
    config: ApprovalQueueConfig,
    /// Shared with the timeout and sweep tasks, which outlive any one call.
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl ApprovalQueue {
    pub fn new(config: ApprovalQueueConfig) -> Self {
        Self {
            config,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Does `method` need a user decision before dispatch?
    pub fn requires_approval(&self, method: &str) -> bool {
        self.config
            .methods_requiring_approval
            .iter()
            .any(|m| m == method)
    }

    /// Park a request until the host decides.
    ///
    /// Fails when the request id already has an entry (pending or terminal):
    /// one id, one decision.
    pub async fn enqueue(
        &self,
        ctx: ApprovalContext,
    ) -> Result<oneshot::Receiver<ApprovalOutcome>, String> {
        let request_id = ctx.request_id.clone();
        let (tx, rx) = oneshot::channel();

        {
            let mut entries = self.entries.lock().await;
            if entries.contains_key(&request_id) {
                return Err(format!("request id {request_id} already queued"));
            }

            // Arm the timeout before the entry is visible.
            let shared = self.entries.clone();
            let config = self.config.clone();
            let timeout_id = request_id.clone();
            let timeout = self.config.default_timeout;
            let timeout_task = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                resolve_entry(&shared, &config, &timeout_id, ApprovalOutcome::TimedOut).await;
            });

            entries.insert(
                request_id.clone(),
                Entry {
                    ctx: ctx.clone(),
                    state: ApprovalState::Pending,
                    tx: Some(tx),
                    timeout_task: Some(timeout_task),
                    resolved_at: None,
                },
            );
        }

        debug!(request_id = %request_id, method = %ctx.method, "approval queued");
        if let Some(callback) = &self.config.on_approval_queued {
            callback(&ctx);
        }
        Ok(rx)
    }

    /// Record the host's decision. Returns `true` when this call performed
    /// the transition; repeats and unknown ids are logged no-ops.
    pub async fn resolve(&self, request_id: &str, approved: bool) -> bool {
        let outcome = if approved {
            ApprovalOutcome::Approved
        } else {
            ApprovalOutcome::Denied
        };
        self.resolve_internal(request_id, outcome).await
    }

    /// Treat an abandoned request as denied.
    pub async fn cancel(&self, request_id: &str) -> bool {
        self.resolve_internal(request_id, ApprovalOutcome::Denied).await
    }

    async fn resolve_internal(&self, request_id: &str, outcome: ApprovalOutcome) -> bool {
        resolve_entry(&self.entries, &self.config, request_id, outcome).await
    }

    /// Current state for a request id, if the entry has not been swept.
    pub async fn state_of(&self, request_id: &str) -> Option<ApprovalState> {
        self.entries
            .lock()
            .await
            .get(request_id)
            .map(|e| e.state)
    }

    pub async fn pending_count(&self) -> usize {
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.state == ApprovalState::Pending)
            .count()
    }

    /// Pending contexts, oldest first, for host UIs that want a listing.
    pub async fn pending(&self) -> Vec<ApprovalContext> {
        let entries = self.entries.lock().await;
        let mut out: Vec<ApprovalContext> = entries
            .values()
            .filter(|e| e.state == ApprovalState::Pending)
            .map(|e| e.ctx.clone())
            .collect();
        out.sort_by_key(|c| c.queued_at);
        out
    }

    /// Remove terminal entries past the retention window.
    pub async fn sweep(&self) -> usize {
        sweep_entries(&self.entries).await
    }

    /// Spawn the periodic terminal-entry sweep.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let entries = self.entries.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                sweep_entries(&entries).await;
            }
        })
    }
}

/// The single transition point: `pending → approved | denied | timeout`,
/// exactly once per entry. Shared by direct resolution and the timeout task.
async fn resolve_entry(
    entries: &Mutex<HashMap<String, Entry>>,
    config: &ApprovalQueueConfig,
    request_id: &str,
    outcome: ApprovalOutcome,
) -> bool {
    let mut entries = entries.lock().await;
    let Some(entry) = entries.get_mut(request_id) else {
        warn!(request_id, "approval resolution for unknown request id — ignored");
        return false;
    };
    if entry.state != ApprovalState::Pending {
        warn!(
            request_id,
            state = ?entry.state,
            "approval already resolved — ignored"
        );
        return false;
    }

    entry.state = match outcome {
        ApprovalOutcome::Approved => ApprovalState::Approved,
        ApprovalOutcome::Denied => ApprovalState::Denied,
        ApprovalOutcome::TimedOut => ApprovalState::Timeout,
    };
    entry.resolved_at = Some(std::time::Instant::now());
    if let Some(task) = entry.timeout_task.take() {
        if outcome != ApprovalOutcome::TimedOut {
            task.abort();
        }
    }
    if let Some(tx) = entry.tx.take() {
        // A dropped receiver means the caller went away; entry state is
        // still recorded for observability.
        let _ = tx.send(outcome);
    }

    info!(request_id, outcome = ?outcome, "approval resolved");
    if outcome == ApprovalOutcome::TimedOut {
        if let Some(callback) = &config.on_timeout {
            callback(&entry.ctx);
        }
    }
    true
}

/// Drop terminal entries past the retention window.
async fn sweep_entries(entries: &Mutex<HashMap<String, Entry>>) -> usize {
    let mut entries = entries.lock().await;
    let before = entries.len();
    entries.retain(|_, e| match e.resolved_at {
        Some(at) => at.elapsed() < TERMINAL_RETENTION,
        None => true,
    });
    before - entries.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(request_id: &str) -> ApprovalContext {
        ApprovalContext {
            request_id: request_id.to_string(),
            chain_id: "eip155:1".to_string(),
            method: "eth_sendTransaction".to_string(),
            params: None,
            origin: Some("https://app.example".to_string()),
            session_id: Some("s1".to_string()),
            queued_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    fn queue(config: ApprovalQueueConfig) -> Arc<ApprovalQueue> {
        Arc::new(ApprovalQueue::new(config))
    }

    #[tokio::test]
    async fn approve_completes_the_future() {
        let q = queue(ApprovalQueueConfig::default());
        let rx = q.enqueue(ctx("r1")).await.unwrap();

        assert!(q.resolve("r1", true).await);
        assert_eq!(rx.await.unwrap(), ApprovalOutcome::Approved);
        assert_eq!(q.state_of("r1").await, Some(ApprovalState::Approved));
    }

    #[tokio::test]
    async fn duplicate_request_ids_are_rejected() {
        let q = queue(ApprovalQueueConfig::default());
        let _rx = q.enqueue(ctx("r1")).await.unwrap();
        assert!(q.enqueue(ctx("r1")).await.is_err());
    }

    #[tokio::test]
    async fn resolution_is_exactly_once() {
        let q = queue(ApprovalQueueConfig::default());
        let rx = q.enqueue(ctx("r1")).await.unwrap();

        assert!(q.resolve("r1", false).await);
        // Repeats are no-ops, whatever the answer.
        assert!(!q.resolve("r1", true).await);
        assert!(!q.cancel("r1").await);

        assert_eq!(rx.await.unwrap(), ApprovalOutcome::Denied);
        assert_eq!(q.state_of("r1").await, Some(ApprovalState::Denied));
    }

    #[tokio::test]
    async fn concurrent_entries_resolve_independently() {
        let q = queue(ApprovalQueueConfig::default());
        let rx1 = q.enqueue(ctx("r1")).await.unwrap();
        let rx2 = q.enqueue(ctx("r2")).await.unwrap();
        assert_eq!(q.pending_count().await, 2);

        q.resolve("r1", true).await;
        q.resolve("r2", false).await;

        assert_eq!(rx1.await.unwrap(), ApprovalOutcome::Approved);
        assert_eq!(rx2.await.unwrap(), ApprovalOutcome::Denied);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_denies_and_fires_callback() {
        let timed_out = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let timed_out2 = timed_out.clone();
        let q = queue(ApprovalQueueConfig {
            default_timeout: Duration::from_secs(5),
            on_timeout: Some(Arc::new(move |_ctx| {
                timed_out2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            })),
            ..Default::default()
        });

        let rx = q.enqueue(ctx("r1")).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(rx.await.unwrap(), ApprovalOutcome::TimedOut);
        assert_eq!(q.state_of("r1").await, Some(ApprovalState::Timeout));
        assert_eq!(timed_out.load(std::sync::atomic::Ordering::SeqCst), 1);

        // A late host decision is a no-op.
        assert!(!q.resolve("r1", true).await);
    }

    #[tokio::test]
    async fn queued_callback_fires_with_the_context() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let q = queue(ApprovalQueueConfig {
            on_approval_queued: Some(Arc::new(move |ctx: &ApprovalContext| {
                seen2.lock().unwrap().push(ctx.request_id.clone());
            })),
            ..Default::default()
        });

        let _rx = q.enqueue(ctx("r1")).await.unwrap();
        assert_eq!(seen.lock().unwrap().as_slice(), ["r1"]);
    }

    #[tokio::test]
    async fn dropped_caller_leaks_nothing() {
        let q = queue(ApprovalQueueConfig::default());
        let rx = q.enqueue(ctx("r1")).await.unwrap();
        drop(rx);

        // Resolution still transitions the entry; nothing panics.
        assert!(q.resolve("r1", true).await);
        assert_eq!(q.state_of("r1").await, Some(ApprovalState::Approved));
    }

    #[tokio::test]
    async fn requires_approval_is_exact_name_match() {
        let q = queue(ApprovalQueueConfig {
            methods_requiring_approval: vec!["eth_sendTransaction".to_string()],
            ..Default::default()
        });
        assert!(q.requires_approval("eth_sendTransaction"));
        assert!(!q.requires_approval("eth_call"));
        assert!(!q.requires_approval("eth_sendTransaction2"));
    }
}
