// SPDX-License-Identifier: MIT
//! Router core.
//!
//! Owns every subsystem and glues them into the `wm_*` method surface:
//! each inbound request is authenticated against its session, admitted by
//! the rate limiter, authorized against the session's permission grants,
//! gated behind user approval when the method is sensitive, and finally
//! dispatched to the wallet proxy for its chain. Errors surface with the
//! stable codes from [`crate::rpc`]; nothing is swallowed.

pub mod handlers;

use crate::approval::ApprovalQueue;
use crate::autoconnect::AutoConnectStore;
use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::events::EventBroadcaster;
use crate::origin::OriginValidator;
use crate::permissions::PermissionManager;
use crate::rate_limit::RateLimiter;
use crate::rpc::engine::{MethodHandler, RequestMeta, RpcEngine};
use crate::session::security::SessionSecurity;
use crate::session::store::{
    MemorySessionStore, PersistentSessionStore, SessionStore, StoreOptions,
};
use crate::session::Session;
use crate::storage::{KeyValueStorage, MemoryStorage};
use crate::wallet::registry::WalletRegistry;
use crate::wallet::MethodCall;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

/// Every method name the router serves, in wire order.
pub const METHODS: &[&str] = &[
    "wm_connect",
    "wm_reconnect",
    "wm_disconnect",
    "wm_getPermissions",
    "wm_updatePermissions",
    "wm_call",
    "wm_bulkCall",
    "wm_getSupportedMethods",
];

/// Shared state handed to every method handler.
#[derive(Clone)]
pub struct RouterContext {
    pub config: Arc<RouterConfig>,
    pub sessions: Arc<SessionSecurity>,
    pub permissions: Arc<PermissionManager>,
    pub approvals: Arc<ApprovalQueue>,
    pub wallets: Arc<WalletRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub autoconnect: Arc<AutoConnectStore>,
}

pub struct Router {
    ctx: RouterContext,
    sweepers: Vec<tokio::task::JoinHandle<()>>,
}

impl Router {
    /// Build the router and start its maintenance sweeps.
    pub async fn new(config: RouterConfig) -> Self {
        let broadcaster = Arc::new(EventBroadcaster::new());
        let origins = Arc::new(OriginValidator::new(config.origin_validation.clone()));

        let storage: Arc<dyn KeyValueStorage> = config
            .storage
            .clone()
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));

        let store: Arc<dyn SessionStore> = match config.session_store.clone() {
            Some(store) => store,
            None => {
                let options = StoreOptions {
                    lifetime_ms: Some(config.session_security.session_timeout_ms),
                    refresh_on_access: config.session_security.track_activity,
                };
                if config.session_security.enable_persistence {
                    Arc::new(
                        PersistentSessionStore::new(
                            storage.clone(),
                            config.session_security.storage_key_prefix.clone(),
                            options,
                        )
                        .await,
                    )
                } else {
                    Arc::new(MemorySessionStore::new(options))
                }
            }
        };

        let sessions = Arc::new(SessionSecurity::new(
            config.session_security.clone(),
            store,
            origins,
        ));
        let approvals = Arc::new(ApprovalQueue::new(config.approval_queue.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let wallets = Arc::new(WalletRegistry::new(
            config.wallet_factory.clone(),
            config.proxy_config.clone(),
            broadcaster.clone(),
        ));
        let autoconnect = Arc::new(
            AutoConnectStore::new(
                storage.clone(),
                &config.session_security.storage_key_prefix,
            )
            .await,
        );
        let permissions = Arc::new(PermissionManager::new(config.permission_policy.clone()));

        let sweepers = vec![
            sessions.spawn_sweeper(),
            rate_limiter.spawn_sweeper(),
            approvals.spawn_sweeper(),
        ];

        info!("router initialized");
        Self {
            ctx: RouterContext {
                config: Arc::new(config),
                sessions,
                permissions,
                approvals,
                wallets,
                rate_limiter,
                broadcaster,
                autoconnect,
            },
            sweepers,
        }
    }

    pub fn context(&self) -> &RouterContext {
        &self.ctx
    }

    /// Register every `wm_*` method on a dApp-facing engine.
    pub fn attach(&self, engine: &Arc<RpcEngine>) {
        let dispatcher = Arc::new(RouterDispatcher {
            ctx: self.ctx.clone(),
        });
        for method in METHODS {
            engine.register_method(*method, dispatcher.clone());
        }
    }

    /// Stop the maintenance sweeps.
    pub fn shutdown(&self) {
        for sweeper in &self.sweepers {
            sweeper.abort();
        }
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Engine-facing adapter: exact method names map onto handler functions.
struct RouterDispatcher {
    ctx: RouterContext,
}

#[async_trait]
impl MethodHandler for RouterDispatcher {
    async fn handle(
        &self,
        method: &str,
        params: Value,
        meta: RequestMeta,
    ) -> Result<Value, RouterError> {
        dispatch(&self.ctx, method, params, meta).await
    }
}

/// Route one request to its handler.
pub async fn dispatch(
    ctx: &RouterContext,
    method: &str,
    params: Value,
    meta: RequestMeta,
) -> Result<Value, RouterError> {
    let outcome = match method {
        "wm_connect" => handlers::session::connect(params, &meta, ctx).await,
        "wm_reconnect" => handlers::session::reconnect(params, &meta, ctx).await,
        "wm_disconnect" => handlers::session::disconnect(params, &meta, ctx).await,
        "wm_getPermissions" => handlers::permissions::get(params, &meta, ctx).await,
        "wm_updatePermissions" => handlers::permissions::update(params, &meta, ctx).await,
        "wm_call" => handlers::call::single(params, &meta, ctx).await,
        "wm_bulkCall" => handlers::call::bulk(params, &meta, ctx).await,
        "wm_getSupportedMethods" => handlers::call::supported_methods(params, &meta, ctx).await,
        other => Err(RouterError::invalid_request(format!(
            "unknown method: {other}"
        ))),
    };
    if let Err(e) = &outcome {
        if matches!(e, RouterError::Internal(_)) {
            error!(
                component = "router",
                operation = method,
                err = %e,
                "internal error"
            );
        }
    }
    outcome
}

/// The admission gate for wallet-bound calls: session, rate, permission,
/// then approval. Returns the validated session.
///
/// `approval_key` is the JSON-RPC request id for single calls, suffixed with
/// the element index for bulk elements so each element owns its own
/// decision.
pub(crate) async fn gate(
    ctx: &RouterContext,
    meta: &RequestMeta,
    session_id: &str,
    chain_id: &str,
    call: &MethodCall,
    approval_key: String,
) -> Result<Session, RouterError> {
    let origin = meta.origin.clone().unwrap_or_default();

    // 1. Session.
    let validation = ctx.sessions.validate_session(session_id, &origin).await;
    let session = match validation.session {
        Some(session) if validation.valid => session,
        _ => {
            let reason = validation
                .reason
                .unwrap_or(crate::error::SessionFailure::NotFound);
            return Err(RouterError::InvalidSession(reason));
        }
    };

    // 2. Rate admission.
    let decision = ctx.rate_limiter.check(&origin, Some(&call.method)).await;
    if let Some(retry_after_ms) = decision.retry_after_ms() {
        let message = match decision {
            crate::rate_limit::RateDecision::Blocked { .. } => "origin is temporarily blocked",
            _ => "rate limit exceeded",
        };
        return Err(RouterError::InvalidRequest {
            message: message.to_string(),
            retry_after_ms: Some(retry_after_ms),
        });
    }

    // 3. Permission.
    if !ctx
        .permissions
        .check(session_id, chain_id, &call.method)
        .await
    {
        return Err(RouterError::InsufficientPermissions {
            chain_id: chain_id.to_string(),
            method: call.method.clone(),
        });
    }

    // 4. Approval, for sensitive methods only.
    if ctx.approvals.requires_approval(&call.method) {
        let approval_ctx = crate::approval::ApprovalContext {
            request_id: approval_key,
            chain_id: chain_id.to_string(),
            method: call.method.clone(),
            params: call.params.clone(),
            origin: meta.origin.clone(),
            session_id: Some(session_id.to_string()),
            queued_at: chrono::Utc::now().timestamp_millis(),
        };
        ctx.broadcaster.broadcast(
            "wm_approvalRequested",
            serde_json::to_value(&approval_ctx).unwrap_or(Value::Null),
        );
        let rx = ctx
            .approvals
            .enqueue(approval_ctx)
            .await
            .map_err(RouterError::invalid_request)?;
        let outcome = rx
            .await
            .map_err(|_| RouterError::internal("approval queue dropped the decision"))?;
        match outcome {
            crate::approval::ApprovalOutcome::Approved => {}
            crate::approval::ApprovalOutcome::Denied => {
                return Err(RouterError::UserRejected(
                    crate::error::RejectionReason::Denied,
                ));
            }
            crate::approval::ApprovalOutcome::TimedOut => {
                return Err(RouterError::UserRejected(
                    crate::error::RejectionReason::Timeout,
                ));
            }
        }
    }

    Ok(session)
}
