// SPDX-License-Identifier: MIT
//! Router configuration.
//!
//! Every recognized option is an explicit struct field with its default
//! filled by `Default`; subsystem-specific knobs live next to their
//! subsystem ([`SessionSecurityConfig`], [`OriginValidatorConfig`],
//! [`RateLimitConfig`], [`ApprovalQueueConfig`]) and are aggregated here.

use crate::approval::ApprovalQueueConfig;
use crate::origin::OriginValidatorConfig;
use crate::permissions::PermissionPolicy;
use crate::rate_limit::RateLimitConfig;
use crate::session::security::SessionSecurityConfig;
use crate::session::store::SessionStore;
use crate::storage::KeyValueStorage;
use crate::wallet::registry::WalletFactory;
use crate::wallet::ProxyConfig;
use std::sync::Arc;

/// Fired after a session is created: `(session_id, origin)`.
pub type SessionCreatedCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;
/// Fired after a session is deleted: `(session_id)`.
pub type SessionDeletedCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
pub struct RouterConfig {
    /// Session store instance. `None` builds one from
    /// `session_security.enable_persistence`: persistent over `storage`
    /// when on, plain memory when off.
    pub session_store: Option<Arc<dyn SessionStore>>,
    /// Key-value storage backing persisted sessions and auto-connect
    /// preferences. `None` uses in-process memory.
    pub storage: Option<Arc<dyn KeyValueStorage>>,
    /// Per-frame debug logging on the dApp-facing engines.
    pub debug: bool,
    /// Base config inherited by every per-chain wallet proxy (`chainId` is
    /// injected by the registry).
    pub proxy_config: ProxyConfig,
    /// Builds wallet clients on first use for chains without an explicit
    /// registration.
    pub wallet_factory: Option<WalletFactory>,
    /// Approval pipeline for permission requests; `None` grants as
    /// requested.
    pub permission_policy: Option<PermissionPolicy>,
    pub on_session_created: Option<SessionCreatedCallback>,
    pub on_session_deleted: Option<SessionDeletedCallback>,
    pub approval_queue: ApprovalQueueConfig,
    pub session_security: SessionSecurityConfig,
    pub origin_validation: OriginValidatorConfig,
    pub rate_limit: RateLimitConfig,
}
