// SPDX-License-Identifier: MIT
//! Session lifecycle handlers: `wm_connect`, `wm_reconnect`,
//! `wm_disconnect`.

use super::{admit, parse_params, require_origin};
use crate::error::{RouterError, SessionFailure};
use crate::permissions::PermissionRequest;
use crate::router::RouterContext;
use crate::rpc::engine::RequestMeta;
use crate::session::CreateSessionRequest;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::debug;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectParams {
    /// chain id → requested method patterns.
    #[serde(default)]
    permissions: HashMap<String, Vec<String>>,
    wallet_id: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReconnectParams {
    session_id: String,
    /// When plain validation fails, a recovery token reinstates the
    /// session if it is still within the recovery window.
    recovery_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisconnectParams {
    session_id: String,
}

/// `wm_connect` — create a session and run the permission approval
/// pipeline.
///
/// Params: `{ permissions: { chainId: [methodPattern] }, walletId?, metadata? }`
/// Returns: `{ sessionId, permissions }`
pub async fn connect(
    params: Value,
    meta: &RequestMeta,
    ctx: &RouterContext,
) -> Result<Value, RouterError> {
    let p: ConnectParams = parse_params(params)?;
    let origin = require_origin(meta)?;

    // Session creation is rate-gated like any other operation.
    admit(ctx, &origin, "wm_connect").await?;

    let mut authorized_chains: Vec<String> = p.permissions.keys().cloned().collect();
    authorized_chains.sort();

    let session = ctx
        .sessions
        .create_session(CreateSessionRequest {
            origin: origin.clone(),
            wallet_id: p.wallet_id,
            authorized_chains,
            metadata: p.metadata,
        })
        .await?;

    let approved = ctx
        .permissions
        .approve(PermissionRequest {
            session_id: session.id.clone(),
            origin: Some(origin.clone()),
            requested: p.permissions,
        })
        .await;

    if let Some(callback) = &ctx.config.on_session_created {
        callback(&session.id, &origin);
    }

    Ok(json!({
        "sessionId": session.id,
        "permissions": approved,
    }))
}

/// `wm_reconnect` — revalidate a stored session, falling back to the
/// recovery token when one is supplied.
///
/// Params: `{ sessionId, recoveryToken? }`
/// Returns: `{ status: bool, permissions }` — `status: false` with empty
/// permissions when the session cannot be reinstated.
pub async fn reconnect(
    params: Value,
    meta: &RequestMeta,
    ctx: &RouterContext,
) -> Result<Value, RouterError> {
    let p: ReconnectParams = parse_params(params)?;
    let origin = require_origin(meta)?;
    admit(ctx, &origin, "wm_reconnect").await?;

    let validation = ctx.sessions.validate_session(&p.session_id, &origin).await;
    if validation.valid {
        let permissions = ctx.permissions.get(&p.session_id, None).await;
        return Ok(json!({ "status": true, "permissions": permissions }));
    }

    if let Some(token) = p.recovery_token.as_deref() {
        if let Some(session) = ctx.sessions.recover_session(token, &origin).await {
            let permissions = ctx.permissions.get(&session.id, None).await;
            return Ok(json!({ "status": true, "permissions": permissions }));
        }
    }

    debug!(
        session_id = %p.session_id,
        reason = ?validation.reason,
        "reconnect refused"
    );
    Ok(json!({ "status": false, "permissions": {} }))
}

/// `wm_disconnect` — revoke the session and cascade cleanup.
///
/// Params: `{ sessionId }`
/// Returns: `true`. Idempotent: a session that is already gone still
/// returns `true`, but a live session bound to a different origin is
/// refused.
pub async fn disconnect(
    params: Value,
    meta: &RequestMeta,
    ctx: &RouterContext,
) -> Result<Value, RouterError> {
    let p: DisconnectParams = parse_params(params)?;
    let origin = meta.origin.clone().unwrap_or_default();

    // A foreign origin must not be able to tear down someone else's
    // session.
    let validation = ctx.sessions.validate_session(&p.session_id, &origin).await;
    if validation.reason == Some(SessionFailure::OriginMismatch) {
        return Err(RouterError::InvalidSession(SessionFailure::OriginMismatch));
    }

    if ctx.sessions.revoke_session(&p.session_id).await {
        ctx.permissions.cleanup(&p.session_id).await;
        ctx.broadcaster.broadcast(
            "wm_sessionTerminated",
            json!({ "sessionId": p.session_id, "reason": "disconnected" }),
        );
        if let Some(callback) = &ctx.config.on_session_deleted {
            callback(&p.session_id);
        }
    }
    Ok(json!(true))
}
