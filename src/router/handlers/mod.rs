// SPDX-License-Identifier: MIT
//! `wm_*` method handlers, grouped by area.

pub mod call;
pub mod permissions;
pub mod session;

use crate::error::{RouterError, SessionFailure};
use crate::rate_limit::RateDecision;
use crate::router::RouterContext;
use crate::rpc::engine::RequestMeta;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Deserialize handler params, mapping failures to `invalidRequest`.
pub(crate) fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, RouterError> {
    serde_json::from_value(params)
        .map_err(|e| RouterError::invalid_request(format!("invalid params: {e}")))
}

/// The request origin; required for everything session-bound.
pub(crate) fn require_origin(meta: &RequestMeta) -> Result<String, RouterError> {
    meta.origin
        .clone()
        .ok_or_else(|| RouterError::invalid_request("request origin is required"))
}

/// Rate-admit one operation for `origin`, outside the full gate chain
/// (session creation, reconnects).
pub(crate) async fn admit(
    ctx: &RouterContext,
    origin: &str,
    operation: &str,
) -> Result<(), RouterError> {
    let decision = ctx.rate_limiter.check(origin, Some(operation)).await;
    match decision.retry_after_ms() {
        None => Ok(()),
        Some(retry_after_ms) => {
            let message = match decision {
                RateDecision::Blocked { .. } => "origin is temporarily blocked",
                _ => "rate limit exceeded",
            };
            Err(RouterError::InvalidRequest {
                message: message.to_string(),
                retry_after_ms: Some(retry_after_ms),
            })
        }
    }
}

/// Validate a session for handlers that read or mutate it without running
/// the full gate chain.
pub(crate) async fn require_session(
    ctx: &RouterContext,
    meta: &RequestMeta,
    session_id: &str,
) -> Result<crate::session::Session, RouterError> {
    let origin = meta.origin.clone().unwrap_or_default();
    let validation = ctx.sessions.validate_session(session_id, &origin).await;
    match validation.session {
        Some(session) if validation.valid => Ok(session),
        _ => Err(RouterError::InvalidSession(
            validation.reason.unwrap_or(SessionFailure::NotFound),
        )),
    }
}
