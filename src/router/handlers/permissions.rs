// SPDX-License-Identifier: MIT
//! Permission handlers: `wm_getPermissions`, `wm_updatePermissions`.

use super::{parse_params, require_session};
use crate::error::RouterError;
use crate::permissions::PermissionRequest;
use crate::router::RouterContext;
use crate::rpc::engine::RequestMeta;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetParams {
    session_id: String,
    chain_ids: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateParams {
    session_id: String,
    permissions: HashMap<String, Vec<String>>,
}

/// `wm_getPermissions` — the session's grants, optionally filtered by
/// chain. Read-only.
pub async fn get(
    params: Value,
    meta: &RequestMeta,
    ctx: &RouterContext,
) -> Result<Value, RouterError> {
    let p: GetParams = parse_params(params)?;
    require_session(ctx, meta, &p.session_id).await?;

    let map = ctx
        .permissions
        .get(&p.session_id, p.chain_ids.as_deref())
        .await;
    Ok(json!(map))
}

/// `wm_updatePermissions` — run the approval pipeline for additional
/// grants; returns the newly approved map.
pub async fn update(
    params: Value,
    meta: &RequestMeta,
    ctx: &RouterContext,
) -> Result<Value, RouterError> {
    let p: UpdateParams = parse_params(params)?;
    require_session(ctx, meta, &p.session_id).await?;

    let approved = ctx
        .permissions
        .approve(PermissionRequest {
            session_id: p.session_id,
            origin: meta.origin.clone(),
            requested: p.permissions,
        })
        .await;
    Ok(json!(approved))
}
