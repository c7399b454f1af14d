// SPDX-License-Identifier: MIT
//! Wallet dispatch handlers: `wm_call`, `wm_bulkCall`,
//! `wm_getSupportedMethods`.

use super::parse_params;
use crate::error::RouterError;
use crate::router::{gate, RouterContext};
use crate::rpc::engine::RequestMeta;
use crate::rpc::RpcErrorObject;
use crate::wallet::MethodCall;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallParams {
    chain_id: String,
    session_id: String,
    call: MethodCall,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkCallParams {
    chain_id: String,
    session_id: String,
    calls: Vec<MethodCall>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SupportedMethodsParams {
    chain_ids: Option<Vec<String>>,
}

/// `wm_call` — the full gate chain, then one wallet dispatch.
///
/// Params: `{ chainId, sessionId, call: { method, params? } }`
/// Returns: the wallet's result, passed through untouched.
pub async fn single(
    params: Value,
    meta: &RequestMeta,
    ctx: &RouterContext,
) -> Result<Value, RouterError> {
    let p: CallParams = parse_params(params)?;
    gate(ctx, meta, &p.session_id, &p.chain_id, &p.call, meta.id_key()).await?;
    ctx.wallets.dispatch(&p.chain_id, &p.call).await
}

/// `wm_bulkCall` — strictly sequential dispatch with per-element gating.
///
/// Every element passes the whole gate chain (each sensitive element gets
/// its own approval entry, keyed `requestId:index`) before it runs; the
/// first failure stops execution and reports the prefix of results as
/// `partialFailure`.
///
/// Params: `{ chainId, sessionId, calls: [{ method, params? }] }`
/// Returns: the array of results, in submission order.
pub async fn bulk(
    params: Value,
    meta: &RequestMeta,
    ctx: &RouterContext,
) -> Result<Value, RouterError> {
    let p: BulkCallParams = parse_params(params)?;
    let mut results: Vec<Value> = Vec::with_capacity(p.calls.len());

    for (index, call) in p.calls.iter().enumerate() {
        let approval_key = format!("{}:{}", meta.id_key(), index);
        let element = async {
            gate(ctx, meta, &p.session_id, &p.chain_id, call, approval_key).await?;
            ctx.wallets.dispatch(&p.chain_id, call).await
        };
        match element.await {
            Ok(value) => results.push(value),
            Err(e) => {
                return Err(RouterError::PartialFailure {
                    results,
                    failed_index: index,
                    error: inner_error(e),
                });
            }
        }
    }
    Ok(json!(results))
}

/// The error carried inside `partialFailure.data`. Wallet errors keep
/// their original object; router-side failures use their wire form.
fn inner_error(e: RouterError) -> RpcErrorObject {
    match e {
        RouterError::Wallet {
            code,
            message,
            data,
        } => RpcErrorObject {
            code,
            message,
            data,
        },
        other => other.to_error_object(),
    }
}

/// `wm_getSupportedMethods` — aggregate wallet capability lists.
///
/// Params: `{ chainIds? }`
/// Returns: `{ chainId: [method] }`
pub async fn supported_methods(
    params: Value,
    _meta: &RequestMeta,
    ctx: &RouterContext,
) -> Result<Value, RouterError> {
    let p: SupportedMethodsParams = if params.is_null() {
        SupportedMethodsParams { chain_ids: None }
    } else {
        parse_params(params)?
    };
    let map = ctx.wallets.supported_methods(p.chain_ids.as_deref()).await;
    Ok(json!(map))
}
