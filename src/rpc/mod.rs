// SPDX-License-Identifier: MIT
//! JSON-RPC 2.0 wire types and error codes.
//!
//! The router speaks plain JSON-RPC 2.0 in both directions: requests and
//! notifications from dApp clients, requests to wallet proxies, and
//! notifications pushed back out. [`engine`] holds the bi-directional
//! dispatcher; this module holds the wire structs shared by every peer.

pub mod engine;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Error codes ─────────────────────────────────────────────────────────────
//
// Router-level codes are stable wire contract; clients match on them.
//
// unknownChain            = -32000
// invalidSession          = -32001
// insufficientPermissions = -32002
// methodNotSupported      = -32003
// walletNotAvailable      = -32004
// partialFailure          = -32005
// invalidRequest          = -32006
// walletError             = -32007

/// Malformed JSON frame.
pub const PARSE_ERROR: i64 = -32700;
/// Frame is valid JSON but not a valid JSON-RPC 2.0 message.
pub const INVALID_REQUEST: i64 = -32600;
/// No handler registered under the requested method name.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Params failed to deserialize into the handler's expected shape.
pub const INVALID_PARAMS: i64 = -32602;
/// Unexpected internal fault; always logged with context.
pub const INTERNAL_ERROR: i64 = -32603;

/// No wallet proxy is registered for the requested chain.
pub const UNKNOWN_CHAIN: i64 = -32000;
/// Session is missing, expired, revoked, or bound to a different origin.
pub const INVALID_SESSION: i64 = -32001;
/// No approved permission pattern matches the requested chain + method.
pub const INSUFFICIENT_PERMISSIONS: i64 = -32002;
/// The wallet for this chain does not support the requested method.
pub const METHOD_NOT_SUPPORTED: i64 = -32003;
/// The wallet proxy exists but is currently marked unavailable.
pub const WALLET_NOT_AVAILABLE: i64 = -32004;
/// A bulk call failed partway; `data` carries the prefix of results.
pub const PARTIAL_FAILURE: i64 = -32005;
/// Request rejected before dispatch (bad params, rate limit with retryAfter).
pub const INVALID_REQUEST_REJECTED: i64 = -32006;
/// Error originated by the wallet itself; original code/message/data preserved.
pub const WALLET_ERROR: i64 = -32007;

// ─── Wire types ──────────────────────────────────────────────────────────────

/// A JSON-RPC 2.0 request or notification (notification when `id` is absent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    /// Build an outgoing request with the given id.
    pub fn new(id: Value, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// Build a notification (no id, never answered).
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }

    /// Returns `true` when this message expects no reply.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A JSON-RPC 2.0 response. Exactly one of `result` / `error` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: RpcErrorObject) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// The `error` member of a response: `{code, message, data?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: i64, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }
}

impl std::fmt::Display for RpcErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// One inbound frame, classified.
#[derive(Debug, Clone)]
pub enum Incoming {
    /// Has `method` and `id`: a call expecting exactly one reply.
    Request(RpcRequest),
    /// Has `method`, no `id`: fire-and-forget.
    Notification(RpcRequest),
    /// Has `id`, no `method`: the reply to a call we issued.
    Response(RpcResponse),
}

/// Classify a raw text frame.
///
/// Returns `Err` with a ready-to-send error object for frames that are not
/// valid JSON-RPC 2.0 (the caller decides whether a reply is possible).
pub fn parse_incoming(text: &str) -> Result<Incoming, RpcErrorObject> {
    let value: Value = serde_json::from_str(text)
        .map_err(|_| RpcErrorObject::new(PARSE_ERROR, "Parse error"))?;

    if value.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(RpcErrorObject::new(INVALID_REQUEST, "Invalid Request"));
    }

    if value.get("method").is_some() {
        let req: RpcRequest = serde_json::from_value(value)
            .map_err(|_| RpcErrorObject::new(INVALID_REQUEST, "Invalid Request"))?;
        if req.is_notification() {
            Ok(Incoming::Notification(req))
        } else {
            Ok(Incoming::Request(req))
        }
    } else if value.get("id").is_some() {
        let resp: RpcResponse = serde_json::from_value(value)
            .map_err(|_| RpcErrorObject::new(INVALID_REQUEST, "Invalid Request"))?;
        Ok(Incoming::Response(resp))
    } else {
        Err(RpcErrorObject::new(INVALID_REQUEST, "Invalid Request"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_roundtrip() {
        let req = RpcRequest::new(json!(7), "wm_call", Some(json!({"chainId": "eip155:1"})));
        let text = serde_json::to_string(&req).unwrap();
        match parse_incoming(&text).unwrap() {
            Incoming::Request(r) => {
                assert_eq!(r.id, Some(json!(7)));
                assert_eq!(r.method, "wm_call");
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn notification_has_no_id() {
        let n = RpcRequest::notification("wm_walletStateChanged", Some(json!({"chainId": "x"})));
        let text = serde_json::to_string(&n).unwrap();
        assert!(!text.contains("\"id\""));
        assert!(matches!(
            parse_incoming(&text).unwrap(),
            Incoming::Notification(_)
        ));
    }

    #[test]
    fn response_classified_by_missing_method() {
        let text = r#"{"jsonrpc":"2.0","id":3,"result":"0x10"}"#;
        match parse_incoming(text).unwrap() {
            Incoming::Response(r) => assert_eq!(r.result, Some(json!("0x10"))),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn bad_json_is_parse_error() {
        let err = parse_incoming("{nope").unwrap_err();
        assert_eq!(err.code, PARSE_ERROR);
    }

    #[test]
    fn missing_jsonrpc_field_is_invalid_request() {
        let err = parse_incoming(r#"{"id":1,"method":"x"}"#).unwrap_err();
        assert_eq!(err.code, INVALID_REQUEST);
    }

    #[test]
    fn error_response_serializes_data() {
        let resp = RpcResponse::failure(
            json!(1),
            RpcErrorObject::with_data(INVALID_SESSION, "invalid session", json!({"reason": "expired"})),
        );
        let text = serde_json::to_string(&resp).unwrap();
        assert!(text.contains("-32001"));
        assert!(text.contains("expired"));
        assert!(!text.contains("result"));
    }
}
