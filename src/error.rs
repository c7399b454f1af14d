// SPDX-License-Identifier: MIT
//! Router error taxonomy.
//!
//! Every failure a handler can produce maps to a stable JSON-RPC error code
//! (see the constant block in [`crate::rpc`]). Recoverable categories carry
//! `data.recoverable = true` so a UI can offer a retry; rate errors carry
//! `data.retryAfter` in milliseconds.

use crate::rpc::{self, RpcErrorObject};
use serde_json::{json, Value};

/// Why a session failed validation. Serialized as snake_case reason strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFailure {
    NotFound,
    Expired,
    Revoked,
    OriginMismatch,
}

impl SessionFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionFailure::NotFound => "not_found",
            SessionFailure::Expired => "expired",
            SessionFailure::Revoked => "revoked",
            SessionFailure::OriginMismatch => "origin_mismatch",
        }
    }
}

/// How an approval request ended without being granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    /// The user explicitly denied the request.
    Denied,
    /// No decision arrived before the approval timeout.
    Timeout,
}

/// All errors the router core surfaces to callers.
///
/// The `Display` string doubles as the JSON-RPC `message`; `code()` and
/// `data()` complete the wire mapping.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RouterError {
    #[error("unknown chain: {0}")]
    UnknownChain(String),

    #[error("invalid session: {0:?}")]
    InvalidSession(SessionFailure),

    #[error("insufficient permissions for {chain_id}:{method}")]
    InsufficientPermissions { chain_id: String, method: String },

    #[error("method not supported: {0}")]
    MethodNotSupported(String),

    #[error("wallet not available for chain {0}")]
    WalletNotAvailable(String),

    /// A bulk call failed at `failed_index`; `results` is the prefix of
    /// successful results, `error` the failing call's error unchanged.
    #[error("bulk call failed at index {failed_index}")]
    PartialFailure {
        results: Vec<Value>,
        failed_index: usize,
        error: RpcErrorObject,
    },

    /// Request rejected before dispatch. Carries `retryAfter` when the
    /// rejection came from the rate limiter.
    #[error("{message}")]
    InvalidRequest {
        message: String,
        retry_after_ms: Option<i64>,
    },

    /// The wallet itself returned an error; original code/message/data are
    /// preserved under `data`.
    #[error("{message}")]
    Wallet {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// The user declined (or never answered) an approval prompt.
    #[error("user rejected the request")]
    UserRejected(RejectionReason),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RouterError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        RouterError::InvalidRequest {
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        RouterError::Internal(message.into())
    }

    /// The stable JSON-RPC error code for this error.
    pub fn code(&self) -> i64 {
        match self {
            RouterError::UnknownChain(_) => rpc::UNKNOWN_CHAIN,
            RouterError::InvalidSession(_) => rpc::INVALID_SESSION,
            RouterError::InsufficientPermissions { .. } => rpc::INSUFFICIENT_PERMISSIONS,
            RouterError::MethodNotSupported(_) => rpc::METHOD_NOT_SUPPORTED,
            RouterError::WalletNotAvailable(_) => rpc::WALLET_NOT_AVAILABLE,
            RouterError::PartialFailure { .. } => rpc::PARTIAL_FAILURE,
            RouterError::InvalidRequest { .. } => rpc::INVALID_REQUEST_REJECTED,
            RouterError::Wallet { .. } => rpc::WALLET_ERROR,
            RouterError::UserRejected(_) => rpc::WALLET_ERROR,
            RouterError::Internal(_) => rpc::INTERNAL_ERROR,
        }
    }

    /// Build the wire error object: `{code, message, data?}`.
    pub fn to_error_object(&self) -> RpcErrorObject {
        let message = match self {
            RouterError::InvalidSession(failure) => {
                format!("invalid session: {}", failure.as_str())
            }
            RouterError::UserRejected(RejectionReason::Timeout) => {
                "approval timed out".to_string()
            }
            other => other.to_string(),
        };
        match self.data() {
            Some(data) => RpcErrorObject::with_data(self.code(), message, data),
            None => RpcErrorObject::new(self.code(), message),
        }
    }

    /// The `data` member, when this error carries one.
    fn data(&self) -> Option<Value> {
        match self {
            RouterError::InvalidSession(failure) => Some(json!({
                "reason": failure.as_str(),
            })),
            RouterError::InsufficientPermissions { chain_id, method } => Some(json!({
                "chainId": chain_id,
                "method": method,
            })),
            RouterError::PartialFailure {
                results,
                failed_index,
                error,
            } => Some(json!({
                "results": results,
                "failedIndex": failed_index,
                "error": error,
            })),
            RouterError::InvalidRequest { retry_after_ms, .. } => retry_after_ms.map(|ms| {
                json!({
                    "retryAfter": ms,
                    "recoverable": true,
                })
            }),
            RouterError::Wallet { code, message, data } => Some(json!({
                "code": code,
                "message": message,
                "data": data,
            })),
            RouterError::UserRejected(reason) => Some(json!({
                // 4001 is the EIP-1193 user-rejection code wallets themselves use.
                "code": 4001,
                "reason": match reason {
                    RejectionReason::Denied => "denied",
                    RejectionReason::Timeout => "timeout",
                },
                "recoverable": true,
            })),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(RouterError::UnknownChain("x".into()).code(), -32000);
        assert_eq!(
            RouterError::InvalidSession(SessionFailure::Expired).code(),
            -32001
        );
        assert_eq!(
            RouterError::InsufficientPermissions {
                chain_id: "eip155:1".into(),
                method: "eth_call".into()
            }
            .code(),
            -32002
        );
        assert_eq!(RouterError::MethodNotSupported("m".into()).code(), -32003);
        assert_eq!(RouterError::WalletNotAvailable("c".into()).code(), -32004);
        assert_eq!(RouterError::invalid_request("bad").code(), -32006);
        assert_eq!(RouterError::internal("boom").code(), -32603);
    }

    #[test]
    fn partial_failure_data_carries_prefix_and_error() {
        let err = RouterError::PartialFailure {
            results: vec![json!("0x1")],
            failed_index: 1,
            error: RpcErrorObject::new(-32003, "nope"),
        };
        let obj = err.to_error_object();
        assert_eq!(obj.code, -32005);
        let data = obj.data.unwrap();
        assert_eq!(data["failedIndex"], json!(1));
        assert_eq!(data["results"], json!(["0x1"]));
        assert_eq!(data["error"]["code"], json!(-32003));
        assert_eq!(data["error"]["message"], json!("nope"));
    }

    #[test]
    fn rate_rejection_is_recoverable_with_retry_after() {
        let err = RouterError::InvalidRequest {
            message: "rate limit exceeded".into(),
            retry_after_ms: Some(2000),
        };
        let obj = err.to_error_object();
        assert_eq!(obj.code, -32006);
        let data = obj.data.unwrap();
        assert_eq!(data["retryAfter"], json!(2000));
        assert_eq!(data["recoverable"], json!(true));
    }

    #[test]
    fn user_rejection_uses_wallet_error_code() {
        let obj = RouterError::UserRejected(RejectionReason::Denied).to_error_object();
        assert_eq!(obj.code, -32007);
        assert_eq!(obj.data.unwrap()["code"], json!(4001));
    }

    #[test]
    fn wallet_error_preserves_original_payload() {
        let err = RouterError::Wallet {
            code: -32601,
            message: "no such method".into(),
            data: Some(json!({"method": "eth_foo"})),
        };
        let obj = err.to_error_object();
        assert_eq!(obj.code, -32007);
        let data = obj.data.unwrap();
        assert_eq!(data["code"], json!(-32601));
        assert_eq!(data["message"], json!("no such method"));
        assert_eq!(data["data"]["method"], json!("eth_foo"));
    }
}
