//! RPC wire-format types.
//!
//! Requests are `{"id", "method", "params"}`; responses are `{"id",
//! "result"}` on success or `{"id", "error": {"code", "message", "data"?}}`
//! on failure. Error codes are small integers from the shared
//! [`weld_core::ErrorCode`] enumeration, carried end-to-end so callers
//! branch on specific conditions rather than message strings.
//!
//! A request without an `id` is a notification — no response is expected.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use weld_core::WireError;

/// Payload-free notification announcing that the serving side restarted.
///
/// Receivers react by re-synchronizing their event state against the
/// producer's log.
pub const RESTARTED_METHOD: &str = "service.restarted";

/// An RPC request or notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Correlation id; absent for notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Method name (e.g. `session.get`).
    pub method: String,
    /// Optional parameters object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// An RPC response, correlated to its request by `id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Echoed correlation id.
    pub id: u64,
    /// Result payload (success).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload (failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl RpcRequest {
    /// Build a request expecting a response.
    #[must_use]
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// Build a notification (no response expected).
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: None,
            method: method.into(),
            params,
        }
    }
}

impl RpcResponse {
    /// Build a success response.
    #[must_use]
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response.
    #[must_use]
    pub fn error(id: u64, error: WireError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weld_core::ErrorCode;

    // ── RpcRequest serde ────────────────────────────────────────────

    #[test]
    fn request_roundtrip_with_params() {
        let req = RpcRequest::new(7, "session.get", Some(json!({"minFreshSecs": 30})));
        let json = serde_json::to_string(&req).unwrap();
        let back: RpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn request_without_params_omits_field() {
        let req = RpcRequest::new(1, "session.get", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("params"));
    }

    #[test]
    fn notification_omits_id() {
        let req = RpcRequest::notification(RESTARTED_METHOD, None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("id"));
        let back: RpcRequest = serde_json::from_str(&json).unwrap();
        assert!(back.id.is_none());
        assert_eq!(back.method, "service.restarted");
    }

    // ── RpcResponse serde ───────────────────────────────────────────

    #[test]
    fn success_response_has_no_error_field() {
        let resp = RpcResponse::success(3, json!({"ok": true}));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("error"));
        let v: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["id"], 3);
        assert_eq!(v["result"]["ok"], true);
    }

    #[test]
    fn error_response_has_no_result_field() {
        let resp = RpcResponse::error(4, WireError::signed_out());
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("result"));
        let v: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["error"]["code"], ErrorCode::SignedOut.as_wire());
    }

    #[test]
    fn error_code_travels_as_integer() {
        let resp = RpcResponse::error(9, WireError::new(ErrorCode::WalletMismatch, "wrong wallet"));
        let v: Value = serde_json::to_value(&resp).unwrap();
        assert!(v["error"]["code"].is_i64());
        let back: RpcResponse = serde_json::from_value(v).unwrap();
        assert_eq!(back.error.unwrap().code(), ErrorCode::WalletMismatch);
    }

    // ── Wire format fixtures ────────────────────────────────────────

    #[test]
    fn wire_format_request() {
        let raw = r#"{"id": 12, "method": "session.get", "params": {"noCache": true}}"#;
        let req: RpcRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.id, Some(12));
        assert_eq!(req.method, "session.get");
        assert_eq!(req.params.unwrap()["noCache"], true);
    }

    #[test]
    fn wire_format_success_response() {
        let raw = r#"{"id": 12, "result": {"status": "active"}}"#;
        let resp: RpcResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.id, 12);
        assert_eq!(resp.result.unwrap()["status"], "active");
        assert!(resp.error.is_none());
    }

    #[test]
    fn wire_format_error_response() {
        let raw = r#"{"id": 12, "error": {"code": 11, "message": "account is signed out"}}"#;
        let resp: RpcResponse = serde_json::from_str(raw).unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code(), ErrorCode::SignedOut);
        assert_eq!(err.message, "account is signed out");
    }

    #[test]
    fn wire_format_error_with_data() {
        let raw = r#"{"id": 1, "error": {"code": 12, "message": "mismatch", "data": {"expected": "0xabc"}}}"#;
        let resp: RpcResponse = serde_json::from_str(raw).unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.data.unwrap()["expected"], "0xabc");
    }

    #[test]
    fn wire_format_restart_notification() {
        let raw = r#"{"method": "service.restarted"}"#;
        let req: RpcRequest = serde_json::from_str(raw).unwrap();
        assert!(req.id.is_none());
        assert_eq!(req.method, RESTARTED_METHOD);
        assert!(req.params.is_none());
    }
}
