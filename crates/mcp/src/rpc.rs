//! JSON-RPC 2.0 wire types for the Model Context Protocol.
//!
//! Frames are newline-delimited JSON. Requests carry a numeric id;
//! notifications carry none.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP protocol revision advertised in the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";
pub const NOTIFICATION_INITIALIZED: &str = "notifications/initialized";

pub const CODE_INVALID_REQUEST: i64 = -32600;
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
pub const CODE_INVALID_PARAMS: i64 = -32602;
pub const CODE_PARSE_ERROR: i64 = -32700;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params: Some(params),
            id: Some(Value::from(id)),
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params: Some(params),
            id: None,
        }
    }

    /// A request carries an id; a notification does not.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Option<Value>,
}

impl RpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }

    pub fn method_not_found(id: Option<Value>, method: &str) -> Self {
        Self::error(
            id,
            CODE_METHOD_NOT_FOUND,
            format!("method '{method}' is not supported"),
        )
    }

    pub fn invalid_params(id: Option<Value>, message: impl Into<String>) -> Self {
        Self::error(id, CODE_INVALID_PARAMS, message)
    }
}

/// Normalize a JSON-RPC id to a demux key. String and numeric ids are
/// both accepted; anything else cannot be correlated.
pub fn id_key(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrip() {
        let req = RpcRequest::new(7, METHOD_TOOLS_CALL, serde_json::json!({"name": "add"}));
        let json = serde_json::to_string(&req).unwrap();
        let back: RpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.method, "tools/call");
        assert_eq!(back.id, Some(Value::from(7)));
        assert!(!back.is_notification());
    }

    #[test]
    fn notification_has_no_id() {
        let note = RpcRequest::notification(NOTIFICATION_INITIALIZED, serde_json::json!({}));
        assert!(note.is_notification());
        let json = serde_json::to_string(&note).unwrap();
        assert!(!json.contains("\"id\""));
    }

    #[test]
    fn error_response_shape() {
        let resp = RpcResponse::method_not_found(Some(Value::from(3)), "bogus/method");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["error"]["code"], CODE_METHOD_NOT_FOUND);
        assert!(json["error"]["message"].as_str().unwrap().contains("bogus/method"));
        assert!(json.get("result").is_none());
    }

    #[test]
    fn id_key_accepts_string_and_number() {
        assert_eq!(id_key(&Value::from(12)).as_deref(), Some("12"));
        assert_eq!(id_key(&Value::from("abc")).as_deref(), Some("abc"));
        assert_eq!(id_key(&Value::Null), None);
    }
}
