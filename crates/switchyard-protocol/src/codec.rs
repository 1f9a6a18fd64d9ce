//! Message codec: bytes to classified JSON-RPC messages and back.
//!
//! Classification is by field presence, not by trial deserialization, so
//! structural errors produce precise messages:
//!
//! | fields present              | kind         |
//! |-----------------------------|--------------|
//! | `method` + non-null `id`    | Request      |
//! | `method` only               | Notification |
//! | `id` + `result` XOR `error` | Response     |
//!
//! Everything else, including batches, is a protocol violation.

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::error::{McpError, McpResult};
use crate::jsonrpc::{
    JSONRPC_VERSION, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, MessageId,
};

/// Decode one frame into a message
pub fn decode(bytes: &[u8]) -> McpResult<JsonRpcMessage> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| McpError::parse_error(format!("invalid JSON: {e}")))?;
    classify(value)
}

/// Classify an already-parsed JSON value
pub fn classify(value: Value) -> McpResult<JsonRpcMessage> {
    let obj = match value {
        Value::Object(obj) => obj,
        Value::Array(_) => {
            return Err(McpError::protocol_violation("batched messages are not supported"));
        }
        other => {
            return Err(McpError::protocol_violation(format!(
                "message must be a JSON object, got {}",
                type_name(&other)
            )));
        }
    };

    match obj.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => {}
        Some(v) => {
            return Err(McpError::protocol_violation(format!(
                "unsupported JSON-RPC version '{v}'"
            )));
        }
        None => return Err(McpError::protocol_violation("missing 'jsonrpc' field")),
    }

    let has_method = obj.contains_key("method");
    let has_id = obj.get("id").is_some_and(|id| !id.is_null());
    let has_result = obj.contains_key("result");
    let has_error = obj.contains_key("error");

    if has_method {
        if has_result || has_error {
            return Err(McpError::protocol_violation(
                "message carries both 'method' and a response payload",
            ));
        }
        if !obj.get("method").is_some_and(Value::is_string) {
            return Err(McpError::protocol_violation("'method' must be a string"));
        }
        if let Some(params) = obj.get("params")
            && !(params.is_object() || params.is_array() || params.is_null())
        {
            return Err(McpError::protocol_violation("'params' must be an object or array"));
        }
        return if has_id {
            from_map::<JsonRpcRequest>(obj).map(JsonRpcMessage::Request)
        } else {
            from_map::<JsonRpcNotification>(obj).map(JsonRpcMessage::Notification)
        };
    }

    if obj.contains_key("id") {
        return match (has_result, has_error) {
            (true, false) | (false, true) => from_map::<JsonRpcResponse>(obj).map(JsonRpcMessage::Response),
            (true, true) => Err(McpError::protocol_violation(
                "response carries both 'result' and 'error'",
            )),
            (false, false) => Err(McpError::protocol_violation(
                "response carries neither 'result' nor 'error'",
            )),
        };
    }

    Err(McpError::protocol_violation(
        "message is neither a request, a response nor a notification",
    ))
}

fn from_map<T: serde::de::DeserializeOwned>(obj: Map<String, Value>) -> McpResult<T> {
    serde_json::from_value(Value::Object(obj))
        .map_err(|e| McpError::protocol_violation(format!("malformed message: {e}")))
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Encode a message to one frame (no trailing delimiter)
pub fn encode(message: &JsonRpcMessage) -> McpResult<Bytes> {
    serde_json::to_vec(message)
        .map(Bytes::from)
        .map_err(|e| McpError::internal(format!("failed to encode message: {e}")))
}

/// Best-effort extraction of a request id from a frame that failed to decode,
/// so the error response can still be correlated.
pub fn salvage_request_id(bytes: &[u8]) -> Option<MessageId> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    let obj = value.as_object()?;
    obj.get("method")?;
    serde_json::from_value(obj.get("id")?.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn bytes(v: Value) -> Vec<u8> {
        serde_json::to_vec(&v).unwrap()
    }

    #[test]
    fn test_classifies_three_kinds() {
        let req = decode(&bytes(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))).unwrap();
        assert!(matches!(req, JsonRpcMessage::Request(ref r) if r.id == MessageId::Number(1)));

        let note = decode(&bytes(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))).unwrap();
        assert!(matches!(note, JsonRpcMessage::Notification(_)));

        let resp = decode(&bytes(json!({"jsonrpc": "2.0", "id": "a", "result": {}}))).unwrap();
        assert!(matches!(resp, JsonRpcMessage::Response(_)));

        let err = decode(&bytes(
            json!({"jsonrpc": "2.0", "id": 3, "error": {"code": -32601, "message": "x"}}),
        ))
        .unwrap();
        assert!(matches!(err, JsonRpcMessage::Response(ref r) if r.is_error()));
    }

    #[test]
    fn test_null_id_with_method_is_notification() {
        let msg = decode(&bytes(json!({"jsonrpc": "2.0", "id": null, "method": "x"}))).unwrap();
        assert!(matches!(msg, JsonRpcMessage::Notification(_)));
    }

    #[test]
    fn test_rejects_structural_errors() {
        let cases = [
            json!([{"jsonrpc": "2.0", "method": "ping", "id": 1}]),
            json!("hello"),
            json!({"method": "ping", "id": 1}),
            json!({"jsonrpc": "2.0", "id": 1, "result": {}, "error": {"code": 1, "message": "m"}}),
            json!({"jsonrpc": "2.0", "id": 1}),
            json!({"jsonrpc": "2.0", "method": 5}),
            json!({"jsonrpc": "2.0", "method": "x", "params": 3}),
            json!({"jsonrpc": "2.0"}),
        ];
        for case in cases {
            let err = decode(&bytes(case.clone())).unwrap_err();
            assert_eq!(err.kind, ErrorKind::ProtocolViolation, "{case}");
        }
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = decode(b"{not json").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ParseError);
    }

    #[test]
    fn test_encode_request() {
        let msg = JsonRpcMessage::Request(JsonRpcRequest::new(
            MessageId::Number(4),
            "tools/list",
            Some(json!({})),
        ));
        let out: Value = serde_json::from_slice(&encode(&msg).unwrap()).unwrap();
        assert_eq!(out, json!({"jsonrpc": "2.0", "id": 4, "method": "tools/list", "params": {}}));
    }

    #[test]
    fn test_salvage_request_id() {
        let raw = bytes(json!({"jsonrpc": "1.0", "id": 9, "method": "x"}));
        assert_eq!(salvage_request_id(&raw), Some(MessageId::Number(9)));
        assert_eq!(salvage_request_id(b"{broken"), None);
        assert_eq!(salvage_request_id(&bytes(json!({"id": 1, "result": {}}))), None);
    }
}
