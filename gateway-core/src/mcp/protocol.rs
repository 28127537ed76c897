//! MCP JSON-RPC wire types, grounded on `loom`'s `session_http.rs`
//! (`JsonRpcErrorBody`/`JsonRpcResponse`), defined locally rather than
//! pulled from the teacher's `mcp_client`/`mcp_core` git dependency (see
//! DESIGN.md).

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MCP_PROTOCOL_VERSION: &str = "2025-11-25";

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: Value,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcErrorBody {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorBody>,
}

/// Parses a JSON-RPC response body that may be plain JSON or a `text/event-stream`
/// body (MCP streamable-HTTP and SSE transports both allow either). Mirrors
/// `loom::tool_source::mcp::session_http::parse_json_rpc_from_body`.
pub fn parse_json_rpc_from_body(
    body: &str,
    content_type: Option<&str>,
) -> Result<JsonRpcResponse, crate::error::McpError> {
    let is_sse = content_type
        .map(|ct| ct.contains("text/event-stream"))
        .unwrap_or(false);

    if !is_sse {
        return serde_json::from_str(body).map_err(crate::error::McpError::from);
    }

    let mut data_buf = String::new();
    for line in body.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            let rest = rest.trim_start();
            if rest == "[DONE]" {
                continue;
            }
            data_buf.push_str(rest);
            if let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(&data_buf) {
                if resp.result.is_some() || resp.error.is_some() {
                    return Ok(resp);
                }
            }
        } else if line.trim().is_empty() {
            data_buf.clear();
        }
    }
    Err(crate::error::McpError::Protocol(
        "no JSON-RPC response found in SSE body".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_body() {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#;
        let resp = parse_json_rpc_from_body(body, Some("application/json")).unwrap();
        assert_eq!(resp.result.unwrap()["ok"], true);
    }

    #[test]
    fn parses_sse_body() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"ok\":true}}\n\n";
        let resp = parse_json_rpc_from_body(body, Some("text/event-stream")).unwrap();
        assert_eq!(resp.result.unwrap()["ok"], true);
    }

    #[test]
    fn sse_body_without_response_errors() {
        let body = "event: ping\ndata: {}\n\n";
        let err = parse_json_rpc_from_body(body, Some("text/event-stream"));
        assert!(err.is_err());
    }
}
