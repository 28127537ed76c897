//! MCP client: per-server connection, tool discovery, `{server}__{tool}`
//! namespacing, and silent-exit detection (SPEC_FULL §4.4).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{McpError, ToolError};
use crate::tools::{Tool, ToolCallContent, ToolCallContext, ToolSpec};

use super::substitution::substitute_string;
use super::transport::{HttpTransport, McpTransport, SseTransport, StdioTransport};

#[derive(Debug, Clone)]
pub enum McpTransportConfig {
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    StreamableHttp {
        url: String,
        headers: Vec<(String, String)>,
    },
    Sse {
        post_url: String,
    },
}

/// Wire shape for one entry of the `CHAT_MCP_SERVERS` JSON array (SPEC_FULL
/// §6). Kept separate from `McpTransportConfig` so the transport enum itself
/// stays free of serde coupling.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum McpServerConfig {
    Stdio {
        name: String,
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    StreamableHttp {
        name: String,
        url: String,
        #[serde(default)]
        headers: Vec<(String, String)>,
    },
    Sse {
        name: String,
        post_url: String,
    },
}

impl McpServerConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::Stdio { name, .. } => name,
            Self::StreamableHttp { name, .. } => name,
            Self::Sse { name, .. } => name,
        }
    }

    pub fn into_transport_config(self) -> McpTransportConfig {
        match self {
            Self::Stdio { command, args, env, .. } => McpTransportConfig::Stdio { command, args, env },
            Self::StreamableHttp { url, headers, .. } => McpTransportConfig::StreamableHttp { url, headers },
            Self::Sse { post_url, .. } => McpTransportConfig::Sse { post_url },
        }
    }
}

/// Parses the `CHAT_MCP_SERVERS` JSON array into `(name, transport config)`
/// pairs ready for `discover_all`.
pub fn parse_server_configs(json: &str) -> Result<Vec<(String, McpTransportConfig)>, McpError> {
    let configs: Vec<McpServerConfig> = serde_json::from_str(json)?;
    Ok(configs
        .into_iter()
        .map(|c| (c.name().to_string(), c.into_transport_config()))
        .collect())
}

pub struct McpServerSession {
    pub server_name: String,
    transport: Arc<dyn McpTransport>,
}

/// Substitutes `${{path}}` placeholders against `task_data` in every string
/// field of a transport config before a connection is opened (SPEC_FULL
/// §4.4 "config values are pre-processed").
fn substitute_transport_config(config: McpTransportConfig, task_data: &Value) -> McpTransportConfig {
    match config {
        McpTransportConfig::Stdio { command, args, env } => McpTransportConfig::Stdio {
            command: substitute_string(&command, task_data),
            args: args.iter().map(|a| substitute_string(a, task_data)).collect(),
            env: env
                .into_iter()
                .map(|(k, v)| (k, substitute_string(&v, task_data)))
                .collect(),
        },
        McpTransportConfig::StreamableHttp { url, headers } => McpTransportConfig::StreamableHttp {
            url: substitute_string(&url, task_data),
            headers: headers
                .into_iter()
                .map(|(k, v)| (k, substitute_string(&v, task_data)))
                .collect(),
        },
        McpTransportConfig::Sse { post_url } => McpTransportConfig::Sse {
            post_url: substitute_string(&post_url, task_data),
        },
    }
}

impl McpServerSession {
    pub async fn connect(
        server_name: impl Into<String>,
        config: McpTransportConfig,
        task_data: &Value,
    ) -> Result<Self, McpError> {
        let server_name = server_name.into();
        let config = substitute_transport_config(config, task_data);
        let transport: Arc<dyn McpTransport> = match config {
            McpTransportConfig::Stdio { command, args, env } => {
                Arc::new(StdioTransport::spawn(&command, &args, &env).await?)
            }
            McpTransportConfig::StreamableHttp { url, headers } => {
                Arc::new(HttpTransport::connect(&url, headers).await?)
            }
            McpTransportConfig::Sse { post_url } => Arc::new(SseTransport::new(post_url)),
        };
        info!(server_name, "mcp server connected");
        Ok(Self {
            server_name,
            transport,
        })
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolSpec>, McpError> {
        let result = self.transport.request("tools/list", None).await?;
        parse_list_tools_result(&result)
    }

    pub async fn call_tool(&self, tool_name: &str, args: Value) -> Result<ToolCallContent, McpError> {
        let params = serde_json::json!({"name": tool_name, "arguments": args});
        let result = self.transport.request("tools/call", Some(params)).await?;
        parse_call_tool_result(&result)
    }
}

/// Maps an MCP `tools/list` result into `ToolSpec`s
/// (`loom::tool_source::mcp::parse_list_tools_result`).
pub fn parse_list_tools_result(result: &Value) -> Result<Vec<ToolSpec>, McpError> {
    let tools = result
        .get("tools")
        .and_then(|v| v.as_array())
        .ok_or_else(|| McpError::Protocol("tools/list result missing 'tools' array".into()))?;
    tools
        .iter()
        .map(|t| {
            let name = t
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| McpError::Protocol("tool missing 'name'".into()))?
                .to_string();
            let description = t
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let input_schema = t
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({"type": "object"}));
            Ok(ToolSpec {
                name,
                display_name: None,
                description,
                input_schema,
                weight: 1.0,
            })
        })
        .collect()
}

/// Maps an MCP `tools/call` result into a `ToolCallContent`
/// (`loom::tool_source::mcp::parse_call_tool_result`).
pub fn parse_call_tool_result(result: &Value) -> Result<ToolCallContent, McpError> {
    let is_error = result
        .get("isError")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let text = result
        .get("content")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .filter(|s| !s.is_empty());

    let text = match text {
        Some(t) => t,
        None => {
            if let Some(structured) = result.get("structuredContent") {
                serde_json::to_string(structured)?
            } else {
                String::new()
            }
        }
    };

    if is_error {
        return Err(McpError::Protocol(text));
    }
    Ok(ToolCallContent::Text(text))
}

/// `{"__silent_exit__": true, "reason": ...}` marks the session for
/// graceful termination without a final assistant message (SPEC_FULL §4.4).
pub fn is_silent_exit(content: &ToolCallContent) -> Option<String> {
    let parsed: Value = serde_json::from_str(content.text()).ok()?;
    let flagged = parsed.get("__silent_exit__").and_then(|v| v.as_bool())?;
    if !flagged {
        return None;
    }
    Some(
        parsed
            .get("reason")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
    )
}

/// Adapts one namespaced MCP tool (`{server}__{tool}`) to the local `Tool`
/// trait so the agent loop's registry need not know about MCP at all.
pub struct McpToolAdapter {
    session: Arc<McpServerSession>,
    remote_name: String,
    namespaced_name: String,
    spec: ToolSpec,
}

impl McpToolAdapter {
    pub fn new(session: Arc<McpServerSession>, remote_spec: ToolSpec) -> Self {
        let namespaced_name = format!("{}__{}", session.server_name, remote_spec.name);
        let mut spec = remote_spec.clone();
        spec.name = namespaced_name.clone();
        Self {
            session,
            remote_name: remote_spec.name,
            namespaced_name,
            spec,
        }
    }
}

#[async_trait]
impl Tool for McpToolAdapter {
    fn name(&self) -> &str {
        &self.namespaced_name
    }

    fn spec(&self) -> ToolSpec {
        self.spec.clone()
    }

    async fn call(
        &self,
        args: Value,
        _ctx: Option<&ToolCallContext>,
    ) -> Result<ToolCallContent, ToolError> {
        self.session
            .call_tool(&self.remote_name, args)
            .await
            .map_err(|e| ToolError::Failed(self.namespaced_name.clone(), e.to_string()))
    }
}

/// Discovers tools from every configured server in parallel; one server's
/// failure does not affect the others (SPEC_FULL §4.4 fault tolerance).
/// `task_data` is the dict `${{path}}` placeholders in each config resolve
/// against before a connection is opened.
pub async fn discover_all(
    configs: Vec<(String, McpTransportConfig)>,
    task_data: &Value,
) -> Vec<(Arc<McpServerSession>, Vec<ToolSpec>)> {
    let futures = configs.into_iter().map(|(name, config)| async move {
        match McpServerSession::connect(name.clone(), config, task_data).await {
            Ok(session) => match session.list_tools().await {
                Ok(specs) => Some((Arc::new(session), specs)),
                Err(e) => {
                    warn!(server = name, error = %e, "mcp tool discovery failed");
                    None
                }
            },
            Err(e) => {
                warn!(server = name, error = %e, "mcp connect failed");
                None
            }
        }
    });
    futures::future::join_all(futures)
        .await
        .into_iter()
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_server_configs_from_json() {
        let json = r#"[
            {"transport": "stdio", "name": "fs", "command": "mcp-fs", "args": ["--quiet"]},
            {"transport": "streamable_http", "name": "exa", "url": "https://mcp.exa.ai/mcp"},
            {"transport": "sse", "name": "events", "post_url": "https://example.com/events"}
        ]"#;
        let configs = parse_server_configs(json).unwrap();
        assert_eq!(configs.len(), 3);
        assert_eq!(configs[0].0, "fs");
        assert!(matches!(configs[1].1, McpTransportConfig::StreamableHttp { .. }));
        assert!(matches!(configs[2].1, McpTransportConfig::Sse { .. }));
    }

    #[test]
    fn substitutes_placeholders_in_transport_config_before_connect() {
        let task_data = json!({"user": {"email": "a@example.com"}});
        let config = McpTransportConfig::Stdio {
            command: "mcp-${{user.email}}".into(),
            args: vec!["--token".into(), "${{user.email}}".into()],
            env: HashMap::new(),
        };
        let substituted = substitute_transport_config(config, &task_data);
        match substituted {
            McpTransportConfig::Stdio { command, args, .. } => {
                assert_eq!(command, "mcp-a@example.com");
                assert_eq!(args[1], "a@example.com");
            }
            _ => panic!("expected stdio"),
        }
    }

    #[test]
    fn parses_tool_list() {
        let result = json!({"tools": [{"name": "search", "description": "searches", "inputSchema": {"type": "object"}}]});
        let specs = parse_list_tools_result(&result).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "search");
    }

    #[test]
    fn parses_successful_call_result() {
        let result = json!({"content": [{"type": "text", "text": "42"}]});
        let content = parse_call_tool_result(&result).unwrap();
        assert_eq!(content.text(), "42");
    }

    #[test]
    fn falls_back_to_structured_content() {
        let result = json!({"structuredContent": {"value": 1}});
        let content = parse_call_tool_result(&result).unwrap();
        assert_eq!(content.text(), "{\"value\":1}");
    }

    #[test]
    fn error_result_becomes_err() {
        let result = json!({"isError": true, "content": [{"type": "text", "text": "boom"}]});
        let err = parse_call_tool_result(&result).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn detects_silent_exit() {
        let content = ToolCallContent::Text(r#"{"__silent_exit__": true, "reason": "done"}"#.into());
        assert_eq!(is_silent_exit(&content), Some("done".into()));
    }

    #[test]
    fn normal_content_is_not_silent_exit() {
        let content = ToolCallContent::Text("normal answer".into());
        assert_eq!(is_silent_exit(&content), None);
    }

    #[test]
    fn namespaced_name_is_server_prefixed() {
        assert_eq!(format!("{}__{}", "files", "search"), "files__search");
    }
}
