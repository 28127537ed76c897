//! The three MCP transports (SPEC_FULL §4.4): `stdio`, `sse`,
//! `streamable-http`. `Http` is adapted from
//! `loom::tool_source::mcp::session_http::McpHttpSession`; `Sse` is newly
//! authored on the same request/response shape, per SPEC_FULL §4.4 ADDED.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::McpError;

use super::protocol::{parse_json_rpc_from_body, JsonRpcRequest, MCP_PROTOCOL_VERSION};

#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError>;
}

fn next_id(counter: &AtomicI64) -> Value {
    json!(counter.fetch_add(1, Ordering::SeqCst))
}

fn initialize_params() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {"tools": {}},
        "clientInfo": {"name": "gateway-mcp", "version": env!("CARGO_PKG_VERSION")},
    })
}

/// Spawns the server as a child process and speaks line-delimited JSON-RPC
/// over its stdin/stdout.
pub struct StdioTransport {
    child: Mutex<Child>,
    stdin: AsyncMutex<ChildStdin>,
    stdout: AsyncMutex<BufReader<tokio::process::ChildStdout>>,
    id_counter: AtomicI64,
}

impl StdioTransport {
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::Transport(format!("spawn '{command}' failed: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("child has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("child has no stdout".into()))?;

        let transport = Self {
            child: Mutex::new(child),
            stdin: AsyncMutex::new(stdin),
            stdout: AsyncMutex::new(BufReader::new(stdout)),
            id_counter: AtomicI64::new(1),
        };
        transport.request("initialize", Some(initialize_params())).await?;
        transport
            .notify("notifications/initialized", None)
            .await?;
        Ok(transport)
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let body = json!({"jsonrpc": "2.0", "method": method, "params": params});
        let mut line = serde_json::to_string(&body)?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::Transport(e.to_string()))
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = next_id(&self.id_counter);
        let req = JsonRpcRequest::new(id.clone(), method, params);
        let mut line = serde_json::to_string(&req)?;
        line.push('\n');

        {
            let mut stdin = self.stdin.lock().await;
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| McpError::Transport(e.to_string()))?;
        }

        let mut stdout = self.stdout.lock().await;
        loop {
            let mut response_line = String::new();
            let n = stdout
                .read_line(&mut response_line)
                .await
                .map_err(|e| McpError::Transport(e.to_string()))?;
            if n == 0 {
                return Err(McpError::Transport("mcp server closed stdout".into()));
            }
            if response_line.trim().is_empty() {
                continue;
            }
            let resp: super::protocol::JsonRpcResponse = serde_json::from_str(&response_line)?;
            if resp.id != Some(id.clone()) {
                continue;
            }
            if let Some(err) = resp.error {
                return Err(McpError::Protocol(format!("{}: {}", err.code, err.message)));
            }
            return Ok(resp.result.unwrap_or(Value::Null));
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        if let Ok(mut child) = self.child.lock() {
            let _ = child.start_kill();
        }
    }
}

/// Streamable-HTTP transport: one POST per request, dual JSON/SSE body
/// parsing (`loom::tool_source::mcp::session_http::McpHttpSession`).
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    headers: Vec<(String, String)>,
    session_id: tokio::sync::Mutex<Option<String>>,
    id_counter: AtomicI64,
}

impl HttpTransport {
    pub async fn connect(url: &str, headers: Vec<(String, String)>) -> Result<Self, McpError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(McpError::from)?;
        let transport = Self {
            client,
            url: url.to_string(),
            headers,
            session_id: tokio::sync::Mutex::new(None),
            id_counter: AtomicI64::new(1),
        };
        transport.initialize().await?;
        Ok(transport)
    }

    async fn initialize(&self) -> Result<(), McpError> {
        let id = next_id(&self.id_counter);
        let req = JsonRpcRequest::new(id, "initialize", Some(initialize_params()));
        let resp = self.send(&req).await?;
        if let Some(sid) = resp.1 {
            *self.session_id.lock().await = Some(sid);
        }
        self.notify("notifications/initialized").await
    }

    async fn notify(&self, method: &str) -> Result<(), McpError> {
        let body = json!({"jsonrpc": "2.0", "method": method});
        let mut builder = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .header("MCP-Protocol-Version", MCP_PROTOCOL_VERSION);
        for (k, v) in &self.headers {
            builder = builder.header(k, v);
        }
        if let Some(sid) = self.session_id.lock().await.clone() {
            builder = builder.header("MCP-Session-Id", sid);
        }
        builder.json(&body).send().await.map_err(McpError::from)?;
        Ok(())
    }

    /// Sends one JSON-RPC request and returns (result_value, new_session_id).
    async fn send(&self, req: &JsonRpcRequest) -> Result<(Value, Option<String>), McpError> {
        let mut builder = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .header("MCP-Protocol-Version", MCP_PROTOCOL_VERSION);
        for (k, v) in &self.headers {
            builder = builder.header(k, v);
        }
        if let Some(sid) = self.session_id.lock().await.clone() {
            builder = builder.header("MCP-Session-Id", sid);
        }
        let resp = builder.json(req).send().await.map_err(McpError::from)?;
        if resp.status() == reqwest::StatusCode::ACCEPTED {
            return Ok((Value::Null, None));
        }
        let session_id = resp
            .headers()
            .get("MCP-Session-Id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = resp.text().await.map_err(McpError::from)?;
        let parsed = parse_json_rpc_from_body(&body, content_type.as_deref())?;
        if let Some(err) = parsed.error {
            return Err(McpError::Protocol(format!("{}: {}", err.code, err.message)));
        }
        Ok((parsed.result.unwrap_or(Value::Null), session_id))
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = next_id(&self.id_counter);
        let req = JsonRpcRequest::new(id, method, params);
        let (value, session_id) = self.send(&req).await?;
        if let Some(sid) = session_id {
            *self.session_id.lock().await = Some(sid);
        }
        Ok(value)
    }
}

/// SSE transport (SPEC_FULL §4.4 ADDED): one long-lived GET for server-sent
/// events; the server's first `endpoint` event announces the side-channel
/// URL for client-to-server POSTs.
pub struct SseTransport {
    client: reqwest::Client,
    post_url: String,
    id_counter: AtomicI64,
}

impl SseTransport {
    /// `post_url` is the side-channel endpoint the MCP SSE server announced
    /// in its `endpoint` event; callers resolve this before constructing
    /// the transport (the event-stream GET is kept open by the caller's
    /// background task, outside this struct's responsibility).
    pub fn new(post_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            post_url: post_url.into(),
            id_counter: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = next_id(&self.id_counter);
        let req = JsonRpcRequest::new(id, method, params);
        let resp = self
            .client
            .post(&self.post_url)
            .header("Content-Type", "application/json")
            .json(&req)
            .send()
            .await
            .map_err(McpError::from)?;
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = resp.text().await.map_err(McpError::from)?;
        let parsed = parse_json_rpc_from_body(&body, content_type.as_deref())?;
        if let Some(err) = parsed.error {
            return Err(McpError::Protocol(format!("{}: {}", err.code, err.message)));
        }
        Ok(parsed.result.unwrap_or(Value::Null))
    }
}
