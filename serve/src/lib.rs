//! HTTP server for the conversational gateway (axum + Server-Sent Events).
//!
//! Listens on `GATEWAY_BIND_ADDR` (default 0.0.0.0:8080), serves the chat
//! SSE surface and the internal chat-storage API (SPEC_FULL §6).
//!
//! **Public API**: [`run_serve`], [`run_serve_on_listener`], [`build_state`].

mod app;
mod chat;
mod error;
mod internal;

use std::sync::Arc;

use gateway_core::agent::{AgentLoop, ChatOpenAi, LlmClient};
use gateway_core::compress::{CompressionConfig, Compressor};
use gateway_core::history::HistoryStore;
use gateway_core::knowledge::{KnowledgeRetriever, MockVectorService};
use gateway_core::mcp::{discover_all, parse_server_configs, McpToolAdapter};
use gateway_core::memory::{MemoryClient, MemoryClientConfig};
use gateway_core::model_spec::ModelLimitOverrides;
use gateway_core::stream::StreamManager;
use gateway_core::tools::{EvaluateTool, InMemoryMetrics, ToolExecutor, ToolRegistry};
use tokio::net::TcpListener;
use tracing::{info, warn};

pub use app::AppState;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Registers MCP tools declared in `CHAT_MCP_SERVERS` (a JSON array, see
/// `McpServerConfig`) into `registry`, provided `CHAT_MCP_ENABLED` is set.
/// Per-server discovery failures are logged and skipped (SPEC_FULL §4.4
/// fault tolerance); a malformed `CHAT_MCP_SERVERS` value is also logged and
/// skipped rather than failing startup.
async fn register_mcp_tools(registry: &mut ToolRegistry) {
    if !env_flag("CHAT_MCP_ENABLED", false) {
        return;
    }
    let Ok(raw) = std::env::var("CHAT_MCP_SERVERS") else {
        return;
    };
    let configs = match parse_server_configs(&raw) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "invalid CHAT_MCP_SERVERS, skipping mcp tool discovery");
            return;
        }
    };
    for (session, specs) in discover_all(configs, &serde_json::Value::Null).await {
        for spec in specs {
            registry.register(Arc::new(McpToolAdapter::new(session.clone(), spec)));
        }
    }
}

/// Builds the shared application state from the process environment
/// (SPEC_FULL §6 "Configuration knobs").
pub async fn build_state() -> Arc<AppState> {
    let db_path = env_or("GATEWAY_DATABASE_PATH", "./gateway.sqlite3");
    let history = Arc::new(HistoryStore::open(&db_path).expect("open history database"));
    let stream_manager = Arc::new(StreamManager::new(history.clone()));

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(EvaluateTool));
    register_mcp_tools(&mut registry).await;
    let tool_specs = registry.specs();
    let tool_executor = Arc::new(
        ToolExecutor::new(Arc::new(registry), Arc::new(InMemoryMetrics::new())).with_timeout(
            std::time::Duration::from_secs(
                env_or("GATEWAY_TOOL_TIMEOUT_SECONDS", "60").parse().unwrap_or(60),
            ),
        ),
    );

    let model_id = env_or("GATEWAY_DEFAULT_MODEL_ID", "gpt-4o");
    let llm: Arc<dyn LlmClient> = match std::env::var("OPENAI_API_KEY") {
        Ok(key) => Arc::new(
            ChatOpenAi::new(&key, std::env::var("OPENAI_BASE_URL").ok().as_deref(), &model_id)
                .with_tools(tool_specs),
        ),
        Err(_) => Arc::new(gateway_core::agent::MockLlm::always_final(
            "no LLM provider configured (set OPENAI_API_KEY)",
        )),
    };
    let max_iterations: u32 = env_or("GATEWAY_MAX_AGENT_ITERATIONS", "10").parse().unwrap_or(10);
    let agent_loop = Arc::new(AgentLoop::new(llm, tool_executor.clone()).with_max_iterations(max_iterations));

    let compressor = Arc::new(Compressor::new(
        CompressionConfig::from_env(),
        ModelLimitOverrides::new(),
    ));

    let memory = env_flag("MEMORY_ENABLED", false).then(|| {
        Arc::new(MemoryClient::new(MemoryClientConfig {
            base_url: env_or("MEMORY_BASE_URL", "http://localhost:8090"),
            api_key: std::env::var("MEMORY_API_KEY").ok(),
            timeout: std::time::Duration::from_secs(
                env_or("MEMORY_TIMEOUT_SECONDS", "5").parse().unwrap_or(5),
            ),
            max_results: env_or("MEMORY_MAX_RESULTS", "5").parse().unwrap_or(5),
        }))
    });

    // No knowledge-base catalogue service exists yet (see DESIGN.md), so
    // there is no real vector backend to wire in; `MockVectorService` keeps
    // the retrieval and context-persistence path exercised end to end.
    let knowledge = env_flag("KNOWLEDGE_ENABLED", false)
        .then(|| Arc::new(KnowledgeRetriever::new(Arc::new(MockVectorService), history.clone())));

    Arc::new(AppState {
        history,
        stream_manager,
        agent_loop,
        tool_executor,
        compressor,
        memory,
        knowledge,
        default_model_id: model_id,
    })
}

/// Runs the server on an existing listener (used by tests: bind to
/// 127.0.0.1:0, then pass the listener in).
pub async fn run_serve_on_listener(listener: TcpListener) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("gateway listening on http://{}", addr);
    let state = build_state().await;
    let router = app::router(state).layer(tower_http::trace::TraceLayer::new_for_http());
    axum::serve(listener, router).await?;
    Ok(())
}

/// Runs the server, binding to `addr` (default from `GATEWAY_BIND_ADDR` or
/// `0.0.0.0:8080`).
pub async fn run_serve(addr: Option<&str>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let bind_addr = addr.map(String::from).unwrap_or_else(|| env_or("GATEWAY_BIND_ADDR", DEFAULT_BIND_ADDR));
    let listener = TcpListener::bind(&bind_addr).await?;
    run_serve_on_listener(listener).await
}
