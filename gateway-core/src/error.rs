//! Leaf error types per module, composed with `#[from]` the way `loom`
//! composes `CheckpointError`/`StoreError`/`ToolSourceError`/`AgentError`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompressError {
    #[error("compression produced {actual} tokens, target was {target}")]
    TargetMissed { actual: u32, target: u32 },
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool '{0}' timed out")]
    Timeout(String),
    #[error("tool '{0}' failed: {1}")]
    Failed(String, String),
    #[error("tool '{0}' not found")]
    NotFound(String),
    #[error("call limit exceeded for '{0}'")]
    CallLimitExceeded(String),
}

#[derive(Debug, Error)]
pub enum McpError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("server '{0}' not found")]
    ServerNotFound(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("vector service error: {0}")]
    VectorService(String),
    #[error("document '{0}' not found")]
    DocumentNotFound(String),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("memory service error: {0}")]
    Service(String),
    #[error("request timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("llm invocation failed: {0}")]
    LlmFailed(String),
    #[error("tool error: {0}")]
    Tool(#[from] ToolError),
    #[error("max iterations ({0}) reached without a final answer")]
    MaxIterationsReached(u32),
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("subtask '{0}' not found")]
    NotFound(String),
    #[error("subtask '{0}' already has an active producer")]
    ProducerAlreadyActive(String),
    #[error("cache error: {0}")]
    Cache(String),
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("task '{0}' not found")]
    TaskNotFound(String),
    #[error("subtask '{0}' not found")]
    SubtaskNotFound(String),
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Compress(#[from] CompressError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Mcp(#[from] McpError),
    #[error(transparent)]
    Knowledge(#[from] KnowledgeError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    History(#[from] HistoryError),
}
