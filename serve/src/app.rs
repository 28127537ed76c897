//! Axum app: shared state and router assembly.

use std::sync::Arc;

use axum::routing::{delete, get, patch, post};
use axum::Router;
use gateway_core::agent::AgentLoop;
use gateway_core::compress::Compressor;
use gateway_core::history::HistoryStore;
use gateway_core::knowledge::KnowledgeRetriever;
use gateway_core::memory::MemoryClient;
use gateway_core::stream::StreamManager;
use gateway_core::tools::ToolExecutor;

use crate::chat;
use crate::internal;

pub struct AppState {
    pub history: Arc<HistoryStore>,
    pub stream_manager: Arc<StreamManager>,
    pub agent_loop: Arc<AgentLoop>,
    pub tool_executor: Arc<ToolExecutor>,
    pub compressor: Arc<Compressor>,
    pub memory: Option<Arc<MemoryClient>>,
    pub knowledge: Option<Arc<KnowledgeRetriever>>,
    pub default_model_id: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/chat/stream", post(chat::chat_stream))
        .route("/chat/cancel", post(chat::chat_cancel))
        .route("/chat/streaming-content/:subtask_id", get(chat::streaming_content))
        .route("/chat/resume-stream/:subtask_id", get(chat::resume_stream_legacy))
        .route("/internal/chat/history/:session_id", get(internal::get_history))
        .route("/internal/chat/history/:session_id/messages", post(internal::append_message))
        .route(
            "/internal/chat/history/:session_id/messages/batch",
            post(internal::append_messages_batch),
        )
        .route(
            "/internal/chat/history/:session_id/messages/:message_id",
            patch(internal::update_message).delete(internal::delete_message),
        )
        .route("/internal/chat/history/:session_id", delete(internal::delete_session))
        .route("/internal/chat/sessions", get(internal::list_sessions))
        .route("/internal/chat/tool-results/:session_id", post(internal::put_tool_results))
        .route(
            "/internal/chat/pending-tool-calls/:session_id",
            post(internal::put_pending_tool_calls),
        )
        .with_state(state)
}
