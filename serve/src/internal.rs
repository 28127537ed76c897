//! Internal chat-storage API (SPEC_FULL §6, service-to-service): history
//! pagination, message append/patch/delete, session listing, and the
//! cache-backed tool-call scratch endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use gateway_core::error::StreamError;
use gateway_core::history::{parse_session_id, Subtask, SubtaskRole};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::app::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    pub before_message_id: Option<i64>,
    #[serde(default)]
    pub is_group_chat: bool,
}

/// `GET /internal/chat/history/{session_id}`, ordered oldest first.
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Vec<Subtask>>, ApiError> {
    parse_session_id(&session_id).map_err(ApiError::from)?;
    let history = state.history.list_history(&session_id, q.limit, q.before_message_id).await?;
    Ok(Json(history))
}

#[derive(Debug, Deserialize)]
pub struct AppendMessageRequest {
    pub role: SubtaskRole,
    #[serde(default)]
    pub sender_user_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AppendMessageResponse {
    pub message_id: i64,
}

/// `POST /internal/chat/history/{session_id}/messages`.
pub async fn append_message(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(req): Json<AppendMessageRequest>,
) -> Result<Json<AppendMessageResponse>, ApiError> {
    parse_session_id(&session_id).map_err(ApiError::from)?;
    let (_, message_id) = state
        .history
        .append_message(
            &session_id,
            req.role,
            req.sender_user_id.as_deref(),
            &req.content,
            req.parent_id.as_deref(),
        )
        .await?;
    Ok(Json(AppendMessageResponse { message_id }))
}

#[derive(Debug, Deserialize)]
pub struct AppendMessagesBatchRequest {
    pub messages: Vec<AppendMessageRequest>,
}

#[derive(Debug, Serialize)]
pub struct AppendMessagesBatchResponse {
    pub message_ids: Vec<i64>,
}

/// `POST /internal/chat/history/{session_id}/messages/batch`, atomic.
pub async fn append_messages_batch(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(req): Json<AppendMessagesBatchRequest>,
) -> Result<Json<AppendMessagesBatchResponse>, ApiError> {
    parse_session_id(&session_id).map_err(ApiError::from)?;
    let messages = req
        .messages
        .into_iter()
        .map(|m| (m.role, m.sender_user_id, m.content, m.parent_id))
        .collect();
    let appended = state.history.append_messages_batch(&session_id, messages).await?;
    Ok(Json(AppendMessagesBatchResponse {
        message_ids: appended.into_iter().map(|(_, id)| id).collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateMessageRequest {
    pub content: String,
}

/// `PATCH /internal/chat/history/{session_id}/messages/{message_id}`. Used
/// during streaming to flush incremental content to the durable log.
pub async fn update_message(
    State(state): State<Arc<AppState>>,
    Path((session_id, message_id)): Path<(String, String)>,
    Json(req): Json<UpdateMessageRequest>,
) -> Result<(), ApiError> {
    parse_session_id(&session_id).map_err(ApiError::from)?;
    state.history.update_message_content(&message_id, &req.content).await?;
    Ok(())
}

/// `DELETE /internal/chat/history/{session_id}/messages/{message_id}`: soft
/// delete, the row's status flips to `DELETE` without removing it.
pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    Path((session_id, message_id)): Path<(String, String)>,
) -> Result<(), ApiError> {
    parse_session_id(&session_id).map_err(ApiError::from)?;
    state.history.delete_message(&message_id).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct DeleteSessionResponse {
    pub deleted: u64,
}

/// `DELETE /internal/chat/history/{session_id}`: soft delete every message.
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<DeleteSessionResponse>, ApiError> {
    parse_session_id(&session_id).map_err(ApiError::from)?;
    let deleted = state.history.delete_session(&session_id).await?;
    Ok(Json(DeleteSessionResponse { deleted }))
}

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

/// `GET /internal/chat/sessions`, paginated.
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListSessionsQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    let sessions = state.history.list_sessions(q.limit, q.offset).await?;
    Ok(Json(sessions))
}

fn tool_results_key(session_id: &str) -> String {
    format!("tool_results:{session_id}")
}

fn pending_tool_calls_key(session_id: &str) -> String {
    format!("pending_tool_calls:{session_id}")
}

/// `POST /internal/chat/tool-results/{session_id}`: transient, cache-backed.
pub async fn put_tool_results(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<(), ApiError> {
    let serialised = serde_json::to_string(&body).map_err(|e| ApiError::Stream(StreamError::Cache(e.to_string())))?;
    state
        .stream_manager
        .cache_set(tool_results_key(&session_id), serialised)
        .await
        .map_err(ApiError::from)
}

/// `POST /internal/chat/pending-tool-calls/{session_id}`: transient, cache-backed.
pub async fn put_pending_tool_calls(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<(), ApiError> {
    let serialised = serde_json::to_string(&body).map_err(|e| ApiError::Stream(StreamError::Cache(e.to_string())))?;
    state
        .stream_manager
        .cache_set(pending_tool_calls_key(&session_id), serialised)
        .await
        .map_err(ApiError::from)
}
