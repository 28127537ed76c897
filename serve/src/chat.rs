//! Chat-facing HTTP surface (SPEC_FULL §6): SSE stream creation and resume,
//! cancel, and the refresh-recovery content endpoint.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::{self, Stream, StreamExt};
use gateway_core::agent::AgentOutcome;
use gateway_core::history::{SubtaskRole, SubtaskStatus};
use gateway_core::knowledge::KnowledgePromptMode;
use gateway_core::memory::MemoryMetadata;
use gateway_core::message::Message;
use gateway_core::stream::{should_trigger_ai, ChatFrame, StreamManager, StreamSession, TaskStreamingStatus};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use crate::app::AppState;
use crate::error::ApiError;

const SYSTEM_PROMPT: &str = "You are a helpful assistant in a multi-tenant conversational gateway.";

#[derive(Debug, Deserialize)]
pub struct ChatStreamRequest {
    pub message: String,
    pub team_id: String,
    #[serde(default)]
    pub owner_user_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub is_group_chat: bool,
    #[serde(default)]
    pub subtask_id: Option<String>,
    #[serde(default)]
    pub offset: Option<u64>,
    /// Accepted for wire compatibility; this process runs one `LlmClient`
    /// built at startup, so per-request model selection is limited to the
    /// compressor's token budget (`model_id` above). See DESIGN.md.
    #[serde(default)]
    pub force_override_bot_model: bool,
    #[serde(default)]
    pub attachment_id: Option<String>,
    #[serde(default)]
    pub enable_web_search: bool,
    #[serde(default)]
    pub search_engine: Option<String>,
    #[serde(default)]
    pub enable_clarification: bool,
    #[serde(default)]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub git_repo: Option<String>,
    #[serde(default)]
    pub kb_ids: Vec<String>,
}

fn now_ms_string() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

fn sse_response(
    task_id: String,
    subtask_id: String,
    frames: impl Stream<Item = Result<Event, Infallible>> + Send + 'static,
) -> Response {
    let sse = Sse::new(frames).keep_alive(KeepAlive::default());
    let mut response = sse.into_response();
    let headers = response.headers_mut();
    headers.insert("X-Task-Id", task_id.parse().unwrap());
    headers.insert("X-Subtask-Id", subtask_id.parse().unwrap());
    headers.insert("Cache-Control", "no-cache".parse().unwrap());
    headers.insert("X-Accel-Buffering", "no".parse().unwrap());
    response
}

fn frame_event(frame: ChatFrame) -> Result<Event, Infallible> {
    Ok(Event::default().data(frame.to_json()))
}

fn subtask_to_message(subtask: &gateway_core::history::Subtask) -> Message {
    match subtask.role {
        SubtaskRole::User => Message::user(subtask.content.clone()),
        SubtaskRole::Assistant => Message::assistant(subtask.content.clone()),
    }
}

/// `POST /chat/stream`. Switches to resume mode when `subtask_id`+`offset`
/// are both present (SPEC_FULL §4.8); otherwise creates or continues a chat.
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatStreamRequest>,
) -> Result<Response, ApiError> {
    if let (Some(subtask_id), Some(offset)) = (req.subtask_id.clone(), req.offset) {
        return resume_stream(state, subtask_id, offset).await;
    }
    create_stream(state, req).await
}

async fn resume_stream(state: Arc<AppState>, subtask_id: String, offset: u64) -> Result<Response, ApiError> {
    if let Some(session) = state.stream_manager.get_session(&subtask_id) {
        let task_id = session.task_id.clone();
        let frames = session.resume(offset).map(frame_event);
        return Ok(sse_response(task_id, subtask_id, frames));
    }

    // No in-process session (different worker or process restart): fall back
    // to durable state per §7's cache/pub-sub unavailability policy.
    let subtask = state.history.get_subtask(&subtask_id).await?;
    let frame = match subtask.status {
        SubtaskStatus::Completed => {
            ChatFrame::terminal(subtask.content.len() as u64, json!({"value": subtask.content}))
        }
        SubtaskStatus::Failed => ChatFrame::fatal_error("stream failed"),
        _ => ChatFrame::fatal_error("Stream not available"),
    };
    let frames = stream::once(async move { frame_event(frame) });
    Ok(sse_response(subtask.task_id, subtask_id, frames))
}

async fn create_stream(state: Arc<AppState>, req: ChatStreamRequest) -> Result<Response, ApiError> {
    let owner = req.owner_user_id.clone().unwrap_or_else(|| "anonymous".to_string());
    let task_id = match req.task_id.clone() {
        Some(id) => id,
        None => {
            state
                .history
                .create_task(&owner, &req.team_id, req.title.as_deref(), req.is_group_chat)
                .await?
        }
    };
    let task = state.history.get_task(&task_id).await?;

    let (user_subtask_id, _) = state
        .history
        .append_message(&task_id, SubtaskRole::User, Some(&owner), &req.message, None)
        .await?;

    if !should_trigger_ai(task.is_group_chat, &req.team_id, &req.message) {
        let frame = ChatFrame::not_triggered(task_id.clone(), user_subtask_id.clone());
        let frames = stream::once(async move { frame_event(frame) });
        return Ok(sse_response(task_id, user_subtask_id, frames));
    }

    if let Some(retriever) = state.knowledge.as_ref().filter(|_| !req.kb_ids.is_empty()) {
        if let Err(e) = retriever
            .rag_search(
                &user_subtask_id,
                KnowledgePromptMode::Strict,
                &req.message,
                &req.kb_ids,
                None,
            )
            .await
        {
            warn!(task_id, error = %e, "rag retrieval failed, continuing without injected knowledge");
        }
    }

    let memory_block = match state.memory.as_ref() {
        Some(memory) => {
            let records = memory.search_memories(&owner, &req.message).await;
            gateway_core::memory::MemoryClient::render_memory_block(&records)
        }
        None => String::new(),
    };
    let system_prompt = if memory_block.is_empty() {
        SYSTEM_PROMPT.to_string()
    } else {
        format!("{SYSTEM_PROMPT}\n\n{memory_block}")
    };

    let history = state.history.list_history(&task_id, None, None).await?;
    let mut messages: Vec<Message> = history.iter().map(subtask_to_message).collect();
    messages.insert(0, Message::system(system_prompt));
    let model_id = req.model_id.clone().unwrap_or_else(|| state.default_model_id.clone());
    let messages = state.compressor.compress_if_needed(&messages, &model_id);

    if let Some(memory) = state.memory.as_ref() {
        memory
            .save_user_message_async(
                &owner,
                &req.message,
                MemoryMetadata {
                    task_id: task_id.clone(),
                    subtask_id: user_subtask_id.clone(),
                    team_id: req.team_id.clone(),
                    workspace_id: None,
                    group_id: None,
                    is_group_chat: task.is_group_chat,
                    created_at: now_ms_string(),
                },
            )
            .await;
    }

    let (assistant_subtask_id, _) = state
        .history
        .append_message(&task_id, SubtaskRole::Assistant, None, "", Some(&user_subtask_id))
        .await?;
    let session = state.stream_manager.create_session(task_id.clone(), assistant_subtask_id.clone());
    session.begin_producing()?;
    let streaming_status = TaskStreamingStatus {
        subtask_id: assistant_subtask_id.clone(),
        user_id: owner.clone(),
        username: owner.clone(),
    };
    if let Err(e) = state.stream_manager.mark_streaming(&task_id, &streaming_status).await {
        warn!(task_id, error = %e, "failed to mark typing status");
    }

    let (tx, rx) = mpsc::channel::<ChatFrame>(64);
    let preamble = ChatFrame::preamble(task_id.clone(), assistant_subtask_id.clone());

    let agent_loop = state.agent_loop.clone();
    let stream_manager = state.stream_manager.clone();
    let clear_task_id = task_id.clone();
    tokio::spawn(run_agent_and_stream(agent_loop, messages, session, tx, stream_manager, clear_task_id));

    let frames = stream::once(async move { preamble })
        .chain(ReceiverStream::new(rx))
        .map(frame_event);
    Ok(sse_response(task_id, assistant_subtask_id, frames))
}

/// Drives the agent loop to completion, forwarding token deltas into both
/// the durable/pub-sub `StreamSession` and this request's own SSE channel.
/// Chunks are serialised through a single consumer task so that the order
/// they land in `StreamSession::push_chunk` matches the order the LLM
/// produced them in, even though `AgentLoop::run`'s `on_delta` callback is
/// synchronous.
async fn run_agent_and_stream(
    agent_loop: Arc<gateway_core::agent::AgentLoop>,
    messages: Vec<Message>,
    session: Arc<StreamSession>,
    tx: mpsc::Sender<ChatFrame>,
    stream_manager: Arc<StreamManager>,
    task_id: String,
) {
    let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<String>();
    let session_for_consumer = session.clone();
    let tx_for_consumer = tx.clone();
    let consumer = tokio::spawn(async move {
        while let Some(chunk) = chunk_rx.recv().await {
            let offset = session_for_consumer.push_chunk(&chunk).await;
            if tx_for_consumer.send(ChatFrame::delta(offset, chunk)).await.is_err() {
                break;
            }
        }
    });

    let cancel_flag = session.cancel_flag.clone();
    let outcome = agent_loop
        .run(messages, cancel_flag, move |chunk: &str| {
            let _ = chunk_tx.send(chunk.to_string());
        })
        .await;
    let _ = consumer.await;

    if let Err(e) = stream_manager.clear_streaming(&task_id).await {
        warn!(task_id, error = %e, "failed to clear typing status");
    }

    let final_offset = session.cached_content().len() as u64;
    match outcome {
        Ok(AgentOutcome::Final(text)) => {
            let result = json!({"value": text});
            let _ = session.finish(result.clone()).await;
            let _ = tx.send(ChatFrame::terminal(final_offset, result)).await;
        }
        Ok(AgentOutcome::Evaluated(value)) => {
            let _ = session.finish(value.clone()).await;
            let _ = tx.send(ChatFrame::terminal(final_offset, value)).await;
        }
        Ok(AgentOutcome::SilentExit(reason)) => {
            tracing::info!(reason, "agent loop exited silently via an MCP marker");
            let result = json!({"value": session.cached_content(), "incomplete": true});
            let _ = session.finish(result.clone()).await;
            let _ = tx.send(ChatFrame::terminal(final_offset, result)).await;
        }
        Ok(AgentOutcome::Cancelled(partial)) => {
            let _ = session.cancel(Some(partial)).await;
        }
        Err(err) => {
            if session.cached_content().is_empty() {
                let _ = session.fail_before_start(&err.to_string()).await;
                let _ = tx.send(ChatFrame::fatal_error(err.to_string())).await;
            } else {
                let _ = session.fail_mid_stream(&err.to_string()).await;
                let result = json!({"value": session.cached_content(), "incomplete": true});
                let _ = tx.send(ChatFrame::terminal(final_offset, result)).await;
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatCancelRequest {
    pub subtask_id: String,
    #[serde(default)]
    pub partial_content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatCancelResponse {
    pub success: bool,
    pub message: String,
}

/// `POST /chat/cancel`. Idempotent: cancelling a subtask with no live
/// session (already finished, or cancelled twice) still reports success.
pub async fn chat_cancel(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatCancelRequest>,
) -> Result<Json<ChatCancelResponse>, ApiError> {
    match state.stream_manager.get_session(&req.subtask_id) {
        Some(session) => {
            session.cancel(req.partial_content).await?;
            state.stream_manager.remove_session(&req.subtask_id);
            Ok(Json(ChatCancelResponse {
                success: true,
                message: "cancelled".to_string(),
            }))
        }
        None => Ok(Json(ChatCancelResponse {
            success: true,
            message: "no active stream for subtask".to_string(),
        })),
    }
}

#[derive(Debug, Serialize)]
pub struct StreamingContentResponse {
    pub content: String,
    pub source: &'static str,
    pub streaming: bool,
    pub status: SubtaskStatus,
    pub incomplete: bool,
}

/// `GET /chat/streaming-content/{subtask_id}`. Refresh-recovery: a client
/// that reloaded mid-stream asks for the current content snapshot without
/// committing to a live resume.
pub async fn streaming_content(
    State(state): State<Arc<AppState>>,
    Path(subtask_id): Path<String>,
) -> Result<Json<StreamingContentResponse>, ApiError> {
    if let Some(session) = state.stream_manager.get_session(&subtask_id) {
        return Ok(Json(StreamingContentResponse {
            content: session.cached_content(),
            source: "redis",
            streaming: session.status() == SubtaskStatus::Running,
            status: session.status(),
            incomplete: false,
        }));
    }
    let subtask = state.history.get_subtask(&subtask_id).await?;
    Ok(Json(StreamingContentResponse {
        content: subtask.content,
        source: "database",
        streaming: false,
        status: subtask.status,
        incomplete: subtask.status == SubtaskStatus::Failed,
    }))
}

/// `GET /chat/resume-stream/{subtask_id}`. Legacy non-offset resume: replays
/// the full cached/durable content then subscribes live.
pub async fn resume_stream_legacy(
    State(state): State<Arc<AppState>>,
    Path(subtask_id): Path<String>,
) -> Result<Response, ApiError> {
    resume_stream(state, subtask_id, 0).await
}
