//! History Store (SPEC_FULL §6 internal chat-storage API): an append-only
//! Task/Subtask/Context store over SQLite, grounded on
//! `loom-workspace::store::Store`'s `Arc<Mutex<Connection>>` plus
//! `tokio::task::block_in_place` discipline.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::HistoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "RUNNING" => TaskStatus::Running,
            "COMPLETED" => TaskStatus::Completed,
            "FAILED" => TaskStatus::Failed,
            _ => TaskStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubtaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Delete,
}

impl SubtaskStatus {
    fn as_str(self) -> &'static str {
        match self {
            SubtaskStatus::Pending => "PENDING",
            SubtaskStatus::Running => "RUNNING",
            SubtaskStatus::Completed => "COMPLETED",
            SubtaskStatus::Failed => "FAILED",
            SubtaskStatus::Delete => "DELETE",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "RUNNING" => SubtaskStatus::Running,
            "COMPLETED" => SubtaskStatus::Completed,
            "FAILED" => SubtaskStatus::Failed,
            "DELETE" => SubtaskStatus::Delete,
            _ => SubtaskStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubtaskRole {
    User,
    Assistant,
}

impl SubtaskRole {
    fn as_str(self) -> &'static str {
        match self {
            SubtaskRole::User => "USER",
            SubtaskRole::Assistant => "ASSISTANT",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "ASSISTANT" => SubtaskRole::Assistant,
            _ => SubtaskRole::User,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub owner_user_id: String,
    pub team_id: String,
    pub title: Option<String>,
    pub is_group_chat: bool,
    pub status: TaskStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A per-subtask context record (SPEC_FULL §4.5/§6): attachment or RAG
/// observability data keyed off the subtask it was injected into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRecord {
    pub context_id: String,
    pub subtask_id: String,
    pub context_type: String,
    pub status: String,
    pub extracted_text: Option<String>,
    pub image_base64: Option<String>,
    pub mime_type: Option<String>,
    pub file_size: Option<i64>,
    pub original_filename: Option<String>,
    pub knowledge_id: Option<String>,
    /// JSON-encoded `{injection_mode, rag_result, kb_head_result}` (§6).
    pub type_data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub subtask_id: String,
    pub task_id: String,
    pub message_id: i64,
    pub parent_id: Option<String>,
    pub role: SubtaskRole,
    pub sender_user_id: Option<String>,
    /// `prompt` for USER subtasks, `result.value` (or raw text) for ASSISTANT.
    pub content: String,
    pub status: SubtaskStatus,
    pub progress: u8,
    pub completed_at: Option<i64>,
    pub created_at: i64,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Parses the session-id grammar `task-<int>` (required) or `subtask-<int>`
/// (reserved, not yet routable to a distinct table).
pub fn parse_session_id(session_id: &str) -> Result<&str, HistoryError> {
    if let Some(rest) = session_id.strip_prefix("task-") {
        if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
            return Ok(session_id);
        }
    }
    Err(HistoryError::InvalidSessionId(session_id.to_string()))
}

pub struct HistoryStore {
    db: Arc<Mutex<Connection>>,
}

impl HistoryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                task_id TEXT PRIMARY KEY,
                owner_user_id TEXT NOT NULL,
                team_id TEXT NOT NULL,
                title TEXT,
                is_group_chat INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS subtasks (
                subtask_id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                message_id INTEGER NOT NULL,
                parent_id TEXT,
                role TEXT NOT NULL,
                sender_user_id TEXT,
                content TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                completed_at INTEGER,
                created_at INTEGER NOT NULL,
                UNIQUE(task_id, message_id)
            );
            CREATE INDEX IF NOT EXISTS idx_subtasks_task_id ON subtasks(task_id);
            CREATE TABLE IF NOT EXISTS subtask_contexts (
                context_id TEXT PRIMARY KEY,
                subtask_id TEXT NOT NULL,
                type TEXT NOT NULL,
                status TEXT NOT NULL,
                extracted_text TEXT,
                image_base64 TEXT,
                mime_type TEXT,
                file_size INTEGER,
                original_filename TEXT,
                knowledge_id TEXT,
                type_data TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_contexts_subtask_id ON subtask_contexts(subtask_id);
            "#,
        )?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self, HistoryError> {
        Self::open(":memory:")
    }

    pub async fn create_task(
        &self,
        owner_user_id: &str,
        team_id: &str,
        title: Option<&str>,
        is_group_chat: bool,
    ) -> Result<String, HistoryError> {
        let task_id = format!("task-{}", (uuid::Uuid::new_v4().as_u128() % 1_000_000_000) as u64);
        let now = now_ms();
        let db = self.db.clone();
        let task_id_owned = task_id.clone();
        let title = title.map(String::from);
        tokio::task::block_in_place(move || {
            let conn = db.lock().unwrap();
            conn.execute(
                "INSERT INTO tasks (task_id, owner_user_id, team_id, title, is_group_chat, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![task_id_owned, owner_user_id, team_id, title, is_group_chat as i64, TaskStatus::Pending.as_str(), now],
            )?;
            Ok(task_id_owned)
        })
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Task, HistoryError> {
        let db = self.db.clone();
        let task_id = task_id.to_string();
        tokio::task::block_in_place(move || {
            let conn = db.lock().unwrap();
            conn.query_row(
                "SELECT task_id, owner_user_id, team_id, title, is_group_chat, status, created_at, updated_at FROM tasks WHERE task_id = ?1",
                params![task_id],
                |row| {
                    Ok(Task {
                        task_id: row.get(0)?,
                        owner_user_id: row.get(1)?,
                        team_id: row.get(2)?,
                        title: row.get(3)?,
                        is_group_chat: row.get::<_, i64>(4)? != 0,
                        status: TaskStatus::parse(&row.get::<_, String>(5)?),
                        created_at: row.get(6)?,
                        updated_at: row.get(7)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| HistoryError::TaskNotFound(task_id.clone()))
        })
    }

    pub async fn get_subtask(&self, subtask_id: &str) -> Result<Subtask, HistoryError> {
        let db = self.db.clone();
        let subtask_id = subtask_id.to_string();
        tokio::task::block_in_place(move || {
            let conn = db.lock().unwrap();
            conn.query_row(
                "SELECT subtask_id, task_id, message_id, parent_id, role, sender_user_id, content, status, progress, completed_at, created_at FROM subtasks WHERE subtask_id = ?1",
                params![subtask_id],
                row_to_subtask,
            )
            .optional()?
            .ok_or_else(|| HistoryError::SubtaskNotFound(subtask_id.clone()))
        })
    }

    pub async fn set_task_status(&self, task_id: &str, status: TaskStatus) -> Result<(), HistoryError> {
        let db = self.db.clone();
        let task_id = task_id.to_string();
        tokio::task::block_in_place(move || {
            let conn = db.lock().unwrap();
            let affected = conn.execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE task_id = ?3",
                params![status.as_str(), now_ms(), task_id],
            )?;
            if affected == 0 {
                return Err(HistoryError::TaskNotFound(task_id));
            }
            Ok(())
        })
    }

    /// Appends one subtask, assigning the next dense `message_id` for the task.
    pub async fn append_message(
        &self,
        task_id: &str,
        role: SubtaskRole,
        sender_user_id: Option<&str>,
        content: &str,
        parent_id: Option<&str>,
    ) -> Result<(String, i64), HistoryError> {
        let db = self.db.clone();
        let task_id = task_id.to_string();
        let sender_user_id = sender_user_id.map(String::from);
        let content = content.to_string();
        let parent_id = parent_id.map(String::from);
        tokio::task::block_in_place(move || {
            let mut conn = db.lock().unwrap();
            let tx = conn.transaction()?;
            let next_message_id: i64 = tx
                .query_row(
                    "SELECT COALESCE(MAX(message_id), 0) + 1 FROM subtasks WHERE task_id = ?1",
                    params![task_id],
                    |row| row.get(0),
                )?;
            let subtask_id = format!("subtask-{}", uuid::Uuid::new_v4());
            let now = now_ms();
            tx.execute(
                "INSERT INTO subtasks (subtask_id, task_id, message_id, parent_id, role, sender_user_id, content, status, progress, completed_at, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, NULL, ?9)",
                params![
                    subtask_id,
                    task_id,
                    next_message_id,
                    parent_id,
                    role.as_str(),
                    sender_user_id,
                    content,
                    SubtaskStatus::Pending.as_str(),
                    now,
                ],
            )?;
            tx.commit()?;
            Ok((subtask_id, next_message_id))
        })
    }

    pub async fn append_messages_batch(
        &self,
        task_id: &str,
        messages: Vec<(SubtaskRole, Option<String>, String, Option<String>)>,
    ) -> Result<Vec<(String, i64)>, HistoryError> {
        let db = self.db.clone();
        let task_id = task_id.to_string();
        tokio::task::block_in_place(move || {
            let mut conn = db.lock().unwrap();
            let tx = conn.transaction()?;
            let mut next_message_id: i64 = tx.query_row(
                "SELECT COALESCE(MAX(message_id), 0) + 1 FROM subtasks WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )?;
            let now = now_ms();
            let mut results = Vec::with_capacity(messages.len());
            for (role, sender_user_id, content, parent_id) in messages {
                let subtask_id = format!("subtask-{}", uuid::Uuid::new_v4());
                tx.execute(
                    "INSERT INTO subtasks (subtask_id, task_id, message_id, parent_id, role, sender_user_id, content, status, progress, completed_at, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, NULL, ?9)",
                    params![
                        subtask_id,
                        task_id,
                        next_message_id,
                        parent_id,
                        role.as_str(),
                        sender_user_id,
                        content,
                        SubtaskStatus::Pending.as_str(),
                        now,
                    ],
                )?;
                results.push((subtask_id, next_message_id));
                next_message_id += 1;
            }
            tx.commit()?;
            Ok(results)
        })
    }

    pub async fn update_message_content(&self, subtask_id: &str, content: &str) -> Result<(), HistoryError> {
        let db = self.db.clone();
        let subtask_id = subtask_id.to_string();
        let content = content.to_string();
        tokio::task::block_in_place(move || {
            let conn = db.lock().unwrap();
            let affected = conn.execute(
                "UPDATE subtasks SET content = ?1 WHERE subtask_id = ?2",
                params![content, subtask_id],
            )?;
            if affected == 0 {
                return Err(HistoryError::SubtaskNotFound(subtask_id));
            }
            Ok(())
        })
    }

    pub async fn set_subtask_status(
        &self,
        subtask_id: &str,
        status: SubtaskStatus,
        progress: Option<u8>,
    ) -> Result<(), HistoryError> {
        let db = self.db.clone();
        let subtask_id = subtask_id.to_string();
        tokio::task::block_in_place(move || {
            let conn = db.lock().unwrap();
            let completed_at = matches!(status, SubtaskStatus::Completed | SubtaskStatus::Failed)
                .then(now_ms);
            let affected = conn.execute(
                "UPDATE subtasks SET status = ?1, progress = COALESCE(?2, progress), completed_at = COALESCE(?3, completed_at) WHERE subtask_id = ?4",
                params![status.as_str(), progress.map(|p| p as i64), completed_at, subtask_id],
            )?;
            if affected == 0 {
                return Err(HistoryError::SubtaskNotFound(subtask_id));
            }
            Ok(())
        })
    }

    /// Soft delete: flips status to DELETE without removing the row, per §3's
    /// tombstone-not-erase invariant.
    pub async fn delete_message(&self, subtask_id: &str) -> Result<(), HistoryError> {
        self.set_subtask_status(subtask_id, SubtaskStatus::Delete, None).await
    }

    pub async fn delete_session(&self, task_id: &str) -> Result<u64, HistoryError> {
        let db = self.db.clone();
        let task_id = task_id.to_string();
        tokio::task::block_in_place(move || {
            let conn = db.lock().unwrap();
            let affected = conn.execute(
                "UPDATE subtasks SET status = ?1 WHERE task_id = ?2 AND status != ?1",
                params![SubtaskStatus::Delete.as_str(), task_id],
            )?;
            Ok(affected as u64)
        })
    }

    /// Ordered oldest-first, excluding soft-deleted rows. `limit` (if given)
    /// means "most recent N"; `before_message_id` paginates backwards.
    pub async fn list_history(
        &self,
        task_id: &str,
        limit: Option<u32>,
        before_message_id: Option<i64>,
    ) -> Result<Vec<Subtask>, HistoryError> {
        let db = self.db.clone();
        let task_id = task_id.to_string();
        tokio::task::block_in_place(move || {
            let conn = db.lock().unwrap();
            let sql = "SELECT subtask_id, task_id, message_id, parent_id, role, sender_user_id, content, status, progress, completed_at, created_at FROM subtasks WHERE task_id = ?1 AND status != 'DELETE' AND (?2 IS NULL OR message_id < ?2) ORDER BY message_id DESC LIMIT ?3";
            let mut stmt = conn.prepare(sql)?;
            // LIMIT -1 means "no limit" in SQLite.
            let rows = stmt.query_map(
                params![task_id, before_message_id, limit.map(|l| l as i64).unwrap_or(-1)],
                row_to_subtask,
            )?;
            let mut out: Vec<Subtask> = rows.collect::<Result<Vec<_>, _>>()?;
            out.reverse();
            Ok(out)
        })
    }

    /// Persists one context record for `subtask_id` (SPEC_FULL §4.5 per-context
    /// persistence of injection mode / RAG result / kb_head result).
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_context(
        &self,
        subtask_id: &str,
        context_type: &str,
        status: &str,
        extracted_text: Option<&str>,
        knowledge_id: Option<&str>,
        type_data: Option<&str>,
    ) -> Result<String, HistoryError> {
        let db = self.db.clone();
        let subtask_id = subtask_id.to_string();
        let context_type = context_type.to_string();
        let status = status.to_string();
        let extracted_text = extracted_text.map(String::from);
        let knowledge_id = knowledge_id.map(String::from);
        let type_data = type_data.map(String::from);
        tokio::task::block_in_place(move || {
            let conn = db.lock().unwrap();
            let context_id = format!("context-{}", uuid::Uuid::new_v4());
            conn.execute(
                "INSERT INTO subtask_contexts (context_id, subtask_id, type, status, extracted_text, image_base64, mime_type, file_size, original_filename, knowledge_id, type_data) VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL, NULL, NULL, ?6, ?7)",
                params![context_id, subtask_id, context_type, status, extracted_text, knowledge_id, type_data],
            )?;
            Ok(context_id)
        })
    }

    /// Overwrites `type_data` for a context record (cross-turn `kb_head`
    /// re-materialisation, §4.5).
    pub async fn update_context_type_data(&self, context_id: &str, type_data: &str) -> Result<(), HistoryError> {
        let db = self.db.clone();
        let context_id = context_id.to_string();
        let type_data = type_data.to_string();
        tokio::task::block_in_place(move || {
            let conn = db.lock().unwrap();
            conn.execute(
                "UPDATE subtask_contexts SET type_data = ?1 WHERE context_id = ?2",
                params![type_data, context_id],
            )?;
            Ok(())
        })
    }

    pub async fn get_contexts(&self, subtask_id: &str) -> Result<Vec<ContextRecord>, HistoryError> {
        let db = self.db.clone();
        let subtask_id = subtask_id.to_string();
        tokio::task::block_in_place(move || {
            let conn = db.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT context_id, subtask_id, type, status, extracted_text, image_base64, mime_type, file_size, original_filename, knowledge_id, type_data FROM subtask_contexts WHERE subtask_id = ?1",
            )?;
            let rows = stmt.query_map(params![subtask_id], row_to_context)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub async fn list_sessions(&self, limit: u32, offset: u32) -> Result<Vec<String>, HistoryError> {
        let db = self.db.clone();
        tokio::task::block_in_place(move || {
            let conn = db.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT task_id FROM tasks ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt.query_map(params![limit as i64, offset as i64], |row| row.get::<_, String>(0))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

fn row_to_context(row: &rusqlite::Row) -> rusqlite::Result<ContextRecord> {
    Ok(ContextRecord {
        context_id: row.get(0)?,
        subtask_id: row.get(1)?,
        context_type: row.get(2)?,
        status: row.get(3)?,
        extracted_text: row.get(4)?,
        image_base64: row.get(5)?,
        mime_type: row.get(6)?,
        file_size: row.get(7)?,
        original_filename: row.get(8)?,
        knowledge_id: row.get(9)?,
        type_data: row.get(10)?,
    })
}

fn row_to_subtask(row: &rusqlite::Row) -> rusqlite::Result<Subtask> {
    Ok(Subtask {
        subtask_id: row.get(0)?,
        task_id: row.get(1)?,
        message_id: row.get(2)?,
        parent_id: row.get(3)?,
        role: SubtaskRole::parse(&row.get::<_, String>(4)?),
        sender_user_id: row.get(5)?,
        content: row.get(6)?,
        status: SubtaskStatus::parse(&row.get::<_, String>(7)?),
        progress: row.get::<_, i64>(8)? as u8,
        completed_at: row.get(9)?,
        created_at: row.get(10)?,
    })
}
