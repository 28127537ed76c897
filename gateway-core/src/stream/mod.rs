//! Stream Lifecycle Manager (SPEC_FULL §4.8): the per-subtask producer/
//! consumer state machine, its Pub/Sub and cache substrate, and the
//! group-chat trigger rule.

mod cache;
mod frame;
mod pubsub;
mod session;

pub use cache::{Cache, InMemoryCache};
pub use frame::{parse_done_envelope, ChatFrame, StreamDoneEnvelope, LEGACY_STREAM_DONE_MARKER, STREAM_DONE_TYPE};
pub use pubsub::{InMemoryPubSub, PubSub};
pub use session::StreamSession;

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::history::HistoryStore;

/// A USER message in a group-chat task triggers an ASSISTANT subtask iff it
/// mentions the team by exact substring `@TeamName`.
pub fn should_trigger_ai(is_group_chat: bool, team_name: &str, message: &str) -> bool {
    if !is_group_chat {
        return true;
    }
    message.contains(&format!("@{team_name}"))
}

/// Who is currently streaming into a group-chat task, for the "X is typing" UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStreamingStatus {
    pub subtask_id: String,
    pub user_id: String,
    pub username: String,
}

/// Owns the shared cache/pub-sub substrate and the registry of in-flight
/// `StreamSession`s. One instance per process; sessions are looked up by
/// subtask-id for cancel/resume requests that arrive on a different task
/// than the one that created the session (different request, same worker).
pub struct StreamManager {
    cache: Arc<dyn Cache<String, String>>,
    pubsub: Arc<dyn PubSub>,
    history: Arc<HistoryStore>,
    sessions: DashMap<String, Arc<StreamSession>>,
}

impl StreamManager {
    pub fn new(history: Arc<HistoryStore>) -> Self {
        Self {
            cache: Arc::new(InMemoryCache::new()),
            pubsub: Arc::new(InMemoryPubSub::new()),
            history,
            sessions: DashMap::new(),
        }
    }

    pub fn create_session(&self, task_id: impl Into<String>, subtask_id: impl Into<String>) -> Arc<StreamSession> {
        let subtask_id = subtask_id.into();
        let session = Arc::new(StreamSession::new(
            task_id.into(),
            subtask_id.clone(),
            self.cache.clone(),
            self.pubsub.clone(),
            self.history.clone(),
        ));
        self.sessions.insert(subtask_id, session.clone());
        session
    }

    pub fn get_session(&self, subtask_id: &str) -> Option<Arc<StreamSession>> {
        self.sessions.get(subtask_id).map(|s| s.clone())
    }

    pub fn remove_session(&self, subtask_id: &str) {
        self.sessions.remove(subtask_id);
    }

    async fn streaming_status_key(task_id: &str) -> String {
        format!("task_streaming_status:{task_id}")
    }

    pub async fn mark_streaming(&self, task_id: &str, status: &TaskStreamingStatus) -> Result<(), StreamError> {
        let body = serde_json::to_string(status).map_err(|e| StreamError::Cache(e.to_string()))?;
        self.cache
            .set(Self::streaming_status_key(task_id).await, body, None)
            .await
    }

    pub async fn clear_streaming(&self, task_id: &str) -> Result<(), StreamError> {
        self.cache.delete(&Self::streaming_status_key(task_id).await).await
    }

    pub async fn streaming_status(&self, task_id: &str) -> Option<TaskStreamingStatus> {
        let raw = self.cache.get(&Self::streaming_status_key(task_id).await).await?;
        serde_json::from_str(&raw).ok()
    }

    /// Generic cache passthrough backing the transient tool-results/
    /// pending-tool-calls scratch endpoints (SPEC_FULL §6), which have no
    /// bespoke lifecycle of their own.
    pub async fn cache_set(&self, key: String, value: String) -> Result<(), StreamError> {
        self.cache.set(key, value, None).await
    }

    pub async fn cache_get(&self, key: &str) -> Option<String> {
        self.cache.get(&key.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_rule_requires_exact_team_mention_in_group_chat() {
        assert!(should_trigger_ai(true, "Researchers", "@Researchers summarise"));
        assert!(!should_trigger_ai(true, "Researchers", "fyi, team"));
        assert!(should_trigger_ai(false, "Researchers", "fyi, team"));
    }

    #[tokio::test]
    async fn streaming_status_roundtrips_through_cache() {
        let history = Arc::new(HistoryStore::in_memory().unwrap());
        let manager = StreamManager::new(history);
        let status = TaskStreamingStatus {
            subtask_id: "s1".into(),
            user_id: "u1".into(),
            username: "alice".into(),
        };
        manager.mark_streaming("t1", &status).await.unwrap();
        let fetched = manager.streaming_status("t1").await.unwrap();
        assert_eq!(fetched.username, "alice");
        manager.clear_streaming("t1").await.unwrap();
        assert!(manager.streaming_status("t1").await.is_none());
    }

    #[tokio::test]
    async fn session_registry_create_get_remove() {
        let history = Arc::new(HistoryStore::in_memory().unwrap());
        let manager = StreamManager::new(history);
        let session = manager.create_session("t1", "s1");
        assert!(Arc::ptr_eq(&session, &manager.get_session("s1").unwrap()));
        manager.remove_session("s1");
        assert!(manager.get_session("s1").is_none());
    }
}
