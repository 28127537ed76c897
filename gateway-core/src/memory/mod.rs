//! Long-Term Memory (SPEC_FULL §4.6): fire-and-forget write, bounded-
//! timeout read, cascade delete, and the per-runtime-handle HTTP client
//! cache that stands in for the distilled spec's per-event-loop session
//! discipline (see DESIGN.md).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::error::MemoryError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub task_id: String,
    pub subtask_id: String,
    pub team_id: String,
    pub workspace_id: Option<String>,
    pub group_id: Option<String>,
    pub is_group_chat: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub memory_id: String,
    pub user_id: String,
    pub content: String,
    pub metadata: MemoryMetadata,
}

/// A `reqwest::Client` owns a connection pool tied to the runtime that
/// drives it; this cache rebuilds the client whenever the calling task is
/// observed on a different `tokio::runtime::Handle` than the one that built
/// the cached client, guarded by a per-key lock against racing rebuilds.
struct RuntimeScopedClient {
    handle_id: tokio::runtime::Id,
    client: reqwest::Client,
}

#[derive(Default)]
struct ClientCache {
    slot: AsyncMutex<Option<RuntimeScopedClient>>,
}

impl ClientCache {
    async fn get(&self) -> reqwest::Client {
        let current_handle = tokio::runtime::Handle::current().id();
        let mut slot = self.slot.lock().await;
        if let Some(existing) = slot.as_ref() {
            if existing.handle_id == current_handle {
                return existing.client.clone();
            }
        }
        let client = reqwest::Client::new();
        *slot = Some(RuntimeScopedClient {
            handle_id: current_handle,
            client: client.clone(),
        });
        client
    }
}

pub struct MemoryClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_results: usize,
}

impl Default for MemoryClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            timeout: Duration::from_secs(2),
            max_results: 10,
        }
    }
}

pub struct MemoryClient {
    config: MemoryClientConfig,
    clients: DashMap<&'static str, Arc<ClientCache>>,
}

impl MemoryClient {
    pub fn new(config: MemoryClientConfig) -> Self {
        Self {
            config,
            clients: DashMap::new(),
        }
    }

    fn client_cache(&self) -> Arc<ClientCache> {
        self.clients
            .entry("default")
            .or_insert_with(|| Arc::new(ClientCache::default()))
            .clone()
    }

    /// Fire-and-forget: failures are logged and swallowed, never surfaced.
    pub async fn save_user_message_async(&self, user_id: &str, content: &str, metadata: MemoryMetadata) {
        if self.config.base_url.is_empty() {
            return;
        }
        let client = self.client_cache().get().await;
        let url = format!("{}/memories", self.config.base_url);
        let body = serde_json::json!({"user_id": user_id, "content": content, "metadata": metadata});
        let mut req = client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }
        let result = tokio::time::timeout(self.config.timeout, req.send()).await;
        if let Err(_) | Ok(Err(_)) = result {
            warn!(user_id, "long-term memory write failed or timed out; swallowed");
        }
    }

    /// Bounded timeout; returns empty on any error (including timeout).
    pub async fn search_memories(&self, user_id: &str, query: &str) -> Vec<MemoryRecord> {
        if self.config.base_url.is_empty() {
            return Vec::new();
        }
        let client = self.client_cache().get().await;
        let url = format!("{}/memories/search", self.config.base_url);
        let body = serde_json::json!({"user_id": user_id, "query": query, "limit": self.config.max_results});
        let mut req = client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }
        match tokio::time::timeout(self.config.timeout, req.send()).await {
            Ok(Ok(resp)) => resp.json::<Vec<MemoryRecord>>().await.unwrap_or_default(),
            _ => {
                warn!(user_id, "long-term memory search failed or timed out; returning empty");
                Vec::new()
            }
        }
    }

    /// Renders recalled memories as a `<memory>` block, newest context first,
    /// each item prefixed with its parsed creation timestamp when possible.
    pub fn render_memory_block(records: &[MemoryRecord]) -> String {
        if records.is_empty() {
            return String::new();
        }
        let items: Vec<String> = records
            .iter()
            .map(|r| format!("[{}] {}", r.metadata.created_at, r.content))
            .collect();
        format!("<memory>\n{}\n</memory>", items.join("\n"))
    }

    /// Paginated delete-all-for-task, stopping after three consecutive
    /// no-progress batches or an empty result (SPEC_FULL §4.6 delete rule).
    pub async fn delete_task_memories(&self, task_id: &str) -> Result<u64, MemoryError> {
        if self.config.base_url.is_empty() {
            return Ok(0);
        }
        let client = self.client_cache().get().await;
        let mut deleted = 0u64;
        let mut no_progress_batches = 0;
        loop {
            if no_progress_batches >= 3 {
                break;
            }
            let url = format!("{}/memories?task_id={}", self.config.base_url, task_id);
            let resp = tokio::time::timeout(self.config.timeout, client.get(&url).send())
                .await
                .map_err(|_| MemoryError::Timeout)?
                .map_err(|e| MemoryError::Service(e.to_string()))?;
            let batch: Vec<MemoryRecord> = resp
                .json()
                .await
                .map_err(|e| MemoryError::Service(e.to_string()))?;
            if batch.is_empty() {
                break;
            }
            let before = deleted;
            for record in &batch {
                let del_url = format!("{}/memories/{}", self.config.base_url, record.memory_id);
                if client.delete(&del_url).send().await.is_ok() {
                    deleted += 1;
                }
            }
            if deleted == before {
                no_progress_batches += 1;
            } else {
                no_progress_batches = 0;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_when_base_url_empty() {
        let client = MemoryClient::new(MemoryClientConfig::default());
        let records = client.search_memories("u1", "q").await;
        assert!(records.is_empty());
    }

    #[test]
    fn render_memory_block_is_empty_for_no_records() {
        assert_eq!(MemoryClient::render_memory_block(&[]), "");
    }

    #[test]
    fn render_memory_block_includes_content_and_timestamp() {
        let records = vec![MemoryRecord {
            memory_id: "m1".into(),
            user_id: "u1".into(),
            content: "likes rust".into(),
            metadata: MemoryMetadata {
                task_id: "t1".into(),
                subtask_id: "s1".into(),
                team_id: "team1".into(),
                workspace_id: None,
                group_id: None,
                is_group_chat: false,
                created_at: "2026-01-01T00:00:00Z".into(),
            },
        }];
        let block = MemoryClient::render_memory_block(&records);
        assert!(block.contains("likes rust"));
        assert!(block.contains("2026-01-01T00:00:00Z"));
        assert!(block.starts_with("<memory>"));
    }

    #[tokio::test]
    async fn client_cache_reuses_client_on_same_runtime() {
        let cache = ClientCache::default();
        let handle_before = cache.slot.lock().await.is_none();
        assert!(handle_before);
        let _ = cache.get().await;
        let handle_id = cache.slot.lock().await.as_ref().unwrap().handle_id;
        let _ = cache.get().await;
        let handle_id_again = cache.slot.lock().await.as_ref().unwrap().handle_id;
        assert_eq!(handle_id, handle_id_again);
    }
}
