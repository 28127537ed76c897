//! `StreamSession`: the per-subtask producer/consumer state machine
//! (SPEC_FULL §4.8).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use crate::error::StreamError;
use crate::history::{HistoryStore, SubtaskStatus};

use super::cache::Cache;
use super::frame::{parse_done_envelope, ChatFrame, StreamDoneEnvelope};
use super::pubsub::PubSub;

const CACHE_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const DURABLE_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const CONTENT_CACHE_TTL: Duration = Duration::from_secs(3600);
const RESUME_POLL_TIMEOUT: Duration = Duration::from_secs(1);

fn channel_name(subtask_id: &str) -> String {
    format!("stream:{subtask_id}")
}

fn content_cache_key(subtask_id: &str) -> String {
    format!("content:{subtask_id}")
}

struct FlushClock {
    last_cache_flush: Instant,
    last_durable_flush: Instant,
}

pub struct StreamSession {
    pub task_id: String,
    pub subtask_id: String,
    cache: Arc<dyn Cache<String, String>>,
    pubsub: Arc<dyn PubSub>,
    history: Arc<HistoryStore>,
    pub cancel_flag: Arc<AtomicBool>,
    accumulated: StdMutex<String>,
    status: StdMutex<SubtaskStatus>,
    has_active_producer: AtomicBool,
    clock: StdMutex<FlushClock>,
}

impl StreamSession {
    pub fn new(
        task_id: impl Into<String>,
        subtask_id: impl Into<String>,
        cache: Arc<dyn Cache<String, String>>,
        pubsub: Arc<dyn PubSub>,
        history: Arc<HistoryStore>,
    ) -> Self {
        let now = Instant::now();
        Self {
            task_id: task_id.into(),
            subtask_id: subtask_id.into(),
            cache,
            pubsub,
            history,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            accumulated: StdMutex::new(String::new()),
            status: StdMutex::new(SubtaskStatus::Pending),
            has_active_producer: AtomicBool::new(false),
            clock: StdMutex::new(FlushClock {
                last_cache_flush: now,
                last_durable_flush: now,
            }),
        }
    }

    pub fn status(&self) -> SubtaskStatus {
        *self.status.lock().unwrap()
    }

    pub fn cached_content(&self) -> String {
        self.accumulated.lock().unwrap().clone()
    }

    /// Registers this session as the subtask's sole producer. At most one
    /// concurrent producer is allowed per subtask-id (§4.8 Invariant).
    pub fn begin_producing(&self) -> Result<(), StreamError> {
        if self
            .has_active_producer
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(StreamError::ProducerAlreadyActive(self.subtask_id.clone()));
        }
        *self.status.lock().unwrap() = SubtaskStatus::Running;
        Ok(())
    }

    /// Appends a token delta, publishes it live, and flushes the cache/
    /// durable snapshots on their respective intervals.
    pub async fn push_chunk(&self, chunk: &str) -> u64 {
        let offset_before = {
            let mut acc = self.accumulated.lock().unwrap();
            let offset = acc.len() as u64;
            acc.push_str(chunk);
            offset
        };
        self.pubsub.publish(&channel_name(&self.subtask_id), chunk.to_string()).await;

        let (flush_cache, flush_durable) = {
            let mut clock = self.clock.lock().unwrap();
            let now = Instant::now();
            let flush_cache = now.duration_since(clock.last_cache_flush) >= CACHE_FLUSH_INTERVAL;
            let flush_durable = now.duration_since(clock.last_durable_flush) >= DURABLE_FLUSH_INTERVAL;
            if flush_cache {
                clock.last_cache_flush = now;
            }
            if flush_durable {
                clock.last_durable_flush = now;
            }
            (flush_cache, flush_durable)
        };
        if flush_cache {
            let snapshot = self.cached_content();
            let _ = self
                .cache
                .set(content_cache_key(&self.subtask_id), snapshot, Some(CONTENT_CACHE_TTL))
                .await;
        }
        if flush_durable {
            let snapshot = self.cached_content();
            if let Err(e) = self.history.update_message_content(&self.subtask_id, &snapshot).await {
                warn!(subtask_id = %self.subtask_id, error = %e, "durable flush failed");
            }
        }
        offset_before
    }

    /// Completes the stream: final durable write, cache snapshot, and a
    /// STREAM_DONE envelope published to subscribers.
    pub async fn finish(&self, result: Value) -> Result<(), StreamError> {
        let final_content = self.cached_content();
        *self.status.lock().unwrap() = SubtaskStatus::Completed;
        self.has_active_producer.store(false, Ordering::SeqCst);

        let _ = self
            .cache
            .set(content_cache_key(&self.subtask_id), final_content.clone(), Some(CONTENT_CACHE_TTL))
            .await;
        self.history
            .update_message_content(&self.subtask_id, &final_content)
            .await
            .map_err(|e| StreamError::Cache(e.to_string()))?;
        self.history
            .set_subtask_status(&self.subtask_id, SubtaskStatus::Completed, Some(100))
            .await
            .map_err(|e| StreamError::Cache(e.to_string()))?;
        self.history
            .set_task_status(&self.task_id, crate::history::TaskStatus::Completed)
            .await
            .map_err(|e| StreamError::Cache(e.to_string()))?;

        self.pubsub
            .publish(&channel_name(&self.subtask_id), StreamDoneEnvelope::new(result).to_json())
            .await;
        Ok(())
    }

    /// Provider error mid-stream: flush what was produced and mark
    /// COMPLETED with `incomplete: true` rather than FAILED (§7).
    pub async fn fail_mid_stream(&self, error_text: &str) -> Result<(), StreamError> {
        warn!(subtask_id = %self.subtask_id, error_text, "provider error mid-stream, flushing partial content");
        self.finish(serde_json::json!({"value": self.cached_content(), "incomplete": true}))
            .await
    }

    /// Provider error before any content was produced.
    pub async fn fail_before_start(&self, error_text: &str) -> Result<(), StreamError> {
        *self.status.lock().unwrap() = SubtaskStatus::Failed;
        self.has_active_producer.store(false, Ordering::SeqCst);
        self.history
            .set_subtask_status(&self.subtask_id, SubtaskStatus::Failed, None)
            .await
            .map_err(|e| StreamError::Cache(e.to_string()))?;
        self.history
            .set_task_status(&self.task_id, crate::history::TaskStatus::Failed)
            .await
            .map_err(|e| StreamError::Cache(e.to_string()))?;
        self.pubsub
            .publish(&channel_name(&self.subtask_id), ChatFrame::fatal_error(error_text).to_json())
            .await;
        Ok(())
    }

    /// Cancel semantics: COMPLETED with whatever partial content the client
    /// forwards, task flipped back to COMPLETED, never an error message.
    pub async fn cancel(&self, partial_content: Option<String>) -> Result<(), StreamError> {
        self.cancel_flag.store(true, Ordering::SeqCst);
        let content = partial_content.unwrap_or_default();
        *self.accumulated.lock().unwrap() = content.clone();
        *self.status.lock().unwrap() = SubtaskStatus::Completed;
        self.has_active_producer.store(false, Ordering::SeqCst);
        self.history
            .update_message_content(&self.subtask_id, &content)
            .await
            .map_err(|e| StreamError::Cache(e.to_string()))?;
        self.history
            .set_subtask_status(&self.subtask_id, SubtaskStatus::Completed, Some(100))
            .await
            .map_err(|e| StreamError::Cache(e.to_string()))?;
        self.history
            .set_task_status(&self.task_id, crate::history::TaskStatus::Completed)
            .await
            .map_err(|e| StreamError::Cache(e.to_string()))?;
        Ok(())
    }

    /// Implements the five-step resume protocol: replay the cached prefix,
    /// re-check status, then subscribe live, re-checking durable state on
    /// silent intervals in case a STREAM_DONE envelope was missed.
    pub fn resume(self: Arc<Self>, from_offset: u64) -> ReceiverStream<ChatFrame> {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let cached = self.cached_content();
            let start = (from_offset as usize).min(cached.len());
            let mut local_offset = from_offset.max(start as u64);

            if start < cached.len() {
                let suffix = &cached[start..];
                local_offset = cached.len() as u64;
                if tx.send(ChatFrame::delta(start as u64, suffix.to_string())).await.is_err() {
                    return;
                }
            }

            match self.status() {
                SubtaskStatus::Completed => {
                    let _ = tx
                        .send(ChatFrame::terminal(local_offset, serde_json::json!({"value": cached})))
                        .await;
                    return;
                }
                SubtaskStatus::Failed => {
                    let _ = tx.send(ChatFrame::fatal_error("stream failed")).await;
                    return;
                }
                _ => {}
            }

            let mut rx_live = self.pubsub.subscribe(&channel_name(&self.subtask_id));
            loop {
                match tokio::time::timeout(RESUME_POLL_TIMEOUT, rx_live.recv()).await {
                    Ok(Ok(body)) => {
                        if let Some(envelope) = parse_done_envelope(&body) {
                            let result = if envelope.result.is_null() {
                                serde_json::json!({"value": self.cached_content()})
                            } else {
                                envelope.result
                            };
                            let _ = tx.send(ChatFrame::terminal(local_offset, result)).await;
                            return;
                        }
                        if tx.send(ChatFrame::delta(local_offset, body.clone())).await.is_err() {
                            return;
                        }
                        local_offset += body.len() as u64;
                    }
                    Ok(Err(_)) => {
                        // Lagged or closed broadcast channel: fall through to a status recheck.
                    }
                    Err(_) => {
                        // 1s silent interval elapsed; status recheck below handles the
                        // "missed completion" race on its own 2s cadence.
                    }
                }

                if self.status() != SubtaskStatus::Running && self.status() != SubtaskStatus::Pending {
                    let result = serde_json::json!({"value": self.cached_content()});
                    let _ = tx.send(ChatFrame::terminal(local_offset, result)).await;
                    return;
                }
            }
        });
        ReceiverStream::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{HistoryStore, SubtaskRole};
    use crate::stream::cache::InMemoryCache;
    use crate::stream::pubsub::InMemoryPubSub;
    use futures_util::StreamExt;

    async fn session() -> (Arc<StreamSession>, String) {
        let history = Arc::new(HistoryStore::in_memory().unwrap());
        let task_id = history.create_task("u1", "team1", None, false).await.unwrap();
        let (subtask_id, _) = history
            .append_message(&task_id, SubtaskRole::Assistant, None, "", None)
            .await
            .unwrap();
        let cache: Arc<dyn Cache<String, String>> = Arc::new(InMemoryCache::new());
        let pubsub: Arc<dyn PubSub> = Arc::new(InMemoryPubSub::new());
        let session = Arc::new(StreamSession::new(task_id, subtask_id.clone(), cache, pubsub, history));
        (session, subtask_id)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn begin_producing_rejects_second_producer() {
        let (session, _) = session().await;
        session.begin_producing().unwrap();
        assert!(session.begin_producing().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_chunk_accumulates_and_publishes() {
        let (session, _) = session().await;
        session.begin_producing().unwrap();
        session.push_chunk("hello ").await;
        session.push_chunk("world").await;
        assert_eq!(session.cached_content(), "hello world");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn finish_marks_completed_and_writes_durable_content() {
        let (session, subtask_id) = session().await;
        session.begin_producing().unwrap();
        session.push_chunk("answer").await;
        session.finish(serde_json::json!({"value": "answer"})).await.unwrap();
        assert_eq!(session.status(), SubtaskStatus::Completed);
        let history = session.history.clone();
        let row = history.list_history(&session.task_id, None, None).await.unwrap();
        let found = row.iter().find(|s| s.subtask_id == subtask_id).unwrap();
        assert_eq!(found.content, "answer");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_sets_completed_with_partial_content_and_no_error() {
        let (session, _) = session().await;
        session.begin_producing().unwrap();
        session.push_chunk("Hi the").await;
        session.cancel(Some("Hi the".to_string())).await.unwrap();
        assert_eq!(session.status(), SubtaskStatus::Completed);
        assert!(session.cancel_flag.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resume_from_zero_replays_cached_prefix_then_terminal() {
        let (session, _) = session().await;
        session.begin_producing().unwrap();
        session.push_chunk("hello").await;
        session.finish(serde_json::json!({"value": "hello"})).await.unwrap();

        let mut stream = session.resume(0);
        let first = stream.next().await.unwrap();
        assert_eq!(first.content.as_deref(), Some("hello"));
        let second = stream.next().await.unwrap();
        assert_eq!(second.done, Some(true));
    }
}
