//! Ties together mode selection (direct / RAG / kb_head), strict-vs-relaxed
//! prompt mode, and the per-KB records persisted onto the owning context.

use std::sync::Arc;

use tracing::warn;

use crate::error::KnowledgeError;
use crate::history::HistoryStore;

use super::{KnowledgeBase, KnowledgePromptMode, RankedChunk, VectorService};

pub struct KnowledgeRetriever {
    vector_service: Arc<dyn VectorService>,
    history: Arc<HistoryStore>,
}

impl KnowledgeRetriever {
    pub fn new(vector_service: Arc<dyn VectorService>, history: Arc<HistoryStore>) -> Self {
        Self { vector_service, history }
    }

    /// Strict if the caller explicitly selected KBs for this message;
    /// relaxed if inherited from the task; exploration-only if no selected
    /// KB has RAG enabled.
    pub fn prompt_mode(explicitly_selected: bool, kbs: &[KnowledgeBase]) -> KnowledgePromptMode {
        if kbs.iter().all(|kb| !kb.rag_enabled) {
            return KnowledgePromptMode::ExplorationOnly;
        }
        if explicitly_selected {
            KnowledgePromptMode::Strict
        } else {
            KnowledgePromptMode::Relaxed
        }
    }

    /// Runs a RAG search and persists the §4.5 observability record (mode,
    /// query, chunk count, sources) onto `subtask_id`'s context. The history
    /// write is best-effort: a failure there is logged but does not fail the
    /// search, since the retrieved chunks are still usable.
    pub async fn rag_search(
        &self,
        subtask_id: &str,
        mode: KnowledgePromptMode,
        query: &str,
        kb_ids: &[String],
        document_ids: Option<&[String]>,
    ) -> Result<Vec<RankedChunk>, KnowledgeError> {
        let chunks = self.vector_service.search(query, kb_ids, document_ids).await?;

        let type_data = serde_json::json!({
            "injection_mode": format!("{mode:?}"),
            "rag_result": {
                "query": query,
                "chunk_count": chunks.len(),
                "sources": chunks.iter().map(|c| c.source.clone()).collect::<Vec<_>>(),
            },
        })
        .to_string();
        if let Err(e) = self
            .history
            .insert_context(subtask_id, "RAG", "COMPLETED", None, None, Some(&type_data))
            .await
        {
            warn!(subtask_id, error = %e, "failed to persist rag context record");
        }

        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{Document, MockVectorService};

    fn kb(rag_enabled: bool) -> KnowledgeBase {
        KnowledgeBase {
            kb_id: "kb1".into(),
            owner_user_id: "u1".into(),
            namespace: "default".into(),
            rag_enabled,
            max_calls_per_conversation: 5,
            documents: vec![],
        }
    }

    #[test]
    fn exploration_only_when_no_kb_has_rag() {
        let mode = KnowledgeRetriever::prompt_mode(true, &[kb(false)]);
        assert_eq!(mode, KnowledgePromptMode::ExplorationOnly);
    }

    #[test]
    fn strict_when_explicitly_selected() {
        let mode = KnowledgeRetriever::prompt_mode(true, &[kb(true)]);
        assert_eq!(mode, KnowledgePromptMode::Strict);
    }

    #[test]
    fn relaxed_when_inherited() {
        let mode = KnowledgeRetriever::prompt_mode(false, &[kb(true)]);
        assert_eq!(mode, KnowledgePromptMode::Relaxed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rag_search_delegates_to_vector_service() {
        let history = Arc::new(crate::history::HistoryStore::in_memory().unwrap());
        let retriever = KnowledgeRetriever::new(Arc::new(MockVectorService), history);
        let results = retriever
            .rag_search(
                "subtask-none",
                KnowledgePromptMode::Relaxed,
                "query",
                &["kb1".to_string()],
                None,
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        let _ = Document {
            document_id: "d".into(),
            attachment_id: "a".into(),
            name: "n".into(),
            file_extension: "txt".into(),
            is_active: true,
            extracted_text: String::new(),
        };
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rag_search_persists_context_record_on_real_subtask() {
        let history = Arc::new(crate::history::HistoryStore::in_memory().unwrap());
        let task_id = history.create_task("u1", "team1", None, false).await.unwrap();
        let (subtask_id, _) = history
            .append_message(&task_id, crate::history::SubtaskRole::Assistant, None, "", None)
            .await
            .unwrap();
        let retriever = KnowledgeRetriever::new(Arc::new(MockVectorService), history.clone());
        retriever
            .rag_search(&subtask_id, KnowledgePromptMode::Strict, "q", &["kb1".to_string()], None)
            .await
            .unwrap();
        let contexts = history.get_contexts(&subtask_id).await.unwrap();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].context_type, "RAG");
        assert!(contexts[0].type_data.as_ref().unwrap().contains("Strict"));
    }
}
