//! RAG is an external call, not an in-process index (Non-goals: "does not
//! implement a search engine or a vector store"). `VectorService` is the
//! I/O boundary trait, following `loom`'s `LlmClient`/`MockLlm` pattern of
//! trait-plus-mock at the provider seam.

use async_trait::async_trait;

use crate::error::KnowledgeError;

#[derive(Debug, Clone)]
pub struct RankedChunk {
    pub document_id: String,
    pub text: String,
    pub score: f32,
    pub source: String,
}

#[async_trait]
pub trait VectorService: Send + Sync {
    async fn search(
        &self,
        query: &str,
        kb_ids: &[String],
        document_ids: Option<&[String]>,
    ) -> Result<Vec<RankedChunk>, KnowledgeError>;
}

/// Deterministic test double: returns one chunk per requested KB, echoing
/// the query, ordered by kb_id.
#[derive(Default)]
pub struct MockVectorService;

#[async_trait]
impl VectorService for MockVectorService {
    async fn search(
        &self,
        query: &str,
        kb_ids: &[String],
        _document_ids: Option<&[String]>,
    ) -> Result<Vec<RankedChunk>, KnowledgeError> {
        Ok(kb_ids
            .iter()
            .enumerate()
            .map(|(i, kb_id)| RankedChunk {
                document_id: format!("{kb_id}-mock-doc"),
                text: format!("mock result for '{query}' in {kb_id}"),
                score: 1.0 - (i as f32 * 0.01),
                source: kb_id.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_returns_one_chunk_per_kb() {
        let service = MockVectorService;
        let kb_ids = vec!["kb1".to_string(), "kb2".to_string()];
        let chunks = service.search("hello", &kb_ids, None).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.contains("hello"));
    }
}
