//! Knowledge Injection (SPEC_FULL §4.5): direct injection, RAG retrieval,
//! cross-turn `kb_head` slicing, and prompt-block assembly.

mod prompt;
mod retriever;
mod vector_service;

pub use prompt::{assemble_user_message, AttachmentBlock, KnowledgePromptMode, KnowledgeBlock};
pub use retriever::KnowledgeRetriever;
pub use vector_service::{MockVectorService, RankedChunk, VectorService};

use serde::{Deserialize, Serialize};

pub const DEFAULT_KB_HEAD_LIMIT: usize = 50_000;
pub const MAX_EXTRACTED_TEXT_LENGTH: usize = 100_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub attachment_id: String,
    pub name: String,
    pub file_extension: String,
    pub is_active: bool,
    pub extracted_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub kb_id: String,
    pub owner_user_id: String,
    pub namespace: String,
    pub rag_enabled: bool,
    pub max_calls_per_conversation: u32,
    pub documents: Vec<Document>,
}

impl KnowledgeBase {
    pub fn active_documents(&self) -> Vec<&Document> {
        self.documents.iter().filter(|d| d.is_active).collect()
    }

    /// Concatenates every active document's text, in creation order, each
    /// prefixed per SPEC_FULL §8's KB-read-materialisation property.
    pub fn direct_injection_text(&self) -> String {
        self.active_documents()
            .iter()
            .map(|d| format!("## Document: {} ({})\n\n{}", d.name, d.file_extension, d.extracted_text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbHeadResult {
    pub document_ids: Vec<String>,
    pub offset: usize,
    pub limit: usize,
}

/// Applies a `kb_head` slice to a set of documents with per-document
/// `min(offset, len)` clamping and a total budget cap.
pub fn kb_head_slice(docs: &[&Document], request: &KbHeadResult) -> String {
    let mut remaining_budget = request.limit.min(DEFAULT_KB_HEAD_LIMIT);
    let mut parts = Vec::new();
    for doc in docs {
        if remaining_budget == 0 {
            break;
        }
        let chars: Vec<char> = doc.extracted_text.chars().collect();
        let offset = request.offset.min(chars.len());
        let available = chars.len() - offset;
        let take = available.min(remaining_budget);
        let slice: String = chars[offset..offset + take].iter().collect();
        remaining_budget -= take;
        parts.push(format!("## Document: {}\n\n{}", doc.name, slice));
    }
    parts.join("\n\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    DirectInjection,
    Rag,
    KbHead,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, text: &str, active: bool) -> Document {
        Document {
            document_id: id.into(),
            attachment_id: format!("att-{id}"),
            name: format!("doc-{id}"),
            file_extension: "txt".into(),
            is_active: active,
            extracted_text: text.into(),
        }
    }

    #[test]
    fn direct_injection_only_uses_active_documents() {
        let kb = KnowledgeBase {
            kb_id: "kb1".into(),
            owner_user_id: "u1".into(),
            namespace: "default".into(),
            rag_enabled: false,
            max_calls_per_conversation: 5,
            documents: vec![doc("1", "alpha", true), doc("2", "beta", false)],
        };
        let text = kb.direct_injection_text();
        assert!(text.contains("alpha"));
        assert!(!text.contains("beta"));
    }

    #[test]
    fn kb_head_clamps_offset_per_document() {
        let d = doc("1", "0123456789", true);
        let docs = vec![&d];
        let req = KbHeadResult {
            document_ids: vec!["1".into()],
            offset: 100,
            limit: 50,
        };
        let out = kb_head_slice(&docs, &req);
        assert!(out.contains("## Document: doc-1"));
        assert!(!out.contains("0123456789"));
    }

    #[test]
    fn kb_head_respects_total_budget() {
        let d1 = doc("1", &"a".repeat(40), true);
        let d2 = doc("2", &"b".repeat(40), true);
        let req = KbHeadResult {
            document_ids: vec!["1".into(), "2".into()],
            offset: 0,
            limit: 50,
        };
        let out = kb_head_slice(&[&d1, &d2], &req);
        let a_count = out.matches('a').count();
        let b_count = out.matches('b').count();
        assert_eq!(a_count + b_count, 50);
    }
}
