//! User-message prompt block assembly (SPEC_FULL §4.5).

use super::MAX_EXTRACTED_TEXT_LENGTH;

#[derive(Debug, Clone)]
pub struct AttachmentBlock {
    pub header: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct KnowledgeBlock {
    pub kb_name: String,
    pub kb_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnowledgePromptMode {
    /// User explicitly selected these KBs for this message: answer only from them.
    Strict,
    /// KBs are inherited from the task; general knowledge may fill gaps.
    Relaxed,
    /// No KB has RAG enabled; only exploration tools are offered.
    ExplorationOnly,
}

fn truncate_with_marker(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    if budget < 100 {
        return String::new();
    }
    let chars: Vec<char> = text.chars().collect();
    let kept: String = chars[..budget].iter().collect();
    format!("{kept}(truncated...)")
}

/// Assembles the final user-facing message content: attachments first
/// (images implicitly precede text blocks by caller ordering), then
/// knowledge-base blocks, then the raw user text. Attachments consume their
/// share of `MAX_EXTRACTED_TEXT_LENGTH` first; knowledge bases divide the
/// remainder evenly.
pub fn assemble_user_message(
    attachments: &[AttachmentBlock],
    knowledge: &[KnowledgeBlock],
    user_text: &str,
) -> String {
    let mut parts = Vec::new();
    let mut remaining = MAX_EXTRACTED_TEXT_LENGTH;

    for a in attachments {
        if remaining == 0 {
            break;
        }
        let truncated = truncate_with_marker(&a.text, remaining);
        remaining = remaining.saturating_sub(truncated.chars().count());
        if !truncated.is_empty() {
            parts.push(format!("<attachment>\n{}\n{}\n</attachment>", a.header, truncated));
        }
    }

    if !knowledge.is_empty() && remaining > 0 {
        let per_kb_budget = remaining / knowledge.len();
        for kb in knowledge {
            let truncated = truncate_with_marker(&kb.text, per_kb_budget);
            if !truncated.is_empty() {
                parts.push(format!(
                    "<knowledge_base>\n[Knowledge Base: {} (ID: {})]\n{}\n</knowledge_base>",
                    kb.kb_name, kb.kb_id, truncated
                ));
            }
        }
    }

    parts.push(user_text.to_string());
    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_attachments_then_kb_then_user_text() {
        let attachments = vec![AttachmentBlock {
            header: "file.txt".into(),
            text: "attachment body".into(),
        }];
        let knowledge = vec![KnowledgeBlock {
            kb_name: "Docs".into(),
            kb_id: "kb1".into(),
            text: "kb body".into(),
        }];
        let out = assemble_user_message(&attachments, &knowledge, "what is this?");
        let att_pos = out.find("attachment body").unwrap();
        let kb_pos = out.find("kb body").unwrap();
        let user_pos = out.find("what is this?").unwrap();
        assert!(att_pos < kb_pos);
        assert!(kb_pos < user_pos);
    }

    #[test]
    fn truncates_over_budget_knowledge_with_marker() {
        let knowledge = vec![KnowledgeBlock {
            kb_name: "Docs".into(),
            kb_id: "kb1".into(),
            text: "x".repeat(MAX_EXTRACTED_TEXT_LENGTH * 2),
        }];
        let out = assemble_user_message(&[], &knowledge, "q");
        assert!(out.contains("(truncated...)"));
    }

    #[test]
    fn no_attachments_or_kb_just_returns_user_text() {
        let out = assemble_user_message(&[], &[], "plain question");
        assert_eq!(out, "plain question");
    }
}
