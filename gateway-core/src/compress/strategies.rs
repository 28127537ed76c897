//! The three weighted truncation strategies (SPEC_FULL §4.2).

use crate::message::{Message, Role};
use crate::token_counter::count_messages;

use super::config::CompressionConfig;

pub trait Strategy {
    /// Returns (compressible_tokens, min_retention_ratio) without mutating `messages`.
    fn estimate_potential(
        &self,
        messages: &[Message],
        model_id: &str,
        cfg: &CompressionConfig,
    ) -> (u32, f64);

    /// Mutates `messages` in place, spending at most `budget` tokens of
    /// reclaimed space (may under-spend; must not wildly overshoot).
    /// Returns the number of tokens actually reclaimed.
    fn compress(
        &self,
        messages: &mut Vec<Message>,
        budget: u32,
        model_id: &str,
        cfg: &CompressionConfig,
    ) -> u32;
}

fn truncate_middle(text: &str, retention_ratio: f64, floor: f64) -> String {
    let ratio = retention_ratio.max(floor).min(1.0);
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let keep = ((len as f64) * ratio).round() as usize;
    if keep >= len {
        return text.to_string();
    }
    let head_len = keep / 2;
    let tail_len = keep - head_len;
    let head: String = chars[..head_len].iter().collect();
    let tail: String = chars[len - tail_len..].iter().collect();
    format!(
        "{head}\n...[truncated {} chars]...\n{tail}",
        len - keep,
        head = head,
        tail = tail
    )
}

/// Binary-searches the highest retention ratio whose resulting token count
/// is at or below `budget` (within 5% below), capped at
/// `cfg.binary_search_max_iterations` iterations.
fn search_retention_ratio(
    block_texts: &[String],
    rebuild: impl Fn(&[String]) -> Vec<Message>,
    budget_tokens: u32,
    model_id: &str,
    floor: f64,
    max_iterations: u32,
) -> (Vec<String>, f64) {
    let mut lo = floor;
    let mut hi = 1.0_f64;
    let mut best = block_texts
        .iter()
        .map(|t| truncate_middle(t, floor, floor))
        .collect::<Vec<_>>();
    let mut best_ratio = floor;

    for _ in 0..max_iterations {
        let mid = (lo + hi) / 2.0;
        let candidate = block_texts
            .iter()
            .map(|t| truncate_middle(t, mid, floor))
            .collect::<Vec<_>>();
        let tokens = count_messages(&rebuild(&candidate), model_id);
        if tokens <= budget_tokens {
            best = candidate;
            best_ratio = mid;
            lo = mid;
        } else {
            hi = mid;
        }
        if (hi - lo).abs() < 0.01 {
            break;
        }
    }
    (best, best_ratio)
}

/// Strategy 1: keep system messages, the first K_first and last K_last
/// conversation messages, summarise the rest with one system note.
pub struct HistoryTruncation;

impl Strategy for HistoryTruncation {
    fn estimate_potential(
        &self,
        messages: &[Message],
        model_id: &str,
        cfg: &CompressionConfig,
    ) -> (u32, f64) {
        let conv_indices: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role != Role::System)
            .map(|(i, _)| i)
            .collect();
        if conv_indices.len() <= cfg.first_messages + cfg.last_messages {
            return (0, 1.0);
        }
        let middle: Vec<Message> = conv_indices
            [cfg.first_messages..conv_indices.len() - cfg.last_messages]
            .iter()
            .map(|&i| messages[i].clone())
            .collect();
        (count_messages(&middle, model_id), 0.0)
    }

    fn compress(
        &self,
        messages: &mut Vec<Message>,
        _budget: u32,
        _model_id: &str,
        cfg: &CompressionConfig,
    ) -> u32 {
        let before: Vec<Message> = messages.clone();
        let conv_indices: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role != Role::System)
            .map(|(i, _)| i)
            .collect();
        if conv_indices.len() <= cfg.first_messages + cfg.last_messages {
            return 0;
        }
        let keep_first: Vec<usize> = conv_indices[..cfg.first_messages].to_vec();
        let keep_last: Vec<usize> =
            conv_indices[conv_indices.len() - cfg.last_messages..].to_vec();
        let mut result = Vec::new();
        for (i, m) in before.iter().enumerate() {
            if m.role == Role::System || keep_first.contains(&i) {
                result.push(m.clone());
            }
        }
        result.push(Message::system(
            "(earlier conversation history truncated to fit the context window)",
        ));
        for &i in &keep_last {
            result.push(before[i].clone());
        }
        *messages = result;
        0
    }
}

fn is_attachment_block(m: &Message) -> bool {
    let t = m.text();
    t.contains("File Content") || t.contains("<attachment") || t.contains("[Attachment")
}

fn is_tool_result_block(m: &Message) -> bool {
    m.role == Role::Tool || m.text().contains("[Tool Result")
}

fn truncation_strategy<F: Fn(&Message) -> bool>(
    messages: &mut Vec<Message>,
    budget: u32,
    model_id: &str,
    cfg: &CompressionConfig,
    predicate: F,
) -> u32 {
    let before_tokens = count_messages(messages, model_id);
    let target_indices: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| predicate(m) && m.char_len() >= cfg.min_attachment_block_len)
        .map(|(i, _)| i)
        .collect();
    if target_indices.is_empty() {
        return 0;
    }
    let block_texts: Vec<String> = target_indices.iter().map(|&i| messages[i].text()).collect();
    let other_tokens = before_tokens
        - count_messages(
            &target_indices.iter().map(|&i| messages[i].clone()).collect::<Vec<_>>(),
            model_id,
        );
    let budget_for_blocks = budget.saturating_sub(other_tokens.min(budget));
    let messages_snapshot = messages.clone();
    let rebuild = move |texts: &[String]| -> Vec<Message> {
        let mut m = messages_snapshot.clone();
        for (slot, text) in target_indices.iter().zip(texts.iter()) {
            m[*slot] = m[*slot].clone().with_text(text.clone());
        }
        m
    };
    let (truncated, _ratio) = search_retention_ratio(
        &block_texts,
        rebuild,
        budget_for_blocks,
        model_id,
        cfg.floor_retention_ratio,
        cfg.binary_search_max_iterations,
    );
    let target_indices: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| predicate(m) && m.char_len() >= cfg.min_attachment_block_len)
        .map(|(i, _)| i)
        .collect();
    for (slot, text) in target_indices.iter().zip(truncated.iter()) {
        messages[*slot] = messages[*slot].clone().with_text(text.clone());
    }
    let after_tokens = count_messages(messages, model_id);
    before_tokens.saturating_sub(after_tokens)
}

/// Strategy 2: truncate the middle of attachment-like blocks.
pub struct AttachmentTruncation;

impl Strategy for AttachmentTruncation {
    fn estimate_potential(
        &self,
        messages: &[Message],
        model_id: &str,
        cfg: &CompressionConfig,
    ) -> (u32, f64) {
        let blocks: Vec<Message> = messages
            .iter()
            .filter(|m| is_attachment_block(m) && m.char_len() >= cfg.min_attachment_block_len)
            .cloned()
            .collect();
        let potential = count_messages(&blocks, model_id);
        (potential, cfg.floor_retention_ratio)
    }

    fn compress(
        &self,
        messages: &mut Vec<Message>,
        budget: u32,
        model_id: &str,
        cfg: &CompressionConfig,
    ) -> u32 {
        truncation_strategy(messages, budget, model_id, cfg, is_attachment_block)
    }
}

/// Strategy 3: truncate the middle of tool-result blocks.
pub struct ToolResultTruncation;

impl Strategy for ToolResultTruncation {
    fn estimate_potential(
        &self,
        messages: &[Message],
        model_id: &str,
        cfg: &CompressionConfig,
    ) -> (u32, f64) {
        let blocks: Vec<Message> = messages
            .iter()
            .filter(|m| is_tool_result_block(m) && m.char_len() >= cfg.min_attachment_block_len)
            .cloned()
            .collect();
        let potential = count_messages(&blocks, model_id);
        (potential, cfg.floor_retention_ratio)
    }

    fn compress(
        &self,
        messages: &mut Vec<Message>,
        budget: u32,
        model_id: &str,
        cfg: &CompressionConfig,
    ) -> u32 {
        truncation_strategy(messages, budget, model_id, cfg, is_tool_result_block)
    }
}
