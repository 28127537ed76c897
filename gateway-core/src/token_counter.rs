//! Provider-aware token estimation (SPEC_FULL §4.1).
//!
//! No BPE encoder is linked into this crate, so `encoder_for` always returns
//! `None` and every model falls through to the character-ratio path. The
//! branch is kept explicit (rather than collapsed into the ratio lookup) so
//! a future BPE backend is a one-function change.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
    Google,
    Other,
}

impl Provider {
    pub fn from_model_id(model_id: &str) -> Self {
        let m = model_id.to_ascii_lowercase();
        if m.starts_with("gpt-") || m.starts_with("o1") || m.starts_with("o3") {
            Provider::OpenAi
        } else if m.starts_with("claude") {
            Provider::Anthropic
        } else if m.starts_with("gemini") {
            Provider::Google
        } else {
            Provider::Other
        }
    }

    fn chars_per_token(self) -> f64 {
        match self {
            Provider::OpenAi => 4.0,
            Provider::Anthropic => 3.5,
            Provider::Google => 4.0,
            Provider::Other => 4.0,
        }
    }

    fn per_image_tokens(self) -> u32 {
        match self {
            Provider::OpenAi => 765,
            Provider::Anthropic => 1_600,
            Provider::Google => 1_000,
            Provider::Other => 1_000,
        }
    }
}

const PER_MESSAGE_OVERHEAD: u32 = 3;
const PER_ROLE_OVERHEAD: u32 = 2;
const LARGE_IMAGE_BYTES: usize = 1024 * 1024;

/// Returns `Some` only when a BPE encoder for `model_id` is linked in. This
/// crate never links one; kept as a function so the decision point exists.
fn encoder_for(_model_id: &str) -> Option<()> {
    None
}

use crate::message::{ContentPart, Message};

pub fn count_text(text: &str, provider: Provider) -> u32 {
    let chars = text.chars().count() as f64;
    (chars / provider.chars_per_token()).ceil() as u32
}

pub fn count_message(message: &Message, model_id: &str) -> u32 {
    let provider = Provider::from_model_id(model_id);
    if encoder_for(model_id).is_some() {
        unreachable!("no BPE encoder is linked into this build");
    }

    let mut total = PER_MESSAGE_OVERHEAD + PER_ROLE_OVERHEAD;
    for part in &message.content {
        total += match part {
            ContentPart::Text { text } => count_text(text, provider),
            ContentPart::Image { decoded_bytes, .. } => {
                let base = provider.per_image_tokens();
                if *decoded_bytes > LARGE_IMAGE_BYTES {
                    base * 2
                } else {
                    base
                }
            }
        };
    }
    for call in &message.tool_calls {
        total += count_text(&call.name, provider);
        total += count_text(&call.arguments.to_string(), provider);
    }
    total
}

pub fn count_messages(messages: &[Message], model_id: &str) -> u32 {
    messages.iter().map(|m| count_message(m, model_id)).sum()
}

pub fn is_over_limit(messages: &[Message], model_id: &str, limit: u32) -> bool {
    count_messages(messages, model_id) > limit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_detection() {
        assert_eq!(Provider::from_model_id("gpt-4o"), Provider::OpenAi);
        assert_eq!(Provider::from_model_id("claude-3-5-sonnet"), Provider::Anthropic);
        assert_eq!(Provider::from_model_id("gemini-1.5-pro"), Provider::Google);
        assert_eq!(Provider::from_model_id("llama-3"), Provider::Other);
    }

    #[test]
    fn count_text_uses_provider_ratio() {
        let t = "a".repeat(40);
        assert_eq!(count_text(&t, Provider::OpenAi), 10);
        assert_eq!(count_text(&t, Provider::Anthropic), (40.0_f64 / 3.5).ceil() as u32);
    }

    #[test]
    fn count_message_adds_overhead() {
        let m = Message::user("hi");
        let got = count_message(&m, "gpt-4o");
        assert!(got > count_text("hi", Provider::OpenAi));
    }

    #[test]
    fn large_image_doubles_cost() {
        let mut m = Message::user("");
        m.content.clear();
        m.content.push(ContentPart::Image {
            base64: String::new(),
            decoded_bytes: 2 * LARGE_IMAGE_BYTES,
        });
        let got = count_message(&m, "gpt-4o");
        assert_eq!(got, PER_MESSAGE_OVERHEAD + PER_ROLE_OVERHEAD + 765 * 2);
    }

    #[test]
    fn is_over_limit_sums_all_messages() {
        let msgs = vec![Message::user("x".repeat(400)), Message::assistant("y".repeat(400))];
        assert!(is_over_limit(&msgs, "gpt-4o", 10));
        assert!(!is_over_limit(&msgs, "gpt-4o", 100_000));
    }

    #[test]
    fn deterministic() {
        let msgs = vec![Message::system("s"), Message::user("hello world")];
        assert_eq!(count_messages(&msgs, "gpt-4o"), count_messages(&msgs, "gpt-4o"));
    }
}
