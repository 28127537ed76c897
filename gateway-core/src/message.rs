//! Conversation message types shared by the compressor, agent loop and
//! history store.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One content part of a message. Text dominates; images are counted
/// separately by the token counter (SPEC_FULL §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { base64: String, decoded_bytes: usize },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on `Role::Tool` messages to correlate with the call that produced them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentPart::text(text)],
            tool_calls: vec![],
            tool_call_id: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::text(text)],
            tool_calls: vec![],
            tool_call_id: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentPart::text(text)],
            tool_calls: vec![],
            tool_call_id: None,
        }
    }

    pub fn assistant_with_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![],
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: vec![ContentPart::text(text)],
            tool_calls: vec![],
            tool_call_id: Some(call_id.into()),
        }
    }

    /// Concatenation of all text parts, ignoring image parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn char_len(&self) -> usize {
        self.content
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => text.chars().count(),
                ContentPart::Image { .. } => 0,
            })
            .sum()
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.content = vec![ContentPart::text(text)];
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_role_and_text() {
        assert_eq!(Message::system("sys").role, Role::System);
        assert_eq!(Message::user("hi").text(), "hi");
        assert_eq!(Message::assistant("ok").role, Role::Assistant);
    }

    #[test]
    fn tool_result_carries_call_id() {
        let m = Message::tool_result("call-1", "42");
        assert_eq!(m.tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(m.text(), "42");
    }

    #[test]
    fn char_len_ignores_images() {
        let mut m = Message::user("hello");
        m.content.push(ContentPart::Image {
            base64: "x".into(),
            decoded_bytes: 10,
        });
        assert_eq!(m.char_len(), 5);
    }
}
