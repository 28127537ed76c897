//! Wire shape for the chat-facing SSE stream (SPEC_FULL §6): preamble,
//! delta, terminal, error, and the group-chat non-trigger frame.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct ChatFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtask_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_triggered: Option<bool>,
}

impl ChatFrame {
    pub fn preamble(task_id: impl Into<String>, subtask_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            subtask_id: Some(subtask_id.into()),
            offset: Some(0),
            content: Some(String::new()),
            done: Some(false),
            result: None,
            error: None,
            ai_triggered: None,
        }
    }

    pub fn delta(offset: u64, content: impl Into<String>) -> Self {
        Self {
            task_id: None,
            subtask_id: None,
            offset: Some(offset),
            content: Some(content.into()),
            done: Some(false),
            result: None,
            error: None,
            ai_triggered: None,
        }
    }

    pub fn terminal(offset: u64, result: Value) -> Self {
        Self {
            task_id: None,
            subtask_id: None,
            offset: Some(offset),
            content: Some(String::new()),
            done: Some(true),
            result: Some(result),
            error: None,
            ai_triggered: None,
        }
    }

    pub fn fatal_error(message: impl Into<String>) -> Self {
        Self {
            task_id: None,
            subtask_id: None,
            offset: None,
            content: None,
            done: None,
            result: None,
            error: Some(message.into()),
            ai_triggered: None,
        }
    }

    /// Group-chat frame for a USER message that did not mention the team
    /// and therefore never spawned an ASSISTANT subtask.
    pub fn not_triggered(task_id: impl Into<String>, user_subtask_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            subtask_id: Some(user_subtask_id.into()),
            offset: None,
            content: None,
            done: Some(true),
            result: None,
            error: None,
            ai_triggered: Some(false),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// The terminal Pub/Sub envelope (SPEC_FULL §4.8). Subscribers treat a
/// non-JSON chunk body as plain content.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct StreamDoneEnvelope {
    #[serde(rename = "__type__")]
    pub type_tag: String,
    pub result: Value,
}

pub const STREAM_DONE_TYPE: &str = "STREAM_DONE";
pub const LEGACY_STREAM_DONE_MARKER: &str = "__STREAM_DONE__";

impl StreamDoneEnvelope {
    pub fn new(result: Value) -> Self {
        Self {
            type_tag: STREAM_DONE_TYPE.to_string(),
            result,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Parses a Pub/Sub message body: `Some(envelope)` for STREAM_DONE JSON or
/// the legacy marker (synthesised with a null result the caller must
/// re-resolve from durable state), `None` for ordinary content chunks.
pub fn parse_done_envelope(body: &str) -> Option<StreamDoneEnvelope> {
    if body == LEGACY_STREAM_DONE_MARKER {
        return Some(StreamDoneEnvelope::new(Value::Null));
    }
    let parsed: StreamDoneEnvelope = serde_json::from_str(body).ok()?;
    (parsed.type_tag == STREAM_DONE_TYPE).then_some(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preamble_has_zero_offset_and_not_done() {
        let frame = ChatFrame::preamble("t1", "s1");
        assert_eq!(frame.offset, Some(0));
        assert_eq!(frame.done, Some(false));
    }

    #[test]
    fn parse_done_envelope_recognises_both_forms() {
        let json_form = StreamDoneEnvelope::new(serde_json::json!({"value": "x"})).to_json();
        assert!(parse_done_envelope(&json_form).is_some());
        assert!(parse_done_envelope(LEGACY_STREAM_DONE_MARKER).is_some());
        assert!(parse_done_envelope("just some content").is_none());
    }

    #[test]
    fn not_triggered_frame_carries_ai_triggered_false() {
        let frame = ChatFrame::not_triggered("t1", "s1");
        assert_eq!(frame.ai_triggered, Some(false));
        let json = frame.to_json();
        assert!(json.contains("\"ai_triggered\":false"));
    }
}
