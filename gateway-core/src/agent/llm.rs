//! `LlmClient` trait, reused near-verbatim from `loom::llm::mod`
//! (`LlmResponse`/`LlmUsage`/`ToolChoiceMode`), plus a concrete
//! `async-openai`-backed implementation for OpenAI-compatible providers
//! (the teacher's real stack, `loom/Cargo.toml`'s `async-openai` dependency).

use std::str::FromStr;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionMessageToolCalls, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionTool, ChatCompletionTools, CreateChatCompletionRequestArgs, FunctionObjectArgs,
};
use async_openai::Client as OpenAiClient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::message::{ContentPart, Message, Role, ToolCall};
use crate::tools::ToolSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChoiceMode {
    Auto,
    None,
    Required,
}

impl Default for ToolChoiceMode {
    fn default() -> Self {
        ToolChoiceMode::Auto
    }
}

impl FromStr for ToolChoiceMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ToolChoiceMode::Auto),
            "none" => Ok(ToolChoiceMode::None),
            "required" => Ok(ToolChoiceMode::Required),
            other => Err(format!("unknown tool_choice: {other} (use auto, none, or required)")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<LlmUsage>,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(&self, messages: &[Message]) -> Result<LlmResponse, String>;

    /// Default impl sends the whole content as one chunk once `invoke`
    /// resolves; a streaming-capable client overrides this.
    async fn invoke_stream(
        &self,
        messages: &[Message],
        mut on_chunk: Option<&mut (dyn for<'c> FnMut(&'c str) + Send)>,
    ) -> Result<LlmResponse, String> {
        let response = self.invoke(messages).await?;
        if let Some(cb) = on_chunk.as_deref_mut() {
            if !response.content.is_empty() {
                cb(&response.content);
            }
        }
        Ok(response)
    }

    fn tools(&self) -> Vec<ToolSpec> {
        Vec::new()
    }
}

fn to_openai_message(message: &Message) -> Option<ChatCompletionRequestMessage> {
    let text = message.text();
    match message.role {
        Role::System => Some(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(text)
                .build()
                .ok()?
                .into(),
        ),
        Role::User => Some(
            ChatCompletionRequestUserMessageArgs::default()
                .content(text)
                .build()
                .ok()?
                .into(),
        ),
        Role::Assistant => Some(
            ChatCompletionRequestAssistantMessageArgs::default()
                .content(text)
                .build()
                .ok()?
                .into(),
        ),
        Role::Tool => Some(
            ChatCompletionRequestToolMessageArgs::default()
                .content(text)
                .tool_call_id(message.tool_call_id.clone().unwrap_or_default())
                .build()
                .ok()?
                .into(),
        ),
    }
}

/// OpenAI-compatible provider adapter. Grounded on `loom`'s real
/// `async-openai`-backed client; the `base_url`/`api_key` knobs let it also
/// address any OpenAI-wire-compatible gateway.
pub struct ChatOpenAi {
    client: OpenAiClient<OpenAIConfig>,
    model: String,
    tool_specs: Vec<ToolSpec>,
}

impl ChatOpenAi {
    pub fn new(api_key: &str, base_url: Option<&str>, model: impl Into<String>) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(url) = base_url {
            config = config.with_api_base(url);
        }
        Self {
            client: OpenAiClient::with_config(config),
            model: model.into(),
            tool_specs: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tool_specs: Vec<ToolSpec>) -> Self {
        self.tool_specs = tool_specs;
        self
    }
}

#[async_trait]
impl LlmClient for ChatOpenAi {
    async fn invoke(&self, messages: &[Message]) -> Result<LlmResponse, String> {
        let openai_messages: Vec<ChatCompletionRequestMessage> =
            messages.iter().filter_map(to_openai_message).collect();

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&self.model).messages(openai_messages);

        if !self.tool_specs.is_empty() {
            let tools = self
                .tool_specs
                .iter()
                .filter_map(|spec| {
                    let function = FunctionObjectArgs::default()
                        .name(spec.name.clone())
                        .description(spec.description.clone())
                        .parameters(spec.input_schema.clone())
                        .build()
                        .ok()?;
                    Some(ChatCompletionTools::Function(ChatCompletionTool { function }))
                })
                .collect::<Vec<_>>();
            builder.tools(tools);
        }

        let request = builder.build().map_err(|e| e.to_string())?;
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| "no choices returned".to_string())?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter_map(|tc| match tc {
                ChatCompletionMessageToolCalls::Function(tc) => Some(ToolCall {
                    call_id: tc.id,
                    name: tc.function.name,
                    arguments: serde_json::from_str(&tc.function.arguments)
                        .unwrap_or(serde_json::Value::Null),
                }),
                ChatCompletionMessageToolCalls::Custom(_) => None,
            })
            .collect();

        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage: response.usage.map(|u| LlmUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }

    fn tools(&self) -> Vec<ToolSpec> {
        self.tool_specs.clone()
    }
}

/// Deterministic test double, mirroring `loom::MockLlm`'s fixed-script
/// scripted responses.
pub struct MockLlm {
    script: std::sync::Mutex<Vec<LlmResponse>>,
}

impl MockLlm {
    pub fn always_final(text: &str) -> Self {
        Self {
            script: std::sync::Mutex::new(vec![LlmResponse {
                content: text.to_string(),
                tool_calls: vec![],
                usage: None,
            }]),
        }
    }

    pub fn always_tool_call(call: ToolCall) -> Self {
        Self {
            script: std::sync::Mutex::new(vec![LlmResponse {
                content: String::new(),
                tool_calls: vec![call],
                usage: None,
            }]),
        }
    }

    pub fn tool_then_final(call: ToolCall, final_text: &str) -> Self {
        Self {
            script: std::sync::Mutex::new(vec![
                LlmResponse {
                    content: String::new(),
                    tool_calls: vec![call],
                    usage: None,
                },
                LlmResponse {
                    content: final_text.to_string(),
                    tool_calls: vec![],
                    usage: None,
                },
            ]),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn invoke(&self, _messages: &[Message]) -> Result<LlmResponse, String> {
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            Ok(script.remove(0))
        } else {
            Ok(script.first().cloned().unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_choice_mode_parses_known_values() {
        assert_eq!("auto".parse::<ToolChoiceMode>().unwrap(), ToolChoiceMode::Auto);
        assert_eq!("NONE".parse::<ToolChoiceMode>().unwrap(), ToolChoiceMode::None);
        assert!("bogus".parse::<ToolChoiceMode>().is_err());
    }

    #[tokio::test]
    async fn mock_llm_cycles_through_script() {
        let mock = MockLlm::tool_then_final(
            ToolCall {
                call_id: "c1".into(),
                name: "t".into(),
                arguments: serde_json::Value::Null,
            },
            "done",
        );
        let first = mock.invoke(&[]).await.unwrap();
        assert!(!first.tool_calls.is_empty());
        let second = mock.invoke(&[]).await.unwrap();
        assert_eq!(second.content, "done");
    }

    #[test]
    fn to_openai_message_maps_tool_role_with_call_id() {
        let m = Message::tool_result("call-1", "42");
        let converted = to_openai_message(&m).unwrap();
        matches!(converted, ChatCompletionRequestMessage::Tool(_));
    }
}
