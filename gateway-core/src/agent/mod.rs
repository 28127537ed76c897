//! Agent Loop (SPEC_FULL §4.7): bounded tool-calling iteration over an
//! `LlmClient`, built on the teacher's `LlmClient` trait
//! (`loom::llm::mod::LlmClient`) and simplified from its generic
//! `StateGraph` runner into the explicit ask/act/loop contract the spec
//! describes.

pub mod llm;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::error::{AgentError, ToolError};
use crate::mcp::is_silent_exit;
use crate::message::{Message, ToolCall};
use crate::tools::{ToolCallContent, ToolCallContext, ToolExecutor};

pub use llm::{ChatOpenAi, LlmClient, LlmResponse, LlmUsage, MockLlm};

pub const DEFAULT_MAX_ITERATIONS: u32 = 10;
pub const EVALUATE_TOOL_NAME: &str = "evaluate";

#[derive(Debug)]
pub enum AgentOutcome {
    Final(String),
    /// The `evaluate` structured-output tool was called; its arguments are
    /// the result instead of free-form text (SPEC_FULL §4.7 ADDED).
    Evaluated(serde_json::Value),
    /// An MCP tool returned a silent-exit marker.
    SilentExit(String),
    Cancelled(String),
}

pub struct AgentLoop {
    llm: Arc<dyn LlmClient>,
    tool_executor: Arc<ToolExecutor>,
    max_iterations: u32,
}

impl AgentLoop {
    pub fn new(llm: Arc<dyn LlmClient>, tool_executor: Arc<ToolExecutor>) -> Self {
        Self {
            llm,
            tool_executor,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Runs the bounded loop. `on_delta` is invoked with every content chunk
    /// the LLM streams, allowing the caller's Stream Lifecycle Manager to
    /// publish tokens as they arrive.
    pub async fn run(
        &self,
        mut messages: Vec<Message>,
        cancel_flag: Arc<AtomicBool>,
        mut on_delta: impl FnMut(&str),
    ) -> Result<AgentOutcome, AgentError> {
        let mut accumulated = String::new();

        for iteration in 0..self.max_iterations {
            if cancel_flag.load(Ordering::Relaxed) {
                return Ok(AgentOutcome::Cancelled(accumulated));
            }

            info!(iteration, "agent loop iteration");
            let response = self
                .llm
                .invoke(&messages)
                .await
                .map_err(|e| AgentError::LlmFailed(e.to_string()))?;

            if response.tool_calls.is_empty() {
                on_delta(&response.content);
                accumulated.push_str(&response.content);
                return Ok(AgentOutcome::Final(accumulated));
            }

            if let Some(evaluate_call) = response
                .tool_calls
                .iter()
                .find(|c| c.name == EVALUATE_TOOL_NAME)
            {
                return Ok(AgentOutcome::Evaluated(evaluate_call.arguments.clone()));
            }

            messages.push(Message::assistant_with_tool_calls(response.tool_calls.clone()));

            for call in &response.tool_calls {
                if cancel_flag.load(Ordering::Relaxed) {
                    return Ok(AgentOutcome::Cancelled(accumulated));
                }
                let (server, tool_name) = split_namespaced(&call.name);
                let content = self
                    .tool_executor
                    .invoke(server, tool_name, call.arguments.clone(), None)
                    .await;

                if let Some(reason) = is_silent_exit(&content) {
                    return Ok(AgentOutcome::SilentExit(reason));
                }

                messages.push(Message::tool_result(call.call_id.clone(), content.text().to_string()));
            }
        }

        Err(AgentError::MaxIterationsReached(self.max_iterations))
    }
}

fn split_namespaced(name: &str) -> (&str, &str) {
    match name.split_once("__") {
        Some((server, tool)) => (server, tool),
        None => ("local", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{InMemoryMetrics, Tool, ToolRegistry, ToolSpec};
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "echo".into(),
                display_name: None,
                description: "".into(),
                input_schema: json!({}),
                weight: 1.0,
            }
        }
        async fn call(
            &self,
            args: serde_json::Value,
            _ctx: Option<&ToolCallContext>,
        ) -> Result<ToolCallContent, ToolError> {
            Ok(ToolCallContent::Text(args.to_string()))
        }
    }

    fn executor() -> Arc<ToolExecutor> {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        Arc::new(ToolExecutor::new(Arc::new(registry), Arc::new(InMemoryMetrics::new())))
    }

    #[tokio::test]
    async fn returns_final_when_no_tool_calls() {
        let llm = Arc::new(MockLlm::always_final("done"));
        let agent = AgentLoop::new(llm, executor());
        let outcome = agent
            .run(vec![Message::user("hi")], Arc::new(AtomicBool::new(false)), |_| {})
            .await
            .unwrap();
        assert!(matches!(outcome, AgentOutcome::Final(s) if s == "done"));
    }

    #[tokio::test]
    async fn executes_tool_then_finishes() {
        let llm = Arc::new(MockLlm::tool_then_final(
            ToolCall {
                call_id: "c1".into(),
                name: "echo".into(),
                arguments: json!({"x": 1}),
            },
            "final answer",
        ));
        let agent = AgentLoop::new(llm, executor());
        let outcome = agent
            .run(vec![Message::user("hi")], Arc::new(AtomicBool::new(false)), |_| {})
            .await
            .unwrap();
        assert!(matches!(outcome, AgentOutcome::Final(s) if s == "final answer"));
    }

    #[tokio::test]
    async fn max_iterations_reached_errors() {
        let llm = Arc::new(MockLlm::always_tool_call(ToolCall {
            call_id: "c1".into(),
            name: "echo".into(),
            arguments: json!({}),
        }));
        let agent = AgentLoop::new(llm, executor()).with_max_iterations(2);
        let err = agent
            .run(vec![Message::user("hi")], Arc::new(AtomicBool::new(false)), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::MaxIterationsReached(2)));
    }

    #[tokio::test]
    async fn cancellation_returns_partial_accumulated_content() {
        let llm = Arc::new(MockLlm::always_final("ignored"));
        let agent = AgentLoop::new(llm, executor());
        let cancel = Arc::new(AtomicBool::new(true));
        let outcome = agent
            .run(vec![Message::user("hi")], cancel, |_| {})
            .await
            .unwrap();
        assert!(matches!(outcome, AgentOutcome::Cancelled(_)));
    }

    #[tokio::test]
    async fn evaluate_tool_short_circuits_with_arguments() {
        let llm = Arc::new(MockLlm::always_tool_call(ToolCall {
            call_id: "c1".into(),
            name: "evaluate".into(),
            arguments: json!({"verdict": "pass", "rationale": "looks right"}),
        }));
        let agent = AgentLoop::new(llm, executor());
        let outcome = agent
            .run(vec![Message::user("hi")], Arc::new(AtomicBool::new(false)), |_| {})
            .await
            .unwrap();
        match outcome {
            AgentOutcome::Evaluated(args) => assert_eq!(args["verdict"], "pass"),
            other => panic!("expected Evaluated, got {other:?}"),
        }
    }

    #[test]
    fn split_namespaced_parses_server_and_tool() {
        assert_eq!(split_namespaced("files__search"), ("files", "search"));
        assert_eq!(split_namespaced("web_search"), ("local", "web_search"));
    }
}
