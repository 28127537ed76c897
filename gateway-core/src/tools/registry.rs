//! Tool registration and the timeout/isolation/telemetry invocation wrapper.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::warn;

use crate::error::ToolError;

use super::{Tool, ToolCallContent, ToolCallContext, ToolCallStatus, ToolMetricsSink, ToolSpec};

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }
}

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    metrics: Arc<dyn ToolMetricsSink>,
    default_timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, metrics: Arc<dyn ToolMetricsSink>) -> Self {
        Self {
            registry,
            metrics,
            default_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Invokes a tool by name, for the given server label (used only for
    /// telemetry tagging; MCP tools pass their server name, local tools
    /// pass `"local"`). Errors never propagate: failures and timeouts are
    /// folded into a formatted error string result.
    pub async fn invoke(
        &self,
        server: &str,
        name: &str,
        args: Value,
        ctx: Option<&ToolCallContext>,
    ) -> ToolCallContent {
        let Some(tool) = self.registry.get(name) else {
            warn!(name, "tool not found");
            return ToolCallContent::Text(format!("error: tool '{name}' not found"));
        };

        let start = Instant::now();
        let result = tokio::time::timeout(self.default_timeout, tool.call(args, ctx)).await;

        match result {
            Ok(Ok(content)) => {
                self.metrics
                    .record_call(server, name, ToolCallStatus::Success, start.elapsed());
                content
            }
            Ok(Err(err)) => {
                self.metrics
                    .record_call(server, name, ToolCallStatus::Error, start.elapsed());
                ToolCallContent::TextWithArtifact(format_tool_error(name, &err), Value::Null)
            }
            Err(_elapsed) => {
                self.metrics
                    .record_call(server, name, ToolCallStatus::Timeout, start.elapsed());
                ToolCallContent::TextWithArtifact(
                    format!("error: tool '{name}' timed out after {:?}", self.default_timeout),
                    Value::Null,
                )
            }
        }
    }
}

fn format_tool_error(name: &str, err: &ToolError) -> String {
    format!("error: tool '{name}' failed: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc as StdArc;

    use crate::tools::InMemoryMetrics;

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
                description: "echoes input".into(),
                input_schema: serde_json::json!({"type": "object"}),
                weight: 1.0,
            }
        }
        async fn call(
            &self,
            args: Value,
            _ctx: Option<&ToolCallContext>,
        ) -> Result<ToolCallContent, ToolError> {
            Ok(ToolCallContent::Text(args.to_string()))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "fail"
        }
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "fail".into(),
                display_name: None,
                description: "always fails".into(),
                input_schema: Value::Null,
                weight: 1.0,
            }
        }
        async fn call(
            &self,
            _args: Value,
            _ctx: Option<&ToolCallContext>,
        ) -> Result<ToolCallContent, ToolError> {
            Err(ToolError::Failed("fail".into(), "boom".into()))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "slow".into(),
                display_name: None,
                description: "never returns in time".into(),
                input_schema: Value::Null,
                weight: 1.0,
            }
        }
        async fn call(
            &self,
            _args: Value,
            _ctx: Option<&ToolCallContext>,
        ) -> Result<ToolCallContent, ToolError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(ToolCallContent::Text("too late".into()))
        }
    }

    fn executor_with(tool: StdArc<dyn Tool>) -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(tool);
        ToolExecutor::new(StdArc::new(registry), StdArc::new(InMemoryMetrics::new()))
    }

    #[tokio::test]
    async fn invokes_registered_tool() {
        let executor = executor_with(StdArc::new(EchoTool));
        let result = executor
            .invoke("local", "echo", serde_json::json!({"x": 1}), None)
            .await;
        assert_eq!(result.text(), "{\"x\":1}");
    }

    #[tokio::test]
    async fn missing_tool_returns_error_text_not_panic() {
        let registry = ToolRegistry::new();
        let executor = ToolExecutor::new(Arc::new(registry), Arc::new(InMemoryMetrics::new()));
        let result = executor.invoke("local", "nope", Value::Null, None).await;
        assert!(result.text().contains("not found"));
    }

    #[tokio::test]
    async fn failure_is_isolated_as_error_text() {
        let executor = executor_with(StdArc::new(FailingTool));
        let result = executor.invoke("local", "fail", Value::Null, None).await;
        assert!(result.text().contains("boom"));
    }

    #[tokio::test]
    async fn timeout_is_isolated_as_error_text() {
        let executor = executor_with(StdArc::new(SlowTool)).with_timeout(Duration::from_millis(20));
        let result = executor.invoke("local", "slow", Value::Null, None).await;
        assert!(result.text().contains("timed out"));
    }

    #[test]
    fn cancel_flag_reads_back() {
        let flag = StdArc::new(AtomicBool::new(false));
        flag.store(true, Ordering::Relaxed);
        let ctx = ToolCallContext {
            recent_messages: vec![],
            thread_id: None,
            user_id: None,
            cancel_flag: flag,
            kb_exploration_budget: None,
        };
        assert!(ctx.is_cancelled());
    }
}
