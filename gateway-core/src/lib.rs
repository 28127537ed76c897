//! Core of the conversational gateway: token counting, context compression,
//! tool orchestration (native + MCP), knowledge injection, long-term memory,
//! the agent loop, the stream lifecycle manager, and the history store.
//!
//! ## Main modules
//!
//! - [`token_counter`]: provider-aware character-based token estimation.
//! - [`model_spec`]: context-window/target-ratio resolution per model id.
//! - [`compress`]: the three-phase message compressor.
//! - [`tools`]: [`tools::Tool`] trait, [`tools::ToolRegistry`], [`tools::ToolExecutor`].
//! - [`mcp`]: Model Context Protocol client (stdio / streamable-http / sse transports).
//! - [`knowledge`]: direct injection, RAG retrieval, prompt-block assembly.
//! - [`memory`]: long-term memory client.
//! - [`agent`]: [`agent::AgentLoop`], [`agent::LlmClient`].
//! - [`stream`]: [`stream::StreamSession`], [`stream::StreamManager`].
//! - [`history`]: SQLite-backed Task/Subtask/Context store.

pub mod agent;
pub mod compress;
pub mod error;
pub mod history;
pub mod knowledge;
pub mod mcp;
pub mod memory;
pub mod message;
pub mod model_spec;
pub mod stream;
pub mod token_counter;
pub mod tools;

pub use error::GatewayError;
pub use message::{ContentPart, Message, Role, ToolCall};
pub use model_spec::ModelLimitOverrides;

#[cfg(test)]
mod test_logging {
    use ctor::ctor;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor]
    fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_filter(filter),
            )
            .try_init();
    }
}
