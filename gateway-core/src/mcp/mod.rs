//! MCP Client (SPEC_FULL §4.4): stdio / sse / streamable-http transports,
//! `${{path}}` variable substitution, `{server}__{tool}` namespacing,
//! silent exit.

mod client;
mod protocol;
mod substitution;
mod transport;

pub use client::{
    discover_all, is_silent_exit, parse_call_tool_result, parse_list_tools_result,
    parse_server_configs, McpServerConfig, McpServerSession, McpToolAdapter, McpTransportConfig,
};
pub use protocol::{JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
pub use substitution::{substitute_string, substitute_value};
pub use transport::{HttpTransport, McpTransport, SseTransport, StdioTransport};
