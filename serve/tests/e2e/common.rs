//! Shared helpers for e2e tests. Run with `--nocapture` to see server logs.

use tokio::net::TcpListener;

/// Loads `.env` from the current directory, mirroring the core crates'
/// convention so a locally-set `OPENAI_API_KEY` is picked up if present.
pub fn load_dotenv() {
    let _ = dotenv::dotenv();
}

/// Binds to a random port, spawns the server, and returns the base URL plus
/// its join handle. Without `OPENAI_API_KEY` set, `build_state` falls back
/// to a deterministic `MockLlm`, which is what these tests rely on.
pub async fn spawn_server() -> (
    String,
    tokio::task::JoinHandle<Result<(), Box<dyn std::error::Error + Send + Sync>>>,
) {
    load_dotenv();
    std::env::set_var("GATEWAY_DATABASE_PATH", ":memory:");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("http://{}", addr);
    let handle = tokio::spawn(serve::run_serve_on_listener(listener));
    // give the server a moment to start accepting connections.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    (url, handle)
}

/// Parses an SSE response body (`data: {...}\n\n` blocks) into the JSON
/// frames it carries, in order.
pub fn parse_sse_frames(body: &str) -> Vec<serde_json::Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter_map(|json| serde_json::from_str(json).ok())
        .collect()
}
