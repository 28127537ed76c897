use super::common;

#[tokio::test]
async fn e2e_fresh_chat_streams_preamble_and_terminal_frame() {
    let (base_url, server_handle) = common::spawn_server().await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base_url}/chat/stream"))
        .json(&serde_json::json!({
            "message": "hello there",
            "team_id": "team-1",
            "is_group_chat": false,
        }))
        .send()
        .await
        .unwrap();

    assert!(response.headers().contains_key("x-task-id"));
    assert!(response.headers().contains_key("x-subtask-id"));
    assert_eq!(response.headers().get("cache-control").unwrap(), "no-cache");

    let body = response.text().await.unwrap();
    let frames = common::parse_sse_frames(&body);
    assert!(!frames.is_empty(), "expected at least one SSE frame, got body: {body}");

    let preamble = &frames[0];
    assert_eq!(preamble["offset"], 0);
    assert_eq!(preamble["done"], false);

    let terminal = frames.last().unwrap();
    assert_eq!(terminal["done"], true);
    assert!(terminal["result"].is_object());

    server_handle.abort();
}
