use super::common;

#[tokio::test]
async fn e2e_group_chat_message_without_mention_does_not_trigger_ai() {
    let (base_url, server_handle) = common::spawn_server().await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base_url}/chat/stream"))
        .json(&serde_json::json!({
            "message": "just chatting, no mention here",
            "team_id": "Researchers",
            "is_group_chat": true,
        }))
        .send()
        .await
        .unwrap();

    let body = response.text().await.unwrap();
    let frames = common::parse_sse_frames(&body);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["ai_triggered"], false);
    assert_eq!(frames[0]["done"], true);

    server_handle.abort();
}

#[tokio::test]
async fn e2e_group_chat_message_with_mention_triggers_ai() {
    let (base_url, server_handle) = common::spawn_server().await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base_url}/chat/stream"))
        .json(&serde_json::json!({
            "message": "@Researchers can you help?",
            "team_id": "Researchers",
            "is_group_chat": true,
        }))
        .send()
        .await
        .unwrap();

    let body = response.text().await.unwrap();
    let frames = common::parse_sse_frames(&body);
    assert!(frames.len() >= 2, "expected preamble + terminal, got: {body}");
    assert_eq!(frames[0]["offset"], 0);
    assert_eq!(frames.last().unwrap()["done"], true);

    server_handle.abort();
}
