use super::common;

#[tokio::test]
async fn e2e_history_append_then_list_then_delete() {
    let (base_url, server_handle) = common::spawn_server().await;
    let client = reqwest::Client::new();

    // A chat turn creates the task; pull its id back out of the response header.
    let chat_response = client
        .post(format!("{base_url}/chat/stream"))
        .json(&serde_json::json!({"message": "hi", "team_id": "team-1"}))
        .send()
        .await
        .unwrap();
    let task_id = chat_response
        .headers()
        .get("x-task-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let _ = chat_response.text().await.unwrap();

    let history: Vec<serde_json::Value> = client
        .get(format!("{base_url}/internal/chat/history/{task_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history.len(), 2, "expected a USER and an ASSISTANT row");
    assert_eq!(history[0]["message_id"], 1);
    assert_eq!(history[1]["message_id"], 2);

    let delete_response = client
        .delete(format!("{base_url}/internal/chat/history/{task_id}"))
        .send()
        .await
        .unwrap();
    let deleted: serde_json::Value = delete_response.json().await.unwrap();
    assert_eq!(deleted["deleted"], 2);

    let history_after: Vec<serde_json::Value> = client
        .get(format!("{base_url}/internal/chat/history/{task_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(history_after.is_empty());

    server_handle.abort();
}

#[tokio::test]
async fn e2e_invalid_session_id_is_rejected() {
    let (base_url, server_handle) = common::spawn_server().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base_url}/internal/chat/history/not-a-valid-id"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    server_handle.abort();
}
