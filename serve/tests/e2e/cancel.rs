use super::common;

#[tokio::test]
async fn e2e_cancel_is_idempotent_for_unknown_subtask() {
    let (base_url, server_handle) = common::spawn_server().await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base_url}/chat/cancel"))
        .json(&serde_json::json!({"subtask_id": "subtask-does-not-exist"}))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);

    // Cancelling again is still a success, not an error.
    let response2 = client
        .post(format!("{base_url}/chat/cancel"))
        .json(&serde_json::json!({"subtask_id": "subtask-does-not-exist"}))
        .send()
        .await
        .unwrap();
    assert!(response2.status().is_success());

    server_handle.abort();
}
