//! Runtime composition: shared auth state between services, health, shutdown
//! and key persistence.

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use crate::integration::harness::{next_event, NodeOptions, TestNode, ADMIN_KEY, API_KEY};

    #[tokio::test]
    async fn test_key_created_on_auth_service_works_on_gateway() {
        let node = TestNode::start().await;
        let new_key = "freshly-minted-key-0042";

        let status = node
            .http
            .post(format!("http://{}/api/auth/keys/create", node.auth))
            .header("X-Admin-Key", ADMIN_KEY)
            .json(&json!({"key": new_key, "rate_limit": 30, "burst": 5}))
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, reqwest::StatusCode::OK);

        let mut ws = node.connect(new_key, "").await;
        let response = node.publish(new_key, json!({"type": "command_added", "data": {"name": "lights"}})).await;
        assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
        assert_eq!(response.headers()["x-ratelimit-limit"], "30");

        let frame = next_event(&mut ws).await;
        assert_eq!(frame["type"], "command_added");

        node.stop().await;
    }

    #[tokio::test]
    async fn test_rate_limit_shared_across_services() {
        let node = TestNode::start().await;

        // Default burst is 10: spend it across both listeners.
        for _ in 0..5 {
            let status = node
                .http
                .get(format!("http://{}/api/protected/test", node.auth))
                .header("X-API-Key", API_KEY)
                .send()
                .await
                .unwrap()
                .status();
            assert_eq!(status, reqwest::StatusCode::OK);
        }
        for _ in 0..5 {
            let response = node.publish(API_KEY, json!({"type": "recording_stopped", "data": {}})).await;
            assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
        }

        let response = node.publish(API_KEY, json!({"type": "recording_stopped", "data": {}})).await;
        assert_eq!(response.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("retry-after"));

        node.stop().await;
    }

    #[tokio::test]
    async fn test_gateway_health_counts_clients() {
        let node = TestNode::start().await;
        let _ws = node.connect(API_KEY, "").await;

        let body: Value = node
            .http
            .get(format!("http://{}/health", node.gateway))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["clients"], 1);

        node.stop().await;
    }

    #[tokio::test]
    async fn test_created_keys_persist_through_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_keys.json");
        std::fs::write(&path, json!([{"key": API_KEY, "rate_limit": 60, "burst": 10}]).to_string())
            .unwrap();

        let node = TestNode::start_with(NodeOptions {
            key_file: Some(path.clone()),
            ..NodeOptions::default()
        })
        .await;

        for key in ["persisted-key-number-01", "persisted-key-number-02"] {
            let status = node
                .http
                .post(format!("http://{}/api/auth/keys/create", node.auth))
                .header("X-Admin-Key", ADMIN_KEY)
                .json(&json!({ "key": key }))
                .send()
                .await
                .unwrap()
                .status();
            assert_eq!(status, reqwest::StatusCode::OK);
        }
        node.stop().await;

        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let keys: Vec<&str> = saved
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["key"].as_str().unwrap())
            .collect();
        assert_eq!(keys.len(), 3);
        assert!(keys.contains(&"persisted-key-number-02"));
    }
}
