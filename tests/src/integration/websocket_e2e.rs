//! WebSocket flows: authenticate, subscribe, publish over HTTP, receive frames.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::SinkExt;
    use serde_json::json;
    use tokio_tungstenite::tungstenite::{self, Message};
    use tokio_tungstenite::connect_async;

    use crate::integration::harness::{
        expect_closed, next_event, NodeOptions, TestNode, API_KEY, SECOND_KEY,
    };

    #[tokio::test]
    async fn test_api_key_client_receives_published_event() {
        let node = TestNode::start().await;
        let mut ws = node.connect(API_KEY, "").await;

        let response = node
            .publish(
                API_KEY,
                json!({"type": "chat_message", "data": {"role": "user", "text": "hello jarvis"}}),
            )
            .await;
        assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

        let frame = next_event(&mut ws).await;
        assert_eq!(frame["type"], "chat_message");
        assert_eq!(frame["data"]["text"], "hello jarvis");
        assert!(frame["timestamp"].is_string());

        node.stop().await;
    }

    #[tokio::test]
    async fn test_session_token_in_query_authorizes_upgrade() {
        let node = TestNode::start().await;
        let token = node.issue_token(SECOND_KEY).await;

        let (mut ws, _) = connect_async(node.ws_url(&format!("token={token}")))
            .await
            .expect("token upgrade");
        node.wait_for_clients(1).await;

        node.publish(API_KEY, json!({"type": "transcription_received", "data": {"text": "lights on"}}))
            .await;
        let frame = next_event(&mut ws).await;
        assert_eq!(frame["type"], "transcription_received");

        node.stop().await;
    }

    #[tokio::test]
    async fn test_upgrade_without_credentials_is_rejected() {
        let node = TestNode::start().await;

        match connect_async(node.ws_url("")).await {
            Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 401),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("upgrade should have been refused"),
        }

        match node.try_connect("not-a-registered-key-00", "").await {
            Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 401),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("upgrade should have been refused"),
        }
        assert_eq!(node.client_count(), 0);

        node.stop().await;
    }

    #[tokio::test]
    async fn test_fan_out_preserves_order_per_client() {
        let node = TestNode::start().await;
        let mut clients = Vec::new();
        for _ in 0..3 {
            clients.push(node.connect(API_KEY, "").await);
        }

        for seq in 0..5 {
            node.publish(SECOND_KEY, json!({"type": "chat_message", "data": {"seq": seq}}))
                .await;
        }

        for ws in clients.iter_mut() {
            for seq in 0..5 {
                let frame = next_event(ws).await;
                assert_eq!(frame["data"]["seq"], seq);
            }
        }

        node.stop().await;
    }

    #[tokio::test]
    async fn test_client_disconnect_unregisters() {
        let node = TestNode::start().await;
        let mut ws = node.connect(API_KEY, "").await;
        assert_eq!(node.client_count(), 1);

        ws.close(None).await.expect("close");
        node.wait_for_clients(0).await;

        node.stop().await;
    }

    #[tokio::test]
    async fn test_inbound_text_is_ignored() {
        let node = TestNode::start().await;
        let mut ws = node.connect(API_KEY, "").await;

        ws.send(Message::Text("subscribe me to everything".into()))
            .await
            .expect("send");
        node.publish(API_KEY, json!({"type": "recording_started", "data": {}})).await;

        let frame = next_event(&mut ws).await;
        assert_eq!(frame["type"], "recording_started");
        assert_eq!(node.client_count(), 1);

        node.stop().await;
    }

    #[tokio::test]
    async fn test_duplicate_client_id_replaces_prior_connection() {
        let node = TestNode::start().await;
        let mut first = node.connect(API_KEY, "client_id=desktop").await;

        let mut second = node
            .try_connect(API_KEY, "client_id=desktop")
            .await
            .expect("second upgrade");
        assert!(expect_closed(&mut first).await);
        node.wait_for_clients(1).await;

        node.publish(API_KEY, json!({"type": "model_loaded", "data": {"model": "mistral"}}))
            .await;
        let frame = next_event(&mut second).await;
        assert_eq!(frame["data"]["model"], "mistral");

        node.stop().await;
    }

    #[tokio::test]
    async fn test_same_client_id_under_other_key_does_not_evict() {
        let node = TestNode::start().await;
        let mut mine = node.connect(API_KEY, "client_id=desktop").await;
        let mut theirs = node.connect(SECOND_KEY, "client_id=desktop").await;
        assert_eq!(node.client_count(), 2);

        node.publish(API_KEY, json!({"type": "plugin_toggled", "data": {"plugin": "weather"}}))
            .await;
        assert_eq!(next_event(&mut mine).await["data"]["plugin"], "weather");
        assert_eq!(next_event(&mut theirs).await["data"]["plugin"], "weather");

        node.stop().await;
    }

    #[tokio::test]
    async fn test_metrics_producer_streams_to_connected_client() {
        let node = TestNode::start_with(NodeOptions {
            metrics_interval: Some(Duration::from_millis(50)),
            ..NodeOptions::default()
        })
        .await;
        let mut ws = node.connect(API_KEY, "").await;

        let frame = next_event(&mut ws).await;
        assert_eq!(frame["type"], "system_metrics");
        assert!(frame["data"]["cpu_percent"].is_number());
        assert!(frame["data"]["memory_total_bytes"].as_u64().unwrap() > 0);

        node.stop().await;
    }

    #[tokio::test]
    async fn test_shutdown_sends_close_frame() {
        let node = TestNode::start().await;
        let mut ws = node.connect(API_KEY, "").await;

        let stop = tokio::spawn(node.stop());
        assert!(expect_closed(&mut ws).await);
        stop.await.expect("shutdown task");
    }
}
