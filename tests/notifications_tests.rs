use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use prompt_relay::error::{RelayError, Result};
use prompt_relay::notifications::{NotificationRegistry, PushConnection};

/// In-memory connection. Records what it receives; can be told to fail.
#[derive(Clone, Default)]
struct FakeConnection {
    received: Arc<Mutex<Vec<String>>>,
    fail_send: bool,
    fail_accept: bool,
}

impl FakeConnection {
    fn failing() -> Self {
        Self {
            fail_send: true,
            ..Default::default()
        }
    }

    fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushConnection for FakeConnection {
    async fn accept(&mut self) -> Result<()> {
        if self.fail_accept {
            return Err(RelayError::DeliveryFailure("handshake refused".to_string()));
        }
        Ok(())
    }

    async fn send_text(&mut self, text: &str) -> Result<()> {
        if self.fail_send {
            return Err(RelayError::DeliveryFailure("socket closed".to_string()));
        }
        self.received.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn send_to_unknown_user_is_noop() {
    let registry = NotificationRegistry::new();
    assert_eq!(registry.send(7, "hello").await, 0);
    assert!(!registry.is_connected(7).await);
    assert_eq!(registry.user_count().await, 0);
}

#[tokio::test]
async fn every_connection_of_a_user_receives_the_payload() {
    let registry = NotificationRegistry::new();
    let phone = FakeConnection::default();
    let laptop = FakeConnection::default();
    let other_user = FakeConnection::default();

    registry.connect(1, Box::new(phone.clone())).await.unwrap();
    registry.connect(1, Box::new(laptop.clone())).await.unwrap();
    registry.connect(2, Box::new(other_user.clone())).await.unwrap();

    assert_eq!(registry.send(1, "done").await, 2);
    assert_eq!(phone.received(), vec!["done"]);
    assert_eq!(laptop.received(), vec!["done"]);
    assert!(other_user.received().is_empty());
    assert_eq!(registry.connection_count(1).await, 2);
    assert_eq!(registry.user_count().await, 2);
}

#[tokio::test]
async fn last_disconnect_removes_the_user() {
    let registry = NotificationRegistry::new();
    let first = registry
        .connect(5, Box::new(FakeConnection::default()))
        .await
        .unwrap();
    let second = registry
        .connect(5, Box::new(FakeConnection::default()))
        .await
        .unwrap();
    assert_ne!(first, second);

    registry.disconnect(5, first).await;
    assert!(registry.is_connected(5).await);
    assert_eq!(registry.connection_count(5).await, 1);

    registry.disconnect(5, second).await;
    assert!(!registry.is_connected(5).await);
    assert_eq!(registry.user_count().await, 0);

    // Already gone; must not panic or resurrect the entry.
    registry.disconnect(5, second).await;
    assert_eq!(registry.user_count().await, 0);
}

#[tokio::test]
async fn failing_connection_is_evicted_without_affecting_siblings() {
    let registry = NotificationRegistry::new();
    let healthy = FakeConnection::default();
    registry.connect(3, Box::new(healthy.clone())).await.unwrap();
    registry
        .connect(3, Box::new(FakeConnection::failing()))
        .await
        .unwrap();

    assert_eq!(registry.send(3, "first").await, 1);
    assert_eq!(registry.connection_count(3).await, 1);

    assert_eq!(registry.send(3, "second").await, 1);
    assert_eq!(healthy.received(), vec!["first", "second"]);
}

#[tokio::test]
async fn user_with_only_failing_connections_is_removed() {
    let registry = NotificationRegistry::new();
    registry
        .connect(9, Box::new(FakeConnection::failing()))
        .await
        .unwrap();

    assert_eq!(registry.send(9, "payload").await, 0);
    assert!(!registry.is_connected(9).await);
}

#[tokio::test]
async fn refused_handshake_is_not_registered() {
    let registry = NotificationRegistry::new();
    let conn = FakeConnection {
        fail_accept: true,
        ..Default::default()
    };

    let result = registry.connect(4, Box::new(conn)).await;
    assert!(matches!(result, Err(RelayError::DeliveryFailure(_))));
    assert!(!registry.is_connected(4).await);
}

#[tokio::test]
async fn send_json_serializes_the_value() {
    let registry = NotificationRegistry::new();
    let conn = FakeConnection::default();
    registry.connect(11, Box::new(conn.clone())).await.unwrap();

    let delivered = registry
        .send_json(11, &serde_json::json!({ "status": "success" }))
        .await
        .unwrap();
    assert_eq!(delivered, 1);
    assert_eq!(conn.received(), vec![r#"{"status":"success"}"#]);
}
