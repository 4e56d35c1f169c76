// src/notifications.rs

//! Per-user push fan-out.
//!
//! The registry maps a user to the set of that user's live connections and
//! pushes text payloads to all of them. A connection whose send fails is
//! dropped from the set on the spot; the user's other connections still get
//! the payload. A user whose set becomes empty is removed entirely.
//!
//! State is process-local. Replicas of the server do not see each other's
//! connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, instrument};

use crate::data_model::UserId;
use crate::error::{RelayError, Result};
use crate::utils::prometheus_metrics::{
    ACTIVE_PUSH_CONNECTIONS, NOTIFICATIONS_SENT_TOTAL, NOTIFICATION_DELIVERY_FAILURES_TOTAL,
};

/// One live client connection a payload can be pushed to.
#[async_trait]
pub trait PushConnection: Send {
    /// Completes whatever handshake the transport needs before it is usable.
    async fn accept(&mut self) -> Result<()> {
        Ok(())
    }

    async fn send_text(&mut self, text: &str) -> Result<()>;
}

/// Sending half of an upgraded axum WebSocket. The upgrade has already been
/// answered when axum hands the socket over, so `accept` has nothing to do.
pub struct WebSocketPush {
    sink: SplitSink<WebSocket, Message>,
}

impl WebSocketPush {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl PushConnection for WebSocketPush {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|e| RelayError::DeliveryFailure(e.to_string()))
    }
}

/// Handle identifying one registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

type UserConnections = HashMap<ConnectionId, Box<dyn PushConnection>>;

#[derive(Default)]
pub struct NotificationRegistry {
    active: Mutex<HashMap<UserId, UserConnections>>,
    next_id: AtomicU64,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completes the handshake and registers `conn` for `user_id`.
    pub async fn connect(
        &self,
        user_id: UserId,
        mut conn: Box<dyn PushConnection>,
    ) -> Result<ConnectionId> {
        let mut active = self.active.lock().await;
        conn.accept().await?;

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        active.entry(user_id).or_default().insert(id, conn);
        ACTIVE_PUSH_CONNECTIONS.inc();
        debug!(user_id, connection = id.0, "Push connection registered");
        Ok(id)
    }

    /// Forgets one connection. Unknown ids are ignored.
    pub async fn disconnect(&self, user_id: UserId, id: ConnectionId) {
        let mut active = self.active.lock().await;
        Self::remove_locked(&mut active, user_id, id);
    }

    fn remove_locked(active: &mut HashMap<UserId, UserConnections>, user_id: UserId, id: ConnectionId) {
        if let Some(conns) = active.get_mut(&user_id) {
            if conns.remove(&id).is_some() {
                ACTIVE_PUSH_CONNECTIONS.dec();
                debug!(user_id, connection = id.0, "Push connection removed");
            }
            if conns.is_empty() {
                active.remove(&user_id);
            }
        }
    }

    /// Pushes `payload` to every live connection of `user_id` and returns
    /// how many received it. A user without connections is a no-op.
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    pub async fn send(&self, user_id: UserId, payload: &str) -> usize {
        let mut active = self.active.lock().await;
        let Some(conns) = active.get_mut(&user_id) else {
            return 0;
        };

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, conn) in conns.iter_mut() {
            match conn.send_text(payload).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    error!(user_id, connection = id.0, error = %e, "Push delivery failed");
                    NOTIFICATION_DELIVERY_FAILURES_TOTAL.inc();
                    failed.push(*id);
                }
            }
        }
        for id in failed {
            Self::remove_locked(&mut active, user_id, id);
        }

        NOTIFICATIONS_SENT_TOTAL.inc_by(delivered as f64);
        delivered
    }

    /// Serializes `value` to JSON and pushes it.
    pub async fn send_json<T: Serialize>(&self, user_id: UserId, value: &T) -> Result<usize> {
        let payload = serde_json::to_string(value)?;
        Ok(self.send(user_id, &payload).await)
    }

    pub async fn is_connected(&self, user_id: UserId) -> bool {
        self.active.lock().await.contains_key(&user_id)
    }

    pub async fn connection_count(&self, user_id: UserId) -> usize {
        self.active
            .lock()
            .await
            .get(&user_id)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    pub async fn user_count(&self) -> usize {
        self.active.lock().await.len()
    }
}
