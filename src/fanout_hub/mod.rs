//! FanoutHub - Realtime Subscriber Distribution
//!
//! ## Responsibilities
//!
//! - WebSocket client connection registry
//! - Per-camera subscription sets
//! - Broadcast and targeted send primitives with per-client failure isolation
//!
//! There is no heartbeat: a dead client is detected lazily when a send to it
//! fails, at which point it is fully cleaned up. Failures never propagate to
//! the camera loops that publish through the hub.

use crate::detector::Detection;
use crate::models::CameraId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::RwLock;

/// Camera lifecycle status carried by `camera_status` messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Started,
    Stopped,
}

/// Outbound messages, internally tagged with `type` on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        client_id: String,
        timestamp: String,
    },
    Pong {
        timestamp: String,
    },
    Subscribed {
        camera_id: CameraId,
        timestamp: String,
    },
    Unsubscribed {
        camera_id: CameraId,
        timestamp: String,
    },
    /// Base64-encoded JPEG frame
    Frame {
        camera_id: CameraId,
        frame: String,
        timestamp: String,
    },
    Detection {
        camera_id: CameraId,
        detections: Vec<Detection>,
        object_counts: HashMap<String, u64>,
        timestamp: String,
    },
    CameraStatus {
        camera_id: CameraId,
        status: StreamStatus,
        timestamp: String,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        camera_id: Option<CameraId>,
        message: String,
        timestamp: String,
    },
}

/// Inbound client messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    SubscribeCamera { camera_id: CameraId },
    UnsubscribeCamera { camera_id: CameraId },
}

/// Parse an inbound text message.
///
/// Unrecognized `type` values yield `Ok(None)` and are ignored without
/// closing the connection; malformed payloads are errors and terminate only
/// that connection's read loop.
pub fn parse_client_message(raw: &str) -> crate::error::Result<Option<ClientMessage>> {
    let value: serde_json::Value = serde_json::from_str(raw)?;

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| crate::error::Error::Validation("Missing message type".to_string()))?;

    match kind {
        "ping" | "subscribe_camera" | "unsubscribe_camera" => {
            Ok(Some(serde_json::from_value(value)?))
        }
        other => {
            tracing::debug!(message_type = %other, "Ignoring unrecognized message type");
            Ok(None)
        }
    }
}

/// Client connection
struct ClientConnection {
    id: String,
    tx: mpsc::UnboundedSender<String>,
}

/// FanoutHub instance
pub struct FanoutHub {
    connections: RwLock<HashMap<String, ClientConnection>>,
    subscriptions: RwLock<HashMap<CameraId, HashSet<String>>>,
    connection_count: AtomicU64,
}

impl FanoutHub {
    /// Create new FanoutHub
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
        }
    }

    /// Register a client and hand back its outbound message stream.
    ///
    /// Reconnecting under an existing id replaces the old connection; the
    /// dropped sender ends the stale forward task.
    pub async fn connect(&self, client_id: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();

        let conn = ClientConnection {
            id: client_id.to_string(),
            tx,
        };

        let replaced = {
            let mut connections = self.connections.write().await;
            connections.insert(client_id.to_string(), conn).is_some()
        };

        if !replaced {
            self.connection_count.fetch_add(1, Ordering::Relaxed);
        }

        tracing::info!(client_id = %client_id, replaced = replaced, "Client connected");

        rx
    }

    /// Deregister a client and purge it from every camera's subscriber set.
    pub async fn disconnect(&self, client_id: &str) {
        let removed = {
            let mut connections = self.connections.write().await;
            connections.remove(client_id).is_some()
        };

        {
            let mut subscriptions = self.subscriptions.write().await;
            subscriptions.retain(|_, subscribers| {
                subscribers.remove(client_id);
                !subscribers.is_empty()
            });
        }

        if removed {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(client_id = %client_id, "Client disconnected");
        }
    }

    /// Add the client to a camera's subscriber set. Idempotent.
    pub async fn subscribe(&self, client_id: &str, camera_id: &CameraId) {
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions
            .entry(camera_id.clone())
            .or_default()
            .insert(client_id.to_string());
    }

    /// Remove the client from a camera's subscriber set. Idempotent; an
    /// emptied set is removed entirely.
    pub async fn unsubscribe(&self, client_id: &str, camera_id: &CameraId) {
        let mut subscriptions = self.subscriptions.write().await;
        if let Some(subscribers) = subscriptions.get_mut(camera_id) {
            subscribers.remove(client_id);
            if subscribers.is_empty() {
                subscriptions.remove(camera_id);
            }
        }
    }

    /// Best-effort targeted send. A delivery failure disconnects the client
    /// instead of surfacing an error.
    pub async fn send_to(&self, client_id: &str, message: &ServerMessage) {
        let Some(json) = self.serialize(message) else {
            return;
        };

        let failed = {
            let connections = self.connections.read().await;
            match connections.get(client_id) {
                Some(conn) => conn.tx.send(json).is_err(),
                None => false,
            }
        };

        if failed {
            tracing::warn!(client_id = %client_id, "Send failed, cleaning up client");
            self.disconnect(client_id).await;
        }
    }

    /// Deliver to every connected client. A failure on one client never
    /// prevents delivery to the rest; failed clients are cleaned up after.
    pub async fn broadcast(&self, message: &ServerMessage) {
        let Some(json) = self.serialize(message) else {
            return;
        };

        let failed: Vec<String> = {
            let connections = self.connections.read().await;
            connections
                .values()
                .filter(|conn| conn.tx.send(json.clone()).is_err())
                .map(|conn| conn.id.clone())
                .collect()
        };

        self.cleanup(failed).await;
    }

    /// Deliver only to the camera's current subscriber set, with the same
    /// per-client failure isolation as `broadcast`.
    pub async fn broadcast_to_subscribers(&self, camera_id: &CameraId, message: &ServerMessage) {
        let subscribers: Vec<String> = {
            let subscriptions = self.subscriptions.read().await;
            match subscriptions.get(camera_id) {
                Some(set) => set.iter().cloned().collect(),
                None => return,
            }
        };

        let Some(json) = self.serialize(message) else {
            return;
        };

        let failed: Vec<String> = {
            let connections = self.connections.read().await;
            subscribers
                .into_iter()
                .filter(|client_id| match connections.get(client_id) {
                    Some(conn) => conn.tx.send(json.clone()).is_err(),
                    // Subscription outlived the connection; clean it up too.
                    None => true,
                })
                .collect()
        };

        self.cleanup(failed).await;
    }

    /// Get connection count
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }

    /// Current subscriber count for a camera
    pub async fn subscriber_count(&self, camera_id: &CameraId) -> usize {
        let subscriptions = self.subscriptions.read().await;
        subscriptions.get(camera_id).map_or(0, |s| s.len())
    }

    /// Whether any subscriber-set entry exists for the camera
    pub async fn has_subscriber_entry(&self, camera_id: &CameraId) -> bool {
        let subscriptions = self.subscriptions.read().await;
        subscriptions.contains_key(camera_id)
    }

    fn serialize(&self, message: &ServerMessage) -> Option<String> {
        match serde_json::to_string(message) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message");
                None
            }
        }
    }

    async fn cleanup(&self, failed: Vec<String>) {
        for client_id in failed {
            tracing::warn!(client_id = %client_id, "Delivery failed, cleaning up client");
            self.disconnect(&client_id).await;
        }
    }
}

impl Default for FanoutHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_msg(camera: &str) -> ServerMessage {
        ServerMessage::CameraStatus {
            camera_id: CameraId::from(camera),
            status: StreamStatus::Started,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn test_disconnect_purges_all_subscriptions() {
        let hub = FanoutHub::new();
        let _rx = hub.connect("c1").await;

        let cam_a = CameraId::from("cam-a");
        let cam_b = CameraId::from("cam-b");
        hub.subscribe("c1", &cam_a).await;
        hub.subscribe("c1", &cam_b).await;

        hub.disconnect("c1").await;

        assert_eq!(hub.connection_count(), 0);
        assert!(!hub.has_subscriber_entry(&cam_a).await);
        assert!(!hub.has_subscriber_entry(&cam_b).await);
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let hub = FanoutHub::new();
        let _rx = hub.connect("c1").await;

        let cam = CameraId::from("cam-a");
        hub.subscribe("c1", &cam).await;
        hub.subscribe("c1", &cam).await;
        assert_eq!(hub.subscriber_count(&cam).await, 1);

        hub.unsubscribe("c1", &cam).await;
        hub.unsubscribe("c1", &cam).await;
        assert!(!hub.has_subscriber_entry(&cam).await);
    }

    #[tokio::test]
    async fn test_targeted_broadcast_reaches_only_subscribers() {
        let hub = FanoutHub::new();
        let mut rx1 = hub.connect("c1").await;
        let mut rx2 = hub.connect("c2").await;

        let cam = CameraId::from("cam-a");
        hub.subscribe("c1", &cam).await;

        hub.broadcast_to_subscribers(&cam, &status_msg("cam-a")).await;

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_subscriber_does_not_block_the_rest() {
        let hub = FanoutHub::new();
        let rx_dead = hub.connect("dead").await;
        let mut rx_live = hub.connect("live").await;

        let cam = CameraId::from("cam-a");
        hub.subscribe("dead", &cam).await;
        hub.subscribe("live", &cam).await;

        // Receiver dropped: the next send to this client fails.
        drop(rx_dead);

        hub.broadcast_to_subscribers(&cam, &status_msg("cam-a")).await;

        assert!(rx_live.try_recv().is_ok());
        // The dead client was fully cleaned up.
        assert_eq!(hub.connection_count(), 1);
        assert_eq!(hub.subscriber_count(&cam).await, 1);
    }

    #[tokio::test]
    async fn test_broadcast_cleans_up_dead_clients() {
        let hub = FanoutHub::new();
        let rx_dead = hub.connect("dead").await;
        let mut rx_live = hub.connect("live").await;
        drop(rx_dead);

        hub.broadcast(&status_msg("cam-a")).await;

        assert!(rx_live.try_recv().is_ok());
        assert_eq!(hub.connection_count(), 1);
    }

    #[test]
    fn test_parse_known_messages() {
        let msg = parse_client_message(r#"{"type": "ping"}"#).unwrap();
        assert_eq!(msg, Some(ClientMessage::Ping));

        let msg =
            parse_client_message(r#"{"type": "subscribe_camera", "camera_id": "cam-7"}"#).unwrap();
        assert_eq!(
            msg,
            Some(ClientMessage::SubscribeCamera {
                camera_id: CameraId::from("cam-7")
            })
        );
    }

    #[test]
    fn test_parse_ignores_unknown_type() {
        let msg = parse_client_message(r#"{"type": "telemetry", "foo": 1}"#).unwrap();
        assert_eq!(msg, None);
    }

    #[test]
    fn test_parse_rejects_malformed_payloads() {
        assert!(parse_client_message("not json").is_err());
        assert!(parse_client_message(r#"{"camera_id": "x"}"#).is_err());
        // Known type with a missing required field is malformed, not unknown.
        assert!(parse_client_message(r#"{"type": "subscribe_camera"}"#).is_err());
    }
}
