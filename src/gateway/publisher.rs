//! Progress/event publisher.
//!
//! Frames typed messages and writes them onto a connection's stream. A
//! missing connection is a silent no-op; a dead stream evicts the
//! connection instead of failing the caller.

use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::gateway::frame::{Frame, MessageType};
use crate::gateway::registry::ConnectionRegistry;
use crate::metrics::Metrics;

/// Writes frames to registered connections.
#[derive(Clone)]
pub struct Publisher {
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<Metrics>,
}

impl Publisher {
    pub fn new(registry: Arc<ConnectionRegistry>, metrics: Arc<Metrics>) -> Self {
        Self { registry, metrics }
    }

    /// Frame `payload` as `kind` and write it to one connection.
    pub async fn publish(&self, connection_id: &str, kind: MessageType, payload: Value) -> Result<()> {
        self.publish_frame(connection_id, Frame::new(kind, payload))
            .await
            .map(|_| ())
    }

    /// Write a pre-built frame. Returns whether it was handed to the stream.
    pub async fn publish_frame(&self, connection_id: &str, frame: Frame) -> Result<bool> {
        let Some(transport) = self.registry.transport(connection_id).await else {
            debug!(
                "Dropping {} frame for unknown connection {}",
                frame.kind.as_str(),
                connection_id
            );
            return Ok(false);
        };

        match transport.send(frame).await {
            Ok(()) => {
                self.metrics.inc_frames();
                Ok(true)
            }
            Err(e) => {
                warn!("{} on connection {}, evicting", e, connection_id);
                self.registry.evict(connection_id).await;
                Ok(false)
            }
        }
    }

    /// Send a server notice to every live connection. Returns the delivery count.
    pub async fn broadcast(&self, payload: Value) -> usize {
        self.fan_out(|| Frame::new(MessageType::Broadcast, payload.clone()))
            .await
    }

    /// Emit a heartbeat frame to every live connection.
    ///
    /// Heartbeats never count as connection activity.
    pub async fn heartbeat_all(&self) -> usize {
        self.fan_out(Frame::heartbeat).await
    }

    /// Offer a frame to every connection without waiting on any of them.
    ///
    /// A full buffer drops the frame for that connection only; a dead
    /// stream evicts it.
    async fn fan_out<F>(&self, make_frame: F) -> usize
    where
        F: Fn() -> Frame,
    {
        let targets = self.registry.transports().await;
        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, transport) in &targets {
            match transport.try_send(make_frame()) {
                Ok(true) => {
                    self.metrics.inc_frames();
                    delivered += 1;
                }
                Ok(false) => debug!("Stream for connection {} is full, skipping frame", id),
                Err(e) => {
                    warn!("{} on connection {}, evicting", e, id);
                    dead.push(id.clone());
                }
            }
        }
        join_all(dead.iter().map(|id| self.registry.evict(id))).await;
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::transport::StreamTransport;
    use serde_json::json;

    fn publisher() -> (Publisher, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new());
        (
            Publisher::new(registry.clone(), Arc::new(Metrics::default())),
            registry,
        )
    }

    #[tokio::test]
    async fn test_publish_frames_payload() {
        let (publisher, registry) = publisher();
        let (transport, mut stream) = StreamTransport::channel(4);
        let id = registry.register(transport, "owner").await;

        publisher
            .publish(&id, MessageType::Progress, json!({ "id": "r1", "progress": 0.25 }))
            .await
            .unwrap();

        let frame = stream.recv().await.unwrap();
        assert_eq!(frame.kind, MessageType::Progress);
        assert_eq!(frame.data["progress"], 0.25);
    }

    #[tokio::test]
    async fn test_publish_to_unknown_connection_is_noop() {
        let (publisher, _registry) = publisher();
        assert!(publisher
            .publish("missing", MessageType::Result, json!({}))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_dead_stream_evicts_connection() {
        let (publisher, registry) = publisher();
        let (transport, stream) = StreamTransport::channel(4);
        let id = registry.register(transport, "owner").await;
        drop(stream);

        let delivered = publisher.publish_frame(&id, Frame::heartbeat()).await.unwrap();

        assert!(!delivered);
        assert!(!registry.contains(&id).await);
        assert!(publisher
            .publish(&id, MessageType::Heartbeat, json!({}))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_connection() {
        let (publisher, registry) = publisher();
        let (t1, mut s1) = StreamTransport::channel(4);
        let (t2, mut s2) = StreamTransport::channel(4);
        registry.register(t1, "a").await;
        registry.register(t2, "b").await;

        let delivered = publisher.broadcast(json!({ "message": "maintenance at noon" })).await;
        assert_eq!(delivered, 2);

        for stream in [&mut s1, &mut s2] {
            let frame = stream.recv().await.unwrap();
            assert_eq!(frame.kind, MessageType::Broadcast);
            assert_eq!(frame.data["message"], "maintenance at noon");
        }
    }

    #[tokio::test]
    async fn test_stalled_connection_does_not_block_fan_out() {
        let (publisher, registry) = publisher();
        let (stalled, _stalled_stream) = StreamTransport::channel(1);
        let (healthy, mut healthy_stream) = StreamTransport::channel(4);
        let stalled_id = registry.register(stalled.clone(), "stalled").await;
        registry.register(healthy, "healthy").await;
        stalled.send(Frame::heartbeat()).await.unwrap();

        let delivered = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            publisher.broadcast(json!({ "message": "hello" })),
        )
        .await
        .unwrap();

        assert_eq!(delivered, 1);
        assert_eq!(healthy_stream.recv().await.unwrap().kind, MessageType::Broadcast);
        assert!(registry.contains(&stalled_id).await);
    }

    #[tokio::test]
    async fn test_heartbeat_does_not_touch_activity() {
        let (publisher, registry) = publisher();
        let (transport, mut stream) = StreamTransport::channel(4);
        let id = registry.register(transport, "owner").await;
        let before = registry.lookup(&id).await.unwrap().idle;

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(publisher.heartbeat_all().await, 1);

        assert_eq!(stream.recv().await.unwrap().kind, MessageType::Heartbeat);
        assert!(registry.lookup(&id).await.unwrap().idle > before);
    }
}
