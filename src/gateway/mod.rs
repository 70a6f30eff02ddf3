//! Streaming gateway core.
//!
//! # Architecture
//!
//! - `frame` - `{type, data, timestamp}` messages
//! - `transport` - Per-connection ordered channel with a close signal
//! - `registry` - Live connections keyed by id
//! - `publisher` - Frame writes, broadcast and heartbeats
//! - `correlator` - In-flight requests, terminal frames and timeouts
//! - `reaper` - Heartbeat and idle-connection sweep loops
//!
//! [`Gateway`] owns one instance of each for the lifetime of a server, so
//! independent gateways never share state.

pub mod correlator;
pub mod frame;
pub mod publisher;
pub mod reaper;
pub mod registry;
pub mod transport;

use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::credentials::CredentialService;
use crate::error::Result;
use crate::mcp::handler::ToolDispatcher;
use crate::mcp::protocol::{SubmitAck, SubmitRequest};
use crate::metrics::Metrics;

pub use correlator::Correlator;
pub use frame::{ErrorDescriptor, Frame, MessageType};
pub use publisher::Publisher;
pub use reaper::{Reaper, ReaperConfig};
pub use registry::{ConnectionInfo, ConnectionRegistry, EvictionListener};
pub use transport::{FrameStream, StreamTransport};

/// Explicitly owned gateway state.
pub struct Gateway {
    config: Config,
    registry: Arc<ConnectionRegistry>,
    publisher: Publisher,
    correlator: Arc<Correlator>,
    dispatcher: Arc<ToolDispatcher>,
    credentials: Arc<CredentialService>,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
}

impl Gateway {
    pub fn new(
        config: Config,
        dispatcher: ToolDispatcher,
        credentials: Arc<CredentialService>,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new());
        let publisher = Publisher::new(registry.clone(), metrics.clone());
        let dispatcher = Arc::new(dispatcher);
        let correlator = Arc::new(Correlator::new(
            registry.clone(),
            publisher.clone(),
            dispatcher.clone(),
            metrics.clone(),
            config.request_timeout(),
            config.max_request_timeout(),
        ));
        let weak = Arc::downgrade(&correlator);
        let listener: Weak<dyn EvictionListener> = weak;
        registry.add_listener(listener);

        Arc::new(Self {
            config,
            registry,
            publisher,
            correlator,
            dispatcher,
            credentials,
            metrics,
            shutdown: CancellationToken::new(),
        })
    }

    /// Register a new stream. The `connected` frame is already queued on the
    /// returned stream.
    pub async fn open_stream(&self, owner_id: &str) -> (String, FrameStream) {
        let (transport, stream) = StreamTransport::channel(self.config.channel_capacity);
        let connection_id = self.registry.register(transport, owner_id).await;
        let _ = self
            .publisher
            .publish_frame(&connection_id, Frame::connected(&connection_id))
            .await;
        (connection_id, stream)
    }

    /// Submit a request on behalf of a connection.
    pub async fn submit(&self, connection_id: &str, request: SubmitRequest) -> Result<SubmitAck> {
        self.correlator.submit(connection_id, request).await
    }

    /// Explicit disconnect. Idempotent.
    pub async fn disconnect(&self, connection_id: &str) -> bool {
        self.registry.evict(connection_id).await
    }

    /// Start heartbeat and sweep loops, tied to this gateway's shutdown.
    pub fn start_background(&self) -> Reaper {
        Reaper::spawn(
            ReaperConfig {
                heartbeat_interval: self.config.heartbeat_interval(),
                sweep_interval: self.config.sweep_interval(),
                inactivity_threshold: self.config.inactivity_threshold(),
            },
            self.registry.clone(),
            self.publisher.clone(),
            Some(self.credentials.clone()),
            self.shutdown.clone(),
        )
    }

    /// Stop background loops, cancel pending work and close every stream.
    pub async fn shutdown(&self) {
        info!("Shutting down gateway");
        self.shutdown.cancel();
        self.correlator.cancel_all().await;
        self.registry.close_all().await;
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    pub fn dispatcher(&self) -> &Arc<ToolDispatcher> {
        &self.dispatcher
    }

    pub fn credentials(&self) -> &Arc<CredentialService> {
        &self.credentials
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{License, LicenseStore, Secret, SecretConfig, TokenSettings};
    use crate::error::Error;
    use crate::tools::calculate::CalculateTool;
    use serde_json::json;

    fn gateway() -> Arc<Gateway> {
        let metrics = Arc::new(Metrics::default());
        let credentials = Arc::new(CredentialService::new(
            LicenseStore::new([License::new("LIC", &["secret:read"])]),
            SecretConfig {
                secret: Secret::new("s"),
            },
            TokenSettings::default(),
            metrics.clone(),
        ));
        let mut dispatcher = ToolDispatcher::new();
        dispatcher.register(CalculateTool::new()).unwrap();
        Gateway::new(Config::default(), dispatcher, credentials, metrics)
    }

    #[tokio::test]
    async fn test_first_frame_is_connected() {
        let gateway = gateway();
        let (id, mut stream) = gateway.open_stream("session").await;

        let frame = stream.recv().await.unwrap();
        assert_eq!(frame.kind, MessageType::Connected);
        assert_eq!(frame.data["connectionId"], id.as_str());
    }

    #[tokio::test]
    async fn test_independent_gateways_do_not_share_state() {
        let a = gateway();
        let b = gateway();
        let (id, _stream) = a.open_stream("session").await;

        assert!(a.registry().contains(&id).await);
        assert!(!b.registry().contains(&id).await);

        let request = SubmitRequest {
            id: "r1".to_string(),
            method: "ping".to_string(),
            params: None,
        };
        assert!(matches!(
            b.submit(&id, request).await,
            Err(Error::ConnectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_then_submit_is_not_found() {
        let gateway = gateway();
        let (id, _stream) = gateway.open_stream("session").await;

        assert!(gateway.disconnect(&id).await);
        assert!(!gateway.disconnect(&id).await);

        let request = SubmitRequest {
            id: "r1".to_string(),
            method: "tools/call".to_string(),
            params: Some(json!({ "name": "calculate", "arguments": { "operation": "add", "a": 1, "b": 2 } })),
        };
        assert!(matches!(
            gateway.submit(&id, request).await,
            Err(Error::ConnectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_closes_streams() {
        let gateway = gateway();
        let (_id, mut stream) = gateway.open_stream("session").await;
        let _connected = stream.recv().await.unwrap();

        gateway.shutdown().await;
        assert!(stream.recv().await.is_none());
        assert!(gateway.registry().is_empty().await);
        assert!(gateway.shutdown_token().is_cancelled());
    }
}
