//! Heartbeat emission and liveness sweeps.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::credentials::CredentialService;
use crate::gateway::publisher::Publisher;
use crate::gateway::registry::ConnectionRegistry;

/// Timer settings for the background loops.
#[derive(Debug, Clone, Copy)]
pub struct ReaperConfig {
    pub heartbeat_interval: Duration,
    pub sweep_interval: Duration,
    pub inactivity_threshold: Duration,
}

/// Handles for the two background loops.
pub struct Reaper {
    heartbeat: JoinHandle<()>,
    sweep: JoinHandle<()>,
}

impl Reaper {
    /// Start the heartbeat and sweep loops. Both stop when `shutdown` fires.
    pub fn spawn(
        config: ReaperConfig,
        registry: Arc<ConnectionRegistry>,
        publisher: Publisher,
        credentials: Option<Arc<CredentialService>>,
        shutdown: CancellationToken,
    ) -> Self {
        let heartbeat = tokio::spawn(heartbeat_loop(
            config.heartbeat_interval,
            publisher,
            shutdown.clone(),
        ));
        let sweep = tokio::spawn(sweep_loop(config, registry, credentials, shutdown));
        info!(
            "Reaper started (heartbeat {:?}, sweep {:?}, inactivity {:?})",
            config.heartbeat_interval, config.sweep_interval, config.inactivity_threshold
        );
        Self { heartbeat, sweep }
    }

    /// Wait for both loops to finish after shutdown.
    ///
    /// Returns `false` when either loop panicked or was aborted.
    pub async fn join(self) -> bool {
        let heartbeat = loop_exited("heartbeat", self.heartbeat.await);
        let sweep = loop_exited("sweep", self.sweep.await);
        heartbeat && sweep
    }
}

fn loop_exited(name: &str, outcome: Result<(), JoinError>) -> bool {
    match outcome {
        Ok(()) => true,
        Err(e) if e.is_panic() => {
            warn!("Reaper {} loop panicked", name);
            false
        }
        Err(e) => {
            warn!("Reaper {} loop did not finish: {}", name, e);
            false
        }
    }
}

async fn heartbeat_loop(period: Duration, publisher: Publisher, shutdown: CancellationToken) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let delivered = publisher.heartbeat_all().await;
                debug!("Heartbeat sent to {} connection(s)", delivered);
            }
        }
    }
}

async fn sweep_loop(
    config: ReaperConfig,
    registry: Arc<ConnectionRegistry>,
    credentials: Option<Arc<CredentialService>>,
    shutdown: CancellationToken,
) {
    let mut ticker = interval(config.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = sweep_connections(&registry, config.inactivity_threshold).await;
                if evicted > 0 {
                    info!("Sweep evicted {} idle connection(s)", evicted);
                }
                if let Some(credentials) = &credentials {
                    credentials.sweep_expired();
                }
            }
        }
    }
}

/// Evict every connection idle beyond `threshold`. Returns the eviction count.
pub async fn sweep_connections(registry: &ConnectionRegistry, threshold: Duration) -> usize {
    let mut evicted = 0;
    for id in registry.stale(threshold).await {
        if registry.evict(&id).await {
            evicted += 1;
        }
    }
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::frame::MessageType;
    use crate::gateway::transport::StreamTransport;
    use crate::metrics::Metrics;

    fn config() -> ReaperConfig {
        ReaperConfig {
            heartbeat_interval: Duration::from_secs(15),
            sweep_interval: Duration::from_secs(30),
            inactivity_threshold: Duration::from_secs(120),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_do_not_keep_connection_alive() {
        let registry = Arc::new(ConnectionRegistry::new());
        let publisher = Publisher::new(registry.clone(), Arc::new(Metrics::default()));
        let shutdown = CancellationToken::new();
        let (transport, mut stream) = StreamTransport::channel(64);
        let id = registry.register(transport, "owner").await;

        let reaper = Reaper::spawn(config(), registry.clone(), publisher, None, shutdown.clone());

        let mut heartbeats = 0;
        while let Some(frame) = stream.recv().await {
            assert_eq!(frame.kind, MessageType::Heartbeat);
            heartbeats += 1;
        }

        // Stream ends once the sweep evicts the idle connection.
        assert!(heartbeats >= 7);
        assert!(!registry.contains(&id).await);

        shutdown.cancel();
        assert!(reaper.join().await);
    }

    #[tokio::test]
    async fn test_panicked_loop_is_reported() {
        let panicked = tokio::spawn(async { panic!("sweep failed") }).await;
        assert!(!loop_exited("sweep", panicked));

        let finished = tokio::spawn(async {}).await;
        assert!(loop_exited("heartbeat", finished));
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_keeps_connection() {
        let registry = ConnectionRegistry::new();
        let (transport, _stream) = StreamTransport::channel(4);
        let id = registry.register(transport, "owner").await;

        tokio::time::advance(Duration::from_secs(100)).await;
        registry.touch(&id).await.unwrap();
        tokio::time::advance(Duration::from_secs(100)).await;

        assert_eq!(sweep_connections(&registry, Duration::from_secs(120)).await, 0);
        tokio::time::advance(Duration::from_secs(21)).await;
        assert_eq!(sweep_connections(&registry, Duration::from_secs(120)).await, 1);
        assert_eq!(sweep_connections(&registry, Duration::from_secs(120)).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_closed_transports() {
        let registry = ConnectionRegistry::new();
        let (transport, stream) = StreamTransport::channel(4);
        registry.register(transport, "owner").await;
        drop(stream);

        assert_eq!(sweep_connections(&registry, Duration::from_secs(120)).await, 1);
        assert!(registry.is_empty().await);
    }
}
