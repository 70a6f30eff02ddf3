//! Connection registry.
//!
//! Owns every live stream handle, keyed by connection id. Other components
//! hold ids only and re-check existence through [`ConnectionRegistry::lookup`]
//! or [`ConnectionRegistry::transport`] before acting.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::gateway::transport::StreamTransport;

/// Notified after a connection has been removed from the registry.
#[async_trait]
pub trait EvictionListener: Send + Sync {
    async fn on_evict(&self, connection_id: &str);
}

/// A registered connection.
#[derive(Debug)]
struct Connection {
    owner_id: String,
    created_at: DateTime<Utc>,
    last_activity: Instant,
    transport: StreamTransport,
}

/// Point-in-time view of a connection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub idle: Duration,
    pub alive: bool,
}

/// Registry of live connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Connection>>,
    listeners: Mutex<Vec<Weak<dyn EvictionListener>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to eviction notifications.
    ///
    /// Held weakly so a listener that owns the registry does not form a cycle.
    pub fn add_listener(&self, listener: Weak<dyn EvictionListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Register a transport and return its new connection id.
    pub async fn register(&self, transport: StreamTransport, owner_id: impl Into<String>) -> String {
        let owner_id = owner_id.into();
        let mut connections = self.connections.write().await;

        let mut id = Uuid::new_v4().to_string();
        while connections.contains_key(&id) {
            id = Uuid::new_v4().to_string();
        }

        connections.insert(
            id.clone(),
            Connection {
                owner_id: owner_id.clone(),
                created_at: Utc::now(),
                last_activity: Instant::now(),
                transport,
            },
        );
        info!("Registered connection {} (owner: {})", id, owner_id);
        id
    }

    /// Look up a connection.
    pub async fn lookup(&self, connection_id: &str) -> Result<ConnectionInfo> {
        let connections = self.connections.read().await;
        connections
            .get(connection_id)
            .map(|c| ConnectionInfo {
                id: connection_id.to_string(),
                owner_id: c.owner_id.clone(),
                created_at: c.created_at,
                idle: c.last_activity.elapsed(),
                alive: !c.transport.is_closed(),
            })
            .ok_or_else(|| Error::ConnectionNotFound(connection_id.to_string()))
    }

    pub async fn contains(&self, connection_id: &str) -> bool {
        self.connections.read().await.contains_key(connection_id)
    }

    /// Clone of the connection's transport, if still registered.
    pub async fn transport(&self, connection_id: &str) -> Option<StreamTransport> {
        self.connections
            .read()
            .await
            .get(connection_id)
            .map(|c| c.transport.clone())
    }

    /// All live connection ids with their transports.
    pub async fn transports(&self) -> Vec<(String, StreamTransport)> {
        self.connections
            .read()
            .await
            .iter()
            .map(|(id, c)| (id.clone(), c.transport.clone()))
            .collect()
    }

    /// Record genuine client activity.
    pub async fn touch(&self, connection_id: &str) -> Result<()> {
        let mut connections = self.connections.write().await;
        let connection = connections
            .get_mut(connection_id)
            .ok_or_else(|| Error::ConnectionNotFound(connection_id.to_string()))?;
        connection.last_activity = Instant::now();
        Ok(())
    }

    /// Ids idle for longer than `threshold`, or whose transport already closed.
    pub async fn stale(&self, threshold: Duration) -> Vec<String> {
        self.connections
            .read()
            .await
            .iter()
            .filter(|(_, c)| c.last_activity.elapsed() > threshold || c.transport.is_closed())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Close and remove a connection.
    ///
    /// Returns `true` only for the call that actually removed it; repeated or
    /// racing evictions of the same id are no-ops.
    pub async fn evict(&self, connection_id: &str) -> bool {
        let removed = self.connections.write().await.remove(connection_id);
        let Some(connection) = removed else {
            debug!("Evict of unknown connection {} ignored", connection_id);
            return false;
        };

        connection.transport.close();
        info!("Evicted connection {}", connection_id);

        // The list is only ever pushed to, so a poisoned lock still holds
        // a usable list.
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for listener in listeners {
            listener.on_evict(connection_id).await;
        }
        true
    }

    /// Evict every connection.
    pub async fn close_all(&self) {
        let ids: Vec<String> = self.connections.read().await.keys().cloned().collect();
        for id in ids {
            self.evict(&id).await;
        }
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}
