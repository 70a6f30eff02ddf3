//! Request correlator.
//!
//! Accepts submissions, runs them in the background and guarantees every
//! accepted request ends with exactly one terminal frame on its connection:
//! the handler's result, its error, a cancellation or a synthesized timeout.
//! Requests whose connection is evicted are dropped without a frame.
//!
//! Pending entries are keyed by `(connection id, request id)`, so equal
//! request ids on different connections never interfere.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::gateway::frame::Frame;
use crate::gateway::publisher::Publisher;
use crate::gateway::registry::{ConnectionRegistry, EvictionListener};
use crate::mcp::handler::{run_handler, ToolContext, ToolDispatcher, ToolHandler};
use crate::mcp::progress::{ProgressReporter, RequestStream};
use crate::mcp::protocol::{methods, CallToolParams, ListToolsResult, SubmitAck, SubmitRequest};
use crate::metrics::Metrics;

type PendingKey = (String, String);

/// An accepted request that has not produced its terminal frame yet.
struct PendingRequest {
    submitted_at: Instant,
    deadline: Instant,
    stream: Arc<RequestStream>,
    cancel: CancellationToken,
}

/// Work resolved at submission time.
enum Invocation {
    Ping,
    ListTools,
    CallTool {
        name: String,
        handler: Arc<dyn ToolHandler>,
        arguments: HashMap<String, Value>,
    },
}

/// Point-in-time view of a pending request.
#[derive(Debug, Clone)]
pub struct PendingInfo {
    pub connection_id: String,
    pub request_id: String,
    pub age: Duration,
    pub remaining: Duration,
}

/// Tracks in-flight requests and resolves them.
pub struct Correlator {
    registry: Arc<ConnectionRegistry>,
    publisher: Publisher,
    dispatcher: Arc<ToolDispatcher>,
    metrics: Arc<Metrics>,
    pending: Mutex<HashMap<PendingKey, PendingRequest>>,
    default_timeout: Duration,
    max_timeout: Duration,
}

impl Correlator {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        publisher: Publisher,
        dispatcher: Arc<ToolDispatcher>,
        metrics: Arc<Metrics>,
        default_timeout: Duration,
        max_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            publisher,
            dispatcher,
            metrics,
            pending: Mutex::new(HashMap::new()),
            default_timeout,
            max_timeout: max_timeout.max(default_timeout),
        }
    }

    /// Accept a request for background execution.
    ///
    /// Unknown connections, methods and tools, invalid arguments and duplicate
    /// in-flight ids are rejected here, before anything is queued.
    pub async fn submit(self: &Arc<Self>, connection_id: &str, request: SubmitRequest) -> Result<SubmitAck> {
        self.registry.lookup(connection_id).await?;
        if request.id.is_empty() {
            return Err(Error::Validation("request id must not be empty".to_string()));
        }

        let invocation = self.resolve(&request)?;
        let timeout = request
            .requested_timeout()
            .unwrap_or(self.default_timeout)
            .min(self.max_timeout);

        let key = (connection_id.to_string(), request.id.clone());
        let stream = Arc::new(RequestStream::new(
            connection_id,
            &request.id,
            self.publisher.clone(),
        ));
        let cancel = CancellationToken::new();
        {
            let mut pending = self.pending.lock().await;
            if pending.contains_key(&key) {
                return Err(Error::Validation(format!(
                    "request {} is already in flight",
                    request.id
                )));
            }
            let now = Instant::now();
            pending.insert(
                key.clone(),
                PendingRequest {
                    submitted_at: now,
                    deadline: now + timeout,
                    stream: stream.clone(),
                    cancel: cancel.clone(),
                },
            );
        }

        // An eviction that ran between the lookup and the insert would not
        // have seen this entry.
        if self.registry.touch(connection_id).await.is_err() {
            self.pending.lock().await.remove(&key);
            return Err(Error::ConnectionNotFound(connection_id.to_string()));
        }

        self.metrics.inc_accepted();
        debug!(
            "Accepted {} ({}) on connection {} with deadline {:?}",
            request.id, request.method, connection_id, timeout
        );

        let correlator = self.clone();
        tokio::spawn(async move {
            correlator.run(key, invocation, stream, cancel, timeout).await;
        });

        Ok(SubmitAck::accepted(request.id))
    }

    fn resolve(&self, request: &SubmitRequest) -> Result<Invocation> {
        match request.method.as_str() {
            methods::PING => Ok(Invocation::Ping),
            methods::TOOLS_LIST => Ok(Invocation::ListTools),
            methods::TOOLS_CALL => {
                let params = CallToolParams::from_params(request.params.as_ref())?;
                let handler = self.dispatcher.prepare(&params.name, &params.arguments)?;
                Ok(Invocation::CallTool {
                    name: params.name,
                    handler,
                    arguments: params.arguments,
                })
            }
            other => Err(Error::MethodNotFound(other.to_string())),
        }
    }

    async fn run(
        self: Arc<Self>,
        key: PendingKey,
        invocation: Invocation,
        stream: Arc<RequestStream>,
        cancel: CancellationToken,
        timeout: Duration,
    ) {
        let request_id = key.1.clone();
        let ctx = ToolContext::new(
            &request_id,
            ProgressReporter::new(stream, None),
            cancel.clone(),
        );

        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => Frame::failure(&request_id, &Error::Cancelled),
            outcome = tokio::time::timeout(timeout, self.execute(invocation, ctx)) => match outcome {
                Ok(Ok(value)) => Frame::result(&request_id, value),
                Ok(Err(e)) => {
                    debug!("Request {} failed: {}", request_id, e);
                    Frame::failure(&request_id, &e)
                }
                Err(_) => {
                    // Dropping the handler future stops it at its next await;
                    // the token reaches anything it spawned.
                    cancel.cancel();
                    let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                    warn!("Request {} timed out after {} ms", request_id, millis);
                    self.metrics.inc_timeouts();
                    Frame::failure(&request_id, &Error::Timeout { millis })
                }
            },
        };

        self.complete(&key, frame).await;
    }

    async fn execute(&self, invocation: Invocation, ctx: ToolContext) -> Result<Value> {
        match invocation {
            Invocation::Ping => Ok(json!({})),
            Invocation::ListTools => Ok(serde_json::to_value(ListToolsResult {
                tools: self.dispatcher.list_tools(),
            })?),
            Invocation::CallTool {
                name,
                handler,
                arguments,
            } => {
                self.metrics.inc_tool_calls();
                let result = run_handler(&name, handler, arguments, ctx).await?;
                Ok(serde_json::to_value(result)?)
            }
        }
    }

    /// Publish the terminal frame if the request is still pending.
    async fn complete(&self, key: &PendingKey, frame: Frame) {
        let Some(entry) = self.pending.lock().await.remove(key) else {
            debug!("Discarding result for resolved or orphaned request {:?}", key);
            return;
        };

        if !self.registry.contains(&key.0).await {
            entry.stream.abandon().await;
            return;
        }

        let failed = frame.data.get("error").is_some();
        if !entry.stream.finish(frame).await {
            debug!("Terminal frame for {:?} was not delivered", key);
        } else if failed {
            self.metrics.inc_failed();
        } else {
            self.metrics.inc_completed();
        }
        debug!(
            "Resolved {} on {} after {:?}",
            key.1,
            key.0,
            entry.submitted_at.elapsed()
        );
    }

    /// Cancel an in-flight request; it resolves with a `CANCELLED` error.
    pub async fn cancel(&self, connection_id: &str, request_id: &str) -> Result<()> {
        let pending = self.pending.lock().await;
        let entry = pending
            .get(&(connection_id.to_string(), request_id.to_string()))
            .ok_or_else(|| Error::Validation(format!("request {} is not in flight", request_id)))?;
        entry.cancel.cancel();
        Ok(())
    }

    /// Drop every pending entry of a connection without publishing.
    pub async fn discard_connection(&self, connection_id: &str) -> usize {
        let orphaned: Vec<PendingRequest> = {
            let mut pending = self.pending.lock().await;
            let keys: Vec<PendingKey> = pending
                .keys()
                .filter(|(conn, _)| conn == connection_id)
                .cloned()
                .collect();
            keys.iter().filter_map(|k| pending.remove(k)).collect()
        };

        // The evicting publish may be holding a request stream's lock, so
        // orphans are only cancelled here. Their later writes find no
        // connection and are dropped.
        for entry in &orphaned {
            entry.cancel.cancel();
        }
        if !orphaned.is_empty() {
            info!(
                "Discarded {} pending request(s) of connection {}",
                orphaned.len(),
                connection_id
            );
        }
        orphaned.len()
    }

    /// Cancel everything, e.g. on shutdown.
    pub async fn cancel_all(&self) {
        for entry in self.pending.lock().await.values() {
            entry.cancel.cancel();
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn pending_for(&self, connection_id: &str) -> Vec<PendingInfo> {
        let now = Instant::now();
        self.pending
            .lock()
            .await
            .iter()
            .filter(|((conn, _), _)| conn == connection_id)
            .map(|((conn, req), entry)| PendingInfo {
                connection_id: conn.clone(),
                request_id: req.clone(),
                age: now.saturating_duration_since(entry.submitted_at),
                remaining: entry.deadline.saturating_duration_since(now),
            })
            .collect()
    }
}

#[async_trait]
impl EvictionListener for Correlator {
    async fn on_evict(&self, connection_id: &str) {
        self.discard_connection(connection_id).await;
    }
}
