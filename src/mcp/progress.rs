//! Progress reporting for long-running tool calls.
//!
//! Every accepted request owns one [`RequestStream`]. Progress frames and the
//! terminal frame for that request are written through it under a single
//! lock, so progress can never follow the terminal frame and only one
//! terminal frame is ever written.

use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::trace;

use crate::gateway::frame::{Frame, MessageType};
use crate::gateway::publisher::Publisher;

#[derive(Debug, Default)]
struct StreamState {
    finished: bool,
    last_progress: Option<(u64, Option<u64>)>,
}

/// Whether `next` is behind `last`. With totals on both sides the
/// completion fractions are compared; otherwise the raw counts are.
fn regresses(last: (u64, Option<u64>), next: (u64, Option<u64>)) -> bool {
    match (last, next) {
        ((last, Some(last_total)), (next, Some(total))) => {
            u128::from(next) * u128::from(last_total) < u128::from(last) * u128::from(total)
        }
        ((last, _), (next, _)) => next < last,
    }
}

/// Ordered output path for one request on one connection.
pub struct RequestStream {
    connection_id: String,
    request_id: String,
    publisher: Publisher,
    state: Mutex<StreamState>,
}

impl RequestStream {
    pub fn new(
        connection_id: impl Into<String>,
        request_id: impl Into<String>,
        publisher: Publisher,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            request_id: request_id.into(),
            publisher,
            state: Mutex::new(StreamState::default()),
        }
    }

    /// Publish a progress frame. Dropped after the terminal frame or when
    /// it is behind a frame already published.
    async fn progress(&self, progress: u64, total: Option<u64>, message: Option<&str>) -> bool {
        let mut state = self.state.lock().await;
        if state.finished
            || state
                .last_progress
                .is_some_and(|last| regresses(last, (progress, total)))
        {
            trace!(
                "Dropping progress {} for request {}",
                progress,
                self.request_id
            );
            return false;
        }
        state.last_progress = Some((progress, total));

        let mut data = json!({
            "id": self.request_id,
            "progress": progress,
        });
        if let Some(total) = total {
            data["total"] = json!(total);
        }
        if let Some(message) = message {
            data["message"] = json!(message);
        }

        let frame = Frame::new(MessageType::Progress, data);
        matches!(
            self.publisher.publish_frame(&self.connection_id, frame).await,
            Ok(true)
        )
    }

    /// Publish the terminal frame. Only the first call writes anything.
    ///
    /// Returns whether the frame reached the connection's stream.
    pub async fn finish(&self, frame: Frame) -> bool {
        let mut state = self.state.lock().await;
        if state.finished {
            return false;
        }
        state.finished = true;
        matches!(
            self.publisher.publish_frame(&self.connection_id, frame).await,
            Ok(true)
        )
    }

    /// Mark finished without writing, for requests whose connection is gone.
    pub async fn abandon(&self) {
        self.state.lock().await.finished = true;
    }

    pub async fn is_finished(&self) -> bool {
        self.state.lock().await.finished
    }
}

/// Handle given to tool handlers for emitting progress.
#[derive(Clone)]
pub struct ProgressReporter {
    stream: Option<Arc<RequestStream>>,
    total: Option<u64>,
}

impl ProgressReporter {
    /// Reporter bound to a request stream.
    pub fn new(stream: Arc<RequestStream>, total: Option<u64>) -> Self {
        Self {
            stream: Some(stream),
            total,
        }
    }

    /// Reporter that discards every update.
    pub fn noop() -> Self {
        Self {
            stream: None,
            total: None,
        }
    }

    /// Same stream, different total.
    pub fn with_total(&self, total: u64) -> Self {
        Self {
            stream: self.stream.clone(),
            total: Some(total),
        }
    }

    /// Send a progress update. Returns whether a frame was written.
    pub async fn report(&self, progress: u64, message: Option<&str>) -> bool {
        match &self.stream {
            Some(stream) => stream.progress(progress, self.total, message).await,
            None => false,
        }
    }

    /// Report completion when a total is configured.
    pub async fn complete(&self, message: Option<&str>) -> bool {
        match self.total {
            Some(total) => self.report(total, message).await,
            None => false,
        }
    }
}
