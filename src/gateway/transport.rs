//! Stream transport handles.
//!
//! A transport is one bounded, ordered channel per connection plus a close
//! signal. The registry owns the sending half; the SSE endpoint drains the
//! receiving half.

use futures::Stream;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::gateway::frame::Frame;

/// Longest a write waits for a slow reader before the stream counts as stalled.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Sending half of a connection's stream.
#[derive(Debug, Clone)]
pub struct StreamTransport {
    sender: mpsc::Sender<Frame>,
    closed: CancellationToken,
}

/// Receiving half of a connection's stream.
#[derive(Debug)]
pub struct FrameStream {
    receiver: mpsc::Receiver<Frame>,
    closed: CancellationToken,
}

impl StreamTransport {
    /// Create a connected transport pair.
    pub fn channel(capacity: usize) -> (StreamTransport, FrameStream) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let closed = CancellationToken::new();
        (
            StreamTransport {
                sender,
                closed: closed.clone(),
            },
            FrameStream { receiver, closed },
        )
    }

    /// Write a frame, waiting up to [`SEND_TIMEOUT`] for buffer space.
    ///
    /// Fails with [`Error::Transport`] once the transport is closed, the
    /// reader has gone away, or the reader stopped draining.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::Transport("stream closed".to_string()));
        }
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(Error::Transport("stream closed".to_string())),
            sent = self.sender.send_timeout(frame, SEND_TIMEOUT) => match sent {
                Ok(()) => Ok(()),
                Err(SendTimeoutError::Timeout(_)) => {
                    Err(Error::Transport("stream stalled".to_string()))
                }
                Err(SendTimeoutError::Closed(_)) => {
                    Err(Error::Transport("stream reader dropped".to_string()))
                }
            }
        }
    }

    /// Write a frame only if there is buffer space right now.
    ///
    /// `Ok(false)` means the buffer was full and the frame was dropped.
    pub fn try_send(&self, frame: Frame) -> Result<bool> {
        if self.closed.is_cancelled() {
            return Err(Error::Transport("stream closed".to_string()));
        }
        match self.sender.try_send(frame) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Closed(_)) => {
                Err(Error::Transport("stream reader dropped".to_string()))
            }
        }
    }

    /// Close the stream. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.sender.is_closed()
    }
}

impl FrameStream {
    /// Next frame, or `None` once the transport is closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            frame = self.receiver.recv() => frame,
        }
    }

    /// Adapt into a `Stream` for the SSE response body.
    pub fn into_stream(self) -> impl Stream<Item = Frame> + Send + 'static {
        futures::stream::unfold(self, |mut stream| async move {
            stream.recv().await.map(|frame| (frame, stream))
        })
    }
}
