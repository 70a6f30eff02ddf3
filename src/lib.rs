//! Stream Gateway - server-push streaming gateway for long-running tool calls.
//!
//! Clients open a persistent server-sent event stream, submit requests over
//! plain HTTP and receive progress, results and errors on the stream,
//! correlated by request id. A separate credential exchange turns a license
//! key into a one-time token redeemable for a protected secret.
//!
//! # Architecture
//!
//! 1. **Gateway** (`gateway`) - Connection registry, publisher, correlator, reaper
//! 2. **Protocol** (`mcp`) - Submission envelope, tool dispatch, progress reporting
//! 3. **Tools** (`tools`) - Built-in tool handlers
//! 4. **Credentials** (`credentials`) - Licenses, one-time tokens, secret sources
//! 5. **HTTP** (`http`) - axum routes for all of the above
//!
//! # Features
//!
//! - **Ordered delivery**: per-connection FIFO, progress before the terminal frame
//! - **Exactly one terminal frame** per accepted request, including timeouts
//! - **Reaping**: heartbeats plus eviction of idle or broken streams
//! - **Single-use tokens**: concurrent redemption yields one winner

pub mod config;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod http;
pub mod mcp;
pub mod metrics;
pub mod retry;
pub mod tools;

pub use error::{Error, Result};

/// Server version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
