//! Tool-calling protocol layered on the stream.
//!
//! # Architecture
//!
//! - `protocol` - Submission, acknowledgement and tool catalog types
//! - `handler` - Tool trait, dispatcher and argument validation
//! - `progress` - Per-request progress reporting tied to the terminal frame

pub mod handler;
pub mod progress;
pub mod protocol;

pub use handler::{ToolContext, ToolDispatcher, ToolHandler};
pub use progress::{ProgressReporter, RequestStream};
pub use protocol::*;
