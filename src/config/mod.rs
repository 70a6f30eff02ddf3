//! Configuration management for the Stream Gateway.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Longest accepted request timeout (one day).
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 24 * 60 * 60 * 1000;

/// Longest accepted token lifetime (one day).
pub const MAX_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

/// Command-line arguments for the gateway server.
#[derive(Parser, Debug, Clone)]
#[command(name = "stream-gateway")]
#[command(author = "Stream Gateway Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "SSE gateway for long-running tool calls with one-time credential exchange")]
pub struct Args {
    /// Bind address
    #[arg(long, default_value = "127.0.0.1", env = "STREAM_GATEWAY_HOST")]
    pub host: String,

    /// HTTP port
    #[arg(short, long, default_value = "3000", env = "STREAM_GATEWAY_PORT")]
    pub port: u16,

    /// Enable debug logging
    #[arg(short, long, env = "STREAM_GATEWAY_DEBUG")]
    pub debug: bool,

    /// Emit logs as JSON
    #[arg(long, env = "STREAM_GATEWAY_LOG_JSON")]
    pub log_json: bool,

    /// Heartbeat frame period (seconds)
    #[arg(long, default_value = "15", env = "STREAM_GATEWAY_HEARTBEAT_SECS")]
    pub heartbeat_secs: u64,

    /// Liveness sweep period (seconds)
    #[arg(long, default_value = "30", env = "STREAM_GATEWAY_SWEEP_SECS")]
    pub sweep_secs: u64,

    /// Evict connections with no client activity for this long (seconds)
    #[arg(long, default_value = "120", env = "STREAM_GATEWAY_INACTIVITY_SECS")]
    pub inactivity_secs: u64,

    /// Default per-request deadline (milliseconds)
    #[arg(long, default_value = "60000", env = "STREAM_GATEWAY_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Upper bound for client-requested deadlines (milliseconds)
    #[arg(long, default_value = "600000", env = "STREAM_GATEWAY_MAX_REQUEST_TIMEOUT_MS")]
    pub max_request_timeout_ms: u64,

    /// Frames buffered per connection before publishers wait
    #[arg(long, default_value = "100", env = "STREAM_GATEWAY_CHANNEL_CAPACITY")]
    pub channel_capacity: usize,

    /// One-time token lifetime (seconds)
    #[arg(long, default_value = "60", env = "STREAM_GATEWAY_TOKEN_TTL_SECS")]
    pub token_ttl_secs: u64,

    /// Capability a license must grant before a token is issued
    #[arg(long, default_value = "secret:read", env = "STREAM_GATEWAY_REQUIRED_CAPABILITY")]
    pub required_capability: String,

    /// JSON file holding the license table
    #[arg(long, env = "STREAM_GATEWAY_LICENSES")]
    pub licenses: Option<PathBuf>,

    /// Environment variable holding the protected secret
    #[arg(long, default_value = "STREAM_GATEWAY_SECRET", env = "STREAM_GATEWAY_SECRET_ENV")]
    pub secret_env: String,

    /// Prompt on the terminal for the secret when the environment has none
    #[arg(long, env = "STREAM_GATEWAY_SECRET_PROMPT")]
    pub secret_prompt: bool,

    /// Obtain the secret from another gateway's token exchange
    #[arg(long, env = "STREAM_GATEWAY_UPSTREAM_URL")]
    pub upstream_url: Option<String>,

    /// License key presented to the upstream gateway
    #[arg(long, env = "STREAM_GATEWAY_UPSTREAM_LICENSE")]
    pub upstream_license: Option<String>,

    /// Enable Prometheus metrics exporter
    #[arg(long, env = "STREAM_GATEWAY_METRICS")]
    pub metrics: bool,

    /// Metrics port
    #[arg(long, default_value = "9090", env = "STREAM_GATEWAY_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bind address
    pub host: String,
    /// HTTP port
    pub port: u16,
    /// Debug mode
    pub debug: bool,
    /// JSON logs
    pub log_json: bool,
    /// Heartbeat period (seconds)
    pub heartbeat_secs: u64,
    /// Sweep period (seconds)
    pub sweep_secs: u64,
    /// Inactivity threshold (seconds)
    pub inactivity_secs: u64,
    /// Default request deadline (ms)
    pub request_timeout_ms: u64,
    /// Maximum request deadline (ms)
    pub max_request_timeout_ms: u64,
    /// Per-connection channel capacity
    pub channel_capacity: usize,
    /// Token TTL (seconds)
    pub token_ttl_secs: u64,
    /// Required license capability
    pub required_capability: String,
    /// License table path
    pub licenses: Option<PathBuf>,
    /// Secret environment variable
    pub secret_env: String,
    /// Interactive secret prompt
    pub secret_prompt: bool,
    /// Upstream exchange URL
    pub upstream_url: Option<String>,
    /// Upstream license key
    #[serde(skip_serializing)]
    pub upstream_license: Option<String>,
    /// Metrics enabled
    pub metrics: bool,
    /// Metrics port
    pub metrics_port: u16,
}

impl Config {
    /// Reject settings the background loops cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_secs == 0 || self.sweep_secs == 0 || self.inactivity_secs == 0 {
            return Err(Error::Config(
                "heartbeat, sweep and inactivity periods must be non-zero".to_string(),
            ));
        }
        if self.sweep_secs < self.heartbeat_secs {
            return Err(Error::Config(format!(
                "sweep period ({}s) must not be shorter than heartbeat period ({}s)",
                self.sweep_secs, self.heartbeat_secs
            )));
        }
        if self.request_timeout_ms == 0 || self.request_timeout_ms > self.max_request_timeout_ms {
            return Err(Error::Config(
                "request timeout must be non-zero and within the maximum".to_string(),
            ));
        }
        if self.max_request_timeout_ms > MAX_REQUEST_TIMEOUT_MS {
            return Err(Error::Config(format!(
                "maximum request timeout must not exceed {} ms",
                MAX_REQUEST_TIMEOUT_MS
            )));
        }
        if self.channel_capacity == 0 {
            return Err(Error::Config("channel capacity must be non-zero".to_string()));
        }
        if self.token_ttl_secs == 0 || self.token_ttl_secs > MAX_TOKEN_TTL_SECS {
            return Err(Error::Config(format!(
                "token TTL must be between 1 and {} seconds",
                MAX_TOKEN_TTL_SECS
            )));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_secs)
    }

    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_secs(self.inactivity_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn max_request_timeout(&self) -> Duration {
        Duration::from_millis(self.max_request_timeout_ms)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            debug: args.debug,
            log_json: args.log_json,
            heartbeat_secs: args.heartbeat_secs,
            sweep_secs: args.sweep_secs,
            inactivity_secs: args.inactivity_secs,
            request_timeout_ms: args.request_timeout_ms,
            max_request_timeout_ms: args.max_request_timeout_ms,
            channel_capacity: args.channel_capacity,
            token_ttl_secs: args.token_ttl_secs,
            required_capability: args.required_capability,
            licenses: args.licenses,
            secret_env: args.secret_env,
            secret_prompt: args.secret_prompt,
            upstream_url: args.upstream_url,
            upstream_license: args.upstream_license,
            metrics: args.metrics,
            metrics_port: args.metrics_port,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            debug: false,
            log_json: false,
            heartbeat_secs: 15,
            sweep_secs: 30,
            inactivity_secs: 120,
            request_timeout_ms: 60_000,
            max_request_timeout_ms: 600_000,
            channel_capacity: 100,
            token_ttl_secs: 60,
            required_capability: "secret:read".to_string(),
            licenses: None,
            secret_env: "STREAM_GATEWAY_SECRET".to_string(),
            secret_prompt: false,
            upstream_url: None,
            upstream_license: None,
            metrics: false,
            metrics_port: 9090,
        }
    }
}
