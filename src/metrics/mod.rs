//! Metrics for monitoring.
//!
//! Counters live in [`Metrics`] for the health endpoint. When the
//! Prometheus exporter is installed they are also mirrored through the
//! `metrics` facade.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};

/// Metrics collector.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Requests accepted for background execution
    pub requests_accepted: AtomicU64,
    /// Requests resolved with a result
    pub requests_completed: AtomicU64,
    /// Requests resolved with an error (including timeouts)
    pub requests_failed: AtomicU64,
    /// Synthesized timeouts
    pub requests_timed_out: AtomicU64,
    /// Tool calls
    pub tool_calls: AtomicU64,
    /// Frames written to streams
    pub frames_sent: AtomicU64,
    /// One-time tokens issued
    pub tokens_issued: AtomicU64,
    /// One-time tokens redeemed
    pub tokens_redeemed: AtomicU64,
}

impl Metrics {
    pub fn inc_accepted(&self) {
        self.requests_accepted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("gateway_requests_accepted_total").increment(1);
    }

    pub fn inc_completed(&self) {
        self.requests_completed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("gateway_requests_completed_total").increment(1);
    }

    pub fn inc_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("gateway_requests_failed_total").increment(1);
    }

    pub fn inc_timeouts(&self) {
        self.requests_timed_out.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("gateway_requests_timed_out_total").increment(1);
    }

    pub fn inc_tool_calls(&self) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("gateway_tool_calls_total").increment(1);
    }

    pub fn inc_frames(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("gateway_frames_sent_total").increment(1);
    }

    pub fn inc_tokens_issued(&self) {
        self.tokens_issued.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("gateway_tokens_issued_total").increment(1);
    }

    pub fn inc_tokens_redeemed(&self) {
        self.tokens_redeemed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("gateway_tokens_redeemed_total").increment(1);
    }

    /// Get all metrics as a snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_accepted: self.requests_accepted.load(Ordering::Relaxed),
            requests_completed: self.requests_completed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            requests_timed_out: self.requests_timed_out.load(Ordering::Relaxed),
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            tokens_issued: self.tokens_issued.load(Ordering::Relaxed),
            tokens_redeemed: self.tokens_redeemed.load(Ordering::Relaxed),
        }
    }

    /// Render counters in the Prometheus text exposition format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let series = [
            ("gateway_requests_accepted_total", "Requests accepted", s.requests_accepted),
            ("gateway_requests_completed_total", "Requests resolved with a result", s.requests_completed),
            ("gateway_requests_failed_total", "Requests resolved with an error", s.requests_failed),
            ("gateway_requests_timed_out_total", "Requests that hit their deadline", s.requests_timed_out),
            ("gateway_tool_calls_total", "Tool handler invocations", s.tool_calls),
            ("gateway_frames_sent_total", "Frames written to streams", s.frames_sent),
            ("gateway_tokens_issued_total", "One-time tokens issued", s.tokens_issued),
            ("gateway_tokens_redeemed_total", "One-time tokens redeemed", s.tokens_redeemed),
        ];

        let mut out = String::new();
        for (name, help, value) in series {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n\n"
            ));
        }
        out
    }
}

/// Metrics snapshot.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub requests_accepted: u64,
    pub requests_completed: u64,
    pub requests_failed: u64,
    pub requests_timed_out: u64,
    pub tool_calls: u64,
    pub frames_sent: u64,
    pub tokens_issued: u64,
    pub tokens_redeemed: u64,
}

/// Install the Prometheus exporter with its own HTTP listener.
pub fn install_prometheus(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| Error::Config(format!("failed to install metrics exporter: {}", e)))
}
