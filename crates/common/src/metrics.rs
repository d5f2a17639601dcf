//! Metrics collection for Inflight
//!
//! This module provides Prometheus metrics for observability.
//! All metrics are carefully designed to minimize overhead in the hot path.

use lazy_static::lazy_static;
use prometheus::{Histogram, IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics registry for Inflight
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub request: RequestMetrics,
    pub dispatch: DispatchMetrics,
    pub store: StoreMetrics,
}

/// Request lifecycle metrics
#[derive(Clone)]
pub struct RequestMetrics {
    /// Total number of chat-completion submissions
    pub submissions_total: IntCounter,

    /// Submissions rejected for reusing an active id
    pub duplicate_ids_total: IntCounter,

    /// Requests that reached normal completion
    pub completions_total: IntCounter,

    /// Requests aborted by the caller or by teardown
    pub aborts_total: IntCounter,

    /// Requests that ended with a terminal error
    pub failures_total: IntCounter,

    /// Current number of in-flight requests
    pub active_requests: IntGauge,

    /// Submission-to-terminal duration
    pub request_duration: Histogram,
}

/// Streamed chunk dispatch metrics
#[derive(Clone)]
pub struct DispatchMetrics {
    /// Chunks delivered to a registered sink
    pub chunks_total: IntCounter,

    /// Chunks dropped because their id was unknown or already terminal
    pub stale_chunks_total: IntCounter,

    /// Engine payloads that could not be parsed
    pub malformed_payloads_total: IntCounter,
}

/// Model store metrics
#[derive(Clone)]
pub struct StoreMetrics {
    /// Model download runs started
    pub downloads_total: IntCounter,

    /// Model download runs that failed
    pub download_failures_total: IntCounter,

    /// Individual model asset files fetched
    pub files_fetched_total: IntCounter,
}

lazy_static! {
    /// Global metrics registry instance
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        // Request metrics
        let submissions_total = IntCounter::new(
            "request_submissions_total",
            "Total number of chat-completion submissions",
        )
        .unwrap();

        let duplicate_ids_total = IntCounter::new(
            "request_duplicate_ids_total",
            "Submissions rejected for reusing an active request id",
        )
        .unwrap();

        let completions_total = IntCounter::new(
            "request_completions_total",
            "Requests that reached normal completion",
        )
        .unwrap();

        let aborts_total = IntCounter::new(
            "request_aborts_total",
            "Requests aborted by the caller or by teardown",
        )
        .unwrap();

        let failures_total = IntCounter::new(
            "request_failures_total",
            "Requests that ended with a terminal error",
        )
        .unwrap();

        let active_requests = IntGauge::new(
            "request_active",
            "Current number of in-flight requests",
        )
        .unwrap();

        let request_duration = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "request_duration_seconds",
                "Submission-to-terminal request duration in seconds",
            )
            .buckets(vec![
                0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
            ]),
        )
        .unwrap();

        // Dispatch metrics
        let chunks_total = IntCounter::new(
            "dispatch_chunks_total",
            "Streamed chunks delivered to a registered sink",
        )
        .unwrap();

        let stale_chunks_total = IntCounter::new(
            "dispatch_stale_chunks_total",
            "Chunks dropped because their id was unknown or already terminal",
        )
        .unwrap();

        let malformed_payloads_total = IntCounter::new(
            "dispatch_malformed_payloads_total",
            "Engine callback payloads that could not be parsed",
        )
        .unwrap();

        // Store metrics
        let downloads_total = IntCounter::new(
            "store_downloads_total",
            "Model download runs started",
        )
        .unwrap();

        let download_failures_total = IntCounter::new(
            "store_download_failures_total",
            "Model download runs that failed",
        )
        .unwrap();

        let files_fetched_total = IntCounter::new(
            "store_files_fetched_total",
            "Individual model asset files fetched",
        )
        .unwrap();

        // Register all metrics
        registry.register(Box::new(submissions_total.clone())).unwrap();
        registry.register(Box::new(duplicate_ids_total.clone())).unwrap();
        registry.register(Box::new(completions_total.clone())).unwrap();
        registry.register(Box::new(aborts_total.clone())).unwrap();
        registry.register(Box::new(failures_total.clone())).unwrap();
        registry.register(Box::new(active_requests.clone())).unwrap();
        registry.register(Box::new(request_duration.clone())).unwrap();

        registry.register(Box::new(chunks_total.clone())).unwrap();
        registry.register(Box::new(stale_chunks_total.clone())).unwrap();
        registry.register(Box::new(malformed_payloads_total.clone())).unwrap();

        registry.register(Box::new(downloads_total.clone())).unwrap();
        registry.register(Box::new(download_failures_total.clone())).unwrap();
        registry.register(Box::new(files_fetched_total.clone())).unwrap();

        let request = RequestMetrics {
            submissions_total,
            duplicate_ids_total,
            completions_total,
            aborts_total,
            failures_total,
            active_requests,
            request_duration,
        };

        let dispatch = DispatchMetrics {
            chunks_total,
            stale_chunks_total,
            malformed_payloads_total,
        };

        let store = StoreMetrics {
            downloads_total,
            download_failures_total,
            files_fetched_total,
        };

        MetricsRegistry {
            registry,
            request,
            dispatch,
            store,
        }
    }

    /// Gather all metrics as text
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry() {
        let metrics = MetricsRegistry::new();

        // Record some metrics
        metrics.request.submissions_total.inc();
        metrics.request.active_requests.inc();
        metrics.dispatch.stale_chunks_total.inc();

        // Gather metrics
        let output = metrics.gather();
        assert!(output.contains("request_submissions_total"));
        assert!(output.contains("dispatch_stale_chunks_total"));
    }
}
