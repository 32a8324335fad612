//! Prometheus metrics for the ingress.
//!
//! Metrics live in a registry owned by [`ServiceMetrics`] rather than the
//! process-global default registry, so several routers (for example in
//! tests) can coexist in one process.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// Service metrics for observability
#[derive(Debug, Clone)]
pub struct ServiceMetrics {
    registry: Registry,

    /// Webhook requests by provider and outcome
    pub webhook_requests_total: IntCounterVec,

    /// Time spent in the enqueue call
    pub webhook_enqueue_duration_seconds: HistogramVec,

    /// Size of accepted request bodies
    pub webhook_body_bytes: HistogramVec,
}

impl ServiceMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let webhook_requests_total = IntCounterVec::new(
            Opts::new("webhook_requests_total", "Total webhook requests received"),
            &["provider", "outcome"],
        )?;
        let webhook_enqueue_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "webhook_enqueue_duration_seconds",
                "Time to hand an accepted webhook to the task queue",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["provider"],
        )?;
        let webhook_body_bytes = HistogramVec::new(
            HistogramOpts::new("webhook_body_bytes", "Webhook request body size in bytes")
                .buckets(vec![256.0, 1024.0, 4096.0, 16384.0, 65536.0, 262144.0, 1048576.0]),
            &["provider"],
        )?;

        registry.register(Box::new(webhook_requests_total.clone()))?;
        registry.register(Box::new(webhook_enqueue_duration_seconds.clone()))?;
        registry.register(Box::new(webhook_body_bytes.clone()))?;

        Ok(Arc::new(Self {
            registry,
            webhook_requests_total,
            webhook_enqueue_duration_seconds,
            webhook_body_bytes,
        }))
    }

    pub fn record_webhook_request(&self, provider: &str, outcome: &str) {
        self.webhook_requests_total
            .with_label_values(&[provider, outcome])
            .inc();
    }

    pub fn record_enqueue(&self, provider: &str, duration: Duration) {
        self.webhook_enqueue_duration_seconds
            .with_label_values(&[provider])
            .observe(duration.as_secs_f64());
    }

    pub fn record_body_size(&self, provider: &str, bytes: usize) {
        self.webhook_body_bytes
            .with_label_values(&[provider])
            .observe(bytes as f64);
    }

    /// Render every registered metric in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
