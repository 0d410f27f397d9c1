//! Prometheus metrics for replacement attempts.

use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

pub struct Metrics {
    registry: Registry,
    /// Replacement attempts by outcome (`success` or the failing stage)
    replacements_total: IntCounterVec,
    replacement_duration_seconds: HistogramVec,
    /// Requests turned away before reaching the engine
    rejected_requests_total: IntCounterVec,
    request_timeouts_total: IntCounter,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let replacements_total = IntCounterVec::new(
            Opts::new("hotswap_replacements_total", "Container replacement attempts"),
            &["outcome"],
        )?;
        registry.register(Box::new(replacements_total.clone()))?;

        let replacement_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "hotswap_replacement_duration_seconds",
                "Container replacement duration",
            )
            .buckets(vec![0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
            &["outcome"],
        )?;
        registry.register(Box::new(replacement_duration_seconds.clone()))?;

        let rejected_requests_total = IntCounterVec::new(
            Opts::new(
                "hotswap_rejected_requests_total",
                "Webhook requests rejected before replacement",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(rejected_requests_total.clone()))?;

        let request_timeouts_total = IntCounter::new(
            "hotswap_request_timeouts_total",
            "Update requests answered 503 because the deadline expired",
        )?;
        registry.register(Box::new(request_timeouts_total.clone()))?;

        Ok(Self {
            registry,
            replacements_total,
            replacement_duration_seconds,
            rejected_requests_total,
            request_timeouts_total,
        })
    }

    pub fn observe_replacement(&self, outcome: &str, elapsed: Duration) {
        self.replacements_total.with_label_values(&[outcome]).inc();
        self.replacement_duration_seconds
            .with_label_values(&[outcome])
            .observe(elapsed.as_secs_f64());
    }

    /// Counts a request whose deadline expired. A replacement that had
    /// already started is still observed under its own outcome when it
    /// finishes.
    pub fn observe_timeout(&self) {
        self.request_timeouts_total.inc();
    }

    pub fn observe_rejection(&self, reason: &str) {
        self.rejected_requests_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Prometheus text exposition format.
    pub fn export(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
