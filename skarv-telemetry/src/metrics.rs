//! ## skarv-telemetry::metrics
//! **Prometheus counters for the builder data path**
//!
//! The counter set mirrors what operators actually watch during a run:
//! fragment arrivals, built events, deliveries, replenishment traffic and
//! the two backpressure conditions.

use prometheus::{Counter, Histogram, HistogramOpts, Registry};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    /// Fragments accepted from contributors.
    pub fragments_received: Counter,
    /// Events completed and handed to distribution.
    pub events_built: Counter,
    /// Individual deliveries to consumer group members.
    pub deliveries: Counter,
    /// Buffer requests successfully posted upstream.
    pub requests_posted: Counter,
    /// Buffer requests dropped after every peer refused the post.
    pub requests_dropped: Counter,
    /// Acquire attempts that found the free list empty.
    pub pool_exhausted: Counter,
    /// Nanoseconds from completion to slot release.
    pub build_latency: Histogram,
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let registry = Registry::new();
        let fragments_received = Counter::new(
            "skarv_fragments_received_total",
            "Fragments accepted from contributors",
        )
        .expect("valid counter opts");
        let events_built =
            Counter::new("skarv_events_built_total", "Completed events distributed")
                .expect("valid counter opts");
        let deliveries = Counter::new(
            "skarv_deliveries_total",
            "Deliveries to consumer group members",
        )
        .expect("valid counter opts");
        let requests_posted = Counter::new(
            "skarv_buffer_requests_posted_total",
            "Buffer requests posted to upstream peers",
        )
        .expect("valid counter opts");
        let requests_dropped = Counter::new(
            "skarv_buffer_requests_dropped_total",
            "Buffer requests dropped after all peers failed",
        )
        .expect("valid counter opts");
        let pool_exhausted = Counter::new(
            "skarv_pool_exhausted_total",
            "Buffer acquires that found the free list empty",
        )
        .expect("valid counter opts");
        let build_latency = Histogram::with_opts(
            HistogramOpts::new(
                "skarv_build_latency_ns",
                "Completion-to-release time per event",
            )
            .buckets(vec![1_000.0, 10_000.0, 100_000.0, 1_000_000.0]),
        )
        .expect("valid histogram opts");

        for collector in [
            &fragments_received,
            &events_built,
            &deliveries,
            &requests_posted,
            &requests_dropped,
            &pool_exhausted,
        ] {
            registry
                .register(Box::new(collector.clone()))
                .expect("unique collector");
        }
        registry
            .register(Box::new(build_latency.clone()))
            .expect("unique collector");

        Self {
            registry,
            fragments_received,
            events_built,
            deliveries,
            requests_posted,
            requests_dropped,
            pool_exhausted,
            build_latency,
        }
    }

    /// Renders the registry in the prometheus text exposition format.
    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap_or_default())
    }
}
