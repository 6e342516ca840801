//! Prometheus metrics for the gateway.
//!
//! Each `GatewayMetrics` owns its own registry so independent instances
//! never collide on registration. `GET /metrics` renders it in the text
//! exposition format.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::time::Duration;

use crate::services::cache::CacheStats;

const NAMESPACE: &str = "erp_gateway";

/// Request latency buckets (seconds)
const REQUEST_LATENCY_BUCKETS: &[f64] = &[0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0];

/// Process-wide request counters.
pub struct GatewayMetrics {
    registry: Registry,

    /// Completed requests - labels: operation, outcome (`ok` or an error kind)
    requests_total: IntCounterVec,

    /// Request duration - labels: operation
    request_duration_seconds: HistogramVec,

    rate_limit_rejections_total: IntCounter,

    upstream_calls_total: IntCounter,

    /// Cache lookups - labels: result (`hit` or `miss`)
    cache_lookups_total: IntCounterVec,

    // Sampled from the cache layer on every scrape.
    cache_entries: IntGauge,
    cache_degraded: IntGauge,
    cache_pending_invalidations: IntGauge,
}

impl GatewayMetrics {
    /// Create and register all metrics.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("requests_total", "Completed gateway requests").namespace(NAMESPACE),
            &["operation", "outcome"],
        )?;
        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("request_duration_seconds", "Gateway request duration in seconds")
                .namespace(NAMESPACE)
                .buckets(REQUEST_LATENCY_BUCKETS.to_vec()),
            &["operation"],
        )?;
        let rate_limit_rejections_total = IntCounter::with_opts(
            Opts::new("rate_limit_rejections_total", "Requests rejected by the rate limiter").namespace(NAMESPACE),
        )?;
        let upstream_calls_total =
            IntCounter::with_opts(Opts::new("upstream_calls_total", "Calls made to the ERP").namespace(NAMESPACE))?;
        let cache_lookups_total = IntCounterVec::new(
            Opts::new("cache_lookups_total", "Response cache lookups").namespace(NAMESPACE),
            &["result"],
        )?;
        let cache_entries =
            IntGauge::with_opts(Opts::new("cache_entries", "Entries in the active cache store").namespace(NAMESPACE))?;
        let cache_degraded = IntGauge::with_opts(
            Opts::new("cache_degraded", "1 while the cache runs on its in-process fallback").namespace(NAMESPACE),
        )?;
        let cache_pending_invalidations = IntGauge::with_opts(
            Opts::new(
                "cache_pending_invalidations",
                "Invalidations waiting to be replayed on the primary cache",
            )
            .namespace(NAMESPACE),
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(rate_limit_rejections_total.clone()))?;
        registry.register(Box::new(upstream_calls_total.clone()))?;
        registry.register(Box::new(cache_lookups_total.clone()))?;
        registry.register(Box::new(cache_entries.clone()))?;
        registry.register(Box::new(cache_degraded.clone()))?;
        registry.register(Box::new(cache_pending_invalidations.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration_seconds,
            rate_limit_rejections_total,
            upstream_calls_total,
            cache_lookups_total,
            cache_entries,
            cache_degraded,
            cache_pending_invalidations,
        })
    }

    pub fn record_rate_limited(&self) {
        self.rate_limit_rejections_total.inc();
    }

    pub fn record_upstream_call(&self) {
        self.upstream_calls_total.inc();
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_lookups_total.with_label_values(&[result]).inc();
    }

    /// Record one completed request. `operation` is `<class>:<name>`.
    pub fn record_request(&self, operation: &str, outcome: &str, elapsed: Duration) {
        self.requests_total.with_label_values(&[operation, outcome]).inc();
        self.request_duration_seconds
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    pub fn rate_limit_rejections(&self) -> u64 {
        self.rate_limit_rejections_total.get()
    }

    pub fn request_count(&self, operation: &str, outcome: &str) -> u64 {
        self.requests_total.with_label_values(&[operation, outcome]).get()
    }

    /// Renders every metric in the Prometheus text format, sampling the
    /// cache gauges from `cache` first.
    pub fn render(&self, cache: &CacheStats) -> Result<String, prometheus::Error> {
        self.cache_entries.set(cache.entry_count as i64);
        self.cache_degraded.set(i64::from(cache.degraded));
        self.cache_pending_invalidations.set(cache.pending_invalidations as i64);

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("metrics are not UTF-8: {}", e)))
    }
}
