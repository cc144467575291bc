//! Prometheus metrics for crierd.
//!
//! Tracks synthesis throughput and latency, cache effectiveness,
//! moderation activity, authorization failures, and queue depth, exposed
//! on the `/metrics` endpoint in Prometheus text format.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

/// Synthesis requests by outcome (ok, cached, error code).
pub static TTS_REQUESTS: OnceLock<IntCounterVec> = OnceLock::new();

/// Batch synthesis requests by outcome.
pub static BATCH_REQUESTS: OnceLock<IntCounterVec> = OnceLock::new();

/// Renderer invocations that actually ran the subprocess.
pub static RENDERS: OnceLock<IntCounter> = OnceLock::new();

/// Renderer wall-clock duration, including permit wait.
pub static RENDER_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Audio cache hits.
pub static CACHE_HITS: OnceLock<IntCounter> = OnceLock::new();

/// Audio cache misses.
pub static CACHE_MISSES: OnceLock<IntCounter> = OnceLock::new();

/// Moderation alterations by pass (url, emoji, term).
pub static MODERATION_HITS: OnceLock<IntCounterVec> = OnceLock::new();

/// Authorization denials by error code.
pub static AUTH_FAILURES: OnceLock<IntCounterVec> = OnceLock::new();

/// Current speech queue depth.
pub static QUEUE_DEPTH: OnceLock<IntGauge> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at daemon startup before any metrics are recorded.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            let m = $init.expect(concat!(stringify!($metric), " creation failed"));
            if let Err(e) = r.register(Box::new(m.clone())) {
                tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
            }
            let _ = $metric.set(m);
        };
    }

    register!(TTS_REQUESTS, IntCounterVec::new(Opts::new("crierd_tts_requests_total", "Synthesis requests by outcome"), &["outcome"]));
    register!(BATCH_REQUESTS, IntCounterVec::new(Opts::new("crierd_batch_requests_total", "Batch synthesis requests by outcome"), &["outcome"]));
    register!(RENDERS, IntCounter::new("crierd_renders_total", "Renderer subprocess invocations"));
    register!(RENDER_DURATION, Histogram::with_opts(
        HistogramOpts::new("crierd_render_duration_seconds", "Render duration including permit wait")
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])));
    register!(CACHE_HITS, IntCounter::new("crierd_cache_hits_total", "Audio cache hits"));
    register!(CACHE_MISSES, IntCounter::new("crierd_cache_misses_total", "Audio cache misses"));
    register!(MODERATION_HITS, IntCounterVec::new(Opts::new("crierd_moderation_hits_total", "Moderation alterations by pass"), &["pass"]));
    register!(AUTH_FAILURES, IntCounterVec::new(Opts::new("crierd_auth_failures_total", "Authorization denials by error code"), &["code"]));
    register!(QUEUE_DEPTH, IntGauge::new("crierd_queue_depth", "Current speech queue depth"));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

/// Record a synthesis request outcome ("ok", "cached", or an error code).
#[inline]
pub fn record_tts(outcome: &str) {
    if let Some(c) = TTS_REQUESTS.get() {
        c.with_label_values(&[outcome]).inc();
    }
}

/// Record a batch request outcome.
#[inline]
pub fn record_batch(outcome: &str) {
    if let Some(c) = BATCH_REQUESTS.get() {
        c.with_label_values(&[outcome]).inc();
    }
}

/// Record one renderer invocation and its duration.
#[inline]
pub fn record_render(duration_secs: f64) {
    if let Some(c) = RENDERS.get() {
        c.inc();
    }
    if let Some(h) = RENDER_DURATION.get() {
        h.observe(duration_secs);
    }
}

/// Record a cache lookup result.
#[inline]
pub fn record_cache(hit: bool) {
    let counter = if hit { CACHE_HITS.get() } else { CACHE_MISSES.get() };
    if let Some(c) = counter {
        c.inc();
    }
}

/// Record moderation alterations for one pass.
#[inline]
pub fn record_moderation(pass: &str, count: usize) {
    if count == 0 {
        return;
    }
    if let Some(c) = MODERATION_HITS.get() {
        c.with_label_values(&[pass]).inc_by(count as u64);
    }
}

/// Record an authorization denial.
#[inline]
pub fn record_auth_failure(code: &str) {
    if let Some(c) = AUTH_FAILURES.get() {
        c.with_label_values(&[code]).inc();
    }
}

/// Update the speech queue depth gauge.
#[inline]
pub fn set_queue_depth(depth: usize) {
    if let Some(g) = QUEUE_DEPTH.get() {
        g.set(depth as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_lifecycle() {
        init();
        record_tts("ok");
        record_cache(true);
        record_cache(false);
        record_render(0.3);
        record_moderation("url", 2);
        record_moderation("term", 0);
        record_auth_failure("unauthorized");
        set_queue_depth(3);

        let text = gather_metrics();
        assert!(text.contains("crierd_tts_requests_total"));
        assert!(text.contains("crierd_cache_hits_total"));
        assert!(text.contains("crierd_queue_depth"));
    }
}
