//! Metrics and observability utilities
//!
//! Registers metric descriptions with standardized naming so series
//! show up on whatever exporter the embedding binary installs.

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all NewsForge metrics
pub const METRICS_PREFIX: &str = "newsforge";

/// Buckets for AI generation latency (seconds); generation is slow
pub const GENERATION_BUCKETS: &[f64] = &[
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.000, // 2s
    5.000, // 5s
    10.00, // 10s
    20.00, // 20s
    30.00, // 30s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Fetch metrics
    describe_counter!(
        format!("{}_articles_fetched_total", METRICS_PREFIX),
        Unit::Count,
        "Raw items pulled from publisher upstreams"
    );

    describe_counter!(
        format!("{}_articles_enriched_total", METRICS_PREFIX),
        Unit::Count,
        "Articles persisted with non-empty commentary"
    );

    describe_counter!(
        format!("{}_articles_skipped_total", METRICS_PREFIX),
        Unit::Count,
        "Items skipped because the store already holds them enriched"
    );

    describe_counter!(
        format!("{}_fallback_commentary_total", METRICS_PREFIX),
        Unit::Count,
        "Articles completed with the deterministic fallback template"
    );

    // Scheduler metrics
    describe_counter!(
        format!("{}_rotation_ticks_total", METRICS_PREFIX),
        Unit::Count,
        "Section rotation ticks executed"
    );

    describe_counter!(
        format!("{}_rotations_completed_total", METRICS_PREFIX),
        Unit::Count,
        "Full passes over the section list"
    );

    describe_gauge!(
        format!("{}_rotation_index", METRICS_PREFIX),
        Unit::Count,
        "Current position in the section rotation"
    );

    // Threshold gate metrics
    describe_gauge!(
        format!("{}_section_enriched_count", METRICS_PREFIX),
        Unit::Count,
        "Enriched articles per section in the store"
    );

    describe_gauge!(
        format!("{}_threshold_gate_open", METRICS_PREFIX),
        Unit::Count,
        "1 when every section meets the enrichment threshold"
    );

    // Queue metrics
    describe_counter!(
        format!("{}_jobs_submitted_total", METRICS_PREFIX),
        Unit::Count,
        "Enrichment jobs admitted to the queue"
    );

    describe_counter!(
        format!("{}_jobs_duplicate_total", METRICS_PREFIX),
        Unit::Count,
        "Job submissions dropped as duplicates"
    );

    describe_counter!(
        format!("{}_jobs_completed_total", METRICS_PREFIX),
        Unit::Count,
        "Jobs finished successfully"
    );

    describe_counter!(
        format!("{}_jobs_failed_total", METRICS_PREFIX),
        Unit::Count,
        "Jobs that reached terminal failure"
    );

    describe_counter!(
        format!("{}_jobs_stalled_total", METRICS_PREFIX),
        Unit::Count,
        "Active jobs re-enqueued after their lock expired"
    );

    describe_gauge!(
        format!("{}_queue_waiting", METRICS_PREFIX),
        Unit::Count,
        "Jobs waiting for dispatch"
    );

    // Balancer metrics
    describe_counter!(
        format!("{}_balancer_dispatch_total", METRICS_PREFIX),
        Unit::Count,
        "Successful dispatches through a credential pool"
    );

    describe_counter!(
        format!("{}_balancer_quarantine_total", METRICS_PREFIX),
        Unit::Count,
        "Credentials quarantined for the day"
    );

    describe_counter!(
        format!("{}_balancer_exhausted_total", METRICS_PREFIX),
        Unit::Count,
        "Dispatches that found no usable credential"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Tiered cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Tiered cache misses"
    );

    describe_counter!(
        format!("{}_cache_fallback_total", METRICS_PREFIX),
        Unit::Count,
        "Commands served by the in-process fallback map"
    );

    describe_counter!(
        format!("{}_shard_dead_total", METRICS_PREFIX),
        Unit::Count,
        "Shards marked dead for the day"
    );

    describe_gauge!(
        format!("{}_shards_healthy", METRICS_PREFIX),
        Unit::Count,
        "Healthy cache shards"
    );

    // AI metrics
    describe_histogram!(
        format!("{}_generation_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "AI commentary generation latency"
    );

    describe_counter!(
        format!("{}_generation_tokens_total", METRICS_PREFIX),
        Unit::Count,
        "Tokens consumed by commentary generation"
    );
}

/// Timer helper for recording a histogram on drop sites
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
