//! Prometheus metrics for the cache tiers.
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed (see [`init_metrics`]).

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    // Remote tier
    pub const REMOTE_OPERATIONS_TOTAL: &str = "cache_remote_operations_total";
    pub const REMOTE_ERRORS_TOTAL: &str = "cache_remote_errors_total";
    pub const REMOTE_PING_SECONDS: &str = "cache_remote_ping_seconds";

    // Hits and misses
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_ENTRIES: &str = "cache_entries";

    // Read path
    pub const READS_TOTAL: &str = "cache_reads_total";
    pub const WRITE_BACK_FAILURES_TOTAL: &str = "cache_write_back_failures_total";

    // Invalidation
    pub const INVALIDATIONS_TOTAL: &str = "cache_invalidations_total";
    pub const INVALIDATION_KEYS_TOTAL: &str = "cache_invalidation_keys_total";
    pub const LOCAL_INVALIDATION_FAILURES_TOTAL: &str = "cache_local_invalidation_failures_total";

    // Health
    pub const REMOTE_DEGRADED: &str = "cache_remote_degraded";
    pub const REMOTE_ERROR_RATE: &str = "cache_remote_error_rate";
    pub const REMOTE_MEMORY_BYTES: &str = "cache_remote_memory_bytes";
    pub const REMOTE_POOL_IDLE: &str = "cache_remote_pool_idle";
    pub const REMOTE_POOL_ACTIVE: &str = "cache_remote_pool_active";
}

/// Initialize the Prometheus metrics exporter.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }
            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

// =============================================================================
// Remote Tier
// =============================================================================

pub fn record_remote_operation(operation: &'static str) {
    counter!(names::REMOTE_OPERATIONS_TOTAL, "operation" => operation).increment(1);
}

pub fn record_remote_error(operation: &'static str, category: &'static str) {
    counter!(
        names::REMOTE_ERRORS_TOTAL,
        "operation" => operation,
        "category" => category
    )
    .increment(1);
}

pub fn record_ping(duration: Duration) {
    histogram!(names::REMOTE_PING_SECONDS).record(duration.as_secs_f64());
}

// =============================================================================
// Cache Metrics
// =============================================================================

/// Record a cache hit.
pub fn record_cache_hit(tier: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier).increment(1);
}

/// Record a cache miss.
pub fn record_cache_miss(tier: &'static str) {
    counter!(names::CACHE_MISSES_TOTAL, "tier" => tier).increment(1);
}

/// Set the number of cache entries.
pub fn set_cache_entries(tier: &'static str, count: usize) {
    gauge!(names::CACHE_ENTRIES, "tier" => tier).set(count as f64);
}

/// Record where a cache-aside read was served from.
pub fn record_read(category: &'static str, source: &'static str) {
    counter!(names::READS_TOTAL, "category" => category, "source" => source).increment(1);
}

pub fn record_write_back_failure(category: &'static str) {
    counter!(names::WRITE_BACK_FAILURES_TOTAL, "category" => category).increment(1);
}

// =============================================================================
// Invalidation
// =============================================================================

pub fn record_invalidation(keys: usize) {
    counter!(names::INVALIDATIONS_TOTAL).increment(1);
    counter!(names::INVALIDATION_KEYS_TOTAL).increment(keys as u64);
}

pub fn record_local_invalidation_failure() {
    counter!(names::LOCAL_INVALIDATION_FAILURES_TOTAL).increment(1);
}

// =============================================================================
// Health
// =============================================================================

pub fn record_health(degraded: bool, error_rate: f64, memory_bytes: u64, idle: usize, active: usize) {
    gauge!(names::REMOTE_DEGRADED).set(if degraded { 1.0 } else { 0.0 });
    gauge!(names::REMOTE_ERROR_RATE).set(error_rate);
    gauge!(names::REMOTE_MEMORY_BYTES).set(memory_bytes as f64);
    gauge!(names::REMOTE_POOL_IDLE).set(idle as f64);
    gauge!(names::REMOTE_POOL_ACTIVE).set(active as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_remote_operation("get");
        record_cache_hit("L2");
        record_health(true, 0.5, 1024, 1, 2);
        record_invalidation(10);
    }
}
