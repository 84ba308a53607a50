//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
pub const METRICS_BUCKET_BOUNDS: [u64; 10] =
    [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
pub const METRICS_NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    METRICS_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; METRICS_NUM_BUCKETS]) -> [u64; METRICS_NUM_BUCKETS] {
    let mut result = [0u64; METRICS_NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Lock-free metrics collector for the matching gateway
pub struct Metrics {
    /// Telemetry messages ever processed (monotonic)
    telemetry_total: AtomicU64,
    /// Telemetry messages since last report (reset on report)
    telemetry_since_report: AtomicU64,
    /// Telemetry messages dropped because a driver lane was full
    telemetry_dropped_total: AtomicU64,
    /// Sum of processing latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max processing latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Telemetry processing latency histogram (monotonic)
    latency_buckets: [AtomicU64; METRICS_NUM_BUCKETS],
    /// Match evaluations dispatched after debounce
    triggers_total: AtomicU64,
    /// Evaluations that claimed at least one rider
    matches_total: AtomicU64,
    /// Evaluations that found no qualifying riders
    empty_rounds_total: AtomicU64,
    /// Riders claimed across all matches
    riders_claimed_total: AtomicU64,
    /// Rider intents registered
    intents_added_total: AtomicU64,
    /// Rider intents explicitly cancelled
    intents_cancelled_total: AtomicU64,
    /// Rider intents evicted unclaimed (staleness or idle station)
    intents_expired_total: AtomicU64,
    /// Trip creations that failed downstream (match still reported)
    trip_failures_total: AtomicU64,
    /// Notification deliveries that failed (logged only)
    notify_failures_total: AtomicU64,
    /// Match events broadcast to subscribers
    broadcasts_total: AtomicU64,
    /// Events dropped because a subscriber buffer was full
    events_dropped_total: AtomicU64,
    /// Subscribers retired after a failed delivery
    subscribers_retired_total: AtomicU64,
    /// Driver directory fetches issued by the route cache
    route_fetches_total: AtomicU64,
    /// Last report time for rate calculation
    last_report: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            telemetry_total: AtomicU64::new(0),
            telemetry_since_report: AtomicU64::new(0),
            telemetry_dropped_total: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: Default::default(),
            triggers_total: AtomicU64::new(0),
            matches_total: AtomicU64::new(0),
            empty_rounds_total: AtomicU64::new(0),
            riders_claimed_total: AtomicU64::new(0),
            intents_added_total: AtomicU64::new(0),
            intents_cancelled_total: AtomicU64::new(0),
            intents_expired_total: AtomicU64::new(0),
            trip_failures_total: AtomicU64::new(0),
            notify_failures_total: AtomicU64::new(0),
            broadcasts_total: AtomicU64::new(0),
            events_dropped_total: AtomicU64::new(0),
            subscribers_retired_total: AtomicU64::new(0),
            route_fetches_total: AtomicU64::new(0),
            last_report: parking_lot::Mutex::new(Instant::now()),
        }
    }

    pub fn record_telemetry_processed(&self, latency_us: u64) {
        self.telemetry_total.fetch_add(1, Ordering::Relaxed);
        self.telemetry_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
        self.latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_telemetry_dropped(&self) {
        self.telemetry_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trigger(&self) {
        self.triggers_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_match(&self, riders: u64) {
        self.matches_total.fetch_add(1, Ordering::Relaxed);
        self.riders_claimed_total.fetch_add(riders, Ordering::Relaxed);
    }

    pub fn record_empty_round(&self) {
        self.empty_rounds_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_intent_added(&self) {
        self.intents_added_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_intent_cancelled(&self, count: u64) {
        self.intents_cancelled_total.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_intents_expired(&self, count: u64) {
        self.intents_expired_total.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_trip_failure(&self) {
        self.trip_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notify_failure(&self) {
        self.notify_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broadcast(&self) {
        self.broadcasts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_dropped(&self) {
        self.events_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subscriber_retired(&self) {
        self.subscribers_retired_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_route_fetch(&self) {
        self.route_fetches_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Produce a consistent snapshot; per-interval counters reset
    pub fn report(&self, active_drivers: usize, subscribers: usize) -> MetricsSummary {
        let mut last = self.last_report.lock();
        let elapsed = last.elapsed().as_secs_f64().max(0.001);
        *last = Instant::now();
        drop(last);

        let since_report = self.telemetry_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let latency_max = self.latency_max_us.swap(0, Ordering::Relaxed);
        let avg = if since_report > 0 { latency_sum / since_report } else { 0 };

        MetricsSummary {
            telemetry_total: self.telemetry_total.load(Ordering::Relaxed),
            telemetry_per_sec: since_report as f64 / elapsed,
            telemetry_dropped: self.telemetry_dropped_total.load(Ordering::Relaxed),
            avg_process_latency_us: avg,
            max_process_latency_us: latency_max,
            latency_buckets: load_buckets(&self.latency_buckets),
            triggers_total: self.triggers_total.load(Ordering::Relaxed),
            matches_total: self.matches_total.load(Ordering::Relaxed),
            empty_rounds_total: self.empty_rounds_total.load(Ordering::Relaxed),
            riders_claimed_total: self.riders_claimed_total.load(Ordering::Relaxed),
            intents_added_total: self.intents_added_total.load(Ordering::Relaxed),
            intents_cancelled_total: self.intents_cancelled_total.load(Ordering::Relaxed),
            intents_expired_total: self.intents_expired_total.load(Ordering::Relaxed),
            trip_failures_total: self.trip_failures_total.load(Ordering::Relaxed),
            notify_failures_total: self.notify_failures_total.load(Ordering::Relaxed),
            broadcasts_total: self.broadcasts_total.load(Ordering::Relaxed),
            events_dropped_total: self.events_dropped_total.load(Ordering::Relaxed),
            subscribers_retired_total: self.subscribers_retired_total.load(Ordering::Relaxed),
            route_fetches_total: self.route_fetches_total.load(Ordering::Relaxed),
            active_drivers,
            subscribers,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of all metrics at report time
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub telemetry_total: u64,
    pub telemetry_per_sec: f64,
    pub telemetry_dropped: u64,
    pub avg_process_latency_us: u64,
    pub max_process_latency_us: u64,
    pub latency_buckets: [u64; METRICS_NUM_BUCKETS],
    pub triggers_total: u64,
    pub matches_total: u64,
    pub empty_rounds_total: u64,
    pub riders_claimed_total: u64,
    pub intents_added_total: u64,
    pub intents_cancelled_total: u64,
    pub intents_expired_total: u64,
    pub trip_failures_total: u64,
    pub notify_failures_total: u64,
    pub broadcasts_total: u64,
    pub events_dropped_total: u64,
    pub subscribers_retired_total: u64,
    pub route_fetches_total: u64,
    pub active_drivers: usize,
    pub subscribers: usize,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            telemetry_total = %self.telemetry_total,
            telemetry_per_sec = format_args!("{:.1}", self.telemetry_per_sec),
            avg_latency_us = %self.avg_process_latency_us,
            max_latency_us = %self.max_process_latency_us,
            triggers = %self.triggers_total,
            matches = %self.matches_total,
            empty_rounds = %self.empty_rounds_total,
            riders_claimed = %self.riders_claimed_total,
            intents_added = %self.intents_added_total,
            intents_expired = %self.intents_expired_total,
            broadcasts = %self.broadcasts_total,
            active_drivers = %self.active_drivers,
            subscribers = %self.subscribers,
            "metrics_report"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_report() {
        let metrics = Metrics::new();
        metrics.record_telemetry_processed(150);
        metrics.record_telemetry_processed(250);
        metrics.record_trigger();
        metrics.record_match(3);
        metrics.record_intent_added();

        let summary = metrics.report(2, 1);
        assert_eq!(summary.telemetry_total, 2);
        assert_eq!(summary.avg_process_latency_us, 200);
        assert_eq!(summary.max_process_latency_us, 250);
        assert_eq!(summary.triggers_total, 1);
        assert_eq!(summary.matches_total, 1);
        assert_eq!(summary.riders_claimed_total, 3);
        assert_eq!(summary.active_drivers, 2);
    }

    #[test]
    fn test_interval_counters_reset_on_report() {
        let metrics = Metrics::new();
        metrics.record_telemetry_processed(100);
        let _ = metrics.report(0, 0);

        let summary = metrics.report(0, 0);
        assert_eq!(summary.avg_process_latency_us, 0);
        assert_eq!(summary.max_process_latency_us, 0);
        // Totals are monotonic
        assert_eq!(summary.telemetry_total, 1);
    }

    #[test]
    fn test_bucket_index_bounds() {
        assert_eq!(bucket_index(50), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(60_000), METRICS_NUM_BUCKETS - 1);
    }
}
