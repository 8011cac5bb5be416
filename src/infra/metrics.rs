//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::rejection::Rejection;
use crate::domain::types::Table;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

const NUM_TABLES: usize = Table::ALL.len();

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
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

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

#[inline]
fn load_all<const N: usize>(counters: &[AtomicU64; N]) -> [u64; N] {
    let mut result = [0u64; N];
    for (i, counter) in counters.iter().enumerate() {
        result[i] = counter.load(Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Payloads handed over by the source (monotonic)
    received_total: AtomicU64,
    /// Messages that passed validation (monotonic)
    accepted_total: AtomicU64,
    /// Rejections, indexed by `Rejection::index` (monotonic)
    rejections: [AtomicU64; Rejection::REASONS],
    /// Committed rows, indexed by `Table::index` (monotonic)
    rows_inserted: [AtomicU64; NUM_TABLES],
    /// Records lost to a failed insert or commit (monotonic)
    persistence_failures: AtomicU64,
    /// Broker errors reported by the source (monotonic)
    broker_errors: AtomicU64,
    /// Polls that returned nothing within the timeout (monotonic)
    poll_timeouts: AtomicU64,
    /// Dispatches since last report (reset on report)
    dispatches_since_report: AtomicU64,
    /// Sum of dispatch latencies in microseconds (reset on report)
    dispatch_latency_sum_us: AtomicU64,
    /// Max dispatch latency in microseconds (reset on report)
    dispatch_latency_max_us: AtomicU64,
    /// Dispatch latency histogram buckets (reset on report)
    dispatch_latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Dispatch latency histogram for scraping (monotonic)
    dispatch_latency_cumulative: [AtomicU64; NUM_BUCKETS],
    /// Sum of all dispatch latencies for scraping (monotonic)
    dispatch_latency_total_us: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            received_total: AtomicU64::new(0),
            accepted_total: AtomicU64::new(0),
            rejections: std::array::from_fn(|_| AtomicU64::new(0)),
            rows_inserted: std::array::from_fn(|_| AtomicU64::new(0)),
            persistence_failures: AtomicU64::new(0),
            broker_errors: AtomicU64::new(0),
            poll_timeouts: AtomicU64::new(0),
            dispatches_since_report: AtomicU64::new(0),
            dispatch_latency_sum_us: AtomicU64::new(0),
            dispatch_latency_max_us: AtomicU64::new(0),
            dispatch_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            dispatch_latency_cumulative: std::array::from_fn(|_| AtomicU64::new(0)),
            dispatch_latency_total_us: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_received(&self) {
        self.received_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_accepted(&self) {
        self.accepted_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_rejection(&self, rejection: &Rejection) {
        self.rejections[rejection.index()].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_row(&self, table: Table) {
        self.rows_inserted[table.index()].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_broker_error(&self) {
        self.broker_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_poll_timeout(&self) {
        self.poll_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record time spent dispatching one record, successful or not
    #[inline]
    pub fn record_dispatch_latency(&self, latency_us: u64) {
        self.dispatches_since_report.fetch_add(1, Ordering::Relaxed);
        self.dispatch_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        // Update histogram bucket
        let bucket = bucket_index(latency_us);
        self.dispatch_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.dispatch_latency_cumulative[bucket].fetch_add(1, Ordering::Relaxed);
        self.dispatch_latency_total_us.fetch_add(latency_us, Ordering::Relaxed);

        // Update max
        update_atomic_max(&self.dispatch_latency_max_us, latency_us);
    }

    #[inline]
    pub fn received_total(&self) -> u64 {
        self.received_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn accepted_total(&self) -> u64 {
        self.accepted_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn rejections_total(&self) -> u64 {
        self.rejections.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    /// Rejection counts, indexed by `Rejection::index`
    pub fn rejections(&self) -> [u64; Rejection::REASONS] {
        load_all(&self.rejections)
    }

    #[inline]
    pub fn rows_in(&self, table: Table) -> u64 {
        self.rows_inserted[table.index()].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn persistence_failures(&self) -> u64 {
        self.persistence_failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn broker_errors(&self) -> u64 {
        self.broker_errors.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn poll_timeouts(&self) -> u64 {
        self.poll_timeouts.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        // Swap periodic counters to zero and get their values
        let dispatch_count = self.dispatches_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.dispatch_latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.dispatch_latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.dispatch_latency_buckets);

        // Calculate elapsed time and reset
        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let dispatches_per_sec = if elapsed.as_secs_f64() > 0.0 {
            dispatch_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let avg_latency = if dispatch_count > 0 { latency_sum / dispatch_count } else { 0 };

        MetricsSummary {
            received_total: self.received_total(),
            accepted_total: self.accepted_total(),
            rejections: self.rejections(),
            rows_inserted: load_all(&self.rows_inserted),
            persistence_failures: self.persistence_failures(),
            broker_errors: self.broker_errors(),
            poll_timeouts: self.poll_timeouts(),
            dispatches_per_sec,
            avg_dispatch_latency_us: avg_latency,
            max_dispatch_latency_us: max_latency,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            lat_buckets,
        }
    }

    /// Dispatch latency buckets since startup, untouched by `report()`
    pub fn dispatch_latency_buckets(&self) -> [u64; NUM_BUCKETS] {
        load_all(&self.dispatch_latency_cumulative)
    }

    /// Sum of all dispatch latencies since startup (microseconds)
    #[inline]
    pub fn dispatch_latency_total_us(&self) -> u64 {
        self.dispatch_latency_total_us.load(Ordering::Relaxed)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub received_total: u64,
    pub accepted_total: u64,
    /// Indexed by `Rejection::index`
    pub rejections: [u64; Rejection::REASONS],
    /// Indexed by `Table::index`
    pub rows_inserted: [u64; NUM_TABLES],
    pub persistence_failures: u64,
    pub broker_errors: u64,
    pub poll_timeouts: u64,
    pub dispatches_per_sec: f64,
    pub avg_dispatch_latency_us: u64,
    pub max_dispatch_latency_us: u64,
    /// Dispatch latency histogram buckets since last report
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
}

impl MetricsSummary {
    pub fn rejected_total(&self) -> u64 {
        self.rejections.iter().sum()
    }

    pub fn log(&self) {
        info!(
            received = %self.received_total,
            accepted = %self.accepted_total,
            rejected = %self.rejected_total(),
            rating_rows = %self.rows_inserted[Table::Rating.index()],
            assistance_rows = %self.rows_inserted[Table::CallAssistance.index()],
            emergency_rows = %self.rows_inserted[Table::CallEmergency.index()],
            persist_failures = %self.persistence_failures,
            broker_errors = %self.broker_errors,
            dispatches_per_sec = format!("{:.2}", self.dispatches_per_sec),
            avg_latency_us = %self.avg_dispatch_latency_us,
            p99_us = %self.lat_p99_us,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rejection::HoursViolation;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.received_total(), 0);
        assert_eq!(metrics.rejections_total(), 0);
        assert_eq!(metrics.rows_in(Table::Rating), 0);
    }

    #[test]
    fn test_rejections_by_reason() {
        let metrics = Metrics::new();

        metrics.record_rejection(&Rejection::InvalidSite);
        metrics.record_rejection(&Rejection::InvalidSite);
        metrics.record_rejection(&Rejection::OutsideOperatingHours(HoursViolation::AlreadyClosed));

        let counts = metrics.rejections();
        assert_eq!(counts[Rejection::InvalidSite.index()], 2);
        assert_eq!(counts[Rejection::MissingField("at").index()], 0);
        assert_eq!(metrics.rejections_total(), 3);
    }

    #[test]
    fn test_rows_by_table() {
        let metrics = Metrics::new();

        metrics.record_row(Table::CallEmergency);
        metrics.record_row(Table::Rating);
        metrics.record_row(Table::Rating);

        assert_eq!(metrics.rows_in(Table::Rating), 2);
        assert_eq!(metrics.rows_in(Table::CallEmergency), 1);
        assert_eq!(metrics.rows_in(Table::CallAssistance), 0);
    }

    #[test]
    fn test_report() {
        let metrics = Metrics::new();

        metrics.record_received();
        metrics.record_received();
        metrics.record_accepted();
        metrics.record_rejection(&Rejection::InvalidValue);
        metrics.record_row(Table::Rating);
        metrics.record_dispatch_latency(1000);
        metrics.record_dispatch_latency(3000);

        let summary = metrics.report();

        assert_eq!(summary.received_total, 2);
        assert_eq!(summary.accepted_total, 1);
        assert_eq!(summary.rejected_total(), 1);
        assert_eq!(summary.rows_inserted[Table::Rating.index()], 1);
        assert_eq!(summary.avg_dispatch_latency_us, 2000);
        assert_eq!(summary.max_dispatch_latency_us, 3000);

        // Periodic counters should be reset, monotonic ones kept
        assert_eq!(metrics.dispatches_since_report.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.dispatch_latency_max_us.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.report().received_total, 2);
        assert_eq!(metrics.dispatch_latency_buckets().iter().sum::<u64>(), 2);
        assert_eq!(metrics.dispatch_latency_total_us(), 4000);
    }

    #[test]
    fn test_report_empty() {
        let summary = Metrics::new().report();

        assert_eq!(summary.received_total, 0);
        assert_eq!(summary.avg_dispatch_latency_us, 0);
        assert_eq!(summary.lat_p99_us, 0);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for i in 0..1000 {
                    m.record_received();
                    m.record_dispatch_latency(i as u64);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.received_total(), 8_000);
        assert_eq!(metrics.dispatch_latency_buckets().iter().sum::<u64>(), 8_000);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10); // overflow
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();

        // All in bucket 4 (≤1600)
        for _ in 0..100 {
            metrics.record_dispatch_latency(1500);
        }

        let summary = metrics.report();
        assert_eq!(summary.lat_p50_us, 1600);
        assert_eq!(summary.lat_p99_us, 1600);
    }
}
