//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! Counters are monotonic; the delivery latency histogram and its sum/max
//! are swapped to zero on every `report()`.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::types::{DecisionReason, DeliveryOutcome, DropReason, FailureCause};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries for delivery latency (milliseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
pub const METRICS_NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    METRICS_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
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
fn swap_buckets(buckets: &[AtomicU64; METRICS_NUM_BUCKETS]) -> [u64; METRICS_NUM_BUCKETS] {
    let mut result = [0u64; METRICS_NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; METRICS_NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; METRICS_NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[METRICS_NUM_BUCKETS - 1]
}

/// Lock-free metrics collector for the dispatch pipeline
pub struct Metrics {
    /// Raw events handed to the normalizer
    raw_events_total: AtomicU64,
    /// Raw events that became canonical events
    events_accepted_total: AtomicU64,
    dropped_upstream_error: AtomicU64,
    dropped_missing_region: AtomicU64,
    dropped_unknown_kind: AtomicU64,
    dropped_unknown_region: AtomicU64,
    dropped_duplicate: AtomicU64,
    dropped_malformed: AtomicU64,
    decisions_send: AtomicU64,
    skipped_unknown_region: AtomicU64,
    skipped_not_subscribed: AtomicU64,
    skipped_no_token: AtomicU64,
    /// Every relay call, first attempts included
    delivery_attempts_total: AtomicU64,
    /// Attempts that were followed by a backoff and another attempt
    delivery_retries_total: AtomicU64,
    deliveries_succeeded: AtomicU64,
    /// Permanent failures other than exhausted retries (4xx and friends)
    deliveries_rejected: AtomicU64,
    deliveries_exhausted: AtomicU64,
    deliveries_abandoned: AtomicU64,
    token_invalidations: AtomicU64,
    /// Delivery tasks currently running (gauge)
    deliveries_in_flight: AtomicU64,
    /// Delivery latency histogram in ms (reset on report)
    delivery_latency_buckets: [AtomicU64; METRICS_NUM_BUCKETS],
    delivery_latency_sum_ms: AtomicU64,
    delivery_latency_max_ms: AtomicU64,
    deliveries_since_report: AtomicU64,
    raw_events_since_report: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            raw_events_total: AtomicU64::new(0),
            events_accepted_total: AtomicU64::new(0),
            dropped_upstream_error: AtomicU64::new(0),
            dropped_missing_region: AtomicU64::new(0),
            dropped_unknown_kind: AtomicU64::new(0),
            dropped_unknown_region: AtomicU64::new(0),
            dropped_duplicate: AtomicU64::new(0),
            dropped_malformed: AtomicU64::new(0),
            decisions_send: AtomicU64::new(0),
            skipped_unknown_region: AtomicU64::new(0),
            skipped_not_subscribed: AtomicU64::new(0),
            skipped_no_token: AtomicU64::new(0),
            delivery_attempts_total: AtomicU64::new(0),
            delivery_retries_total: AtomicU64::new(0),
            deliveries_succeeded: AtomicU64::new(0),
            deliveries_rejected: AtomicU64::new(0),
            deliveries_exhausted: AtomicU64::new(0),
            deliveries_abandoned: AtomicU64::new(0),
            token_invalidations: AtomicU64::new(0),
            deliveries_in_flight: AtomicU64::new(0),
            delivery_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            delivery_latency_sum_ms: AtomicU64::new(0),
            delivery_latency_max_ms: AtomicU64::new(0),
            deliveries_since_report: AtomicU64::new(0),
            raw_events_since_report: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_raw_event(&self) {
        self.raw_events_total.fetch_add(1, Ordering::Relaxed);
        self.raw_events_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_accepted(&self) {
        self.events_accepted_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_event_dropped(&self, reason: &DropReason) {
        let counter = match reason {
            DropReason::UpstreamError(_) => &self.dropped_upstream_error,
            DropReason::MissingRegion => &self.dropped_missing_region,
            DropReason::UnknownKind(_) => &self.dropped_unknown_kind,
            DropReason::UnknownRegion => &self.dropped_unknown_region,
            DropReason::Duplicate => &self.dropped_duplicate,
            DropReason::Malformed(_) => &self.dropped_malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_decision(&self, reason: DecisionReason) {
        let counter = match reason {
            DecisionReason::Subscribed => &self.decisions_send,
            DecisionReason::UnknownRegion => &self.skipped_unknown_region,
            DecisionReason::NotSubscribed => &self.skipped_not_subscribed,
            DecisionReason::NoToken => &self.skipped_no_token,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_attempt(&self) {
        self.delivery_attempts_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_retry(&self) {
        self.delivery_retries_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_token_invalidated(&self) {
        self.token_invalidations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn delivery_started(&self) {
        self.deliveries_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the end of a delivery task with its total latency (lock-free)
    #[inline]
    pub fn delivery_finished(&self, outcome: DeliveryOutcome, latency_ms: u64) {
        // Saturating decrement; the gauge must never wrap
        let _ = self.deliveries_in_flight.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            Some(v.saturating_sub(1))
        });

        let counter = match outcome {
            DeliveryOutcome::Success => &self.deliveries_succeeded,
            DeliveryOutcome::PermanentFailure(FailureCause::RetriesExhausted) => {
                &self.deliveries_exhausted
            }
            DeliveryOutcome::PermanentFailure(_) => &self.deliveries_rejected,
            DeliveryOutcome::Abandoned => &self.deliveries_abandoned,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        self.deliveries_since_report.fetch_add(1, Ordering::Relaxed);
        self.delivery_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.delivery_latency_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.delivery_latency_max_ms, latency_ms);
    }

    #[inline]
    pub fn raw_events_total(&self) -> u64 {
        self.raw_events_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn deliveries_in_flight(&self) -> u64 {
        self.deliveries_in_flight.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn deliveries_succeeded(&self) -> u64 {
        self.deliveries_succeeded.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn token_invalidations(&self) -> u64 {
        self.token_invalidations.load(Ordering::Relaxed)
    }

    /// Take a snapshot; resets the per-interval histogram, sum and max
    pub fn report(&self) -> MetricsSummary {
        let now = Instant::now();
        let elapsed_secs = {
            let mut last = self.last_report_time.lock();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *last = now;
            elapsed
        };

        let raw_since = self.raw_events_since_report.swap(0, Ordering::Relaxed);
        let deliveries_since = self.deliveries_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.delivery_latency_sum_ms.swap(0, Ordering::Relaxed);
        let latency_max = self.delivery_latency_max_ms.swap(0, Ordering::Relaxed);
        let buckets = swap_buckets(&self.delivery_latency_buckets);

        let load = |a: &AtomicU64| a.load(Ordering::Relaxed);

        MetricsSummary {
            raw_events_total: load(&self.raw_events_total),
            raw_events_per_sec: if elapsed_secs > 0.0 {
                raw_since as f64 / elapsed_secs
            } else {
                0.0
            },
            events_accepted_total: load(&self.events_accepted_total),
            dropped_upstream_error: load(&self.dropped_upstream_error),
            dropped_missing_region: load(&self.dropped_missing_region),
            dropped_unknown_kind: load(&self.dropped_unknown_kind),
            dropped_unknown_region: load(&self.dropped_unknown_region),
            dropped_duplicate: load(&self.dropped_duplicate),
            dropped_malformed: load(&self.dropped_malformed),
            decisions_send: load(&self.decisions_send),
            skipped_unknown_region: load(&self.skipped_unknown_region),
            skipped_not_subscribed: load(&self.skipped_not_subscribed),
            skipped_no_token: load(&self.skipped_no_token),
            delivery_attempts_total: load(&self.delivery_attempts_total),
            delivery_retries_total: load(&self.delivery_retries_total),
            deliveries_succeeded: load(&self.deliveries_succeeded),
            deliveries_rejected: load(&self.deliveries_rejected),
            deliveries_exhausted: load(&self.deliveries_exhausted),
            deliveries_abandoned: load(&self.deliveries_abandoned),
            token_invalidations: load(&self.token_invalidations),
            deliveries_in_flight: load(&self.deliveries_in_flight),
            latency_buckets: buckets,
            avg_delivery_latency_ms: if deliveries_since > 0 {
                latency_sum / deliveries_since
            } else {
                0
            },
            max_delivery_latency_ms: latency_max,
            latency_p50_ms: percentile_from_buckets(&buckets, 0.50),
            latency_p99_ms: percentile_from_buckets(&buckets, 0.99),
        }
    }
}

/// Point-in-time view of the counters
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub raw_events_total: u64,
    pub raw_events_per_sec: f64,
    pub events_accepted_total: u64,
    pub dropped_upstream_error: u64,
    pub dropped_missing_region: u64,
    pub dropped_unknown_kind: u64,
    pub dropped_unknown_region: u64,
    pub dropped_duplicate: u64,
    pub dropped_malformed: u64,
    pub decisions_send: u64,
    pub skipped_unknown_region: u64,
    pub skipped_not_subscribed: u64,
    pub skipped_no_token: u64,
    pub delivery_attempts_total: u64,
    pub delivery_retries_total: u64,
    pub deliveries_succeeded: u64,
    pub deliveries_rejected: u64,
    pub deliveries_exhausted: u64,
    pub deliveries_abandoned: u64,
    pub token_invalidations: u64,
    pub deliveries_in_flight: u64,
    pub latency_buckets: [u64; METRICS_NUM_BUCKETS],
    pub avg_delivery_latency_ms: u64,
    pub max_delivery_latency_ms: u64,
    pub latency_p50_ms: u64,
    pub latency_p99_ms: u64,
}

impl MetricsSummary {
    pub fn dropped_total(&self) -> u64 {
        self.dropped_upstream_error
            + self.dropped_missing_region
            + self.dropped_unknown_kind
            + self.dropped_unknown_region
            + self.dropped_duplicate
            + self.dropped_malformed
    }

    pub fn log(&self) {
        info!(
            raw_events = %self.raw_events_total,
            raw_per_sec = format!("{:.2}", self.raw_events_per_sec),
            accepted = %self.events_accepted_total,
            dropped = %self.dropped_total(),
            debounced = %self.dropped_duplicate,
            sent = %self.decisions_send,
            skipped_no_token = %self.skipped_no_token,
            skipped_not_subscribed = %self.skipped_not_subscribed,
            attempts = %self.delivery_attempts_total,
            retries = %self.delivery_retries_total,
            succeeded = %self.deliveries_succeeded,
            rejected = %self.deliveries_rejected,
            exhausted = %self.deliveries_exhausted,
            abandoned = %self.deliveries_abandoned,
            in_flight = %self.deliveries_in_flight,
            p99_ms = %self.latency_p99_ms,
            "metrics"
        );
    }
}
