//! Prometheus text exposition for dispatcher metrics
//!
//! Served at `/metrics` by the HTTP API.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use std::fmt::Write;

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write one metric family with a `reason` label per sample
fn write_labeled(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    samples: &[(&str, u64)],
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (reason, val) in samples {
        let _ = writeln!(output, "{name}{{site=\"{site}\",reason=\"{reason}\"}} {val}");
    }
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(
    metrics: &Metrics,
    regions: usize,
    token_present: bool,
    site_id: &str,
) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_ingest_metrics(&mut output, site_id, &summary);
    write_decision_metrics(&mut output, site_id, &summary);
    write_delivery_metrics(&mut output, site_id, &summary);
    write_state_metrics(&mut output, site_id, regions, token_present);

    output
}

fn write_ingest_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "geofence_raw_events_total",
        "Raw events received from the location layer",
        MetricType::Counter,
        site,
        summary.raw_events_total,
    );
    write_metric(
        output,
        "geofence_events_accepted_total",
        "Events that passed normalization",
        MetricType::Counter,
        site,
        summary.events_accepted_total,
    );
    write_labeled(
        output,
        "geofence_events_dropped_total",
        "Raw events dropped by the normalizer",
        site,
        &[
            ("upstream_error", summary.dropped_upstream_error),
            ("missing_region", summary.dropped_missing_region),
            ("unknown_kind", summary.dropped_unknown_kind),
            ("unknown_region", summary.dropped_unknown_region),
            ("duplicate", summary.dropped_duplicate),
            ("malformed", summary.dropped_malformed),
        ],
    );
}

fn write_decision_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "geofence_dispatch_send_total",
        "Events the policy decided to notify",
        MetricType::Counter,
        site,
        summary.decisions_send,
    );
    write_labeled(
        output,
        "geofence_dispatch_skipped_total",
        "Events the policy decided not to notify",
        site,
        &[
            ("unknown_region", summary.skipped_unknown_region),
            ("not_subscribed", summary.skipped_not_subscribed),
            ("no_token", summary.skipped_no_token),
        ],
    );
}

fn write_delivery_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "geofence_delivery_attempts_total",
        "Relay requests sent",
        MetricType::Counter,
        site,
        summary.delivery_attempts_total,
    );
    write_metric(
        output,
        "geofence_delivery_retries_total",
        "Relay attempts followed by a backoff retry",
        MetricType::Counter,
        site,
        summary.delivery_retries_total,
    );
    write_metric(
        output,
        "geofence_deliveries_succeeded_total",
        "Deliveries accepted by the relay",
        MetricType::Counter,
        site,
        summary.deliveries_succeeded,
    );
    write_metric(
        output,
        "geofence_deliveries_rejected_total",
        "Deliveries failed permanently without retry",
        MetricType::Counter,
        site,
        summary.deliveries_rejected,
    );
    write_metric(
        output,
        "geofence_deliveries_exhausted_total",
        "Deliveries failed after the last retry",
        MetricType::Counter,
        site,
        summary.deliveries_exhausted,
    );
    write_metric(
        output,
        "geofence_deliveries_abandoned_total",
        "Deliveries abandoned because the token was gone",
        MetricType::Counter,
        site,
        summary.deliveries_abandoned,
    );
    write_metric(
        output,
        "geofence_token_invalidations_total",
        "Push tokens cleared after a relay rejection",
        MetricType::Counter,
        site,
        summary.token_invalidations,
    );
    write_metric(
        output,
        "geofence_deliveries_in_flight",
        "Delivery tasks currently running",
        MetricType::Gauge,
        site,
        summary.deliveries_in_flight,
    );

    write_histogram(
        output,
        "geofence_delivery_latency_ms",
        "Delivery task latency in milliseconds, retries included",
        site,
        &summary.latency_buckets,
        summary.avg_delivery_latency_ms,
    );
    write_metric(
        output,
        "geofence_delivery_latency_p99_ms",
        "99th percentile delivery latency",
        MetricType::Gauge,
        site,
        summary.latency_p99_ms,
    );
}

fn write_state_metrics(output: &mut String, site: &str, regions: usize, token_present: bool) {
    write_metric(
        output,
        "geofence_regions",
        "Regions currently registered",
        MetricType::Gauge,
        site,
        regions as u64,
    );
    write_metric(
        output,
        "geofence_token_present",
        "Whether a push token is registered (0/1)",
        MetricType::Gauge,
        site,
        u64::from(token_present),
    );
}
