//! Observability sink for the dispatch pipeline
//!
//! Components report what happened to each event through `DispatchObserver`
//! instead of logging directly, so tests can capture outcomes and the daemon
//! can fan them into `tracing` and `Metrics`.

use crate::domain::types::{
    DeliveryAttempt, DeliveryOutcome, DeliveryReport, DispatchDecision, DropReason,
    GeofenceEvent, RawGeofenceEvent,
};
use crate::infra::metrics::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Receives dropped events, decisions and delivery outcomes.
///
/// Every method has an empty default so implementations only override
/// what they care about. Implementations must be cheap and must not block:
/// they are called inline on the ingest path.
pub trait DispatchObserver: Send + Sync {
    fn raw_event_received(&self, _raw: &RawGeofenceEvent) {}

    fn event_dropped(&self, _raw: &RawGeofenceEvent, _reason: &DropReason) {}

    fn event_accepted(&self, _event: &GeofenceEvent) {}

    fn decision_made(&self, _decision: &DispatchDecision) {}

    fn delivery_started(&self, _dispatch_id: Uuid, _decision: &DispatchDecision) {}

    /// A relay attempt failed; `retry_in` is set when another attempt follows
    fn attempt_failed(
        &self,
        _dispatch_id: Uuid,
        _attempt: &DeliveryAttempt,
        _retry_in: Option<Duration>,
    ) {
    }

    fn delivery_finished(&self, _report: &DeliveryReport) {}

    /// The relay rejected the current token and the store was cleared
    fn token_invalidated(&self, _dispatch_id: Uuid) {}
}

/// Observer that discards everything
pub struct NoopObserver;

impl DispatchObserver for NoopObserver {}

/// Default observer: structured logs plus lock-free counters
pub struct TracingObserver {
    metrics: Arc<Metrics>,
}

impl TracingObserver {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl DispatchObserver for TracingObserver {
    fn raw_event_received(&self, raw: &RawGeofenceEvent) {
        self.metrics.record_raw_event();
        debug!(
            region = ?raw.region_identifier,
            kind = ?raw.kind,
            has_error = %raw.error.is_some(),
            "raw_event_received"
        );
    }

    fn event_dropped(&self, raw: &RawGeofenceEvent, reason: &DropReason) {
        self.metrics.record_event_dropped(reason);
        match reason {
            DropReason::UpstreamError(err) => {
                warn!(error = %err, "geofence_upstream_error");
            }
            DropReason::Duplicate => {
                debug!(region = ?raw.region_identifier, kind = ?raw.kind, "event_debounced");
            }
            DropReason::UnknownKind(kind) => {
                warn!(region = ?raw.region_identifier, kind = ?kind, "event_dropped_unknown_kind");
            }
            DropReason::Malformed(err) => {
                warn!(error = %err, "event_dropped_malformed");
            }
            other => {
                info!(
                    region = ?raw.region_identifier,
                    reason = %other.as_str(),
                    "event_dropped"
                );
            }
        }
    }

    fn event_accepted(&self, event: &GeofenceEvent) {
        self.metrics.record_event_accepted();
        info!(
            region = %event.region_identifier,
            kind = %event.kind,
            observed_at = %event.observed_at.to_rfc3339(),
            "geofence_event"
        );
    }

    fn decision_made(&self, decision: &DispatchDecision) {
        self.metrics.record_decision(decision.reason);
        if decision.is_send() {
            debug!(
                region = %decision.event.region_identifier,
                kind = %decision.event.kind,
                "dispatch_send"
            );
        } else {
            info!(
                region = %decision.event.region_identifier,
                kind = %decision.event.kind,
                reason = %decision.reason.as_str(),
                "dispatch_skip"
            );
        }
    }

    fn delivery_started(&self, dispatch_id: Uuid, decision: &DispatchDecision) {
        self.metrics.delivery_started();
        debug!(
            dispatch_id = %dispatch_id,
            region = %decision.event.region_identifier,
            "delivery_started"
        );
    }

    fn attempt_failed(
        &self,
        dispatch_id: Uuid,
        attempt: &DeliveryAttempt,
        retry_in: Option<Duration>,
    ) {
        match retry_in {
            Some(delay) => {
                self.metrics.record_retry();
                warn!(
                    dispatch_id = %dispatch_id,
                    attempt = %attempt.attempt_number,
                    status = ?attempt.status,
                    error = ?attempt.error,
                    retry_in_ms = %delay.as_millis(),
                    "delivery_attempt_failed"
                );
            }
            None => {
                warn!(
                    dispatch_id = %dispatch_id,
                    attempt = %attempt.attempt_number,
                    status = ?attempt.status,
                    error = ?attempt.error,
                    "delivery_attempt_failed_final"
                );
            }
        }
    }

    fn delivery_finished(&self, report: &DeliveryReport) {
        self.metrics.delivery_finished(report.outcome, report.elapsed_ms);
        for _ in &report.attempts {
            self.metrics.record_attempt();
        }

        match report.outcome {
            DeliveryOutcome::Success => info!(
                dispatch_id = %report.dispatch_id,
                region = %report.region_identifier,
                kind = %report.kind,
                attempts = %report.attempt_count(),
                elapsed_ms = %report.elapsed_ms,
                "delivery_succeeded"
            ),
            DeliveryOutcome::PermanentFailure(cause) => error!(
                dispatch_id = %report.dispatch_id,
                region = %report.region_identifier,
                kind = %report.kind,
                cause = %cause.as_str(),
                attempts = %report.attempt_count(),
                elapsed_ms = %report.elapsed_ms,
                "delivery_failed"
            ),
            DeliveryOutcome::Abandoned => warn!(
                dispatch_id = %report.dispatch_id,
                region = %report.region_identifier,
                attempts = %report.attempt_count(),
                "delivery_abandoned"
            ),
        }
    }

    fn token_invalidated(&self, dispatch_id: Uuid) {
        self.metrics.record_token_invalidated();
        warn!(dispatch_id = %dispatch_id, "push_token_invalidated");
    }
}
