//! End-to-end dispatcher scenarios against a scripted in-process relay

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use geofence_dispatch::domain::types::{DeliveryReport, FailureCause, PushToken};
use geofence_dispatch::domain::{
    DecisionReason, DeliveryOutcome, DropReason, MessageTemplate, PushMessage, RawGeofenceEvent,
    Region,
};
use geofence_dispatch::infra::{DispatchObserver, Metrics, TracingObserver};
use geofence_dispatch::io::{PushRelay, RelayError, RelayResponse};
use geofence_dispatch::services::{
    DeliveryClient, Dispatcher, EventNormalizer, IngestOutcome, RegionRegistry, RetryPolicy,
    TokenStore,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// One scripted relay answer
#[derive(Clone, Copy)]
struct Step {
    status: u16,
    delay: Duration,
}

fn status(status: u16) -> Step {
    Step { status, delay: Duration::ZERO }
}

/// Relay that answers from a script, then 200 forever
#[derive(Default)]
struct ScriptedRelay {
    script: Mutex<VecDeque<Step>>,
    sent: Mutex<Vec<PushMessage>>,
}

impl ScriptedRelay {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self { script: Mutex::new(steps.into()), sent: Mutex::new(Vec::new()) })
    }

    fn sent(&self) -> Vec<PushMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl PushRelay for ScriptedRelay {
    async fn send(&self, message: &PushMessage) -> Result<RelayResponse, RelayError> {
        self.sent.lock().push(message.clone());
        let step = self.script.lock().pop_front().unwrap_or(status(200));
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        Ok(RelayResponse { status: step.status, body: String::new() })
    }
}

/// Captures observer callbacks
#[derive(Default)]
struct RecordingObserver {
    invalidations: Mutex<Vec<Uuid>>,
    finished: Mutex<Vec<DeliveryOutcome>>,
}

impl DispatchObserver for RecordingObserver {
    fn delivery_finished(&self, report: &DeliveryReport) {
        self.finished.lock().push(report.outcome);
    }

    fn token_invalidated(&self, dispatch_id: Uuid) {
        self.invalidations.lock().push(dispatch_id);
    }
}

struct Harness {
    dispatcher: Dispatcher,
    relay: Arc<ScriptedRelay>,
    tokens: Arc<TokenStore>,
    observer: Arc<RecordingObserver>,
}

fn harness(steps: Vec<Step>, token: Option<&str>, retry_base: Duration) -> Harness {
    let registry = Arc::new(
        RegionRegistry::from_regions(vec![
            Region::new("A", 15.5491, -88.0006, 100.0).with_notify(true, false),
            Region::new("B", 15.5474, -88.0003, 100.0).with_notify(true, true),
        ])
        .unwrap(),
    );
    let tokens = Arc::new(match token {
        Some(value) => TokenStore::with_token(value),
        None => TokenStore::new(),
    });
    let relay = ScriptedRelay::new(steps);
    let observer = Arc::new(RecordingObserver::default());
    let retry = RetryPolicy { base: retry_base, cap: retry_base * 8, max_attempts: 5 };

    let delivery = Arc::new(DeliveryClient::new(
        relay.clone(),
        tokens.clone(),
        MessageTemplate::default(),
        retry,
        observer.clone(),
    ));
    let normalizer = EventNormalizer::new(registry.clone(), Duration::from_secs(5));
    let dispatcher =
        Dispatcher::new(registry, tokens.clone(), normalizer, delivery, observer.clone());

    Harness { dispatcher, relay, tokens, observer }
}

async fn deliver(outcome: IngestOutcome) -> DeliveryReport {
    let task = outcome.into_task().expect("event should have been dispatched");
    task.await.unwrap()
}

#[tokio::test]
async fn test_enter_subscribed_region_sends_once() {
    let h = harness(vec![status(200)], Some("tok-123"), Duration::from_millis(1));

    let report = deliver(h.dispatcher.on_raw_event(RawGeofenceEvent::new("A", "Enter"))).await;

    assert_eq!(report.outcome, DeliveryOutcome::Success);
    assert_eq!(report.attempt_count(), 1);
    let sent = h.relay.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "tok-123");
    assert_eq!(sent[0].sound, "default");
    assert!(sent[0].title.contains('A'));
}

#[tokio::test]
async fn test_server_errors_retried_until_success() {
    let h = harness(
        vec![status(500), status(500), status(500), status(200)],
        Some("tok"),
        Duration::from_millis(2),
    );

    let report = deliver(h.dispatcher.on_raw_event(RawGeofenceEvent::new("A", "Enter"))).await;

    assert_eq!(report.outcome, DeliveryOutcome::Success);
    assert_eq!(report.attempt_count(), 4);
    assert_eq!(h.relay.sent().len(), 4);
}

#[tokio::test]
async fn test_rejection_is_permanent_and_invalidates_token() {
    let h = harness(vec![status(400)], Some("tok"), Duration::from_millis(1));

    let report = deliver(h.dispatcher.on_raw_event(RawGeofenceEvent::new("A", "Enter"))).await;

    assert_eq!(report.outcome, DeliveryOutcome::PermanentFailure(FailureCause::Rejected(400)));
    assert_eq!(report.attempt_count(), 1);
    assert_eq!(h.relay.sent().len(), 1);
    assert!(!h.tokens.is_present());
    assert_eq!(h.observer.invalidations.lock().as_slice(), &[report.dispatch_id]);

    // Later events skip until a new token is registered
    let next = h.dispatcher.on_raw_event(RawGeofenceEvent::new("B", "Enter"));
    match next {
        IngestOutcome::Skipped(decision) => assert_eq!(decision.reason, DecisionReason::NoToken),
        other => panic!("expected skip, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rejection_keeps_newer_token() {
    let slow_reject = Step { status: 400, delay: Duration::from_millis(100) };
    let h = harness(vec![slow_reject], Some("token-a"), Duration::from_millis(1));

    let outcome = h.dispatcher.on_raw_event(RawGeofenceEvent::new("A", "Enter"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.tokens.set(PushToken::new("token-b"));

    let report = deliver(outcome).await;

    assert_eq!(report.outcome, DeliveryOutcome::PermanentFailure(FailureCause::Rejected(400)));
    assert_eq!(h.tokens.current().unwrap().value, "token-b");
    assert!(h.observer.invalidations.lock().is_empty());
}

#[tokio::test]
async fn test_invalidation_during_backoff_abandons() {
    let h = harness(vec![status(503); 5], Some("tok"), Duration::from_secs(2));

    let outcome = h.dispatcher.on_raw_event(RawGeofenceEvent::new("A", "Enter"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.relay.sent().len(), 1);

    h.tokens.clear();

    let task = outcome.into_task().unwrap();
    let report = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();

    assert_eq!(report.outcome, DeliveryOutcome::Abandoned);
    assert_eq!(report.attempt_count(), 1);
    assert_eq!(h.relay.sent().len(), 1);
    assert_eq!(h.observer.finished.lock().as_slice(), &[DeliveryOutcome::Abandoned]);
}

#[tokio::test]
async fn test_retries_exhausted_after_max_attempts() {
    let h = harness(vec![status(502); 10], Some("tok"), Duration::from_millis(1));

    let report = deliver(h.dispatcher.on_raw_event(RawGeofenceEvent::new("A", "Enter"))).await;

    assert_eq!(report.outcome, DeliveryOutcome::PermanentFailure(FailureCause::RetriesExhausted));
    assert_eq!(report.attempt_count(), 5);
    assert!(h.tokens.is_present());
}

#[tokio::test]
async fn test_debounce_collapses_jitter() {
    let h = harness(vec![], Some("tok"), Duration::from_millis(1));
    let t0 = Utc::now();

    let first = h.dispatcher.on_raw_event_at(RawGeofenceEvent::new("A", "Enter"), t0);
    let jitter = h
        .dispatcher
        .on_raw_event_at(RawGeofenceEvent::new("A", "Enter"), t0 + TimeDelta::seconds(3));
    assert!(matches!(jitter, IngestOutcome::Dropped(DropReason::Duplicate)));

    let later = h
        .dispatcher
        .on_raw_event_at(RawGeofenceEvent::new("A", "Enter"), t0 + TimeDelta::seconds(6));

    deliver(first).await;
    deliver(later).await;
    assert_eq!(h.relay.sent().len(), 2);
}

#[tokio::test]
async fn test_enter_and_exit_debounced_separately() {
    let h = harness(vec![], Some("tok"), Duration::from_millis(1));
    let t0 = Utc::now();

    let enter = h.dispatcher.on_raw_event_at(RawGeofenceEvent::new("B", "Enter"), t0);
    let exit = h
        .dispatcher
        .on_raw_event_at(RawGeofenceEvent::new("B", "Exit"), t0 + TimeDelta::seconds(1));

    deliver(enter).await;
    deliver(exit).await;
    assert_eq!(h.relay.sent().len(), 2);
}

#[tokio::test]
async fn test_filtered_events_never_reach_relay() {
    let h = harness(vec![], Some("tok"), Duration::from_millis(1));

    let exit = h.dispatcher.on_raw_event(RawGeofenceEvent::new("A", "Exit"));
    assert_eq!(exit.reason(), "not_subscribed");

    let unknown = h.dispatcher.on_raw_event(RawGeofenceEvent::new("Z", "Enter"));
    assert!(matches!(unknown, IngestOutcome::Dropped(DropReason::UnknownRegion)));

    let upstream = h.dispatcher.on_raw_event(RawGeofenceEvent::failed("location permission denied"));
    assert!(matches!(upstream, IngestOutcome::Dropped(DropReason::UpstreamError(_))));

    let no_region = h.dispatcher.on_raw_payload(br#"{"kind":"Enter"}"#);
    assert!(matches!(no_region, IngestOutcome::Dropped(DropReason::MissingRegion)));

    assert!(h.relay.sent().is_empty());
}

#[tokio::test]
async fn test_slow_delivery_does_not_block_ingest() {
    let slow = Step { status: 200, delay: Duration::from_millis(300) };
    let h = harness(vec![slow], Some("tok"), Duration::from_millis(1));

    let first = h.dispatcher.on_raw_event(RawGeofenceEvent::new("A", "Enter"));
    // Let the first delivery reach the relay and take the slow step
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = h.dispatcher.on_raw_event(RawGeofenceEvent::new("B", "Enter"));

    // Second delivery finishes while the first is still waiting on the relay
    let second_report = deliver(second).await;
    assert_eq!(second_report.outcome, DeliveryOutcome::Success);

    let first_task = first.into_task().unwrap();
    assert!(!first_task.is_finished());
    assert_eq!(first_task.await.unwrap().outcome, DeliveryOutcome::Success);
}

#[tokio::test]
async fn test_tracing_observer_counts_pipeline() {
    let registry =
        Arc::new(RegionRegistry::from_regions(vec![Region::new("A", 1.0, 1.0, 50.0)]).unwrap());
    let tokens = Arc::new(TokenStore::with_token("tok"));
    let relay = ScriptedRelay::new(vec![status(500), status(200)]);
    let metrics = Arc::new(Metrics::new());
    let observer: Arc<dyn DispatchObserver> = Arc::new(TracingObserver::new(metrics.clone()));

    let delivery = Arc::new(DeliveryClient::new(
        relay,
        tokens.clone(),
        MessageTemplate::default(),
        RetryPolicy { base: Duration::from_millis(1), cap: Duration::from_millis(1), max_attempts: 3 },
        observer.clone(),
    ));
    let normalizer = EventNormalizer::new(registry.clone(), Duration::from_secs(5));
    let dispatcher = Dispatcher::new(registry, tokens, normalizer, delivery, observer);

    deliver(dispatcher.on_raw_event(RawGeofenceEvent::new("A", "Enter"))).await;
    dispatcher.on_raw_event(RawGeofenceEvent::new("A", "Enter"));

    let summary = metrics.report();
    assert_eq!(summary.raw_events_total, 2);
    assert_eq!(summary.events_accepted_total, 1);
    assert_eq!(summary.dropped_duplicate, 1);
    assert_eq!(summary.decisions_send, 1);
    assert_eq!(summary.delivery_attempts_total, 2);
    assert_eq!(summary.delivery_retries_total, 1);
    assert_eq!(summary.deliveries_succeeded, 1);
    assert_eq!(summary.deliveries_in_flight, 0);
}
