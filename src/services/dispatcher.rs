//! Dispatcher - single entry point for raw geofence events
//!
//! Wires normalizer → policy → delivery. Ingest is synchronous and never
//! waits on the relay: `Send` decisions are handed to a spawned delivery task
//! whose handle is returned to the caller.

use crate::domain::types::{
    DeliveryReport, DispatchDecision, DropReason, GeofenceEvent, RawGeofenceEvent,
};
use crate::infra::config::Config;
use crate::infra::observer::DispatchObserver;
use crate::io::relay::PushRelay;
use crate::services::delivery::{DeliveryClient, RetryPolicy};
use crate::services::normalizer::EventNormalizer;
use crate::services::policy;
use crate::services::registry::{RegionRegistry, RegistryError};
use crate::services::token_store::TokenStore;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How often `drain` re-checks the in-flight count
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// What happened to one raw event
#[derive(Debug)]
pub enum IngestOutcome {
    Dropped(DropReason),
    Skipped(DispatchDecision),
    Dispatched { decision: DispatchDecision, task: JoinHandle<DeliveryReport> },
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestOutcome::Dropped(_) => "dropped",
            IngestOutcome::Skipped(_) => "skipped",
            IngestOutcome::Dispatched { .. } => "dispatched",
        }
    }

    /// Drop or decision reason, for API responses
    pub fn reason(&self) -> &'static str {
        match self {
            IngestOutcome::Dropped(reason) => reason.as_str(),
            IngestOutcome::Skipped(decision) => decision.reason.as_str(),
            IngestOutcome::Dispatched { decision, .. } => decision.reason.as_str(),
        }
    }

    /// Delivery task handle, if one was spawned
    pub fn into_task(self) -> Option<JoinHandle<DeliveryReport>> {
        match self {
            IngestOutcome::Dispatched { task, .. } => Some(task),
            _ => None,
        }
    }
}

/// Counts one delivery task out when it ends, aborted or not
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct Dispatcher {
    registry: Arc<RegionRegistry>,
    tokens: Arc<TokenStore>,
    normalizer: EventNormalizer,
    delivery: Arc<DeliveryClient>,
    observer: Arc<dyn DispatchObserver>,
    /// Delivery tasks spawned and not yet finished
    in_flight: Arc<AtomicUsize>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<RegionRegistry>,
        tokens: Arc<TokenStore>,
        normalizer: EventNormalizer,
        delivery: Arc<DeliveryClient>,
        observer: Arc<dyn DispatchObserver>,
    ) -> Self {
        Self {
            registry,
            tokens,
            normalizer,
            delivery,
            observer,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Build the full pipeline from configuration: configured regions,
    /// optional initial token, retry and debounce settings.
    pub fn from_config(
        config: &Config,
        relay: Arc<dyn PushRelay>,
        observer: Arc<dyn DispatchObserver>,
    ) -> Result<Self, RegistryError> {
        let registry = Arc::new(RegionRegistry::from_regions(config.regions().iter().cloned())?);
        let tokens = Arc::new(match config.initial_token() {
            Some(token) => TokenStore::with_token(token),
            None => TokenStore::new(),
        });
        let delivery = Arc::new(DeliveryClient::new(
            relay,
            Arc::clone(&tokens),
            config.message_template().clone(),
            RetryPolicy::from_config(config),
            Arc::clone(&observer),
        ));
        let normalizer = EventNormalizer::new(
            Arc::clone(&registry),
            Duration::from_millis(config.debounce_window_ms()),
        );

        Ok(Self::new(registry, tokens, normalizer, delivery, observer))
    }

    pub fn registry(&self) -> &Arc<RegionRegistry> {
        &self.registry
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Delivery tasks still running
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Wait up to `grace` for running deliveries to finish.
    /// Returns how many were still running when it gave up.
    pub async fn drain(&self, grace: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let remaining = self.in_flight();
            let now = tokio::time::Instant::now();
            if remaining == 0 || now >= deadline {
                return remaining;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Ingest a raw event observed now. Must be called inside a tokio runtime.
    pub fn on_raw_event(&self, raw: RawGeofenceEvent) -> IngestOutcome {
        self.on_raw_event_at(raw, Utc::now())
    }

    /// Ingest with an explicit observation time
    pub fn on_raw_event_at(&self, raw: RawGeofenceEvent, now: DateTime<Utc>) -> IngestOutcome {
        self.observer.raw_event_received(&raw);

        let event = match self.normalizer.normalize_at(&raw, now) {
            Ok(event) => event,
            Err(reason) => {
                self.observer.event_dropped(&raw, &reason);
                return IngestOutcome::Dropped(reason);
            }
        };
        self.observer.event_accepted(&event);

        self.dispatch(event)
    }

    /// Decode a JSON payload and ingest it. Undecodable payloads are
    /// reported as `Malformed` drops.
    pub fn on_raw_payload(&self, payload: &[u8]) -> IngestOutcome {
        match serde_json::from_slice::<RawGeofenceEvent>(payload) {
            Ok(raw) => self.on_raw_event(raw),
            Err(e) => {
                let raw = RawGeofenceEvent::default();
                let reason = DropReason::Malformed(e.to_string());
                self.observer.raw_event_received(&raw);
                self.observer.event_dropped(&raw, &reason);
                IngestOutcome::Dropped(reason)
            }
        }
    }

    fn dispatch(&self, event: GeofenceEvent) -> IngestOutcome {
        let decision = policy::decide(&event, &self.registry, self.tokens.is_present());
        self.observer.decision_made(&decision);

        if !decision.is_send() {
            return IngestOutcome::Skipped(decision);
        }

        let delivery = Arc::clone(&self.delivery);
        let task_decision = decision.clone();
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlightGuard(Arc::clone(&self.in_flight));
        let task = tokio::spawn(async move {
            let _guard = guard;
            delivery.deliver(task_decision).await
        });

        IngestOutcome::Dispatched { decision, task }
    }
}
