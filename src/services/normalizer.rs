//! Event normalization and debounce
//!
//! Turns raw location-layer payloads into canonical `GeofenceEvent`s.
//! Drops (in this order):
//! - payloads carrying an upstream error
//! - payloads without a region identifier or with an unknown kind
//! - regions the registry does not know
//! - repeats of the same (region, kind) inside the debounce window
//!
//! The window is measured from the last accepted event for the pair, so a
//! burst of boundary jitter cannot keep extending it.

use crate::domain::types::{DropReason, EventKind, GeofenceEvent, RawGeofenceEvent};
use crate::services::registry::RegionRegistry;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;

/// Default debounce window (5 seconds)
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(5);

pub struct EventNormalizer {
    registry: Arc<RegionRegistry>,
    window: TimeDelta,
    /// Last accepted time per (region, kind)
    last_accepted: Mutex<FxHashMap<(String, EventKind), DateTime<Utc>>>,
}

impl EventNormalizer {
    pub fn new(registry: Arc<RegionRegistry>, window: Duration) -> Self {
        let window = TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX);
        Self { registry, window, last_accepted: Mutex::new(FxHashMap::default()) }
    }

    /// Normalize at the current wall-clock time
    pub fn normalize(&self, raw: &RawGeofenceEvent) -> Result<GeofenceEvent, DropReason> {
        self.normalize_at(raw, Utc::now())
    }

    /// Normalize with an explicit observation time
    pub fn normalize_at(
        &self,
        raw: &RawGeofenceEvent,
        now: DateTime<Utc>,
    ) -> Result<GeofenceEvent, DropReason> {
        if let Some(err) = &raw.error {
            return Err(DropReason::UpstreamError(err.clone()));
        }

        let region = match raw.region_identifier.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id,
            _ => return Err(DropReason::MissingRegion),
        };

        let kind = raw
            .kind
            .as_deref()
            .and_then(EventKind::parse)
            .ok_or_else(|| DropReason::UnknownKind(raw.kind.clone()))?;

        if !self.registry.contains(region) {
            return Err(DropReason::UnknownRegion);
        }

        let mut last_accepted = self.last_accepted.lock();
        let window = self.window;
        last_accepted.retain(|_, accepted_at| now - *accepted_at < window);

        let key = (region.to_string(), kind);
        if last_accepted.contains_key(&key) {
            return Err(DropReason::Duplicate);
        }
        last_accepted.insert(key, now);

        Ok(GeofenceEvent::new(region, kind, now))
    }

    /// Number of (region, kind) pairs currently inside their window
    pub fn pending_count(&self) -> usize {
        self.last_accepted.lock().len()
    }
}
