//! Dispatch policy - per-event fire/skip decision
//!
//! Pure: the result depends only on the event, the region found for it and
//! whether a token is present. No clocks, no counters.

use crate::domain::types::{DecisionReason, DispatchDecision, GeofenceEvent, Region};
use crate::services::registry::RegionRegistry;

/// Decide for an already-resolved region
pub fn decide_for(
    event: &GeofenceEvent,
    region: Option<&Region>,
    token_present: bool,
) -> DispatchDecision {
    let Some(region) = region else {
        return DispatchDecision::skip(event.clone(), DecisionReason::UnknownRegion);
    };

    if !region.notifies(event.kind) {
        return DispatchDecision::skip(event.clone(), DecisionReason::NotSubscribed);
    }

    if !token_present {
        return DispatchDecision::skip(event.clone(), DecisionReason::NoToken);
    }

    DispatchDecision::send(event.clone())
}

/// Decide against the registry's current state
pub fn decide(
    event: &GeofenceEvent,
    registry: &RegionRegistry,
    token_present: bool,
) -> DispatchDecision {
    let region = registry.lookup(&event.region_identifier);
    decide_for(event, region.as_deref(), token_present)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Action, EventKind};
    use chrono::Utc;

    fn registry() -> RegionRegistry {
        RegionRegistry::from_regions(vec![
            Region::new("A", 15.5491, -88.0006, 100.0).with_notify(true, false),
            Region::new("both", 15.5474, -88.0003, 100.0).with_notify(true, true),
            Region::new("silent", 0.0, 0.0, 10.0).with_notify(false, false),
        ])
        .unwrap()
    }

    fn event(region: &str, kind: EventKind) -> GeofenceEvent {
        GeofenceEvent::new(region, kind, Utc::now())
    }

    #[test]
    fn test_enter_with_token_sends() {
        let d = decide(&event("A", EventKind::Enter), &registry(), true);
        assert_eq!(d.action, Action::Send);
        assert_eq!(d.reason, DecisionReason::Subscribed);
    }

    #[test]
    fn test_exit_not_subscribed() {
        let d = decide(&event("A", EventKind::Exit), &registry(), true);
        assert_eq!(d.action, Action::Skip);
        assert_eq!(d.reason, DecisionReason::NotSubscribed);
    }

    #[test]
    fn test_no_token_skips() {
        let reg = registry();
        for (region, kind) in [("A", EventKind::Enter), ("both", EventKind::Exit)] {
            let d = decide(&event(region, kind), &reg, false);
            assert_eq!(d.reason, DecisionReason::NoToken);
        }
    }

    #[test]
    fn test_not_subscribed_wins_over_no_token() {
        let d = decide(&event("silent", EventKind::Enter), &registry(), false);
        assert_eq!(d.reason, DecisionReason::NotSubscribed);
    }

    #[test]
    fn test_unknown_region() {
        let d = decide(&event("Z", EventKind::Enter), &registry(), true);
        assert_eq!(d.action, Action::Skip);
        assert_eq!(d.reason, DecisionReason::UnknownRegion);
    }

    #[test]
    fn test_deterministic() {
        let reg = registry();
        let e = event("both", EventKind::Exit);
        for token in [true, false] {
            let first = decide(&e, &reg, token);
            for _ in 0..10 {
                assert_eq!(decide(&e, &reg, token), first);
            }
        }
    }

    #[test]
    fn test_decision_carries_event() {
        let e = event("A", EventKind::Enter);
        let d = decide(&e, &registry(), true);
        assert_eq!(d.event, e);
    }
}
