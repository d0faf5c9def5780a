//! Shared types for the geofence dispatcher

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// A monitored circular region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub identifier: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_meters: f64,
    #[serde(default = "default_notify_on_enter")]
    pub notify_on_enter: bool,
    #[serde(default)]
    pub notify_on_exit: bool,
}

fn default_notify_on_enter() -> bool {
    true
}

impl Region {
    pub fn new(identifier: &str, latitude: f64, longitude: f64, radius_meters: f64) -> Self {
        Self {
            identifier: identifier.to_string(),
            latitude,
            longitude,
            radius_meters,
            notify_on_enter: true,
            notify_on_exit: false,
        }
    }

    pub fn with_notify(mut self, on_enter: bool, on_exit: bool) -> Self {
        self.notify_on_enter = on_enter;
        self.notify_on_exit = on_exit;
        self
    }

    /// Whether this region wants a notification for the given transition
    #[inline]
    pub fn notifies(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::Enter => self.notify_on_enter,
            EventKind::Exit => self.notify_on_exit,
        }
    }
}

/// Region boundary transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Enter,
    Exit,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Enter => "enter",
            EventKind::Exit => "exit",
        }
    }

    /// Parse a platform event kind. Accepts the names case-insensitively and
    /// the numeric codes the location layer reports (1 = enter, 2 = exit).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enter" | "1" => Some(EventKind::Enter),
            "exit" | "2" => Some(EventKind::Exit),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw event as delivered by the location layer. Every field may be absent.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawGeofenceEvent {
    #[serde(default)]
    pub region_identifier: Option<String>,
    /// Event kind, either a name ("Enter") or a numeric code (1)
    #[serde(default, deserialize_with = "deserialize_kind")]
    pub kind: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl RawGeofenceEvent {
    pub fn new(region_identifier: &str, kind: &str) -> Self {
        Self {
            region_identifier: Some(region_identifier.to_string()),
            kind: Some(kind.to_string()),
            error: None,
        }
    }

    pub fn failed(error: &str) -> Self {
        Self { region_identifier: None, kind: None, error: Some(error.to_string()) }
    }
}

fn deserialize_kind<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct KindVisitor;

    impl<'de> Visitor<'de> for KindVisitor {
        type Value = Option<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or integer event kind")
        }

        fn visit_str<E>(self, value: &str) -> Result<Option<String>, E>
        where
            E: de::Error,
        {
            Ok(Some(value.to_string()))
        }

        fn visit_string<E>(self, value: String) -> Result<Option<String>, E>
        where
            E: de::Error,
        {
            Ok(Some(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Option<String>, E>
        where
            E: de::Error,
        {
            Ok(Some(value.to_string()))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Option<String>, E>
        where
            E: de::Error,
        {
            Ok(Some(value.to_string()))
        }

        fn visit_none<E>(self) -> Result<Option<String>, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Option<String>, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(KindVisitor)
}

/// Canonical event produced by the normalizer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeofenceEvent {
    pub region_identifier: String,
    pub kind: EventKind,
    pub observed_at: DateTime<Utc>,
}

impl GeofenceEvent {
    pub fn new(region_identifier: &str, kind: EventKind, observed_at: DateTime<Utc>) -> Self {
        Self { region_identifier: region_identifier.to_string(), kind, observed_at }
    }
}

/// Why a raw event never became a `GeofenceEvent`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The location layer reported an error instead of an event
    UpstreamError(String),
    MissingRegion,
    UnknownKind(Option<String>),
    UnknownRegion,
    /// Same (region, kind) already accepted inside the debounce window
    Duplicate,
    /// Payload could not be decoded at all
    Malformed(String),
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::UpstreamError(_) => "upstream_error",
            DropReason::MissingRegion => "missing_region",
            DropReason::UnknownKind(_) => "unknown_kind",
            DropReason::UnknownRegion => "unknown_region",
            DropReason::Duplicate => "duplicate",
            DropReason::Malformed(_) => "malformed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Send,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Subscribed,
    UnknownRegion,
    NotSubscribed,
    NoToken,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::Subscribed => "subscribed",
            DecisionReason::UnknownRegion => "unknown_region",
            DecisionReason::NotSubscribed => "not_subscribed",
            DecisionReason::NoToken => "no_token",
        }
    }
}

/// Per-event fire/skip decision
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchDecision {
    pub event: GeofenceEvent,
    pub action: Action,
    pub reason: DecisionReason,
}

impl DispatchDecision {
    pub fn send(event: GeofenceEvent) -> Self {
        Self { event, action: Action::Send, reason: DecisionReason::Subscribed }
    }

    pub fn skip(event: GeofenceEvent, reason: DecisionReason) -> Self {
        Self { event, action: Action::Skip, reason }
    }

    #[inline]
    pub fn is_send(&self) -> bool {
        self.action == Action::Send
    }
}

/// Current device push token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushToken {
    pub value: String,
    pub registered_at: DateTime<Utc>,
}

impl PushToken {
    pub fn new(value: &str) -> Self {
        Self { value: value.to_string(), registered_at: Utc::now() }
    }
}

/// Classification of a single relay attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    TransientFailure,
    PermanentFailure,
}

/// One relay call inside the retry loop
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
    /// HTTP status when the relay answered
    pub status: Option<u16>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// Relay answered 4xx; the token is probably stale
    Rejected(u16),
    /// Relay answered with a status that is neither 2xx, 4xx nor 5xx
    UnexpectedStatus(u16),
    /// Message could not be encoded; retrying cannot help
    InvalidMessage,
    RetriesExhausted,
}

impl FailureCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCause::Rejected(_) => "rejected",
            FailureCause::UnexpectedStatus(_) => "unexpected_status",
            FailureCause::InvalidMessage => "invalid_message",
            FailureCause::RetriesExhausted => "retries_exhausted",
        }
    }
}

/// Final outcome of a delivery task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Success,
    PermanentFailure(FailureCause),
    /// No token at attempt time, or the token was cleared during backoff
    Abandoned,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Success => "success",
            DeliveryOutcome::PermanentFailure(_) => "permanent_failure",
            DeliveryOutcome::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub dispatch_id: Uuid,
    pub region_identifier: String,
    pub kind: EventKind,
    pub outcome: DeliveryOutcome,
    pub attempts: Vec<DeliveryAttempt>,
    pub elapsed_ms: u64,
}

impl DeliveryReport {
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_parse() {
        assert_eq!(EventKind::parse("Enter"), Some(EventKind::Enter));
        assert_eq!(EventKind::parse("EXIT"), Some(EventKind::Exit));
        assert_eq!(EventKind::parse("1"), Some(EventKind::Enter));
        assert_eq!(EventKind::parse("2"), Some(EventKind::Exit));
        assert_eq!(EventKind::parse("dwell"), None);
    }

    #[test]
    fn test_raw_event_numeric_kind() {
        let raw: RawGeofenceEvent =
            serde_json::from_str(r#"{"regionIdentifier":"A","kind":1}"#).unwrap();
        assert_eq!(raw.region_identifier.as_deref(), Some("A"));
        assert_eq!(raw.kind.as_deref(), Some("1"));
        assert!(raw.error.is_none());
    }

    #[test]
    fn test_raw_event_missing_fields() {
        let raw: RawGeofenceEvent = serde_json::from_str(r#"{"error":"denied"}"#).unwrap();
        assert!(raw.region_identifier.is_none());
        assert!(raw.kind.is_none());
        assert_eq!(raw.error.as_deref(), Some("denied"));
    }

    #[test]
    fn test_region_notifies() {
        let region = Region::new("A", 15.5491, -88.0006, 100.0);
        assert!(region.notifies(EventKind::Enter));
        assert!(!region.notifies(EventKind::Exit));
    }
}
