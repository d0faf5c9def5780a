//! Domain models - core geofence and notification types
//!
//! This module contains the canonical data types used throughout the system:
//! - `Region` - a monitored circular geofence
//! - `RawGeofenceEvent` / `GeofenceEvent` - inbound and canonical events
//! - `DispatchDecision` - per-event fire/skip outcome
//! - `PushToken` - current device destination
//! - `PushMessage` - push-relay request body

pub mod notification;
pub mod types;

pub use notification::{MessageTemplate, PushMessage};
pub use types::{
    Action, DecisionReason, DeliveryOutcome, DeliveryReport, DispatchDecision, DropReason,
    EventKind, GeofenceEvent, PushToken, RawGeofenceEvent, Region,
};
