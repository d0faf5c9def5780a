//! IO modules - external system interfaces
//!
//! - `relay` - push-relay HTTP client (outbound)
//! - `http_api` - HTTP control API: event ingest, token, regions, health
//! - `mqtt` - MQTT subscriber feeding raw events to the dispatcher
//! - `prometheus` - Prometheus text formatting for `/metrics`

pub mod http_api;
pub mod mqtt;
pub mod prometheus;
pub mod relay;

// Re-export commonly used types
pub use http_api::{start_http_api, ApiState};
pub use mqtt::start_mqtt_subscriber;
pub use relay::{HttpPushRelay, PushRelay, RelayError, RelayResponse};
