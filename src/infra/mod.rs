//! Infrastructure - configuration, metrics, and observability
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free metrics collection
//! - `observer` - Observability sink trait and its tracing/metrics implementation

pub mod config;
pub mod metrics;
pub mod observer;

// Re-export commonly used types
pub use config::Config;
pub use metrics::Metrics;
pub use observer::{DispatchObserver, NoopObserver, TracingObserver};
