//! Services - business logic and state management
//!
//! - `registry` - monitored regions and their notification flags
//! - `normalizer` - raw event validation and debounce
//! - `policy` - pure fire/skip decision
//! - `delivery` - relay client with retry and backoff
//! - `token_store` - current device push token
//! - `dispatcher` - ingest entry point wiring the above

pub mod delivery;
pub mod dispatcher;
pub mod normalizer;
pub mod policy;
pub mod registry;
pub mod token_store;

// Re-export commonly used types
pub use delivery::{DeliveryClient, RetryPolicy};
pub use dispatcher::{Dispatcher, IngestOutcome};
pub use normalizer::EventNormalizer;
pub use registry::{RegionRegistry, RegistryError};
pub use token_store::TokenStore;
