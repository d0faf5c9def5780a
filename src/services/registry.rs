//! Region registry - the set of monitored geofences
//!
//! Read-mostly: every event does one O(1) lookup, writes only happen at
//! startup or through the admin API. Backed by a reader/writer lock so
//! lookups never wait on each other.

use crate::domain::types::Region;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("region '{0}' is already registered")]
    DuplicateIdentifier(String),
    #[error("region '{0}' not found")]
    NotFound(String),
    #[error("region '{identifier}' is invalid: {reason}")]
    InvalidRegion { identifier: String, reason: &'static str },
}

/// Check geometry before a region is accepted
fn validate(region: &Region) -> Result<(), RegistryError> {
    let invalid = |reason| {
        Err(RegistryError::InvalidRegion { identifier: region.identifier.clone(), reason })
    };

    if region.identifier.trim().is_empty() {
        return invalid("identifier is empty");
    }
    // Events are matched on the trimmed identifier
    if region.identifier.trim() != region.identifier {
        return invalid("identifier has leading or trailing whitespace");
    }
    if !region.radius_meters.is_finite() || region.radius_meters <= 0.0 {
        return invalid("radius must be a positive number of meters");
    }
    if !(-90.0..=90.0).contains(&region.latitude) {
        return invalid("latitude out of range");
    }
    if !(-180.0..=180.0).contains(&region.longitude) {
        return invalid("longitude out of range");
    }
    Ok(())
}

#[derive(Default)]
pub struct RegionRegistry {
    regions: RwLock<FxHashMap<String, Arc<Region>>>,
}

impl RegionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from startup configuration, failing on the first
    /// invalid or duplicated region
    pub fn from_regions<I>(regions: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = Region>,
    {
        let registry = Self::new();
        for region in regions {
            registry.register(region)?;
        }
        Ok(registry)
    }

    pub fn register(&self, region: Region) -> Result<(), RegistryError> {
        validate(&region)?;

        let mut regions = self.regions.write();
        if regions.contains_key(&region.identifier) {
            return Err(RegistryError::DuplicateIdentifier(region.identifier));
        }

        info!(
            region = %region.identifier,
            latitude = %region.latitude,
            longitude = %region.longitude,
            radius_m = %region.radius_meters,
            on_enter = %region.notify_on_enter,
            on_exit = %region.notify_on_exit,
            "region_registered"
        );
        regions.insert(region.identifier.clone(), Arc::new(region));
        Ok(())
    }

    /// Remove a region. Returns whether anything was removed.
    pub fn deregister(&self, identifier: &str) -> bool {
        let removed = self.regions.write().remove(identifier).is_some();
        if removed {
            info!(region = %identifier, "region_deregistered");
        }
        removed
    }

    pub fn get(&self, identifier: &str) -> Result<Arc<Region>, RegistryError> {
        self.lookup(identifier).ok_or_else(|| RegistryError::NotFound(identifier.to_string()))
    }

    /// Lookup without the error wrapper, for the hot path
    #[inline]
    pub fn lookup(&self, identifier: &str) -> Option<Arc<Region>> {
        self.regions.read().get(identifier).cloned()
    }

    #[inline]
    pub fn contains(&self, identifier: &str) -> bool {
        self.regions.read().contains_key(identifier)
    }

    pub fn len(&self) -> usize {
        self.regions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All regions, sorted by identifier
    pub fn snapshot(&self) -> Vec<Arc<Region>> {
        let mut all: Vec<Arc<Region>> = self.regions.read().values().cloned().collect();
        all.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        all
    }
}
