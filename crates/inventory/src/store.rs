//! Persistence boundary for stock units and site configuration.
//!
//! The engine never assumes a storage technology. Hosts implement [`StockStore`]
//! and [`SiteSource`]; the in-memory versions here back tests and the CLI.

use std::collections::BTreeMap;
use std::sync::RwLock;

use thiserror::Error;

use feedflow_core::{AggregateRoot, DomainError, ExpectedVersion, LocationId, UnitId};

use crate::location::{Location, StationBinding};
use crate::unit::StockUnit;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl From<StoreError> for DomainError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Concurrency(msg) => DomainError::concurrency(msg),
            StoreError::Backend(msg) => DomainError::invariant(format!("storage: {msg}")),
        }
    }
}

/// Versioned storage of stock units.
///
/// `save_unit` is a compare-and-swap: the stored version must match `expected`
/// (an absent unit counts as version 0), otherwise nothing is written.
pub trait StockStore: Send + Sync {
    fn load_unit(&self, id: &UnitId) -> Result<Option<StockUnit>, StoreError>;

    fn save_unit(&self, unit: &StockUnit, expected: ExpectedVersion) -> Result<(), StoreError>;

    fn list_units(&self) -> Result<Vec<StockUnit>, StoreError>;

    /// Number of units currently at `location`.
    fn count_at(&self, location: &LocationId) -> Result<usize, StoreError> {
        Ok(self
            .list_units()?
            .iter()
            .filter(|u| u.current_location_id() == Some(location))
            .count())
    }
}

/// Where the site's location list and station bindings come from.
pub trait SiteSource {
    fn load_locations(&self) -> Result<Vec<Location>, StoreError>;

    fn load_station_bindings(&self) -> Result<Vec<StationBinding>, StoreError>;
}

/// In-memory stock store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryStockStore {
    units: RwLock<BTreeMap<UnitId, StockUnit>>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StockStore for InMemoryStockStore {
    fn load_unit(&self, id: &UnitId) -> Result<Option<StockUnit>, StoreError> {
        let units = self
            .units
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(units.get(id).cloned())
    }

    fn save_unit(&self, unit: &StockUnit, expected: ExpectedVersion) -> Result<(), StoreError> {
        let mut units = self
            .units
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;

        let current = units.get(unit.id()).map(|u| u.version()).unwrap_or(0);
        if !expected.matches(current) {
            return Err(StoreError::Concurrency(format!(
                "unit {}: expected {expected:?}, found {current}",
                unit.id()
            )));
        }

        units.insert(unit.id().clone(), unit.clone());
        Ok(())
    }

    fn list_units(&self) -> Result<Vec<StockUnit>, StoreError> {
        let units = self
            .units
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(units.values().cloned().collect())
    }

    fn count_at(&self, location: &LocationId) -> Result<usize, StoreError> {
        let units = self
            .units
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(units
            .values()
            .filter(|u| u.current_location_id() == Some(location))
            .count())
    }
}

/// Fixed site configuration held in memory.
#[derive(Debug, Default, Clone)]
pub struct StaticSite {
    pub locations: Vec<Location>,
    pub bindings: Vec<StationBinding>,
}

impl StaticSite {
    pub fn new(locations: Vec<Location>, bindings: Vec<StationBinding>) -> Self {
        Self { locations, bindings }
    }
}

impl SiteSource for StaticSite {
    fn load_locations(&self) -> Result<Vec<Location>, StoreError> {
        Ok(self.locations.clone())
    }

    fn load_station_bindings(&self) -> Result<Vec<StationBinding>, StoreError> {
        Ok(self.bindings.clone())
    }
}
