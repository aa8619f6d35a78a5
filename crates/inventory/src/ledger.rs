//! Stock ledger: the authoritative view of units, locations and occupancy.

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::info;

use feedflow_core::{
    Actor, Aggregate, AggregateRoot, DomainError, DomainResult, ExpectedVersion, LocationId,
    UnitId,
};

use crate::location::{Location, LocationRegistry, StationBinding};
use crate::store::{SiteSource, StockStore};
use crate::unit::{Receive, StockUnit, StockUnitCommand};
use crate::validator::SiteView;

/// Locations plus the unit store behind them.
///
/// Occupancy checks read the store and only hold until the unit lands, so
/// every placement (receive, move, consume with a move) runs under the
/// ledger's placement lock.
pub struct Ledger<S> {
    site: RwLock<LocationRegistry>,
    store: S,
    placement: Mutex<()>,
}

impl<S: StockStore> Ledger<S> {
    pub fn new(registry: LocationRegistry, store: S) -> Self {
        Self {
            site: RwLock::new(registry),
            store,
            placement: Mutex::new(()),
        }
    }

    /// Build the ledger from a site configuration source.
    pub fn from_source(source: &impl SiteSource, store: S) -> DomainResult<Self> {
        let mut registry = LocationRegistry::with_locations(source.load_locations()?);
        for binding in source.load_station_bindings()? {
            registry.bind_station(binding)?;
        }
        Ok(Self::new(registry, store))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Serializes capacity checks with the commit that depends on them.
    pub fn placement(&self) -> MutexGuard<'_, ()> {
        self.placement.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry(&self) -> RwLockReadGuard<'_, LocationRegistry> {
        self.site.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, LocationRegistry> {
        self.site.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn location(&self, id: &LocationId) -> Option<Location> {
        self.registry().resolve(id).cloned()
    }

    pub fn locations(&self) -> Vec<Location> {
        self.registry().locations().cloned().collect()
    }

    pub fn station_bindings(&self) -> Vec<StationBinding> {
        self.registry().station_bindings().cloned().collect()
    }

    pub fn upsert_location(&self, location: Location) -> DomainResult<()> {
        self.registry_mut().upsert(location)
    }

    /// Remove a location. Refused while any unit still sits there.
    pub fn remove_location(&self, id: &LocationId) -> DomainResult<Location> {
        let mut registry = self.registry_mut();
        registry.require(id)?;

        let occupancy = self.store.count_at(id)?;
        if occupancy > 0 {
            return Err(DomainError::state_conflict(format!(
                "location {id} still holds {occupancy} unit(s)"
            )));
        }

        let removed = registry.remove(id)?;
        info!(location = %id, "location removed");
        Ok(removed)
    }

    pub fn bind_station(&self, binding: StationBinding) -> DomainResult<()> {
        let station = binding.station_id.clone();
        self.registry_mut().bind_station(binding)?;
        info!(station = %station, "station binding updated");
        Ok(())
    }

    pub fn unit(&self, id: &UnitId) -> DomainResult<StockUnit> {
        self.store
            .load_unit(id)?
            .ok_or_else(|| DomainError::not_found(format!("unit {id}")))
    }

    /// Resolve a scanned code: unit id first, then short display id.
    pub fn find_unit(&self, code: &str) -> DomainResult<StockUnit> {
        if let Ok(id) = UnitId::parse(code) {
            if let Some(unit) = self.store.load_unit(&id)? {
                return Ok(unit);
            }
        }

        self.store
            .list_units()?
            .into_iter()
            .find(|u| u.matches_code(code))
            .ok_or_else(|| DomainError::not_found(format!("unit {}", code.trim())))
    }

    pub fn units(&self) -> DomainResult<Vec<StockUnit>> {
        Ok(self.store.list_units()?)
    }

    /// Units physically at `location` (archived units are never included).
    pub fn units_at(&self, location: &LocationId) -> DomainResult<Vec<StockUnit>> {
        Ok(self
            .store
            .list_units()?
            .into_iter()
            .filter(|u| u.current_location_id() == Some(location))
            .collect())
    }

    pub fn occupancy_of(&self, location: &LocationId) -> DomainResult<usize> {
        Ok(self.store.count_at(location)?)
    }

    /// Receive a freshly minted unit into `location`.
    pub fn register_unit(
        &self,
        mut unit: StockUnit,
        location: &LocationId,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> DomainResult<StockUnit> {
        let _placement = self.placement();
        {
            let registry = self.registry();
            let target = registry.require(location)?;

            if target.is_archive() {
                return Err(DomainError::denied(
                    "archive_restriction",
                    "units cannot be received into the archive",
                ));
            }
            if !target.accepts(unit.kind()) {
                return Err(DomainError::denied(
                    "type_segregation",
                    format!("{} unit cannot be received into {} ({})", unit.kind(), target.id, target.role),
                ));
            }
            if target.is_locked {
                return Err(DomainError::denied(
                    "capacity",
                    format!("location {} is locked", target.id),
                ));
            }
            if !target.has_room_for_one(self.store.count_at(location)?) {
                return Err(DomainError::denied(
                    "capacity",
                    format!("location {} is full", target.id),
                ));
            }
        }

        if self.store.load_unit(unit.id())?.is_some() {
            return Err(DomainError::state_conflict(format!(
                "unit {} is already registered",
                unit.id()
            )));
        }

        unit.execute(&StockUnitCommand::Receive(Receive {
            location_id: location.clone(),
            moved_by: actor.name.clone(),
            at,
        }))?;
        self.store.save_unit(&unit, ExpectedVersion::Exact(0))?;

        info!(unit = %unit.id(), location = %location, weight = %unit.current_weight(), "unit received");
        Ok(unit)
    }

    /// Persist a mutated unit, requiring the stored copy to still be at `expected`.
    pub fn commit(&self, unit: &StockUnit, expected: u64) -> DomainResult<()> {
        self.store
            .save_unit(unit, ExpectedVersion::Exact(expected))
            .map_err(DomainError::from)
    }
}

impl<S: StockStore> SiteView for Ledger<S> {
    fn location(&self, id: &LocationId) -> Option<Location> {
        Ledger::location(self, id)
    }

    fn occupancy(&self, id: &LocationId) -> DomainResult<usize> {
        self.occupancy_of(id)
    }

    fn station_binding(&self, station_id: &LocationId) -> Option<StationBinding> {
        self.registry().station_binding(station_id).cloned()
    }
}
