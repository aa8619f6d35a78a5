//! Site locations, their roles, and feed-station material bindings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use feedflow_core::{DomainError, DomainResult, LocationId};

use crate::unit::{PackageForm, StockKind};

/// Physical shape of a location.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocationKind {
    Warehouse,
    Buffer,
    Zone,
    Rack,
    FeedStation,
    Virtual,
}

/// What a location is used for on site. Determines which stock class it holds
/// and which origin-specific movement rules apply.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationRole {
    RawWarehouse,
    RawBuffer,
    ProductionBuffer,
    ProductionFloor,
    Rack,
    FeedStation,
    MixingZone,
    PsdZone,
    ConditioningZone,
    FinishedGoodsWarehouse,
    Receiving,
    DispatchZone,
    Loading,
    PackagingStore,
    Archive,
}

impl LocationRole {
    /// Stock class this role stores. `None` for the archive, which holds nothing
    /// physically reachable.
    pub fn stock_class(&self) -> Option<StockKind> {
        match self {
            LocationRole::RawWarehouse
            | LocationRole::RawBuffer
            | LocationRole::ProductionBuffer
            | LocationRole::ProductionFloor
            | LocationRole::Rack
            | LocationRole::FeedStation
            | LocationRole::MixingZone
            | LocationRole::PsdZone
            | LocationRole::ConditioningZone => Some(StockKind::RawMaterial),
            LocationRole::FinishedGoodsWarehouse
            | LocationRole::Receiving
            | LocationRole::DispatchZone
            | LocationRole::Loading => Some(StockKind::FinishedGood),
            LocationRole::PackagingStore => Some(StockKind::Packaging),
            LocationRole::Archive => None,
        }
    }

    /// Processing zones a blocked or expired unit may not enter.
    pub fn is_processing(&self) -> bool {
        matches!(
            self,
            LocationRole::FeedStation | LocationRole::MixingZone | LocationRole::PsdZone
        )
    }

    /// Kind assumed when a location is declared without an explicit one.
    pub fn default_kind(&self) -> LocationKind {
        match self {
            LocationRole::RawWarehouse
            | LocationRole::FinishedGoodsWarehouse
            | LocationRole::PackagingStore => LocationKind::Warehouse,
            LocationRole::RawBuffer | LocationRole::ProductionBuffer => LocationKind::Buffer,
            LocationRole::Rack => LocationKind::Rack,
            LocationRole::FeedStation => LocationKind::FeedStation,
            LocationRole::Archive => LocationKind::Virtual,
            LocationRole::ProductionFloor
            | LocationRole::MixingZone
            | LocationRole::PsdZone
            | LocationRole::ConditioningZone
            | LocationRole::Receiving
            | LocationRole::DispatchZone
            | LocationRole::Loading => LocationKind::Zone,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LocationRole::RawWarehouse => "raw_warehouse",
            LocationRole::RawBuffer => "raw_buffer",
            LocationRole::ProductionBuffer => "production_buffer",
            LocationRole::ProductionFloor => "production_floor",
            LocationRole::Rack => "rack",
            LocationRole::FeedStation => "feed_station",
            LocationRole::MixingZone => "mixing_zone",
            LocationRole::PsdZone => "psd_zone",
            LocationRole::ConditioningZone => "conditioning_zone",
            LocationRole::FinishedGoodsWarehouse => "finished_goods_warehouse",
            LocationRole::Receiving => "receiving",
            LocationRole::DispatchZone => "dispatch_zone",
            LocationRole::Loading => "loading",
            LocationRole::PackagingStore => "packaging_store",
            LocationRole::Archive => "archive",
        }
    }
}

impl core::fmt::Display for LocationRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A place that can hold stock units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub display_name: String,
    pub kind: LocationKind,
    pub role: LocationRole,
    /// Maximum number of units held at once; `0` means unbounded. Enforced
    /// under the ledger's placement lock, so concurrent moves cannot overfill.
    #[serde(default)]
    pub capacity_units: u32,
    #[serde(default)]
    pub is_locked: bool,
}

impl Location {
    pub fn new(id: impl Into<LocationId>, display_name: impl Into<String>, role: LocationRole) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            kind: role.default_kind(),
            role,
            capacity_units: 0,
            is_locked: false,
        }
    }

    pub fn with_kind(mut self, kind: LocationKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_capacity(mut self, capacity_units: u32) -> Self {
        self.capacity_units = capacity_units;
        self
    }

    pub fn locked(mut self) -> Self {
        self.is_locked = true;
        self
    }

    pub fn accepts(&self, kind: StockKind) -> bool {
        self.role.stock_class() == Some(kind)
    }

    pub fn is_feed_station(&self) -> bool {
        self.role == LocationRole::FeedStation || self.kind == LocationKind::FeedStation
    }

    pub fn is_archive(&self) -> bool {
        self.role == LocationRole::Archive
    }

    /// Whether one more unit fits, given the current occupancy.
    pub fn has_room_for_one(&self, occupancy: usize) -> bool {
        self.capacity_units == 0 || occupancy < self.capacity_units as usize
    }
}

/// Feed-station configuration: the one material and package form it accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationBinding {
    pub station_id: LocationId,
    pub product_name: String,
    pub package_form: PackageForm,
}

impl StationBinding {
    pub fn new(
        station_id: impl Into<LocationId>,
        product_name: impl Into<String>,
        package_form: PackageForm,
    ) -> Self {
        Self {
            station_id: station_id.into(),
            product_name: product_name.into(),
            package_form,
        }
    }

    pub fn accepts(&self, product_name: &str, package_form: PackageForm) -> bool {
        self.product_name == product_name && self.package_form == package_form
    }
}

/// Read-mostly registry of locations and station bindings.
#[derive(Debug, Default, Clone)]
pub struct LocationRegistry {
    locations: BTreeMap<LocationId, Location>,
    bindings: BTreeMap<LocationId, StationBinding>,
}

impl LocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_locations(locations: impl IntoIterator<Item = Location>) -> Self {
        let mut registry = Self::new();
        for location in locations {
            registry.locations.insert(location.id.clone(), location);
        }
        registry
    }

    pub fn resolve(&self, id: &LocationId) -> Option<&Location> {
        self.locations.get(id)
    }

    pub fn require(&self, id: &LocationId) -> DomainResult<&Location> {
        self.resolve(id)
            .ok_or_else(|| DomainError::not_found(format!("location {id}")))
    }

    pub fn locations(&self) -> impl Iterator<Item = &Location> {
        self.locations.values()
    }

    pub fn station_binding(&self, station_id: &LocationId) -> Option<&StationBinding> {
        self.bindings.get(station_id)
    }

    pub fn station_bindings(&self) -> impl Iterator<Item = &StationBinding> {
        self.bindings.values()
    }

    /// Insert or replace a location definition.
    pub fn upsert(&mut self, location: Location) -> DomainResult<()> {
        if location.display_name.trim().is_empty() {
            return Err(DomainError::validation(format!(
                "location {} needs a display name",
                location.id
            )));
        }
        self.locations.insert(location.id.clone(), location);
        Ok(())
    }

    /// Remove a location and any binding attached to it. Occupancy is the
    /// caller's concern; see `Ledger::remove_location`.
    pub fn remove(&mut self, id: &LocationId) -> DomainResult<Location> {
        let removed = self
            .locations
            .remove(id)
            .ok_or_else(|| DomainError::not_found(format!("location {id}")))?;
        self.bindings.remove(id);
        Ok(removed)
    }

    /// Bind a feed station to one material and package form, replacing any
    /// previous binding.
    pub fn bind_station(&mut self, binding: StationBinding) -> DomainResult<()> {
        let station = self.require(&binding.station_id)?;
        if !station.is_feed_station() {
            return Err(DomainError::validation(format!(
                "location {} is not a feed station",
                binding.station_id
            )));
        }
        if binding.product_name.trim().is_empty() {
            return Err(DomainError::validation("station binding needs a product name"));
        }
        self.bindings.insert(binding.station_id.clone(), binding);
        Ok(())
    }

    pub fn unbind_station(&mut self, station_id: &LocationId) -> Option<StationBinding> {
        self.bindings.remove(station_id)
    }
}
