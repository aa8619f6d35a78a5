//! First-expired-first-out candidate selection.
//!
//! Everything here is pure: it ranks a snapshot of units and never touches the
//! ledger.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use feedflow_core::{AggregateRoot, LocationId, UnitId};
use feedflow_inventory::{Location, StockUnit};

use crate::order::DispatchOrder;

/// An available unit as seen by the allocator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub unit_id: UnitId,
    pub display_id: String,
    pub product_name: String,
    pub weight: Decimal,
    pub expiry_date: Option<NaiveDate>,
    pub received_at: Option<DateTime<Utc>>,
    pub location_id: LocationId,
}

impl Candidate {
    /// `None` for units that are not physically anywhere.
    pub fn from_unit(unit: &StockUnit) -> Option<Self> {
        let location_id = unit.current_location_id()?.clone();
        Some(Self {
            unit_id: unit.id().clone(),
            display_id: unit.display_id().to_string(),
            product_name: unit.product_name().to_string(),
            weight: unit.current_weight(),
            expiry_date: unit.expiry_date(),
            received_at: unit.received_at(),
            location_id,
        })
    }
}

/// Whether a unit may be handed to a dispatch order at all: it must be stock
/// the dispatch location takes, usable, and not already loaded.
pub fn is_dispatchable(
    unit: &StockUnit,
    today: NaiveDate,
    epsilon: Decimal,
    dispatch_location: &Location,
) -> bool {
    match unit.current_location_id() {
        None => false,
        Some(location) => {
            location != &dispatch_location.id
                && dispatch_location.accepts(unit.kind())
                && !unit.is_blocked()
                && !unit.is_expired(today)
                && unit.current_weight() >= epsilon
        }
    }
}

/// Earliest expiry first (undated last), then earliest arrival, then unit id.
pub fn fefo_cmp(a: &Candidate, b: &Candidate) -> Ordering {
    let by_expiry = match (a.expiry_date, b.expiry_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };

    by_expiry
        .then_with(|| a.received_at.cmp(&b.received_at))
        .then_with(|| a.unit_id.cmp(&b.unit_id))
}

/// Recommendation for one unfulfilled dispatch item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub item_index: usize,
    pub product_name: String,
    pub remaining_kg: Decimal,
    /// `None` when no eligible stock is left for this product.
    pub candidate: Option<Candidate>,
}

/// Pick one candidate per unfulfilled item of `order`.
///
/// A unit already on the order, or picked for an earlier item in this pass,
/// is never suggested again.
pub fn suggest_for_order(order: &DispatchOrder, mut candidates: Vec<Candidate>) -> Vec<Suggestion> {
    candidates.sort_by(fefo_cmp);

    let mut claimed: HashSet<UnitId> = order
        .items()
        .iter()
        .flat_map(|i| i.fulfilled_pallets.iter().map(|p| p.unit_id.clone()))
        .collect();

    order
        .items()
        .iter()
        .enumerate()
        .filter(|(_, item)| !item.is_fulfilled())
        .map(|(item_index, item)| {
            let candidate = candidates
                .iter()
                .find(|c| c.product_name == item.product_name && !claimed.contains(&c.unit_id))
                .cloned();
            if let Some(c) = &candidate {
                claimed.insert(c.unit_id.clone());
            }
            Suggestion {
                item_index,
                product_name: item.product_name.clone(),
                remaining_kg: item.remaining_kg(),
                candidate,
            }
        })
        .collect()
}
