//! Adjustment orders: corrective, off-recipe additions to a running batch.
//!
//! Lifecycle is strictly forward: `planned -> material_picking -> processing
//! -> completed`. A preparation container must be assigned before picking ends.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use feedflow_core::{
    AdjustmentOrderId, Aggregate, AggregateRoot, BatchId, DomainError, Event, LocationId, RunId,
    UnitId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentStatus {
    Planned,
    MaterialPicking,
    Processing,
    Completed,
}

impl AdjustmentStatus {
    pub fn next(self) -> Option<AdjustmentStatus> {
        match self {
            AdjustmentStatus::Planned => Some(AdjustmentStatus::MaterialPicking),
            AdjustmentStatus::MaterialPicking => Some(AdjustmentStatus::Processing),
            AdjustmentStatus::Processing => Some(AdjustmentStatus::Completed),
            AdjustmentStatus::Completed => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentStatus::Planned => "planned",
            AdjustmentStatus::MaterialPicking => "material_picking",
            AdjustmentStatus::Processing => "processing",
            AdjustmentStatus::Completed => "completed",
        }
    }
}

impl core::fmt::Display for AdjustmentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentLine {
    pub product_name: String,
    pub requested_weight: Decimal,
    pub picked_weight: Decimal,
}

impl AdjustmentLine {
    pub fn new(product_name: impl Into<String>, requested_weight: Decimal) -> Self {
        Self {
            product_name: product_name.into(),
            requested_weight,
            picked_weight: Decimal::ZERO,
        }
    }
}

/// A unit (and weight) picked for one line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentPick {
    pub line_index: usize,
    pub unit_id: UnitId,
    pub weight: Decimal,
}

/// Aggregate root: AdjustmentOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentOrder {
    id: AdjustmentOrderId,
    run_id: RunId,
    batch_id: BatchId,
    reason: String,
    lines: Vec<AdjustmentLine>,
    picks: Vec<AdjustmentPick>,
    #[serde(default)]
    booked_units: Vec<UnitId>,
    status: AdjustmentStatus,
    preparation_location_id: Option<LocationId>,
    created_by: String,
    created_at: DateTime<Utc>,
    version: u64,
}

impl AdjustmentOrder {
    pub fn plan(
        id: AdjustmentOrderId,
        run_id: RunId,
        batch_id: BatchId,
        reason: impl Into<String>,
        lines: Vec<AdjustmentLine>,
        created_by: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(DomainError::validation("adjustment needs a reason"));
        }
        if lines.is_empty() {
            return Err(DomainError::validation("adjustment needs at least one line"));
        }
        if lines
            .iter()
            .any(|l| l.product_name.trim().is_empty() || l.requested_weight <= Decimal::ZERO)
        {
            return Err(DomainError::validation(
                "adjustment lines need a product and a positive weight",
            ));
        }

        Ok(Self {
            id,
            run_id,
            batch_id,
            reason,
            lines,
            picks: Vec::new(),
            booked_units: Vec::new(),
            status: AdjustmentStatus::Planned,
            preparation_location_id: None,
            created_by: created_by.into(),
            created_at,
            version: 0,
        })
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn batch_id(&self) -> BatchId {
        self.batch_id
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn lines(&self) -> &[AdjustmentLine] {
        &self.lines
    }

    pub fn picks(&self) -> &[AdjustmentPick] {
        &self.picks
    }

    pub fn status(&self) -> AdjustmentStatus {
        self.status
    }

    pub fn preparation_location_id(&self) -> Option<&LocationId> {
        self.preparation_location_id.as_ref()
    }

    pub fn created_by(&self) -> &str {
        &self.created_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Total weight picked from `unit_id` across all lines.
    pub fn picked_from(&self, unit_id: &UnitId) -> Decimal {
        self.picks
            .iter()
            .filter(|p| &p.unit_id == unit_id)
            .map(|p| p.weight)
            .sum()
    }

    /// Units whose picks have already been consumed into the batch.
    pub fn booked_units(&self) -> &[UnitId] {
        &self.booked_units
    }

    /// Picked weight per unit not yet booked, merged across lines and in
    /// first-pick order.
    pub fn unbooked_totals(&self) -> Vec<(UnitId, Decimal)> {
        let mut totals: Vec<(UnitId, Decimal)> = Vec::new();
        for pick in &self.picks {
            if self.booked_units.contains(&pick.unit_id) {
                continue;
            }
            match totals.iter_mut().find(|(unit_id, _)| unit_id == &pick.unit_id) {
                Some((_, total)) => *total += pick.weight,
                None => totals.push((pick.unit_id.clone(), pick.weight)),
            }
        }
        totals
    }

    fn require_status(&self, expected: AdjustmentStatus) -> Result<(), DomainError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(DomainError::state_conflict(format!(
                "adjustment {} is {}, expected {}",
                self.id, self.status, expected
            )))
        }
    }
}

impl AggregateRoot for AdjustmentOrder {
    type Id = AdjustmentOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjustmentCommand {
    StartPicking { at: DateTime<Utc> },
    AssignPreparationLocation { location_id: LocationId, at: DateTime<Utc> },
    RecordPick { line_index: usize, unit_id: UnitId, product_name: String, weight: Decimal, at: DateTime<Utc> },
    StartProcessing { at: DateTime<Utc> },
    BookUnit { unit_id: UnitId, at: DateTime<Utc> },
    Complete { at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjustmentEvent {
    PickingStarted { occurred_at: DateTime<Utc> },
    PreparationLocationAssigned { location_id: LocationId, occurred_at: DateTime<Utc> },
    PickRecorded { pick: AdjustmentPick, occurred_at: DateTime<Utc> },
    ProcessingStarted { occurred_at: DateTime<Utc> },
    UnitBooked { unit_id: UnitId, weight: Decimal, occurred_at: DateTime<Utc> },
    AdjustmentCompleted { occurred_at: DateTime<Utc> },
}

impl Event for AdjustmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AdjustmentEvent::PickingStarted { .. } => "production.adjustment.picking_started",
            AdjustmentEvent::PreparationLocationAssigned { .. } => {
                "production.adjustment.preparation_location_assigned"
            }
            AdjustmentEvent::PickRecorded { .. } => "production.adjustment.pick_recorded",
            AdjustmentEvent::ProcessingStarted { .. } => "production.adjustment.processing_started",
            AdjustmentEvent::UnitBooked { .. } => "production.adjustment.unit_booked",
            AdjustmentEvent::AdjustmentCompleted { .. } => "production.adjustment.completed",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AdjustmentEvent::PickingStarted { occurred_at }
            | AdjustmentEvent::PreparationLocationAssigned { occurred_at, .. }
            | AdjustmentEvent::PickRecorded { occurred_at, .. }
            | AdjustmentEvent::ProcessingStarted { occurred_at }
            | AdjustmentEvent::UnitBooked { occurred_at, .. }
            | AdjustmentEvent::AdjustmentCompleted { occurred_at } => *occurred_at,
        }
    }
}

impl Aggregate for AdjustmentOrder {
    type Command = AdjustmentCommand;
    type Event = AdjustmentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AdjustmentEvent::PickingStarted { .. } => self.status = AdjustmentStatus::MaterialPicking,
            AdjustmentEvent::PreparationLocationAssigned { location_id, .. } => {
                self.preparation_location_id = Some(location_id.clone());
            }
            AdjustmentEvent::PickRecorded { pick, .. } => {
                if let Some(line) = self.lines.get_mut(pick.line_index) {
                    line.picked_weight += pick.weight;
                }
                self.picks.push(pick.clone());
            }
            AdjustmentEvent::ProcessingStarted { .. } => self.status = AdjustmentStatus::Processing,
            AdjustmentEvent::UnitBooked { unit_id, .. } => self.booked_units.push(unit_id.clone()),
            AdjustmentEvent::AdjustmentCompleted { .. } => self.status = AdjustmentStatus::Completed,
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AdjustmentCommand::StartPicking { at } => {
                self.require_status(AdjustmentStatus::Planned)?;
                Ok(vec![AdjustmentEvent::PickingStarted { occurred_at: *at }])
            }

            AdjustmentCommand::AssignPreparationLocation { location_id, at } => {
                if !matches!(
                    self.status,
                    AdjustmentStatus::Planned | AdjustmentStatus::MaterialPicking
                ) {
                    return Err(DomainError::state_conflict(format!(
                        "preparation location is fixed once the adjustment is {}",
                        self.status
                    )));
                }
                Ok(vec![AdjustmentEvent::PreparationLocationAssigned {
                    location_id: location_id.clone(),
                    occurred_at: *at,
                }])
            }

            AdjustmentCommand::RecordPick {
                line_index,
                unit_id,
                product_name,
                weight,
                at,
            } => {
                self.require_status(AdjustmentStatus::MaterialPicking)?;
                let line = self.lines.get(*line_index).ok_or_else(|| {
                    DomainError::validation(format!("adjustment has no line #{line_index}"))
                })?;
                if &line.product_name != product_name {
                    return Err(DomainError::denied(
                        "product_mismatch",
                        format!(
                            "line #{line_index} needs {}, unit {unit_id} holds {product_name}",
                            line.product_name
                        ),
                    ));
                }
                if *weight <= Decimal::ZERO {
                    return Err(DomainError::validation("picked weight must be positive"));
                }
                Ok(vec![AdjustmentEvent::PickRecorded {
                    pick: AdjustmentPick {
                        line_index: *line_index,
                        unit_id: unit_id.clone(),
                        weight: *weight,
                    },
                    occurred_at: *at,
                }])
            }

            AdjustmentCommand::StartProcessing { at } => {
                self.require_status(AdjustmentStatus::MaterialPicking)?;
                if self.preparation_location_id.is_none() {
                    return Err(DomainError::denied(
                        "preparation_location",
                        "scan a preparation container before leaving material picking",
                    ));
                }
                if self.picks.is_empty() {
                    return Err(DomainError::denied(
                        "nothing_picked",
                        "pick at least one unit before processing",
                    ));
                }
                Ok(vec![AdjustmentEvent::ProcessingStarted { occurred_at: *at }])
            }

            AdjustmentCommand::BookUnit { unit_id, at } => {
                self.require_status(AdjustmentStatus::Processing)?;
                if self.booked_units.contains(unit_id) {
                    return Err(DomainError::state_conflict(format!(
                        "unit {unit_id} is already booked into adjustment {}",
                        self.id
                    )));
                }
                let weight = self.picked_from(unit_id);
                if weight.is_zero() {
                    return Err(DomainError::validation(format!(
                        "unit {unit_id} was not picked for adjustment {}",
                        self.id
                    )));
                }
                Ok(vec![AdjustmentEvent::UnitBooked {
                    unit_id: unit_id.clone(),
                    weight,
                    occurred_at: *at,
                }])
            }

            AdjustmentCommand::Complete { at } => {
                self.require_status(AdjustmentStatus::Processing)?;
                if let Some((unit_id, _)) = self.unbooked_totals().first() {
                    return Err(DomainError::denied(
                        "picks_unbooked",
                        format!("picks from unit {unit_id} are not booked yet"),
                    ));
                }
                Ok(vec![AdjustmentEvent::AdjustmentCompleted { occurred_at: *at }])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_order() -> AdjustmentOrder {
        AdjustmentOrder::plan(
            AdjustmentOrderId::new(),
            RunId::new(),
            BatchId::new(),
            "moisture correction",
            vec![AdjustmentLine::new("water-binder", dec!(50))],
            "planner",
            Utc::now(),
        )
        .unwrap()
    }

    fn pick(product: &str, weight: Decimal) -> AdjustmentCommand {
        AdjustmentCommand::RecordPick {
            line_index: 0,
            unit_id: UnitId::new("U1"),
            product_name: product.to_string(),
            weight,
            at: Utc::now(),
        }
    }

    #[test]
    fn lifecycle_is_strictly_forward() {
        let mut order = test_order();
        let now = Utc::now();

        assert!(order.handle(&AdjustmentCommand::StartProcessing { at: now }).is_err());
        assert!(order.handle(&AdjustmentCommand::Complete { at: now }).is_err());

        order.execute(&AdjustmentCommand::StartPicking { at: now }).unwrap();
        assert!(order.handle(&AdjustmentCommand::StartPicking { at: now }).is_err());
        assert!(order.handle(&AdjustmentCommand::Complete { at: now }).is_err());

        order.execute(&pick("water-binder", dec!(50))).unwrap();
        order
            .execute(&AdjustmentCommand::AssignPreparationLocation {
                location_id: LocationId::new("BUCKET-7"),
                at: now,
            })
            .unwrap();
        order.execute(&AdjustmentCommand::StartProcessing { at: now }).unwrap();
        order
            .execute(&AdjustmentCommand::BookUnit {
                unit_id: UnitId::new("U1"),
                at: now,
            })
            .unwrap();
        order.execute(&AdjustmentCommand::Complete { at: now }).unwrap();
        assert_eq!(order.status(), AdjustmentStatus::Completed);
        assert_eq!(order.status().next(), None);
        assert!(order.handle(&AdjustmentCommand::StartPicking { at: now }).is_err());
    }

    #[test]
    fn leaving_picking_requires_a_preparation_location() {
        let mut order = test_order();
        order.execute(&AdjustmentCommand::StartPicking { at: Utc::now() }).unwrap();
        order.execute(&pick("water-binder", dec!(20))).unwrap();

        let err = order
            .handle(&AdjustmentCommand::StartProcessing { at: Utc::now() })
            .unwrap_err();
        assert!(matches!(err, DomainError::Denied { ref check, .. } if check == "preparation_location"));
    }

    #[test]
    fn picks_must_match_the_line_product() {
        let mut order = test_order();
        order.execute(&AdjustmentCommand::StartPicking { at: Utc::now() }).unwrap();

        assert!(order.handle(&pick("salt", dec!(5))).is_err());
        order.execute(&pick("water-binder", dec!(30))).unwrap();
        order.execute(&pick("water-binder", dec!(20))).unwrap();
        assert_eq!(order.lines()[0].picked_weight, dec!(50));
        assert_eq!(order.picked_from(&UnitId::new("U1")), dec!(50));
    }

    #[test]
    fn picks_from_one_unit_are_booked_once_with_their_merged_weight() {
        let mut order = test_order();
        let now = Utc::now();
        order.execute(&AdjustmentCommand::StartPicking { at: now }).unwrap();
        order.execute(&pick("water-binder", dec!(49.995))).unwrap();
        order.execute(&pick("water-binder", dec!(0.005))).unwrap();
        order
            .execute(&AdjustmentCommand::AssignPreparationLocation {
                location_id: LocationId::new("BUCKET-7"),
                at: now,
            })
            .unwrap();
        order.execute(&AdjustmentCommand::StartProcessing { at: now }).unwrap();

        assert_eq!(order.unbooked_totals(), vec![(UnitId::new("U1"), dec!(50.000))]);
        let err = order.handle(&AdjustmentCommand::Complete { at: now }).unwrap_err();
        assert!(matches!(err, DomainError::Denied { ref check, .. } if check == "picks_unbooked"));

        let book = AdjustmentCommand::BookUnit {
            unit_id: UnitId::new("U1"),
            at: now,
        };
        let events = order.execute(&book).unwrap();
        assert!(matches!(&events[0], AdjustmentEvent::UnitBooked { weight, .. } if *weight == dec!(50)));
        assert!(order.unbooked_totals().is_empty());
        assert!(matches!(order.handle(&book), Err(DomainError::StateConflict(_))));
        order.execute(&AdjustmentCommand::Complete { at: now }).unwrap();
    }
}
