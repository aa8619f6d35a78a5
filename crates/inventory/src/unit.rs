use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use feedflow_core::{Aggregate, AggregateRoot, DomainError, Event, LocationId, UnitId};

/// What a unit physically is. Drives type segregation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockKind {
    RawMaterial,
    FinishedGood,
    Packaging,
}

impl StockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockKind::RawMaterial => "raw_material",
            StockKind::FinishedGood => "finished_good",
            StockKind::Packaging => "packaging",
        }
    }
}

impl core::fmt::Display for StockKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical packaging of a unit. Feed stations accept exactly one form.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PackageForm {
    #[serde(rename = "big-bag")]
    BigBag,
    #[serde(rename = "small-bag")]
    SmallBag,
    #[serde(rename = "piece")]
    Piece,
    #[serde(rename = "n/a")]
    NotApplicable,
}

impl PackageForm {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageForm::BigBag => "big-bag",
            PackageForm::SmallBag => "small-bag",
            PackageForm::Piece => "piece",
            PackageForm::NotApplicable => "n/a",
        }
    }
}

impl core::fmt::Display for PackageForm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementAction {
    Received,
    Moved,
    Consumed,
    Archived,
}

/// One append-only movement history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    pub moved_by: String,
    pub moved_at: DateTime<Utc>,
    pub previous_location_id: Option<LocationId>,
    pub target_location_id: Option<LocationId>,
    pub action: MovementAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Aggregate root: a physical stock unit (pallet, bag, packaging lot).
///
/// `current_location_id == None` after the unit has been received means it is
/// archived. Only [`StockUnitCommand::Consume`] can get it there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockUnit {
    id: UnitId,
    display_id: String,
    kind: StockKind,
    product_name: String,
    package_form: PackageForm,
    current_weight: Decimal,
    initial_weight: Decimal,
    production_date: NaiveDate,
    expiry_date: Option<NaiveDate>,
    is_blocked: bool,
    block_reason: Option<String>,
    current_location_id: Option<LocationId>,
    movement_history: Vec<MovementRecord>,
    version: u64,
}

impl StockUnit {
    /// A freshly minted unit that has not been received into any location yet.
    pub fn new(
        id: UnitId,
        kind: StockKind,
        product_name: impl Into<String>,
        package_form: PackageForm,
        weight: Decimal,
        production_date: NaiveDate,
    ) -> Self {
        Self {
            display_id: id.to_string(),
            id,
            kind,
            product_name: product_name.into(),
            package_form,
            current_weight: weight,
            initial_weight: weight,
            production_date,
            expiry_date: None,
            is_blocked: false,
            block_reason: None,
            current_location_id: None,
            movement_history: Vec::new(),
            version: 0,
        }
    }

    pub fn with_expiry(mut self, expiry_date: NaiveDate) -> Self {
        self.expiry_date = Some(expiry_date);
        self
    }

    pub fn with_display_id(mut self, display_id: impl Into<String>) -> Self {
        self.display_id = display_id.into();
        self
    }

    pub fn display_id(&self) -> &str {
        &self.display_id
    }

    pub fn kind(&self) -> StockKind {
        self.kind
    }

    pub fn product_name(&self) -> &str {
        &self.product_name
    }

    pub fn package_form(&self) -> PackageForm {
        self.package_form
    }

    pub fn current_weight(&self) -> Decimal {
        self.current_weight
    }

    pub fn initial_weight(&self) -> Decimal {
        self.initial_weight
    }

    pub fn production_date(&self) -> NaiveDate {
        self.production_date
    }

    pub fn expiry_date(&self) -> Option<NaiveDate> {
        self.expiry_date
    }

    pub fn is_blocked(&self) -> bool {
        self.is_blocked
    }

    pub fn block_reason(&self) -> Option<&str> {
        self.block_reason.as_deref()
    }

    pub fn current_location_id(&self) -> Option<&LocationId> {
        self.current_location_id.as_ref()
    }

    pub fn movement_history(&self) -> &[MovementRecord] {
        &self.movement_history
    }

    /// Received into the ledger at some point.
    pub fn is_received(&self) -> bool {
        !self.movement_history.is_empty()
    }

    /// Fully consumed; terminal.
    pub fn is_archived(&self) -> bool {
        self.is_received() && self.current_location_id.is_none()
    }

    /// Expired when the expiry date lies strictly before `today`.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date.is_some_and(|d| d < today)
    }

    /// Time the unit entered the ledger; used as the FEFO arrival tie-break.
    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.movement_history.first().map(|r| r.moved_at)
    }

    /// Whether a scanned code refers to this unit (id or short display id).
    pub fn matches_code(&self, code: &str) -> bool {
        let code = code.trim();
        self.id.as_str() == code || self.display_id == code
    }

    fn last_moved_at(&self) -> Option<DateTime<Utc>> {
        self.movement_history.last().map(|r| r.moved_at)
    }

    /// History timestamps never go backwards, even if a caller's clock does.
    fn monotonic(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_moved_at() {
            Some(last) if last > at => last,
            _ => at,
        }
    }

    fn push_history(
        &mut self,
        moved_by: &str,
        moved_at: DateTime<Utc>,
        previous: Option<LocationId>,
        target: Option<LocationId>,
        action: MovementAction,
        notes: Option<String>,
    ) {
        self.movement_history.push(MovementRecord {
            moved_by: moved_by.to_string(),
            moved_at,
            previous_location_id: previous,
            target_location_id: target,
            action,
            notes,
        });
    }
}

impl AggregateRoot for StockUnit {
    type Id = UnitId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: Receive (first placement into the ledger).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receive {
    pub location_id: LocationId,
    pub moved_by: String,
    pub at: DateTime<Utc>,
}

/// Command: Move (plain relocation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Move {
    pub target: LocationId,
    pub moved_by: String,
    pub at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Command: Consume (weight deduction, optionally while moving to `target`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consume {
    pub weight: Decimal,
    pub target: Option<LocationId>,
    pub moved_by: String,
    pub at: DateTime<Utc>,
    pub notes: Option<String>,
    /// Remaining weight below this archives the unit.
    pub epsilon: Decimal,
}

/// Command: Block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Command: Unblock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unblock {
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StockUnitCommand {
    Receive(Receive),
    Move(Move),
    Consume(Consume),
    Block(Block),
    Unblock(Unblock),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitReceived {
    pub unit_id: UnitId,
    pub location_id: LocationId,
    pub moved_by: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitMoved {
    pub unit_id: UnitId,
    pub from: LocationId,
    pub to: LocationId,
    pub moved_by: String,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitConsumed {
    pub unit_id: UnitId,
    pub weight: Decimal,
    pub from: LocationId,
    pub at_location: LocationId,
    pub moved_by: String,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitArchived {
    pub unit_id: UnitId,
    pub from: LocationId,
    pub moved_by: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitBlocked {
    pub unit_id: UnitId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitUnblocked {
    pub unit_id: UnitId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockUnitEvent {
    UnitReceived(UnitReceived),
    UnitMoved(UnitMoved),
    UnitConsumed(UnitConsumed),
    UnitArchived(UnitArchived),
    UnitBlocked(UnitBlocked),
    UnitUnblocked(UnitUnblocked),
}

impl Event for StockUnitEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockUnitEvent::UnitReceived(_) => "stock.unit.received",
            StockUnitEvent::UnitMoved(_) => "stock.unit.moved",
            StockUnitEvent::UnitConsumed(_) => "stock.unit.consumed",
            StockUnitEvent::UnitArchived(_) => "stock.unit.archived",
            StockUnitEvent::UnitBlocked(_) => "stock.unit.blocked",
            StockUnitEvent::UnitUnblocked(_) => "stock.unit.unblocked",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockUnitEvent::UnitReceived(e) => e.occurred_at,
            StockUnitEvent::UnitMoved(e) => e.occurred_at,
            StockUnitEvent::UnitConsumed(e) => e.occurred_at,
            StockUnitEvent::UnitArchived(e) => e.occurred_at,
            StockUnitEvent::UnitBlocked(e) => e.occurred_at,
            StockUnitEvent::UnitUnblocked(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockUnit {
    type Command = StockUnitCommand;
    type Event = StockUnitEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockUnitEvent::UnitReceived(e) => {
                self.current_location_id = Some(e.location_id.clone());
                self.push_history(
                    &e.moved_by,
                    e.occurred_at,
                    None,
                    Some(e.location_id.clone()),
                    MovementAction::Received,
                    None,
                );
            }
            StockUnitEvent::UnitMoved(e) => {
                self.current_location_id = Some(e.to.clone());
                self.push_history(
                    &e.moved_by,
                    e.occurred_at,
                    Some(e.from.clone()),
                    Some(e.to.clone()),
                    MovementAction::Moved,
                    e.notes.clone(),
                );
            }
            StockUnitEvent::UnitConsumed(e) => {
                self.current_weight -= e.weight;
                self.current_location_id = Some(e.at_location.clone());
                let notes = match &e.notes {
                    Some(n) => format!("consumed {} ({n})", e.weight),
                    None => format!("consumed {}", e.weight),
                };
                self.push_history(
                    &e.moved_by,
                    e.occurred_at,
                    Some(e.from.clone()),
                    Some(e.at_location.clone()),
                    MovementAction::Consumed,
                    Some(notes),
                );
            }
            StockUnitEvent::UnitArchived(e) => {
                self.current_weight = Decimal::ZERO;
                self.current_location_id = None;
                self.push_history(
                    &e.moved_by,
                    e.occurred_at,
                    Some(e.from.clone()),
                    None,
                    MovementAction::Archived,
                    None,
                );
            }
            StockUnitEvent::UnitBlocked(e) => {
                self.is_blocked = true;
                self.block_reason = Some(e.reason.clone());
            }
            StockUnitEvent::UnitUnblocked(_) => {
                self.is_blocked = false;
                self.block_reason = None;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockUnitCommand::Receive(cmd) => self.handle_receive(cmd),
            StockUnitCommand::Move(cmd) => self.handle_move(cmd),
            StockUnitCommand::Consume(cmd) => self.handle_consume(cmd),
            StockUnitCommand::Block(cmd) => self.handle_block(cmd),
            StockUnitCommand::Unblock(cmd) => self.handle_unblock(cmd),
        }
    }
}

impl StockUnit {
    fn ensure_active(&self) -> Result<&LocationId, DomainError> {
        match &self.current_location_id {
            Some(location) => Ok(location),
            None if self.is_received() => Err(DomainError::state_conflict(format!(
                "unit {} is archived",
                self.id
            ))),
            None => Err(DomainError::state_conflict(format!(
                "unit {} has not been received",
                self.id
            ))),
        }
    }

    fn handle_receive(&self, cmd: &Receive) -> Result<Vec<StockUnitEvent>, DomainError> {
        if self.is_received() {
            return Err(DomainError::state_conflict(format!(
                "unit {} was already received",
                self.id
            )));
        }
        if self.product_name.trim().is_empty() {
            return Err(DomainError::validation("product name cannot be empty"));
        }
        if self.initial_weight < Decimal::ZERO || self.current_weight > self.initial_weight {
            return Err(DomainError::invariant(
                "current weight must lie between zero and the initial weight",
            ));
        }

        Ok(vec![StockUnitEvent::UnitReceived(UnitReceived {
            unit_id: self.id.clone(),
            location_id: cmd.location_id.clone(),
            moved_by: cmd.moved_by.clone(),
            occurred_at: cmd.at,
        })])
    }

    fn handle_move(&self, cmd: &Move) -> Result<Vec<StockUnitEvent>, DomainError> {
        let from = self.ensure_active()?;
        if *from == cmd.target {
            return Err(DomainError::denied(
                "no_self_move",
                format!("unit is already at {}", cmd.target),
            ));
        }

        Ok(vec![StockUnitEvent::UnitMoved(UnitMoved {
            unit_id: self.id.clone(),
            from: from.clone(),
            to: cmd.target.clone(),
            moved_by: cmd.moved_by.clone(),
            notes: cmd.notes.clone(),
            occurred_at: self.monotonic(cmd.at),
        })])
    }

    fn handle_consume(&self, cmd: &Consume) -> Result<Vec<StockUnitEvent>, DomainError> {
        let from = self.ensure_active()?;

        if cmd.weight <= Decimal::ZERO {
            return Err(DomainError::validation("consumed weight must be positive"));
        }
        if cmd.weight > self.current_weight {
            return Err(DomainError::invariant(format!(
                "consuming {} from unit {} would leave a negative weight (available {})",
                cmd.weight, self.id, self.current_weight
            )));
        }

        let at_location = cmd.target.clone().unwrap_or_else(|| from.clone());
        let occurred_at = self.monotonic(cmd.at);
        let remaining = self.current_weight - cmd.weight;

        let mut events = vec![StockUnitEvent::UnitConsumed(UnitConsumed {
            unit_id: self.id.clone(),
            weight: cmd.weight,
            from: from.clone(),
            at_location: at_location.clone(),
            moved_by: cmd.moved_by.clone(),
            notes: cmd.notes.clone(),
            occurred_at,
        })];

        if remaining < cmd.epsilon {
            events.push(StockUnitEvent::UnitArchived(UnitArchived {
                unit_id: self.id.clone(),
                from: at_location,
                moved_by: cmd.moved_by.clone(),
                occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_block(&self, cmd: &Block) -> Result<Vec<StockUnitEvent>, DomainError> {
        self.ensure_active()?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("block reason cannot be empty"));
        }

        Ok(vec![StockUnitEvent::UnitBlocked(UnitBlocked {
            unit_id: self.id.clone(),
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.at,
        })])
    }

    fn handle_unblock(&self, cmd: &Unblock) -> Result<Vec<StockUnitEvent>, DomainError> {
        self.ensure_active()?;
        if !self.is_blocked {
            return Err(DomainError::state_conflict(format!(
                "unit {} is not blocked",
                self.id
            )));
        }

        Ok(vec![StockUnitEvent::UnitUnblocked(UnitUnblocked {
            unit_id: self.id.clone(),
            occurred_at: cmd.at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn received_unit(weight: Decimal) -> StockUnit {
        let mut unit = StockUnit::new(
            UnitId::new("R-1"),
            StockKind::RawMaterial,
            "wheat",
            PackageForm::BigBag,
            weight,
            day(1),
        );
        unit.execute(&StockUnitCommand::Receive(Receive {
            location_id: LocationId::new("MS01"),
            moved_by: "tester".to_string(),
            at: Utc::now(),
        }))
        .unwrap();
        unit
    }

    fn consume(weight: Decimal) -> StockUnitCommand {
        StockUnitCommand::Consume(Consume {
            weight,
            target: None,
            moved_by: "tester".to_string(),
            at: Utc::now(),
            notes: None,
            epsilon: dec!(0.01),
        })
    }

    #[test]
    fn receive_places_unit_and_starts_history() {
        let unit = received_unit(dec!(1000));
        assert_eq!(unit.current_location_id().unwrap().as_str(), "MS01");
        assert_eq!(unit.movement_history().len(), 1);
        assert_eq!(unit.movement_history()[0].action, MovementAction::Received);
        assert_eq!(unit.version(), 1);
        assert!(!unit.is_archived());
    }

    #[test]
    fn move_appends_history_with_matching_target() {
        let mut unit = received_unit(dec!(1000));
        unit.execute(&StockUnitCommand::Move(Move {
            target: LocationId::new("B01"),
            moved_by: "tester".to_string(),
            at: Utc::now(),
            notes: Some("restock".to_string()),
        }))
        .unwrap();

        let last = unit.movement_history().last().unwrap();
        assert_eq!(last.previous_location_id.as_ref().unwrap().as_str(), "MS01");
        assert_eq!(last.target_location_id.as_ref(), unit.current_location_id());
        assert_eq!(last.notes.as_deref(), Some("restock"));
    }

    #[test]
    fn partial_consumption_keeps_unit_in_place() {
        let mut unit = received_unit(dec!(1000));
        let events = unit.execute(&consume(dec!(400))).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(unit.current_weight(), dec!(600));
        assert_eq!(unit.current_location_id().unwrap().as_str(), "MS01");
    }

    #[test]
    fn consuming_down_to_dust_archives() {
        let mut unit = received_unit(dec!(1000));
        let events = unit.execute(&consume(dec!(999.995))).unwrap();
        assert_eq!(events.len(), 2);
        assert!(unit.is_archived());
        assert_eq!(unit.current_weight(), Decimal::ZERO);
        let last = unit.movement_history().last().unwrap();
        assert_eq!(last.action, MovementAction::Archived);
        assert_eq!(last.target_location_id, None);
    }

    #[test]
    fn overdraw_is_rejected_without_mutation() {
        let unit = received_unit(dec!(100));
        let before = unit.clone();
        let err = unit.handle(&consume(dec!(100.5))).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(unit, before);
    }

    #[test]
    fn archived_unit_cannot_move_again() {
        let mut unit = received_unit(dec!(10));
        unit.execute(&consume(dec!(10))).unwrap();

        let err = unit
            .handle(&StockUnitCommand::Move(Move {
                target: LocationId::new("MS01"),
                moved_by: "tester".to_string(),
                at: Utc::now(),
                notes: None,
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::StateConflict(_)));
        assert!(unit.handle(&consume(dec!(1))).is_err());
    }

    #[test]
    fn history_timestamps_never_go_backwards() {
        let mut unit = received_unit(dec!(10));
        let received_at = unit.received_at().unwrap();
        unit.execute(&StockUnitCommand::Move(Move {
            target: LocationId::new("B01"),
            moved_by: "tester".to_string(),
            at: received_at - Duration::hours(2),
            notes: None,
        }))
        .unwrap();

        let history = unit.movement_history();
        assert!(history[1].moved_at >= history[0].moved_at);
    }

    #[test]
    fn block_and_unblock() {
        let mut unit = received_unit(dec!(10));
        unit.execute(&StockUnitCommand::Block(Block {
            reason: "lab hold".to_string(),
            at: Utc::now(),
        }))
        .unwrap();
        assert!(unit.is_blocked());
        assert_eq!(unit.block_reason(), Some("lab hold"));

        unit.execute(&StockUnitCommand::Unblock(Unblock { at: Utc::now() }))
            .unwrap();
        assert!(!unit.is_blocked());
        assert!(unit
            .handle(&StockUnitCommand::Unblock(Unblock { at: Utc::now() }))
            .is_err());
    }

    #[test]
    fn expiry_is_strictly_before_today() {
        let unit = received_unit(dec!(10)).with_expiry(day(10));
        assert!(!unit.is_expired(day(10)));
        assert!(unit.is_expired(day(11)));
    }
}
