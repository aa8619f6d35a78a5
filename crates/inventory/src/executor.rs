//! Move executor: the only component that mutates units.
//!
//! Every mutation follows the same shape: load the unit and remember its
//! version, validate, decide via the aggregate, then commit with an exact
//! version expectation. A concurrent writer therefore makes the loser fail with
//! a retryable concurrency error instead of silently overwriting. Placements
//! additionally hold the ledger's placement lock from validation to commit so
//! two units cannot both take the last free slot of a location.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use feedflow_core::{
    Actor, Aggregate, AggregateRoot, DomainResult, EngineConfig, LocationId, UnitId,
};

use crate::label::{LabelSink, UnitLabel};
use crate::ledger::Ledger;
use crate::store::StockStore;
use crate::unit::{Block, Consume, Move, StockUnit, StockUnitCommand, Unblock};
use crate::validator::{MoveValidation, MoveValidator};

/// A request to relocate one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub unit_id: UnitId,
    pub target: LocationId,
    pub actor: Actor,
    pub notes: Option<String>,
    pub at: DateTime<Utc>,
}

impl MoveRequest {
    pub fn new(unit_id: UnitId, target: LocationId, actor: Actor) -> Self {
        Self {
            unit_id,
            target,
            actor,
            notes: None,
            at: Utc::now(),
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }
}

/// A request to deduct weight from a unit, optionally moving it to `target`
/// as part of the same step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeRequest {
    pub unit_id: UnitId,
    pub weight: Decimal,
    pub target: Option<LocationId>,
    pub actor: Actor,
    pub notes: Option<String>,
    pub at: DateTime<Utc>,
}

impl ConsumeRequest {
    pub fn new(unit_id: UnitId, weight: Decimal, actor: Actor) -> Self {
        Self {
            unit_id,
            weight,
            target: None,
            actor,
            notes: None,
            at: Utc::now(),
        }
    }

    pub fn moving_to(mut self, target: LocationId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }
}

/// What a committed mutation did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveReceipt {
    pub unit_id: UnitId,
    pub from: Option<LocationId>,
    pub to: Option<LocationId>,
    pub remaining_weight: Decimal,
    pub archived: bool,
    pub version: u64,
    pub message: String,
}

impl MoveReceipt {
    fn from_units(before: &StockUnit, after: &StockUnit, message: String) -> Self {
        Self {
            unit_id: after.id().clone(),
            from: before.current_location_id().cloned(),
            to: after.current_location_id().cloned(),
            remaining_weight: after.current_weight(),
            archived: after.is_archived(),
            version: after.version(),
            message,
        }
    }
}

pub struct MoveExecutor<S> {
    ledger: Arc<Ledger<S>>,
    validator: MoveValidator,
    config: EngineConfig,
    labels: Option<Arc<dyn LabelSink>>,
}

impl<S: StockStore> MoveExecutor<S> {
    pub fn new(ledger: Arc<Ledger<S>>, config: EngineConfig) -> Self {
        Self {
            validator: MoveValidator::new(config.archive_location_id.clone()),
            ledger,
            config,
            labels: None,
        }
    }

    pub fn with_label_sink(mut self, sink: Arc<dyn LabelSink>) -> Self {
        self.labels = Some(sink);
        self
    }

    pub fn ledger(&self) -> &Arc<Ledger<S>> {
        &self.ledger
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate a prospective move without mutating anything.
    pub fn validate(
        &self,
        unit_id: &UnitId,
        target: &LocationId,
        today: NaiveDate,
    ) -> DomainResult<MoveValidation> {
        let unit = self.ledger.unit(unit_id)?;
        self.validator
            .validate(&unit, target, self.ledger.as_ref(), today)
    }

    /// Receive a new unit into the ledger and print its label.
    pub fn receive(
        &self,
        unit: StockUnit,
        location: &LocationId,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> DomainResult<StockUnit> {
        let unit = self.ledger.register_unit(unit, location, actor, at)?;
        self.emit_label(&unit);
        Ok(unit)
    }

    /// Relocate a unit after it passes every movement check.
    pub fn execute_move(&self, request: MoveRequest) -> DomainResult<MoveReceipt> {
        let _placement = self.ledger.placement();
        let mut unit = self.ledger.unit(&request.unit_id)?;
        let before = unit.clone();
        let expected = unit.version();

        self.require_valid(&unit, &request.target, request.at.date_naive())?;

        unit.execute(&StockUnitCommand::Move(Move {
            target: request.target.clone(),
            moved_by: request.actor.name.clone(),
            at: request.at,
            notes: request.notes.clone(),
        }))?;
        self.ledger.commit(&unit, expected)?;

        let message = format!(
            "moved {} from {} to {}",
            unit.display_id(),
            before
                .current_location_id()
                .map(LocationId::as_str)
                .unwrap_or("-"),
            request.target
        );
        info!(unit = %unit.id(), target = %request.target, actor = %request.actor, "unit moved");
        Ok(MoveReceipt::from_units(&before, &unit, message))
    }

    /// Deduct weight from a unit. The only path by which a unit is archived.
    pub fn consume(&self, request: ConsumeRequest) -> DomainResult<MoveReceipt> {
        let _placement = self.ledger.placement();
        let mut unit = self.ledger.unit(&request.unit_id)?;
        let before = unit.clone();
        let expected = unit.version();

        let moving = match (&request.target, unit.current_location_id()) {
            (Some(target), Some(current)) if target != current => Some(target.clone()),
            _ => None,
        };
        if let Some(target) = &moving {
            self.require_valid(&unit, target, request.at.date_naive())?;
        }

        unit.execute(&StockUnitCommand::Consume(Consume {
            weight: request.weight,
            target: moving,
            moved_by: request.actor.name.clone(),
            at: request.at,
            notes: request.notes.clone(),
            epsilon: self.config.consumed_epsilon,
        }))?;
        self.ledger.commit(&unit, expected)?;

        info!(
            unit = %unit.id(),
            weight = %request.weight,
            remaining = %unit.current_weight(),
            actor = %request.actor,
            "unit consumed"
        );
        if unit.is_archived() {
            info!(unit = %unit.id(), "unit fully consumed and archived");
        }

        let message = format!(
            "consumed {} from {}, {} remaining",
            request.weight,
            unit.display_id(),
            unit.current_weight()
        );
        Ok(MoveReceipt::from_units(&before, &unit, message))
    }

    pub fn block(&self, unit_id: &UnitId, reason: &str, actor: &Actor) -> DomainResult<StockUnit> {
        let unit = self.mutate(
            unit_id,
            StockUnitCommand::Block(Block {
                reason: reason.to_string(),
                at: Utc::now(),
            }),
        )?;
        info!(unit = %unit_id, reason, actor = %actor, "unit blocked");
        Ok(unit)
    }

    pub fn unblock(&self, unit_id: &UnitId, actor: &Actor) -> DomainResult<StockUnit> {
        let unit = self.mutate(unit_id, StockUnitCommand::Unblock(Unblock { at: Utc::now() }))?;
        info!(unit = %unit_id, actor = %actor, "unit unblocked");
        Ok(unit)
    }

    fn mutate(&self, unit_id: &UnitId, command: StockUnitCommand) -> DomainResult<StockUnit> {
        let mut unit = self.ledger.unit(unit_id)?;
        let expected = unit.version();
        unit.execute(&command)?;
        self.ledger.commit(&unit, expected)?;
        Ok(unit)
    }

    fn require_valid(
        &self,
        unit: &StockUnit,
        target: &LocationId,
        today: NaiveDate,
    ) -> DomainResult<MoveValidation> {
        let validation = self
            .validator
            .validate(unit, target, self.ledger.as_ref(), today)?;
        debug!(unit = %unit.id(), target = %target, checks = validation.checks.len(), "move validated");

        if !validation.allowed {
            warn!(unit = %unit.id(), target = %target, reason = %validation.reason, "move denied");
        }
        validation.into_result()
    }

    fn emit_label(&self, unit: &StockUnit) {
        if let Some(sink) = &self.labels {
            if let Err(err) = sink.emit(&UnitLabel::from(unit)) {
                warn!(unit = %unit.id(), error = %err, "label emission failed");
            }
        }
    }
}

impl<S> Clone for MoveExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            validator: self.validator.clone(),
            config: self.config.clone(),
            labels: self.labels.clone(),
        }
    }
}
