//! Batch consumption tracker.
//!
//! Records raw material drawn into a batch (through the inventory executor's
//! consumption path), produced output, annulments and reconciliation.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use feedflow_core::{
    Actor, Aggregate, AggregateRoot, BatchId, DomainError, DomainResult, ExpectedVersion,
    LocationId, RunId, UnitId,
};
use feedflow_inventory::{ConsumeRequest, MoveExecutor, StockKind, StockStore, StockUnit};

use crate::run::{ConsumedUnit, ProducedGood, ProductionRun, ProductionRunCommand, Recipe};
use crate::store::{run_for_batch, Repository};

/// What a recorded consumption did to the batch and the source unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionReceipt {
    pub batch_id: BatchId,
    pub entry: ConsumedUnit,
    pub remaining_weight: Decimal,
    pub unit_archived: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationLine {
    pub product_name: String,
    pub planned_weight: Decimal,
    pub consumed_weight: Decimal,
    /// consumed - planned
    pub variance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentTotal {
    pub product_name: String,
    pub weight: Decimal,
}

/// Planned vs actual for one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub batch_id: BatchId,
    pub batch_number: u32,
    pub target_weight: Decimal,
    pub lines: Vec<ReconciliationLine>,
    pub adjustments: Vec<AdjustmentTotal>,
    pub yield_weight: Decimal,
}

pub struct ConsumptionTracker<S, R> {
    executor: MoveExecutor<S>,
    runs: Arc<R>,
    commit: Mutex<()>,
}

impl<S: StockStore, R: Repository<ProductionRun>> ConsumptionTracker<S, R> {
    pub fn new(executor: MoveExecutor<S>, runs: Arc<R>) -> Self {
        Self {
            executor,
            runs,
            commit: Mutex::new(()),
        }
    }

    pub fn executor(&self) -> &MoveExecutor<S> {
        &self.executor
    }

    pub fn plan_run(
        &self,
        product_name: &str,
        recipe: Recipe,
        batch_targets: &[Decimal],
        actor: &Actor,
    ) -> DomainResult<ProductionRun> {
        let run = ProductionRun::plan(RunId::new(), product_name, recipe, batch_targets)?;
        self.runs.save(&run, ExpectedVersion::Exact(0))?;
        info!(run = %run.id(), product = product_name, batches = batch_targets.len(), actor = %actor, "production run planned");
        Ok(run)
    }

    pub fn run(&self, run_id: &RunId) -> DomainResult<ProductionRun> {
        self.runs
            .load(run_id)?
            .ok_or_else(|| DomainError::not_found(format!("run {run_id}")))
    }

    pub fn run_for_batch(&self, batch_id: &BatchId) -> DomainResult<ProductionRun> {
        run_for_batch(self.runs.as_ref(), batch_id)?
            .ok_or_else(|| DomainError::not_found(format!("batch {batch_id}")))
    }

    pub fn start_run(&self, run_id: &RunId, actor: &Actor) -> DomainResult<ProductionRun> {
        let run = self.update(*run_id, ProductionRunCommand::StartRun { at: Utc::now() })?;
        info!(run = %run_id, actor = %actor, "production run started");
        Ok(run)
    }

    pub fn start_batch(&self, batch_id: &BatchId, actor: &Actor) -> DomainResult<ProductionRun> {
        let run_id = *self.run_for_batch(batch_id)?.id();
        let run = self.update(
            run_id,
            ProductionRunCommand::StartBatch {
                batch_id: *batch_id,
                at: Utc::now(),
            },
        )?;
        info!(run = %run_id, batch = %batch_id, actor = %actor, "batch started");
        Ok(run)
    }

    pub fn complete_batch(&self, batch_id: &BatchId, actor: &Actor) -> DomainResult<ProductionRun> {
        let run_id = *self.run_for_batch(batch_id)?.id();
        let run = self.update(
            run_id,
            ProductionRunCommand::CompleteBatch {
                batch_id: *batch_id,
                at: Utc::now(),
            },
        )?;
        info!(run = %run_id, batch = %batch_id, actor = %actor, "batch completed");
        Ok(run)
    }

    pub fn complete_run(&self, run_id: &RunId, actor: &Actor) -> DomainResult<ProductionRun> {
        let run = self.update(*run_id, ProductionRunCommand::CompleteRun { at: Utc::now() })?;
        info!(run = %run_id, actor = %actor, "production run completed");
        Ok(run)
    }

    /// Draw `weight` from a unit into an ongoing batch.
    ///
    /// Standard consumption must name a recipe ingredient; adjustment
    /// consumption is unconstrained by the recipe.
    pub fn record_consumption(
        &self,
        batch_id: &BatchId,
        unit_id: &UnitId,
        weight: Decimal,
        is_adjustment: bool,
        actor: &Actor,
    ) -> DomainResult<ConsumptionReceipt> {
        self.record_consumption_at(batch_id, unit_id, weight, is_adjustment, actor, Utc::now())
    }

    pub fn record_consumption_at(
        &self,
        batch_id: &BatchId,
        unit_id: &UnitId,
        weight: Decimal,
        is_adjustment: bool,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> DomainResult<ConsumptionReceipt> {
        let _guard = self.commit.lock().unwrap_or_else(PoisonError::into_inner);

        let mut run = self.run_for_batch(batch_id)?;
        let expected = run.version();
        let unit = self.executor.ledger().unit(unit_id)?;
        ensure_usable(&unit, at)?;

        let entry = ConsumedUnit {
            unit_id: unit_id.clone(),
            product_name: unit.product_name().to_string(),
            consumed_weight: weight,
            is_adjustment,
            consumed_by: actor.name.clone(),
            consumed_at: at,
        };
        let events = run.handle(&ProductionRunCommand::RecordConsumption {
            batch_id: *batch_id,
            entry: entry.clone(),
        })?;

        let batch_number = run.ongoing_batch(batch_id)?.batch_number;
        let notes = if is_adjustment {
            format!("batch {batch_number} adjustment")
        } else {
            format!("batch {batch_number}")
        };
        let receipt = self.executor.consume(
            ConsumeRequest::new(unit_id.clone(), weight, actor.clone())
                .with_notes(notes)
                .at(at),
        )?;

        for event in &events {
            run.apply(event);
        }
        self.runs.save(&run, ExpectedVersion::Exact(expected))?;

        info!(
            batch = %batch_id,
            unit = %unit_id,
            %weight,
            is_adjustment,
            actor = %actor,
            "consumption recorded"
        );
        Ok(ConsumptionReceipt {
            batch_id: *batch_id,
            message: format!(
                "recorded {weight} of {} into batch {batch_number}",
                entry.product_name
            ),
            entry,
            remaining_weight: receipt.remaining_weight,
            unit_archived: receipt.archived,
        })
    }

    /// Register a produced finished-good unit at `location` and record it as
    /// batch output. The unit's label goes to the executor's label sink.
    pub fn record_output(
        &self,
        batch_id: &BatchId,
        unit: StockUnit,
        location: &LocationId,
        actor: &Actor,
    ) -> DomainResult<StockUnit> {
        let _guard = self.commit.lock().unwrap_or_else(PoisonError::into_inner);

        if unit.kind() != StockKind::FinishedGood {
            return Err(DomainError::validation(format!(
                "batch output must be a finished good, got {}",
                unit.kind()
            )));
        }

        let mut run = self.run_for_batch(batch_id)?;
        let expected = run.version();
        if unit.product_name() != run.product_name() {
            return Err(DomainError::validation(format!(
                "run produces {}, not {}",
                run.product_name(),
                unit.product_name()
            )));
        }

        let now = Utc::now();
        let good = ProducedGood {
            unit_id: unit.id().clone(),
            product_name: unit.product_name().to_string(),
            weight: unit.current_weight(),
            is_annulled: false,
            annul_reason: None,
            produced_at: now,
        };
        let events = run.handle(&ProductionRunCommand::RecordOutput {
            batch_id: *batch_id,
            good,
        })?;

        let received = self.executor.receive(unit, location, actor, now)?;

        for event in &events {
            run.apply(event);
        }
        self.runs.save(&run, ExpectedVersion::Exact(expected))?;

        info!(batch = %batch_id, unit = %received.id(), weight = %received.current_weight(), "output recorded");
        Ok(received)
    }

    /// Void an erroneous output record. The entry stays, flagged.
    pub fn annul_output(
        &self,
        batch_id: &BatchId,
        unit_id: &UnitId,
        reason: &str,
        actor: &Actor,
    ) -> DomainResult<ProductionRun> {
        let run_id = *self.run_for_batch(batch_id)?.id();
        let run = self.update(
            run_id,
            ProductionRunCommand::AnnulOutput {
                batch_id: *batch_id,
                unit_id: unit_id.clone(),
                reason: reason.to_string(),
                at: Utc::now(),
            },
        )?;
        warn!(batch = %batch_id, unit = %unit_id, reason, actor = %actor, "output annulled");
        Ok(run)
    }

    /// Produced weight of a batch, annulled goods excluded.
    pub fn yield_weight(&self, batch_id: &BatchId) -> DomainResult<Decimal> {
        let run = self.run_for_batch(batch_id)?;
        run.batch(batch_id)
            .map(|b| b.yield_weight())
            .ok_or_else(|| DomainError::not_found(format!("batch {batch_id}")))
    }

    /// Planned vs standard consumption per recipe line; adjustments reported apart.
    pub fn reconcile(&self, batch_id: &BatchId) -> DomainResult<Reconciliation> {
        let run = self.run_for_batch(batch_id)?;
        let batch = run
            .batch(batch_id)
            .ok_or_else(|| DomainError::not_found(format!("batch {batch_id}")))?;

        let lines = run
            .recipe()
            .lines
            .iter()
            .map(|line| {
                let consumed_weight = batch.standard_consumed(&line.product_name);
                ReconciliationLine {
                    product_name: line.product_name.clone(),
                    planned_weight: line.planned_weight,
                    consumed_weight,
                    variance: consumed_weight - line.planned_weight,
                }
            })
            .collect();

        let mut adjustments: Vec<AdjustmentTotal> = Vec::new();
        for entry in batch.consumed_units.iter().filter(|c| c.is_adjustment) {
            match adjustments
                .iter_mut()
                .find(|a| a.product_name == entry.product_name)
            {
                Some(total) => total.weight += entry.consumed_weight,
                None => adjustments.push(AdjustmentTotal {
                    product_name: entry.product_name.clone(),
                    weight: entry.consumed_weight,
                }),
            }
        }

        Ok(Reconciliation {
            batch_id: *batch_id,
            batch_number: batch.batch_number,
            target_weight: batch.target_weight,
            lines,
            adjustments,
            yield_weight: batch.yield_weight(),
        })
    }

    fn update(&self, run_id: RunId, command: ProductionRunCommand) -> DomainResult<ProductionRun> {
        let _guard = self.commit.lock().unwrap_or_else(PoisonError::into_inner);

        let mut run = self.run(&run_id)?;
        let expected = run.version();
        run.execute(&command)?;
        self.runs.save(&run, ExpectedVersion::Exact(expected))?;
        Ok(run)
    }
}

/// Blocked or expired material never goes into a batch.
pub(crate) fn ensure_usable(unit: &StockUnit, at: DateTime<Utc>) -> DomainResult<()> {
    if unit.is_archived() {
        return Err(DomainError::state_conflict(format!(
            "unit {} is archived",
            unit.id()
        )));
    }
    if unit.is_blocked() {
        return Err(DomainError::denied(
            "unit_unavailable",
            format!(
                "unit {} is blocked ({})",
                unit.id(),
                unit.block_reason().unwrap_or("no reason recorded")
            ),
        ));
    }
    if unit.is_expired(at.date_naive()) {
        return Err(DomainError::denied(
            "unit_unavailable",
            format!("unit {} is expired", unit.id()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRepository;
    use chrono::NaiveDate;
    use feedflow_core::{EngineConfig, UserId};
    use feedflow_inventory::{
        InMemoryStockStore, Ledger, Location, LocationRegistry, LocationRole, PackageForm,
        RecordingLabelSink,
    };
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    type TestTracker = ConsumptionTracker<InMemoryStockStore, InMemoryRepository<ProductionRun>>;

    fn test_actor() -> Actor {
        Actor::new(UserId::new(), "operator")
    }

    fn test_tracker(labels: Arc<RecordingLabelSink>) -> TestTracker {
        let registry = LocationRegistry::with_locations([
            Location::new("MS01", "Raw warehouse", LocationRole::RawWarehouse),
            Location::new("MGW01", "FG warehouse", LocationRole::FinishedGoodsWarehouse),
        ]);
        let ledger = Arc::new(Ledger::new(registry, InMemoryStockStore::new()));
        let executor = MoveExecutor::new(ledger, EngineConfig::default()).with_label_sink(labels);
        ConsumptionTracker::new(executor, Arc::new(InMemoryRepository::new()))
    }

    fn raw(tracker: &TestTracker, id: &str, product: &str, weight: Decimal) -> UnitId {
        let unit = StockUnit::new(
            UnitId::new(id),
            StockKind::RawMaterial,
            product,
            PackageForm::BigBag,
            weight,
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        );
        tracker
            .executor()
            .receive(unit, &LocationId::new("MS01"), &Actor::system(), Utc::now())
            .unwrap()
            .id()
            .clone()
    }

    fn ongoing_batch(tracker: &TestTracker) -> BatchId {
        let run = tracker
            .plan_run(
                "broiler-starter",
                Recipe::new([("wheat", dec!(600)), ("soy", dec!(400))]),
                &[dec!(1000)],
                &test_actor(),
            )
            .unwrap();
        let batch_id = run.batches()[0].id;
        tracker.start_run(run.id(), &test_actor()).unwrap();
        tracker.start_batch(&batch_id, &test_actor()).unwrap();
        batch_id
    }

    fn finished(id: &str, weight: Decimal) -> StockUnit {
        StockUnit::new(
            UnitId::new(id),
            StockKind::FinishedGood,
            "broiler-starter",
            PackageForm::Piece,
            weight,
            NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        )
    }

    #[test]
    fn consumption_deducts_unit_and_appends_entry() {
        let tracker = test_tracker(Arc::new(RecordingLabelSink::new()));
        let wheat = raw(&tracker, "W1", "wheat", dec!(1000));
        let batch = ongoing_batch(&tracker);

        let receipt = tracker
            .record_consumption(&batch, &wheat, dec!(600), false, &test_actor())
            .unwrap();
        assert_eq!(receipt.remaining_weight, dec!(400));
        assert!(!receipt.unit_archived);

        let run = tracker.run_for_batch(&batch).unwrap();
        let entries = &run.batch(&batch).unwrap().consumed_units;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].consumed_weight, dec!(600));
        assert!(!entries[0].is_adjustment);
    }

    #[test]
    fn consumption_is_denied_outside_an_ongoing_batch() {
        let tracker = test_tracker(Arc::new(RecordingLabelSink::new()));
        let wheat = raw(&tracker, "W1", "wheat", dec!(1000));
        let run = tracker
            .plan_run("broiler-starter", Recipe::new([("wheat", dec!(1))]), &[dec!(10)], &test_actor())
            .unwrap();
        let batch = run.batches()[0].id;

        let err = tracker
            .record_consumption(&batch, &wheat, dec!(5), false, &test_actor())
            .unwrap_err();
        assert!(matches!(err, DomainError::StateConflict(_)));
        assert_eq!(
            tracker.executor().ledger().unit(&wheat).unwrap().current_weight(),
            dec!(1000)
        );
    }

    #[test]
    fn off_recipe_and_blocked_material_is_rejected_before_any_deduction() {
        let tracker = test_tracker(Arc::new(RecordingLabelSink::new()));
        let salt = raw(&tracker, "S1", "salt", dec!(25));
        let wheat = raw(&tracker, "W1", "wheat", dec!(1000));
        let batch = ongoing_batch(&tracker);

        let err = tracker
            .record_consumption(&batch, &salt, dec!(5), false, &test_actor())
            .unwrap_err();
        assert!(matches!(err, DomainError::Denied { ref check, .. } if check == "recipe_mismatch"));
        assert_eq!(tracker.executor().ledger().unit(&salt).unwrap().current_weight(), dec!(25));

        tracker.executor().block(&wheat, "aflatoxin", &test_actor()).unwrap();
        let err = tracker
            .record_consumption(&batch, &wheat, dec!(5), false, &test_actor())
            .unwrap_err();
        assert!(matches!(err, DomainError::Denied { ref check, .. } if check == "unit_unavailable"));
    }

    #[test]
    fn overdraw_leaves_batch_and_unit_untouched() {
        let tracker = test_tracker(Arc::new(RecordingLabelSink::new()));
        let wheat = raw(&tracker, "W1", "wheat", dec!(100));
        let batch = ongoing_batch(&tracker);

        let err = tracker
            .record_consumption(&batch, &wheat, dec!(150), false, &test_actor())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        let run = tracker.run_for_batch(&batch).unwrap();
        assert!(run.batch(&batch).unwrap().consumed_units.is_empty());
    }

    #[test]
    fn output_annulment_and_reconciliation() {
        let labels = Arc::new(RecordingLabelSink::new());
        let tracker = test_tracker(labels.clone());
        let wheat = raw(&tracker, "W1", "wheat", dec!(1000));
        let soy = raw(&tracker, "S1", "soy", dec!(1000));
        let batch = ongoing_batch(&tracker);

        tracker.record_consumption(&batch, &wheat, dec!(610), false, &test_actor()).unwrap();
        tracker.record_consumption(&batch, &soy, dec!(390), false, &test_actor()).unwrap();
        tracker.record_consumption(&batch, &soy, dec!(12.5), true, &test_actor()).unwrap();

        let mgw = LocationId::new("MGW01");
        tracker.record_output(&batch, finished("FG1", dec!(500)), &mgw, &test_actor()).unwrap();
        tracker.record_output(&batch, finished("FG2", dec!(495)), &mgw, &test_actor()).unwrap();
        tracker
            .annul_output(&batch, &UnitId::new("FG2"), "double scan", &test_actor())
            .unwrap();

        assert_eq!(tracker.yield_weight(&batch).unwrap(), dec!(500));
        assert_eq!(labels.labels().len(), 2);

        let recon = tracker.reconcile(&batch).unwrap();
        let wheat_line = recon.lines.iter().find(|l| l.product_name == "wheat").unwrap();
        assert_eq!(wheat_line.variance, dec!(10));
        let soy_line = recon.lines.iter().find(|l| l.product_name == "soy").unwrap();
        assert_eq!(soy_line.consumed_weight, dec!(390));
        assert_eq!(recon.adjustments, vec![AdjustmentTotal {
            product_name: "soy".to_string(),
            weight: dec!(12.5),
        }]);
    }

    #[test]
    fn output_must_be_the_runs_finished_good() {
        let tracker = test_tracker(Arc::new(RecordingLabelSink::new()));
        let batch = ongoing_batch(&tracker);
        let mgw = LocationId::new("MGW01");

        let wrong = StockUnit::new(
            UnitId::new("X"),
            StockKind::FinishedGood,
            "layer-mash",
            PackageForm::Piece,
            dec!(10),
            NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        );
        assert!(tracker.record_output(&batch, wrong, &mgw, &test_actor()).is_err());
        assert!(tracker.executor().ledger().unit(&UnitId::new("X")).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 48,
            ..ProptestConfig::default()
        })]

        /// Property: weight recorded into the batch plus what is left on the
        /// unit always equals the unit's initial weight.
        #[test]
        fn consumption_conserves_weight(draws in prop::collection::vec(1u32..300, 1..10)) {
            let tracker = test_tracker(Arc::new(RecordingLabelSink::new()));
            let wheat = raw(&tracker, "W1", "wheat", dec!(1000));
            let batch = ongoing_batch(&tracker);

            for draw in draws {
                let _ = tracker.record_consumption(&batch, &wheat, Decimal::from(draw), false, &test_actor());
                let unit = tracker.executor().ledger().unit(&wheat).unwrap();
                let run = tracker.run_for_batch(&batch).unwrap();
                let recorded: Decimal = run
                    .batch(&batch)
                    .unwrap()
                    .consumed_units
                    .iter()
                    .map(|c| c.consumed_weight)
                    .sum();
                prop_assert_eq!(recorded + unit.current_weight(), dec!(1000));
            }
        }
    }
}
