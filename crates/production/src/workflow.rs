//! Adjustment order workflow: planning, picking, and booking the picked
//! material into the batch as adjustment consumption.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};

use feedflow_core::{
    Actor, AdjustmentOrderId, Aggregate, AggregateRoot, BatchId, DomainError, DomainResult,
    ExpectedVersion, LocationId, Permission, PermissionCheck, UnitId,
};
use feedflow_inventory::StockStore;

use crate::adjustment::{AdjustmentCommand, AdjustmentLine, AdjustmentOrder, AdjustmentStatus};
use crate::run::ProductionRun;
use crate::store::Repository;
use crate::tracker::{ensure_usable, ConsumptionReceipt, ConsumptionTracker};

pub struct AdjustmentWorkflow<S, R, A> {
    tracker: Arc<ConsumptionTracker<S, R>>,
    orders: Arc<A>,
    permissions: Arc<dyn PermissionCheck>,
    completing: Mutex<()>,
}

impl<S, R, A> AdjustmentWorkflow<S, R, A>
where
    S: StockStore,
    R: Repository<ProductionRun>,
    A: Repository<AdjustmentOrder>,
{
    pub fn new(
        tracker: Arc<ConsumptionTracker<S, R>>,
        orders: Arc<A>,
        permissions: Arc<dyn PermissionCheck>,
    ) -> Self {
        Self {
            tracker,
            orders,
            permissions,
            completing: Mutex::new(()),
        }
    }

    pub fn order(&self, id: &AdjustmentOrderId) -> DomainResult<AdjustmentOrder> {
        self.orders
            .load(id)?
            .ok_or_else(|| DomainError::not_found(format!("adjustment order {id}")))
    }

    /// Orders raised against `batch_id`, oldest first.
    pub fn orders_for_batch(&self, batch_id: &BatchId) -> DomainResult<Vec<AdjustmentOrder>> {
        let mut orders: Vec<_> = self
            .orders
            .list()?
            .into_iter()
            .filter(|o| &o.batch_id() == batch_id)
            .collect();
        orders.sort_by_key(|o| o.created_at());
        Ok(orders)
    }

    pub fn create(
        &self,
        batch_id: &BatchId,
        reason: &str,
        lines: Vec<AdjustmentLine>,
        actor: &Actor,
    ) -> DomainResult<AdjustmentOrder> {
        self.permissions
            .require(actor, &Permission::MANAGE_ADJUSTMENTS)?;

        let run = self.tracker.run_for_batch(batch_id)?;
        run.ongoing_batch(batch_id)?;

        let order = AdjustmentOrder::plan(
            AdjustmentOrderId::new(),
            *run.id(),
            *batch_id,
            reason,
            lines,
            actor.name.clone(),
            Utc::now(),
        )?;
        self.orders.save(&order, ExpectedVersion::Exact(0))?;
        info!(order = %order.id(), batch = %batch_id, actor = %actor, "adjustment order planned");
        Ok(order)
    }

    pub fn start_picking(&self, id: &AdjustmentOrderId, actor: &Actor) -> DomainResult<AdjustmentOrder> {
        let order = self.update(id, AdjustmentCommand::StartPicking { at: Utc::now() })?;
        info!(order = %id, actor = %actor, "adjustment picking started");
        Ok(order)
    }

    /// Attach the scanned preparation container.
    pub fn assign_preparation_location(
        &self,
        id: &AdjustmentOrderId,
        container_code: &str,
        actor: &Actor,
    ) -> DomainResult<AdjustmentOrder> {
        let location_id = LocationId::parse(container_code)?;
        let order = self.update(
            id,
            AdjustmentCommand::AssignPreparationLocation {
                location_id,
                at: Utc::now(),
            },
        )?;
        info!(order = %id, container = container_code, actor = %actor, "preparation location assigned");
        Ok(order)
    }

    /// Record a picked unit against a line. Nothing is deducted until completion.
    pub fn record_pick(
        &self,
        id: &AdjustmentOrderId,
        line_index: usize,
        unit_code: &str,
        weight: Decimal,
        actor: &Actor,
    ) -> DomainResult<AdjustmentOrder> {
        let order = self.order(id)?;
        let unit = self.tracker.executor().ledger().find_unit(unit_code)?;
        let now = Utc::now();
        ensure_usable(&unit, now)?;

        let already = order.picked_from(unit.id());
        if already + weight > unit.current_weight() {
            return Err(DomainError::denied(
                "insufficient_weight",
                format!(
                    "unit {} holds {}, {} already picked",
                    unit.display_id(),
                    unit.current_weight(),
                    already
                ),
            ));
        }

        let order = self.update(
            id,
            AdjustmentCommand::RecordPick {
                line_index,
                unit_id: unit.id().clone(),
                product_name: unit.product_name().to_string(),
                weight,
                at: now,
            },
        )?;
        info!(order = %id, unit = %unit.id(), %weight, actor = %actor, "adjustment pick recorded");
        Ok(order)
    }

    pub fn start_processing(&self, id: &AdjustmentOrderId, actor: &Actor) -> DomainResult<AdjustmentOrder> {
        let order = self.update(id, AdjustmentCommand::StartProcessing { at: Utc::now() })?;
        info!(order = %id, actor = %actor, "adjustment processing started");
        Ok(order)
    }

    /// Book the picked material into the batch as adjustment consumption,
    /// then close the order.
    ///
    /// Picks are merged per unit so each unit is consumed once. All units are
    /// checked up front; a failure there leaves the order and stock untouched.
    /// Each booked unit is recorded on the order before the next one is
    /// consumed, so a retry after a mid-way failure only books what is left.
    pub fn complete(
        &self,
        id: &AdjustmentOrderId,
        actor: &Actor,
    ) -> DomainResult<(AdjustmentOrder, Vec<ConsumptionReceipt>)> {
        self.permissions
            .require(actor, &Permission::MANAGE_ADJUSTMENTS)?;

        let _guard = self.completing.lock().unwrap_or_else(PoisonError::into_inner);
        let mut order = self.order(id)?;
        if order.status() != AdjustmentStatus::Processing {
            return Err(DomainError::state_conflict(format!(
                "adjustment {id} is {}, expected {}",
                order.status(),
                AdjustmentStatus::Processing
            )));
        }

        let run = self.tracker.run(&order.run_id())?;
        run.ongoing_batch(&order.batch_id())?;

        let now = Utc::now();
        let pending = order.unbooked_totals();
        let ledger = self.tracker.executor().ledger();
        for (unit_id, needed) in &pending {
            let unit = ledger.unit(unit_id)?;
            ensure_usable(&unit, now)?;
            if unit.current_weight() < *needed {
                return Err(DomainError::denied(
                    "insufficient_weight",
                    format!(
                        "unit {} now holds {}, adjustment needs {}",
                        unit.display_id(),
                        unit.current_weight(),
                        needed
                    ),
                ));
            }
        }

        let mut receipts = Vec::with_capacity(pending.len());
        for (unit_id, weight) in &pending {
            receipts.push(self.book(&mut order, unit_id, *weight, actor, now)?);
        }

        let expected = order.version();
        order.execute(&AdjustmentCommand::Complete { at: now })?;
        self.orders.save(&order, ExpectedVersion::Exact(expected))?;
        info!(
            order = %id,
            batch = %order.batch_id(),
            units = receipts.len(),
            actor = %actor,
            "adjustment order completed"
        );
        Ok((order, receipts))
    }

    /// Consume one unit's merged picks and mark it booked on the order.
    fn book(
        &self,
        order: &mut AdjustmentOrder,
        unit_id: &UnitId,
        weight: Decimal,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> DomainResult<ConsumptionReceipt> {
        let expected = order.version();
        let events = order.handle(&AdjustmentCommand::BookUnit {
            unit_id: unit_id.clone(),
            at,
        })?;
        let receipt = self
            .tracker
            .record_consumption_at(&order.batch_id(), unit_id, weight, true, actor, at)?;
        for event in &events {
            order.apply(event);
        }
        self.orders.save(order, ExpectedVersion::Exact(expected))?;
        debug!(order = %order.id(), unit = %unit_id, %weight, "adjustment unit booked");
        Ok(receipt)
    }

    fn update(&self, id: &AdjustmentOrderId, command: AdjustmentCommand) -> DomainResult<AdjustmentOrder> {
        let mut order = self.order(id)?;
        let expected = order.version();
        order.execute(&command)?;
        self.orders.save(&order, ExpectedVersion::Exact(expected))?;
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::Recipe;
    use crate::store::InMemoryRepository;
    use chrono::NaiveDate;
    use feedflow_core::{EngineConfig, StaticPermissions, UserId};
    use feedflow_inventory::{
        InMemoryStockStore, Ledger, Location, LocationRegistry, LocationRole, MoveExecutor,
        PackageForm, StockKind, StockUnit,
    };
    use rust_decimal_macros::dec;

    type Workflow = AdjustmentWorkflow<
        InMemoryStockStore,
        InMemoryRepository<ProductionRun>,
        InMemoryRepository<AdjustmentOrder>,
    >;

    struct Fixture {
        workflow: Workflow,
        tracker: Arc<ConsumptionTracker<InMemoryStockStore, InMemoryRepository<ProductionRun>>>,
        planner: Actor,
        operator: Actor,
        batch: BatchId,
    }

    fn fixture() -> Fixture {
        let registry = LocationRegistry::with_locations([Location::new(
            "MS01",
            "Raw warehouse",
            LocationRole::RawWarehouse,
        )]);
        let ledger = Arc::new(Ledger::new(registry, InMemoryStockStore::new()));
        let executor = MoveExecutor::new(ledger, EngineConfig::default());
        let tracker = Arc::new(ConsumptionTracker::new(
            executor,
            Arc::new(InMemoryRepository::new()),
        ));

        let planner = Actor::new(UserId::new(), "planner");
        let operator = Actor::new(UserId::new(), "operator");
        let permissions = StaticPermissions::new().grant(planner.user_id, Permission::MANAGE_ADJUSTMENTS);
        let workflow = AdjustmentWorkflow::new(
            tracker.clone(),
            Arc::new(InMemoryRepository::new()),
            Arc::new(permissions),
        );

        let unit = StockUnit::new(
            UnitId::new("ADD-1"),
            StockKind::RawMaterial,
            "premix",
            PackageForm::SmallBag,
            dec!(50),
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        );
        tracker
            .executor()
            .receive(unit, &LocationId::new("MS01"), &Actor::system(), Utc::now())
            .unwrap();

        let run = tracker
            .plan_run("broiler-grower", Recipe::new([("wheat", dec!(900))]), &[dec!(1000)], &planner)
            .unwrap();
        let batch = run.batches()[0].id;
        tracker.start_run(run.id(), &planner).unwrap();
        tracker.start_batch(&batch, &planner).unwrap();

        Fixture {
            workflow,
            tracker,
            planner,
            operator,
            batch,
        }
    }

    fn picked_and_processing(f: &Fixture, weight: Decimal) -> AdjustmentOrderId {
        let order = f
            .workflow
            .create(&f.batch, "protein too low", vec![AdjustmentLine::new("premix", weight)], &f.planner)
            .unwrap();
        let id = *order.id();
        f.workflow.start_picking(&id, &f.operator).unwrap();
        f.workflow.record_pick(&id, 0, "ADD-1", weight, &f.operator).unwrap();
        f.workflow
            .assign_preparation_location(&id, "BUCKET-3", &f.operator)
            .unwrap();
        f.workflow.start_processing(&id, &f.operator).unwrap();
        id
    }

    #[test]
    fn creating_and_completing_require_permission() {
        let f = fixture();
        let err = f
            .workflow
            .create(&f.batch, "fix", vec![AdjustmentLine::new("premix", dec!(5))], &f.operator)
            .unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));

        let id = picked_and_processing(&f, dec!(5));
        let err = f.workflow.complete(&id, &f.operator).unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));
    }

    #[test]
    fn completion_books_adjustment_consumption_and_archives_emptied_unit() {
        let f = fixture();
        let id = picked_and_processing(&f, dec!(50));

        let (order, receipts) = f.workflow.complete(&id, &f.planner).unwrap();
        assert_eq!(order.status(), AdjustmentStatus::Completed);
        assert_eq!(receipts.len(), 1);
        assert!(receipts[0].unit_archived);

        let unit = f.tracker.executor().ledger().unit(&UnitId::new("ADD-1")).unwrap();
        assert!(unit.is_archived());

        let run = f.tracker.run_for_batch(&f.batch).unwrap();
        let entries = &run.batch(&f.batch).unwrap().consumed_units;
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_adjustment);
        assert_eq!(entries[0].consumed_weight, dec!(50));
    }

    #[test]
    fn picking_more_than_the_unit_holds_is_denied() {
        let f = fixture();
        let order = f
            .workflow
            .create(&f.batch, "fix", vec![AdjustmentLine::new("premix", dec!(80))], &f.planner)
            .unwrap();
        f.workflow.start_picking(order.id(), &f.operator).unwrap();
        f.workflow.record_pick(order.id(), 0, "ADD-1", dec!(30), &f.operator).unwrap();

        let err = f
            .workflow
            .record_pick(order.id(), 0, "ADD-1", dec!(30), &f.operator)
            .unwrap_err();
        assert!(matches!(err, DomainError::Denied { ref check, .. } if check == "insufficient_weight"));
    }

    #[test]
    fn completion_fails_cleanly_when_the_batch_closed() {
        let f = fixture();
        let id = picked_and_processing(&f, dec!(20));
        f.tracker.complete_batch(&f.batch, &f.planner).unwrap();

        let err = f.workflow.complete(&id, &f.planner).unwrap_err();
        assert!(matches!(err, DomainError::StateConflict(_)));
        assert_eq!(f.workflow.order(&id).unwrap().status(), AdjustmentStatus::Processing);
        assert_eq!(
            f.tracker
                .executor()
                .ledger()
                .unit(&UnitId::new("ADD-1"))
                .unwrap()
                .current_weight(),
            dec!(50)
        );
    }

    #[test]
    fn adjustments_need_an_ongoing_batch() {
        let f = fixture();
        f.tracker.complete_batch(&f.batch, &f.planner).unwrap();
        let err = f
            .workflow
            .create(&f.batch, "late", vec![AdjustmentLine::new("premix", dec!(5))], &f.planner)
            .unwrap_err();
        assert!(matches!(err, DomainError::StateConflict(_)));
        assert!(f.workflow.orders_for_batch(&f.batch).unwrap().is_empty());
    }

    fn receive_premix(f: &Fixture, id: &str, weight: Decimal) {
        let unit = StockUnit::new(
            UnitId::new(id),
            StockKind::RawMaterial,
            "premix",
            PackageForm::SmallBag,
            weight,
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        );
        f.tracker
            .executor()
            .receive(unit, &LocationId::new("MS01"), &Actor::system(), Utc::now())
            .unwrap();
    }

    fn consumed(f: &Fixture) -> Vec<(UnitId, Decimal)> {
        let run = f.tracker.run_for_batch(&f.batch).unwrap();
        run.batch(&f.batch)
            .unwrap()
            .consumed_units
            .iter()
            .map(|c| (c.unit_id.clone(), c.consumed_weight))
            .collect()
    }

    #[test]
    fn split_picks_that_empty_a_unit_are_booked_as_one_consumption() {
        let f = fixture();
        let order = f
            .workflow
            .create(&f.batch, "protein too low", vec![AdjustmentLine::new("premix", dec!(50))], &f.planner)
            .unwrap();
        let id = *order.id();
        f.workflow.start_picking(&id, &f.operator).unwrap();
        f.workflow.record_pick(&id, 0, "ADD-1", dec!(49.995), &f.operator).unwrap();
        f.workflow.record_pick(&id, 0, "ADD-1", dec!(0.005), &f.operator).unwrap();
        f.workflow.assign_preparation_location(&id, "BUCKET-3", &f.operator).unwrap();
        f.workflow.start_processing(&id, &f.operator).unwrap();

        let (order, receipts) = f.workflow.complete(&id, &f.planner).unwrap();
        assert_eq!(order.status(), AdjustmentStatus::Completed);
        assert_eq!(receipts.len(), 1);
        assert!(receipts[0].unit_archived);
        assert_eq!(consumed(&f), vec![(UnitId::new("ADD-1"), dec!(50))]);
    }

    #[test]
    fn retrying_completion_after_a_failure_books_only_the_remaining_units() {
        let f = fixture();
        receive_premix(&f, "ADD-2", dec!(10));
        let order = f
            .workflow
            .create(&f.batch, "protein too low", vec![AdjustmentLine::new("premix", dec!(30))], &f.planner)
            .unwrap();
        let id = *order.id();
        f.workflow.start_picking(&id, &f.operator).unwrap();
        f.workflow.record_pick(&id, 0, "ADD-1", dec!(20), &f.operator).unwrap();
        f.workflow.record_pick(&id, 0, "ADD-2", dec!(10), &f.operator).unwrap();
        f.workflow.assign_preparation_location(&id, "BUCKET-3", &f.operator).unwrap();
        f.workflow.start_processing(&id, &f.operator).unwrap();

        // The first unit got booked, then the second one was blocked.
        let mut order = f.workflow.order(&id).unwrap();
        f.workflow
            .book(&mut order, &UnitId::new("ADD-1"), dec!(20), &f.planner, Utc::now())
            .unwrap();
        let ad2 = UnitId::new("ADD-2");
        f.tracker.executor().block(&ad2, "torn bag", &f.operator).unwrap();

        let err = f.workflow.complete(&id, &f.planner).unwrap_err();
        assert!(matches!(err, DomainError::Denied { ref check, .. } if check == "unit_unavailable"));
        let stuck = f.workflow.order(&id).unwrap();
        assert_eq!(stuck.status(), AdjustmentStatus::Processing);
        assert_eq!(stuck.booked_units(), &[UnitId::new("ADD-1")]);

        f.tracker.executor().unblock(&ad2, &f.operator).unwrap();
        let (order, receipts) = f.workflow.complete(&id, &f.planner).unwrap();
        assert_eq!(order.status(), AdjustmentStatus::Completed);
        assert_eq!(receipts.len(), 1);
        assert_eq!(
            consumed(&f),
            vec![(UnitId::new("ADD-1"), dec!(20)), (ad2.clone(), dec!(10))]
        );

        let ledger = f.tracker.executor().ledger();
        assert_eq!(ledger.unit(&UnitId::new("ADD-1")).unwrap().current_weight(), dec!(30));
        assert!(ledger.unit(&ad2).unwrap().is_archived());
        assert!(matches!(f.workflow.complete(&id, &f.planner), Err(DomainError::StateConflict(_))));
    }
}
