//! Scripted demo shift: receiving, feeding a station, one production batch
//! with an adjustment, FEFO dispatch, and an offline replay.

use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use feedflow_core::{Actor, AggregateRoot, EngineConfig, LocationId, Permission, StaticPermissions, UnitId, UserId};
use feedflow_dispatch::{AllocationEngine, DispatchItem, FulfillmentOutcome, InMemoryDispatchOrders, Suggestion};
use feedflow_inventory::{
    InMemoryStockStore, Ledger, Location, LocationRole, LoggingLabelSink, MoveExecutor, MoveRequest,
    PackageForm, StaticSite, StationBinding, StockKind, StockUnit,
};
use feedflow_production::{
    AdjustmentLine, AdjustmentWorkflow, ConsumptionTracker, InMemoryRepository, Recipe, Reconciliation,
};
use feedflow_sync::{CommandPayload, CommandQueue, EngineServices, ReplayReport};

#[derive(Debug, Serialize)]
pub struct ShiftReport {
    pub moves: Vec<String>,
    pub denials: Vec<String>,
    pub reconciliation: Reconciliation,
    pub suggestions: Vec<Suggestion>,
    pub dispatch: Vec<FulfillmentOutcome>,
    pub replay: ReplayReport,
}

fn demo_site() -> StaticSite {
    StaticSite::new(
        vec![
            Location::new("MS01", "Main raw warehouse", LocationRole::RawWarehouse),
            Location::new("PB01", "Production buffer", LocationRole::ProductionBuffer),
            Location::new("BB01", "Big-bag station 1", LocationRole::FeedStation),
            Location::new("MGW01", "FG warehouse A", LocationRole::FinishedGoodsWarehouse),
            Location::new("MGW02", "FG warehouse B", LocationRole::FinishedGoodsWarehouse).with_capacity(40),
            Location::new("LOADING", "Loading dock", LocationRole::Loading),
            Location::new("ARCHIVE", "Archive", LocationRole::Archive),
        ],
        vec![StationBinding::new("BB01", "corn", PackageForm::BigBag)],
    )
}

fn raw(id: &str, product: &str, form: PackageForm, weight: i64) -> StockUnit {
    StockUnit::new(
        UnitId::new(id),
        StockKind::RawMaterial,
        product,
        form,
        Decimal::from(weight),
        Utc::now().date_naive(),
    )
}

fn pallet(id: &str, weight: i64, shelf_days: i64) -> StockUnit {
    let today = Utc::now().date_naive();
    StockUnit::new(
        UnitId::new(id),
        StockKind::FinishedGood,
        "broiler-grower",
        PackageForm::Piece,
        Decimal::from(weight),
        today,
    )
    .with_expiry(today + Duration::days(shelf_days))
}

pub fn run(config: EngineConfig) -> anyhow::Result<ShiftReport> {
    let ledger = Arc::new(
        Ledger::from_source(&demo_site(), InMemoryStockStore::new()).context("loading demo site")?,
    );
    let executor = MoveExecutor::new(ledger, config).with_label_sink(Arc::new(LoggingLabelSink));
    let allocation = Arc::new(AllocationEngine::new(
        executor.clone(),
        Arc::new(InMemoryDispatchOrders::new()),
    ));
    let tracker = Arc::new(ConsumptionTracker::new(
        executor.clone(),
        Arc::new(InMemoryRepository::new()),
    ));

    let operator = Actor::new(UserId::new(), "operator");
    let planner = Actor::new(UserId::new(), "planner");
    let adjustments = AdjustmentWorkflow::new(
        tracker.clone(),
        Arc::new(InMemoryRepository::new()),
        Arc::new(StaticPermissions::new().grant(planner.user_id, Permission::MANAGE_ADJUSTMENTS)),
    );

    let mut moves = Vec::new();
    let mut denials = Vec::new();
    let ms01 = LocationId::new("MS01");
    let now = Utc::now();

    // Receiving
    for unit in [
        raw("CORN-1", "corn", PackageForm::BigBag, 900),
        raw("CORN-2", "corn", PackageForm::SmallBag, 25),
        raw("SOY-1", "soy", PackageForm::BigBag, 500),
        raw("PMX-1", "premix", PackageForm::SmallBag, 20),
    ] {
        executor.receive(unit, &ms01, &Actor::system(), now)?;
    }

    // Feeding the station: the small bag is turned away.
    for (unit, target) in [("CORN-1", "PB01"), ("CORN-1", "BB01"), ("CORN-2", "BB01")] {
        let request = MoveRequest::new(UnitId::new(unit), LocationId::new(target), operator.clone());
        match executor.execute_move(request) {
            Ok(receipt) => moves.push(receipt.message),
            Err(err) => denials.push(format!("{unit} -> {target}: {err}")),
        }
    }

    // Production
    let run = tracker.plan_run(
        "broiler-grower",
        Recipe::new([("corn", Decimal::from(600)), ("soy", Decimal::from(400))]),
        &[Decimal::from(1000)],
        &planner,
    )?;
    let batch = run.batches()[0].id;
    tracker.start_run(run.id(), &planner)?;
    tracker.start_batch(&batch, &planner)?;
    tracker.record_consumption(&batch, &UnitId::new("CORN-1"), Decimal::from(600), false, &operator)?;
    tracker.record_consumption(&batch, &UnitId::new("SOY-1"), Decimal::from(395), false, &operator)?;

    let order = adjustments.create(
        &batch,
        "protein below target",
        vec![AdjustmentLine::new("premix", Decimal::from(20))],
        &planner,
    )?;
    adjustments.start_picking(order.id(), &operator)?;
    adjustments.record_pick(order.id(), 0, "PMX-1", Decimal::from(20), &operator)?;
    adjustments.assign_preparation_location(order.id(), "BUCKET-1", &operator)?;
    adjustments.start_processing(order.id(), &operator)?;
    adjustments.complete(order.id(), &planner)?;

    let mgw01 = LocationId::new("MGW01");
    tracker.record_output(&batch, pallet("FG-1001", 500, 120), &mgw01, &operator)?;
    tracker.record_output(&batch, pallet("FG-1002", 500, 90), &mgw01, &operator)?;
    let reconciliation = tracker.reconcile(&batch)?;
    tracker.complete_batch(&batch, &planner)?;
    tracker.complete_run(run.id(), &planner)?;

    // Dispatch, scanning what FEFO suggests.
    let dispatch_order = allocation.create_order(
        "Green Farm",
        vec![DispatchItem::new("broiler-grower", Decimal::from(500))],
        &operator,
    )?;
    let suggestions = allocation.suggest(dispatch_order.id(), Utc::now().date_naive())?;
    let mut dispatch = Vec::new();
    for suggestion in &suggestions {
        if let Some(candidate) = &suggestion.candidate {
            dispatch.push(allocation.fulfill_scan(
                dispatch_order.id(),
                &candidate.display_id,
                &operator,
                Utc::now(),
            )?);
        }
    }
    allocation.complete_order(dispatch_order.id(), &operator, Utc::now())?;

    // A handheld that was offline reslots the remaining pallet, and also tries
    // to move the one already loaded.
    let queue = CommandQueue::new();
    for unit in ["FG-1001", "FG-1002"] {
        queue.enqueue_payload(
            &CommandPayload::MoveUnit {
                unit_id: UnitId::new(unit),
                target_location_id: LocationId::new("MGW02"),
                notes: Some("reslot after dispatch".to_string()),
            },
            &operator,
            Utc::now(),
        )?;
    }
    let services = EngineServices {
        executor,
        allocation,
        tracker,
    };
    let replay = queue.replay(&services, &operator);

    info!(
        moves = moves.len(),
        denials = denials.len(),
        dispatched = dispatch.len(),
        replay_failures = replay.failed.len(),
        "demo shift finished"
    );
    Ok(ShiftReport {
        moves,
        denials,
        reconciliation,
        suggestions,
        dispatch,
        replay,
    })
}
