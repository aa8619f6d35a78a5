use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::{NaiveDate, Utc};
use feedflow_core::{Actor, EngineConfig, LocationId, UnitId};
use feedflow_inventory::{
    ConsumeRequest, InMemoryStockStore, Ledger, Location, LocationRegistry, LocationRole,
    MoveExecutor, MoveRequest, MoveValidator, PackageForm, StationBinding, StockKind, StockUnit,
};
use rust_decimal::Decimal;
use std::sync::Arc;

fn site_with_units(units: usize) -> MoveExecutor<InMemoryStockStore> {
    let mut registry = LocationRegistry::with_locations([
        Location::new("MS01", "Raw warehouse", LocationRole::RawWarehouse),
        Location::new("PF", "Production floor", LocationRole::ProductionFloor),
        Location::new("BB01", "Big-bag station", LocationRole::FeedStation),
        Location::new("R1", "Rack", LocationRole::Rack).with_capacity(u32::MAX),
    ]);
    registry
        .bind_station(StationBinding::new("BB01", "wheat", PackageForm::BigBag))
        .expect("bind station");

    let ledger = Arc::new(Ledger::new(registry, InMemoryStockStore::new()));
    let executor = MoveExecutor::new(ledger, EngineConfig::default());
    let production = NaiveDate::from_ymd_opt(2026, 1, 1).expect("date");

    for i in 0..units {
        let unit = StockUnit::new(
            UnitId::new(format!("U{i}")),
            StockKind::RawMaterial,
            "wheat",
            PackageForm::BigBag,
            Decimal::from(1_000),
            production,
        );
        executor
            .receive(unit, &LocationId::new("MS01"), &Actor::system(), Utc::now())
            .expect("receive");
    }

    executor
}

fn bench_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate_move");
    let today = NaiveDate::from_ymd_opt(2026, 6, 1).expect("date");
    let validator = MoveValidator::default();

    for units in [10usize, 100, 1_000] {
        let executor = site_with_units(units);
        let unit = executor.ledger().unit(&UnitId::new("U0")).expect("unit");
        let target = LocationId::new("R1");

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(units), &units, |b, _| {
            b.iter(|| {
                let v = validator
                    .validate(black_box(&unit), &target, executor.ledger().as_ref(), today)
                    .expect("validate");
                black_box(v.allowed)
            })
        });
    }

    group.finish();
}

fn bench_move_round_trip(c: &mut Criterion) {
    let executor = site_with_units(100);
    let id = UnitId::new("U0");
    let floor = LocationId::new("PF");
    let warehouse = LocationId::new("MS01");

    c.bench_function("execute_move_there_and_back", |b| {
        b.iter(|| {
            executor
                .execute_move(MoveRequest::new(id.clone(), floor.clone(), Actor::system()))
                .expect("move out");
            executor
                .execute_move(MoveRequest::new(id.clone(), warehouse.clone(), Actor::system()))
                .expect("move back");
        })
    });
}

fn bench_consume(c: &mut Criterion) {
    c.bench_function("consume_small_draws", |b| {
        b.iter_batched(
            || site_with_units(10),
            |executor| {
                for _ in 0..10 {
                    executor
                        .consume(ConsumeRequest::new(
                            UnitId::new("U0"),
                            Decimal::from(50),
                            Actor::system(),
                        ))
                        .expect("consume");
                }
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_validate, bench_move_round_trip, bench_consume);
criterion_main!(benches);
