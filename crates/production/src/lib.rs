//! Production-side consumption: runs and batches, the consumption tracker,
//! and adjustment (corrective addition) orders.

pub mod adjustment;
pub mod run;
pub mod store;
pub mod tracker;
pub mod workflow;

pub use adjustment::{
    AdjustmentCommand, AdjustmentEvent, AdjustmentLine, AdjustmentOrder, AdjustmentPick,
    AdjustmentStatus,
};
pub use run::{
    BatchStatus, ConsumedUnit, ProducedGood, ProductionBatch, ProductionRun, ProductionRunCommand,
    ProductionRunEvent, Recipe, RecipeLine, RunStatus,
};
pub use store::{InMemoryRepository, Repository};
pub use tracker::{
    AdjustmentTotal, ConsumptionReceipt, ConsumptionTracker, Reconciliation, ReconciliationLine,
};
pub use workflow::AdjustmentWorkflow;
