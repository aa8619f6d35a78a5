//! Stock ledger, movement validation and move execution.
//!
//! Units are aggregates: commands are decided purely in `handle`, and the
//! executor commits the resulting state with an exact version expectation.
//! Nothing here knows about storage technology or transport.

pub mod executor;
pub mod label;
pub mod ledger;
pub mod location;
pub mod store;
pub mod topology;
pub mod unit;
pub mod validator;

pub use executor::{ConsumeRequest, MoveExecutor, MoveReceipt, MoveRequest};
pub use label::{LabelSink, LoggingLabelSink, RecordingLabelSink, UnitLabel};
pub use ledger::Ledger;
pub use location::{Location, LocationKind, LocationRegistry, LocationRole, StationBinding};
pub use store::{InMemoryStockStore, SiteSource, StaticSite, StockStore, StoreError};
pub use unit::{
    MovementAction, MovementRecord, PackageForm, StockKind, StockUnit, StockUnitCommand,
    StockUnitEvent,
};
pub use validator::{CheckResult, MoveValidation, MoveValidator, RuleKind, SiteView};
