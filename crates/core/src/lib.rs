//! `feedflow-core`: foundation shared by the inventory movement and allocation engine.
//!
//! Pure domain primitives only: errors, identifiers, aggregate/event traits,
//! the acting user, and operational configuration.

pub mod actor;
pub mod aggregate;
pub mod config;
pub mod error;
pub mod id;

pub use actor::{Actor, AllowAll, Permission, PermissionCheck, StaticPermissions};
pub use aggregate::{Aggregate, AggregateRoot, Event, ExpectedVersion};
pub use config::EngineConfig;
pub use error::{DomainError, DomainResult};
pub use id::{
    AdjustmentOrderId, BatchId, CommandId, DispatchOrderId, LocationId, RunId, UnitId, UserId,
};
