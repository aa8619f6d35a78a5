//! Dispatch orders and the FEFO allocation engine.
//!
//! Suggestions are read-only. Fulfillment commits go through the inventory
//! move executor, so every dispatched pallet leaves a consumption record in
//! its unit's movement history.

pub mod engine;
pub mod fefo;
pub mod order;
pub mod store;

pub use engine::{AllocationEngine, FulfillmentOutcome};
pub use fefo::{Candidate, Suggestion};
pub use order::{
    DispatchItem, DispatchOrder, DispatchOrderCommand, DispatchOrderEvent, DispatchStatus,
    FulfilledPallet,
};
pub use store::{DispatchOrders, InMemoryDispatchOrders};
