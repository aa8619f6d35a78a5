//! Offline command log for the engine.
//!
//! Clients record movement, consumption and dispatch actions as
//! [`EngineCommand`]s while disconnected. [`CommandQueue::replay`] applies them
//! against the live ledger, re-running every check on current state.

pub mod apply;
pub mod command;
pub mod queue;

pub use apply::{CommandOutcome, EngineServices};
pub use command::{CommandPayload, CommandStatus, EngineCommand, QueuedCommand};
pub use queue::{CommandQueue, ReplayReport, SYNCED_RETENTION_DAYS};
