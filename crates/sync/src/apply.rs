//! Dispatching decoded commands to the engine services.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use feedflow_core::{Actor, DomainResult};
use feedflow_dispatch::{AllocationEngine, DispatchOrders, FulfillmentOutcome};
use feedflow_inventory::{MoveExecutor, MoveReceipt, MoveRequest, StockStore};
use feedflow_production::{ConsumptionReceipt, ConsumptionTracker, ProductionRun, Repository};

use crate::command::CommandPayload;

/// What an applied command did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandOutcome {
    Moved(MoveReceipt),
    Consumed(ConsumptionReceipt),
    Fulfillment(FulfillmentOutcome),
    DispatchCompleted { order_id: String },
    Blocked { unit_id: String },
    Annulled { unit_id: String },
}

/// The services a command may touch. All share one ledger.
pub struct EngineServices<S, O, R> {
    pub executor: MoveExecutor<S>,
    pub allocation: Arc<AllocationEngine<S, O>>,
    pub tracker: Arc<ConsumptionTracker<S, R>>,
}

impl<S, O, R> EngineServices<S, O, R>
where
    S: StockStore,
    O: DispatchOrders,
    R: Repository<ProductionRun>,
{
    /// Run one command against current state. Every rule is re-checked here;
    /// nothing from enqueue time is trusted.
    pub fn apply(
        &self,
        payload: &CommandPayload,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> DomainResult<CommandOutcome> {
        match payload {
            CommandPayload::MoveUnit {
                unit_id,
                target_location_id,
                notes,
            } => {
                let mut request =
                    MoveRequest::new(unit_id.clone(), target_location_id.clone(), actor.clone()).at(at);
                if let Some(notes) = notes {
                    request = request.with_notes(notes.clone());
                }
                self.executor.execute_move(request).map(CommandOutcome::Moved)
            }
            CommandPayload::RecordConsumption {
                batch_id,
                unit_id,
                weight,
                is_adjustment,
            } => self
                .tracker
                .record_consumption_at(batch_id, unit_id, *weight, *is_adjustment, actor, at)
                .map(CommandOutcome::Consumed),
            CommandPayload::FulfillScan {
                order_id,
                scanned_code,
            } => self
                .allocation
                .fulfill_scan(order_id, scanned_code, actor, at)
                .map(CommandOutcome::Fulfillment),
            CommandPayload::CompleteDispatch { order_id } => {
                self.allocation.complete_order(order_id, actor, at)?;
                Ok(CommandOutcome::DispatchCompleted {
                    order_id: order_id.to_string(),
                })
            }
            CommandPayload::BlockUnit { unit_id, reason } => {
                self.executor.block(unit_id, reason, actor)?;
                Ok(CommandOutcome::Blocked {
                    unit_id: unit_id.to_string(),
                })
            }
            CommandPayload::AnnulOutput {
                batch_id,
                unit_id,
                reason,
            } => {
                self.tracker.annul_output(batch_id, unit_id, reason, actor)?;
                Ok(CommandOutcome::Annulled {
                    unit_id: unit_id.to_string(),
                })
            }
        }
    }
}
