//! Allocation engine: FEFO suggestions and scan-driven fulfillment.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use feedflow_core::{
    Actor, Aggregate, AggregateRoot, DispatchOrderId, DomainError, DomainResult, ExpectedVersion,
    UnitId,
};
use feedflow_inventory::{ConsumeRequest, MoveExecutor, StockStore};

use crate::fefo::{self, Candidate, Suggestion};
use crate::order::{
    CompleteOrder, DispatchItem, DispatchOrder, DispatchOrderCommand, FulfilledPallet,
    RecordPallet,
};
use crate::store::DispatchOrders;

/// Result of a fulfillment scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FulfillmentOutcome {
    /// The pallet was consumed into the dispatch location and recorded on the item.
    Committed {
        item_index: usize,
        pallet: FulfilledPallet,
        item_fulfilled_kg: Decimal,
        item_complete: bool,
    },
    /// The pallet is too heavy for what the item still needs. Nothing changed;
    /// split `unit_to_split` externally and scan the part weighing `needed_weight`.
    SplitSuggested {
        unit_to_split: UnitId,
        display_id: String,
        unit_weight: Decimal,
        needed_weight: Decimal,
    },
}

pub struct AllocationEngine<S, O> {
    executor: MoveExecutor<S>,
    orders: Arc<O>,
    commit: Mutex<()>,
}

impl<S: StockStore, O: DispatchOrders> AllocationEngine<S, O> {
    pub fn new(executor: MoveExecutor<S>, orders: Arc<O>) -> Self {
        Self {
            executor,
            orders,
            commit: Mutex::new(()),
        }
    }

    pub fn orders(&self) -> &Arc<O> {
        &self.orders
    }

    pub fn create_order(
        &self,
        recipient: &str,
        items: Vec<DispatchItem>,
        actor: &Actor,
    ) -> DomainResult<DispatchOrder> {
        let order = DispatchOrder::new(DispatchOrderId::new(), recipient, items, Utc::now())?;
        self.orders.save_order(&order, ExpectedVersion::Exact(0))?;
        info!(order = %order.id(), recipient, items = order.items().len(), actor = %actor, "dispatch order created");
        Ok(order)
    }

    pub fn order(&self, id: &DispatchOrderId) -> DomainResult<DispatchOrder> {
        self.orders
            .load_order(id)?
            .ok_or_else(|| DomainError::not_found(format!("dispatch order {id}")))
    }

    /// Read-only FEFO recommendation: one candidate per unfulfilled item.
    pub fn suggest(&self, order_id: &DispatchOrderId, today: NaiveDate) -> DomainResult<Vec<Suggestion>> {
        let order = self.order(order_id)?;
        let config = self.executor.config();

        let ledger = self.executor.ledger();
        let dispatch = ledger.location(&config.dispatch_location_id).ok_or_else(|| {
            DomainError::not_found(format!("dispatch location {}", config.dispatch_location_id))
        })?;

        let candidates = ledger
            .units()?
            .iter()
            .filter(|u| fefo::is_dispatchable(u, today, config.consumed_epsilon, &dispatch))
            .filter_map(Candidate::from_unit)
            .collect();

        Ok(fefo::suggest_for_order(&order, candidates))
    }

    /// Handle one scanned pallet against an order.
    pub fn fulfill_scan(
        &self,
        order_id: &DispatchOrderId,
        scanned_code: &str,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> DomainResult<FulfillmentOutcome> {
        let _guard = self.commit.lock().unwrap_or_else(PoisonError::into_inner);

        let mut order = self.order(order_id)?;
        if !order.is_open() {
            return Err(DomainError::state_conflict(format!(
                "dispatch order {order_id} is already completed"
            )));
        }
        let expected = order.version();

        let unit = self.executor.ledger().find_unit(scanned_code)?;
        let unit_id = unit.id().clone();
        let today = at.date_naive();

        let denial = if order.contains_unit(&unit_id) {
            Some(("duplicate_scan", format!("unit {unit_id} is already on this order")))
        } else if unit.is_archived() {
            Some(("unit_unavailable", format!("unit {unit_id} is archived")))
        } else if unit.is_blocked() {
            Some(("unit_unavailable", format!("unit {unit_id} is blocked")))
        } else if unit.is_expired(today) {
            Some(("unit_unavailable", format!("unit {unit_id} is expired")))
        } else {
            None
        };
        if let Some((check, reason)) = denial {
            warn!(order = %order_id, unit = %unit_id, reason = %reason, "scan denied");
            return Err(DomainError::denied(check, reason));
        }

        let Some(item_index) = order.open_item_for(unit.product_name()) else {
            warn!(order = %order_id, unit = %unit_id, product = unit.product_name(), "scan denied");
            return Err(DomainError::denied(
                "product_mismatch",
                format!("order has no unfulfilled item for {}", unit.product_name()),
            ));
        };

        let item = &order.items()[item_index];
        let weight = unit.current_weight();
        let tolerance = self.executor.config().dispatch_tolerance;
        if item.fulfilled_weight_kg + weight > item.requested_weight_kg + tolerance {
            let needed_weight = item.remaining_kg();
            info!(order = %order_id, unit = %unit_id, %weight, %needed_weight, "split suggested");
            return Ok(FulfillmentOutcome::SplitSuggested {
                unit_to_split: unit_id,
                display_id: unit.display_id().to_string(),
                unit_weight: weight,
                needed_weight,
            });
        }

        let pallet = FulfilledPallet {
            unit_id: unit_id.clone(),
            display_id: unit.display_id().to_string(),
            weight,
        };
        let command = DispatchOrderCommand::RecordPallet(RecordPallet {
            item_index,
            pallet: pallet.clone(),
            occurred_at: at,
        });
        let events = order.handle(&command)?;

        self.executor.consume(
            ConsumeRequest::new(unit_id.clone(), weight, actor.clone())
                .moving_to(self.executor.config().dispatch_location_id.clone())
                .with_notes(format!("dispatch order {order_id}"))
                .at(at),
        )?;

        for event in &events {
            order.apply(event);
        }
        self.orders
            .save_order(&order, ExpectedVersion::Exact(expected))?;

        let item = &order.items()[item_index];
        info!(
            order = %order_id,
            unit = %unit_id,
            %weight,
            fulfilled = %item.fulfilled_weight_kg,
            requested = %item.requested_weight_kg,
            "pallet dispatched"
        );

        Ok(FulfillmentOutcome::Committed {
            item_index,
            pallet,
            item_fulfilled_kg: item.fulfilled_weight_kg,
            item_complete: item.is_fulfilled(),
        })
    }

    /// Mark the order complete. Denied while any item is short.
    pub fn complete_order(
        &self,
        order_id: &DispatchOrderId,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> DomainResult<DispatchOrder> {
        let _guard = self.commit.lock().unwrap_or_else(PoisonError::into_inner);

        let mut order = self.order(order_id)?;
        let expected = order.version();
        order.execute(&DispatchOrderCommand::CompleteOrder(CompleteOrder { occurred_at: at }))?;
        self.orders
            .save_order(&order, ExpectedVersion::Exact(expected))?;

        info!(order = %order_id, actor = %actor, "dispatch order completed");
        Ok(order)
    }
}
