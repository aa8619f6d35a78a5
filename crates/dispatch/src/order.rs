use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use feedflow_core::{Aggregate, AggregateRoot, DispatchOrderId, DomainError, Event, UnitId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Open,
    Completed,
}

/// A pallet committed against a dispatch item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfilledPallet {
    pub unit_id: UnitId,
    pub display_id: String,
    pub weight: Decimal,
}

/// One product line of a dispatch order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchItem {
    pub product_name: String,
    pub requested_weight_kg: Decimal,
    pub fulfilled_weight_kg: Decimal,
    pub fulfilled_pallets: Vec<FulfilledPallet>,
}

impl DispatchItem {
    pub fn new(product_name: impl Into<String>, requested_weight_kg: Decimal) -> Self {
        Self {
            product_name: product_name.into(),
            requested_weight_kg,
            fulfilled_weight_kg: Decimal::ZERO,
            fulfilled_pallets: Vec::new(),
        }
    }

    pub fn is_fulfilled(&self) -> bool {
        self.fulfilled_weight_kg >= self.requested_weight_kg
    }

    /// Weight still needed; never negative.
    pub fn remaining_kg(&self) -> Decimal {
        (self.requested_weight_kg - self.fulfilled_weight_kg).max(Decimal::ZERO)
    }
}

/// Aggregate root: DispatchOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOrder {
    id: DispatchOrderId,
    recipient: String,
    items: Vec<DispatchItem>,
    status: DispatchStatus,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    version: u64,
}

impl DispatchOrder {
    /// Plan a new order. Every item needs a product and a positive weight.
    pub fn new(
        id: DispatchOrderId,
        recipient: impl Into<String>,
        items: Vec<DispatchItem>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let recipient = recipient.into();
        if recipient.trim().is_empty() {
            return Err(DomainError::validation("recipient cannot be empty"));
        }
        if items.is_empty() {
            return Err(DomainError::validation("dispatch order needs at least one item"));
        }
        for item in &items {
            if item.product_name.trim().is_empty() {
                return Err(DomainError::validation("item product name cannot be empty"));
            }
            if item.requested_weight_kg <= Decimal::ZERO {
                return Err(DomainError::validation(format!(
                    "requested weight for {} must be positive",
                    item.product_name
                )));
            }
            if !item.fulfilled_pallets.is_empty() || item.fulfilled_weight_kg != Decimal::ZERO {
                return Err(DomainError::validation(
                    "new dispatch items cannot carry fulfilled pallets",
                ));
            }
        }

        Ok(Self {
            id,
            recipient,
            items,
            status: DispatchStatus::Open,
            created_at,
            completed_at: None,
            version: 0,
        })
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn items(&self) -> &[DispatchItem] {
        &self.items
    }

    pub fn status(&self) -> DispatchStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn is_open(&self) -> bool {
        self.status == DispatchStatus::Open
    }

    pub fn contains_unit(&self, unit_id: &UnitId) -> bool {
        self.items
            .iter()
            .flat_map(|i| i.fulfilled_pallets.iter())
            .any(|p| &p.unit_id == unit_id)
    }

    /// First unfulfilled item for `product_name`.
    pub fn open_item_for(&self, product_name: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|i| i.product_name == product_name && !i.is_fulfilled())
    }

    pub fn is_fully_fulfilled(&self) -> bool {
        self.items.iter().all(DispatchItem::is_fulfilled)
    }
}

impl AggregateRoot for DispatchOrder {
    type Id = DispatchOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RecordPallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPallet {
    pub item_index: usize,
    pub pallet: FulfilledPallet,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteOrder {
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchOrderCommand {
    RecordPallet(RecordPallet),
    CompleteOrder(CompleteOrder),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PalletRecorded {
    pub order_id: DispatchOrderId,
    pub item_index: usize,
    pub pallet: FulfilledPallet,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCompleted {
    pub order_id: DispatchOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchOrderEvent {
    PalletRecorded(PalletRecorded),
    OrderCompleted(OrderCompleted),
}

impl Event for DispatchOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DispatchOrderEvent::PalletRecorded(_) => "dispatch.order.pallet_recorded",
            DispatchOrderEvent::OrderCompleted(_) => "dispatch.order.completed",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DispatchOrderEvent::PalletRecorded(e) => e.occurred_at,
            DispatchOrderEvent::OrderCompleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for DispatchOrder {
    type Command = DispatchOrderCommand;
    type Event = DispatchOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DispatchOrderEvent::PalletRecorded(e) => {
                if let Some(item) = self.items.get_mut(e.item_index) {
                    item.fulfilled_weight_kg += e.pallet.weight;
                    item.fulfilled_pallets.push(e.pallet.clone());
                }
            }
            DispatchOrderEvent::OrderCompleted(e) => {
                self.status = DispatchStatus::Completed;
                self.completed_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if !self.is_open() {
            return Err(DomainError::state_conflict(format!(
                "dispatch order {} is already completed",
                self.id
            )));
        }

        match command {
            DispatchOrderCommand::RecordPallet(cmd) => {
                let item = self.items.get(cmd.item_index).ok_or_else(|| {
                    DomainError::validation(format!("order has no item #{}", cmd.item_index))
                })?;
                if cmd.pallet.weight <= Decimal::ZERO {
                    return Err(DomainError::validation("pallet weight must be positive"));
                }
                if self.contains_unit(&cmd.pallet.unit_id) {
                    return Err(DomainError::denied(
                        "duplicate_scan",
                        format!("unit {} is already on this order", cmd.pallet.unit_id),
                    ));
                }
                if item.is_fulfilled() {
                    return Err(DomainError::state_conflict(format!(
                        "item {} is already fulfilled",
                        item.product_name
                    )));
                }

                Ok(vec![DispatchOrderEvent::PalletRecorded(PalletRecorded {
                    order_id: self.id,
                    item_index: cmd.item_index,
                    pallet: cmd.pallet.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            DispatchOrderCommand::CompleteOrder(cmd) => {
                if let Some(item) = self.items.iter().find(|i| !i.is_fulfilled()) {
                    return Err(DomainError::denied(
                        "order_incomplete",
                        format!(
                            "{}: {} of {} kg fulfilled",
                            item.product_name, item.fulfilled_weight_kg, item.requested_weight_kg
                        ),
                    ));
                }

                Ok(vec![DispatchOrderEvent::OrderCompleted(OrderCompleted {
                    order_id: self.id,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_order() -> DispatchOrder {
        DispatchOrder::new(
            DispatchOrderId::new(),
            "Farm Co",
            vec![
                DispatchItem::new("broiler-starter", dec!(1000)),
                DispatchItem::new("layer-mash", dec!(500)),
            ],
            Utc::now(),
        )
        .unwrap()
    }

    fn pallet(id: &str, weight: Decimal) -> FulfilledPallet {
        FulfilledPallet {
            unit_id: UnitId::new(id),
            display_id: id.to_string(),
            weight,
        }
    }

    fn record(index: usize, p: FulfilledPallet) -> DispatchOrderCommand {
        DispatchOrderCommand::RecordPallet(RecordPallet {
            item_index: index,
            pallet: p,
            occurred_at: Utc::now(),
        })
    }

    fn complete() -> DispatchOrderCommand {
        DispatchOrderCommand::CompleteOrder(CompleteOrder {
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn new_order_rejects_bad_items() {
        let err = DispatchOrder::new(
            DispatchOrderId::new(),
            "Farm Co",
            vec![DispatchItem::new("x", Decimal::ZERO)],
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert!(DispatchOrder::new(DispatchOrderId::new(), " ", vec![], Utc::now()).is_err());
    }

    #[test]
    fn recording_pallets_accumulates_weight() {
        let mut order = test_order();
        order.execute(&record(0, pallet("P1", dec!(600)))).unwrap();
        order.execute(&record(0, pallet("P2", dec!(400)))).unwrap();

        let item = &order.items()[0];
        assert!(item.is_fulfilled());
        assert_eq!(item.fulfilled_weight_kg, dec!(1000));
        assert_eq!(item.fulfilled_pallets.len(), 2);
        assert_eq!(order.open_item_for("broiler-starter"), None);
        assert_eq!(order.open_item_for("layer-mash"), Some(1));
    }

    #[test]
    fn same_unit_cannot_be_recorded_twice() {
        let mut order = test_order();
        order.execute(&record(0, pallet("P1", dec!(100)))).unwrap();
        let err = order.handle(&record(1, pallet("P1", dec!(100)))).unwrap_err();
        assert!(matches!(err, DomainError::Denied { ref check, .. } if check == "duplicate_scan"));
    }

    #[test]
    fn completion_requires_every_item_fulfilled() {
        let mut order = test_order();
        order.execute(&record(0, pallet("P1", dec!(1000)))).unwrap();

        let err = order.handle(&complete()).unwrap_err();
        assert!(matches!(err, DomainError::Denied { ref check, .. } if check == "order_incomplete"));

        order.execute(&record(1, pallet("P2", dec!(500)))).unwrap();
        order.execute(&complete()).unwrap();
        assert_eq!(order.status(), DispatchStatus::Completed);
        assert!(order.completed_at().is_some());

        let err = order.handle(&complete()).unwrap_err();
        assert!(matches!(err, DomainError::StateConflict(_)));
        assert!(order.handle(&record(1, pallet("P3", dec!(1)))).is_err());
    }
}
