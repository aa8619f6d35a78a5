use std::collections::BTreeMap;
use std::sync::RwLock;

use feedflow_core::{AggregateRoot, DispatchOrderId, ExpectedVersion};
use feedflow_inventory::StoreError;

use crate::order::DispatchOrder;

/// Versioned storage of dispatch orders.
pub trait DispatchOrders: Send + Sync {
    fn load_order(&self, id: &DispatchOrderId) -> Result<Option<DispatchOrder>, StoreError>;

    fn save_order(&self, order: &DispatchOrder, expected: ExpectedVersion)
        -> Result<(), StoreError>;

    fn list_orders(&self) -> Result<Vec<DispatchOrder>, StoreError>;
}

/// In-memory dispatch order repository.
#[derive(Debug, Default)]
pub struct InMemoryDispatchOrders {
    orders: RwLock<BTreeMap<DispatchOrderId, DispatchOrder>>,
}

impl InMemoryDispatchOrders {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DispatchOrders for InMemoryDispatchOrders {
    fn load_order(&self, id: &DispatchOrderId) -> Result<Option<DispatchOrder>, StoreError> {
        let orders = self
            .orders
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(orders.get(id).cloned())
    }

    fn save_order(
        &self,
        order: &DispatchOrder,
        expected: ExpectedVersion,
    ) -> Result<(), StoreError> {
        let mut orders = self
            .orders
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;

        if let Some(stored) = orders.get(order.id()) {
            if !expected.matches(stored.version()) {
                return Err(StoreError::Concurrency(format!(
                    "dispatch order {}: expected {expected:?}, found {}",
                    order.id(),
                    stored.version()
                )));
            }
        } else if !expected.matches(0) {
            return Err(StoreError::Concurrency(format!(
                "dispatch order {} does not exist yet",
                order.id()
            )));
        }

        orders.insert(*order.id(), order.clone());
        Ok(())
    }

    fn list_orders(&self) -> Result<Vec<DispatchOrder>, StoreError> {
        let orders = self
            .orders
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(orders.values().cloned().collect())
    }
}
