use std::collections::HashMap;
use std::sync::RwLock;

use feedflow_core::{AggregateRoot, BatchId, ExpectedVersion};
use feedflow_inventory::StoreError;

use crate::run::ProductionRun;

/// Versioned storage for one aggregate type.
pub trait Repository<T: AggregateRoot>: Send + Sync {
    fn load(&self, id: &T::Id) -> Result<Option<T>, StoreError>;

    /// Compare-and-swap on the stored version; absent counts as version 0.
    fn save(&self, item: &T, expected: ExpectedVersion) -> Result<(), StoreError>;

    fn list(&self) -> Result<Vec<T>, StoreError>;
}

/// The run owning `batch_id`, if any.
pub fn run_for_batch<R>(runs: &R, batch_id: &BatchId) -> Result<Option<ProductionRun>, StoreError>
where
    R: Repository<ProductionRun> + ?Sized,
{
    Ok(runs
        .list()?
        .into_iter()
        .find(|run| run.batch(batch_id).is_some()))
}

/// In-memory repository.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug)]
pub struct InMemoryRepository<T: AggregateRoot> {
    items: RwLock<HashMap<T::Id, T>>,
}

impl<T: AggregateRoot> Default for InMemoryRepository<T> {
    fn default() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: AggregateRoot> InMemoryRepository<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T> Repository<T> for InMemoryRepository<T>
where
    T: AggregateRoot + Clone + Send + Sync,
    T::Id: Send + Sync + core::fmt::Display,
{
    fn load(&self, id: &T::Id) -> Result<Option<T>, StoreError> {
        let items = self
            .items
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(items.get(id).cloned())
    }

    fn save(&self, item: &T, expected: ExpectedVersion) -> Result<(), StoreError> {
        let mut items = self
            .items
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;

        let current = items.get(item.id()).map(|i| i.version()).unwrap_or(0);
        if !expected.matches(current) {
            return Err(StoreError::Concurrency(format!(
                "{}: expected {expected:?}, found {current}",
                item.id()
            )));
        }

        items.insert(item.id().clone(), item.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<T>, StoreError> {
        let items = self
            .items
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(items.values().cloned().collect())
    }
}
