use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use feedflow_core::{Aggregate, AggregateRoot, BatchId, DomainError, Event, RunId, UnitId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Planned,
    Ongoing,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Planned,
    Ongoing,
    Completed,
}

/// Planned ingredient for one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeLine {
    pub product_name: String,
    pub planned_weight: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub lines: Vec<RecipeLine>,
}

impl Recipe {
    pub fn new<S: Into<String>>(lines: impl IntoIterator<Item = (S, Decimal)>) -> Self {
        Self {
            lines: lines
                .into_iter()
                .map(|(product_name, planned_weight)| RecipeLine {
                    product_name: product_name.into(),
                    planned_weight,
                })
                .collect(),
        }
    }

    pub fn contains(&self, product_name: &str) -> bool {
        self.lines.iter().any(|l| l.product_name == product_name)
    }

    pub fn planned_for(&self, product_name: &str) -> Option<Decimal> {
        self.lines
            .iter()
            .find(|l| l.product_name == product_name)
            .map(|l| l.planned_weight)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedUnit {
    pub unit_id: UnitId,
    pub product_name: String,
    pub consumed_weight: Decimal,
    pub is_adjustment: bool,
    pub consumed_by: String,
    pub consumed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducedGood {
    pub unit_id: UnitId,
    pub product_name: String,
    pub weight: Decimal,
    pub is_annulled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annul_reason: Option<String>,
    pub produced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionBatch {
    pub id: BatchId,
    pub batch_number: u32,
    pub target_weight: Decimal,
    pub status: BatchStatus,
    pub consumed_units: Vec<ConsumedUnit>,
    pub produced_goods: Vec<ProducedGood>,
}

impl ProductionBatch {
    fn planned(batch_number: u32, target_weight: Decimal) -> Self {
        Self {
            id: BatchId::new(),
            batch_number,
            target_weight,
            status: BatchStatus::Planned,
            consumed_units: Vec::new(),
            produced_goods: Vec::new(),
        }
    }

    pub fn is_ongoing(&self) -> bool {
        self.status == BatchStatus::Ongoing
    }

    /// Output weight, excluding annulled goods.
    pub fn yield_weight(&self) -> Decimal {
        self.produced_goods
            .iter()
            .filter(|g| !g.is_annulled)
            .map(|g| g.weight)
            .sum()
    }

    /// Standard (non-adjustment) weight consumed for `product_name`.
    pub fn standard_consumed(&self, product_name: &str) -> Decimal {
        self.consumed_units
            .iter()
            .filter(|c| !c.is_adjustment && c.product_name == product_name)
            .map(|c| c.consumed_weight)
            .sum()
    }
}

/// Aggregate root: a production run (task) and its batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionRun {
    id: RunId,
    product_name: String,
    recipe: Recipe,
    status: RunStatus,
    batches: Vec<ProductionBatch>,
    version: u64,
}

impl ProductionRun {
    /// Plan a run producing `product_name`, one batch per target weight.
    pub fn plan(
        id: RunId,
        product_name: impl Into<String>,
        recipe: Recipe,
        batch_targets: &[Decimal],
    ) -> Result<Self, DomainError> {
        let product_name = product_name.into();
        if product_name.trim().is_empty() {
            return Err(DomainError::validation("run product name cannot be empty"));
        }
        if recipe.lines.is_empty() {
            return Err(DomainError::validation("recipe needs at least one ingredient"));
        }
        if recipe.lines.iter().any(|l| l.planned_weight <= Decimal::ZERO) {
            return Err(DomainError::validation("recipe weights must be positive"));
        }
        if batch_targets.is_empty() || batch_targets.iter().any(|t| *t <= Decimal::ZERO) {
            return Err(DomainError::validation(
                "run needs at least one batch with a positive target weight",
            ));
        }

        let batches = batch_targets
            .iter()
            .zip(1u32..)
            .map(|(target, number)| ProductionBatch::planned(number, *target))
            .collect();

        Ok(Self {
            id,
            product_name,
            recipe,
            status: RunStatus::Planned,
            batches,
            version: 0,
        })
    }

    pub fn product_name(&self) -> &str {
        &self.product_name
    }

    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn batches(&self) -> &[ProductionBatch] {
        &self.batches
    }

    pub fn batch(&self, batch_id: &BatchId) -> Option<&ProductionBatch> {
        self.batches.iter().find(|b| &b.id == batch_id)
    }

    fn batch_mut(&mut self, batch_id: &BatchId) -> Option<&mut ProductionBatch> {
        self.batches.iter_mut().find(|b| &b.id == batch_id)
    }

    /// The batch, provided both it and the run are ongoing.
    pub fn ongoing_batch(&self, batch_id: &BatchId) -> Result<&ProductionBatch, DomainError> {
        let batch = self
            .batch(batch_id)
            .ok_or_else(|| DomainError::not_found(format!("batch {batch_id}")))?;
        if self.status != RunStatus::Ongoing {
            return Err(DomainError::state_conflict(format!(
                "run {} is not ongoing",
                self.id
            )));
        }
        if !batch.is_ongoing() {
            return Err(DomainError::state_conflict(format!(
                "batch {} is not ongoing",
                batch.batch_number
            )));
        }
        Ok(batch)
    }
}

impl AggregateRoot for ProductionRun {
    type Id = RunId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductionRunCommand {
    StartRun { at: DateTime<Utc> },
    StartBatch { batch_id: BatchId, at: DateTime<Utc> },
    RecordConsumption { batch_id: BatchId, entry: ConsumedUnit },
    RecordOutput { batch_id: BatchId, good: ProducedGood },
    AnnulOutput { batch_id: BatchId, unit_id: UnitId, reason: String, at: DateTime<Utc> },
    CompleteBatch { batch_id: BatchId, at: DateTime<Utc> },
    CompleteRun { at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductionRunEvent {
    RunStarted { run_id: RunId, occurred_at: DateTime<Utc> },
    BatchStarted { batch_id: BatchId, occurred_at: DateTime<Utc> },
    ConsumptionRecorded { batch_id: BatchId, entry: ConsumedUnit },
    OutputRecorded { batch_id: BatchId, good: ProducedGood },
    OutputAnnulled { batch_id: BatchId, unit_id: UnitId, reason: String, occurred_at: DateTime<Utc> },
    BatchCompleted { batch_id: BatchId, occurred_at: DateTime<Utc> },
    RunCompleted { run_id: RunId, occurred_at: DateTime<Utc> },
}

impl Event for ProductionRunEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductionRunEvent::RunStarted { .. } => "production.run.started",
            ProductionRunEvent::BatchStarted { .. } => "production.batch.started",
            ProductionRunEvent::ConsumptionRecorded { .. } => "production.batch.consumption_recorded",
            ProductionRunEvent::OutputRecorded { .. } => "production.batch.output_recorded",
            ProductionRunEvent::OutputAnnulled { .. } => "production.batch.output_annulled",
            ProductionRunEvent::BatchCompleted { .. } => "production.batch.completed",
            ProductionRunEvent::RunCompleted { .. } => "production.run.completed",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductionRunEvent::RunStarted { occurred_at, .. }
            | ProductionRunEvent::BatchStarted { occurred_at, .. }
            | ProductionRunEvent::OutputAnnulled { occurred_at, .. }
            | ProductionRunEvent::BatchCompleted { occurred_at, .. }
            | ProductionRunEvent::RunCompleted { occurred_at, .. } => *occurred_at,
            ProductionRunEvent::ConsumptionRecorded { entry, .. } => entry.consumed_at,
            ProductionRunEvent::OutputRecorded { good, .. } => good.produced_at,
        }
    }
}

impl Aggregate for ProductionRun {
    type Command = ProductionRunCommand;
    type Event = ProductionRunEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductionRunEvent::RunStarted { .. } => self.status = RunStatus::Ongoing,
            ProductionRunEvent::BatchStarted { batch_id, .. } => {
                if let Some(b) = self.batch_mut(batch_id) {
                    b.status = BatchStatus::Ongoing;
                }
            }
            ProductionRunEvent::ConsumptionRecorded { batch_id, entry } => {
                if let Some(b) = self.batch_mut(batch_id) {
                    b.consumed_units.push(entry.clone());
                }
            }
            ProductionRunEvent::OutputRecorded { batch_id, good } => {
                if let Some(b) = self.batch_mut(batch_id) {
                    b.produced_goods.push(good.clone());
                }
            }
            ProductionRunEvent::OutputAnnulled {
                batch_id,
                unit_id,
                reason,
                ..
            } => {
                if let Some(b) = self.batch_mut(batch_id) {
                    if let Some(g) = b.produced_goods.iter_mut().find(|g| &g.unit_id == unit_id) {
                        g.is_annulled = true;
                        g.annul_reason = Some(reason.clone());
                    }
                }
            }
            ProductionRunEvent::BatchCompleted { batch_id, .. } => {
                if let Some(b) = self.batch_mut(batch_id) {
                    b.status = BatchStatus::Completed;
                }
            }
            ProductionRunEvent::RunCompleted { .. } => self.status = RunStatus::Completed,
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductionRunCommand::StartRun { at } => {
                if self.status != RunStatus::Planned {
                    return Err(DomainError::state_conflict(format!(
                        "run {} was already started",
                        self.id
                    )));
                }
                Ok(vec![ProductionRunEvent::RunStarted {
                    run_id: self.id,
                    occurred_at: *at,
                }])
            }

            ProductionRunCommand::StartBatch { batch_id, at } => {
                if self.status != RunStatus::Ongoing {
                    return Err(DomainError::state_conflict(format!(
                        "run {} is not ongoing",
                        self.id
                    )));
                }
                let batch = self
                    .batch(batch_id)
                    .ok_or_else(|| DomainError::not_found(format!("batch {batch_id}")))?;
                if batch.status != BatchStatus::Planned {
                    return Err(DomainError::state_conflict(format!(
                        "batch {} was already started",
                        batch.batch_number
                    )));
                }
                Ok(vec![ProductionRunEvent::BatchStarted {
                    batch_id: *batch_id,
                    occurred_at: *at,
                }])
            }

            ProductionRunCommand::RecordConsumption { batch_id, entry } => {
                self.ongoing_batch(batch_id)?;
                if entry.consumed_weight <= Decimal::ZERO {
                    return Err(DomainError::validation("consumed weight must be positive"));
                }
                if !entry.is_adjustment && !self.recipe.contains(&entry.product_name) {
                    return Err(DomainError::denied(
                        "recipe_mismatch",
                        format!("{} is not an ingredient of this recipe", entry.product_name),
                    ));
                }
                Ok(vec![ProductionRunEvent::ConsumptionRecorded {
                    batch_id: *batch_id,
                    entry: entry.clone(),
                }])
            }

            ProductionRunCommand::RecordOutput { batch_id, good } => {
                let batch = self.ongoing_batch(batch_id)?;
                if good.weight <= Decimal::ZERO {
                    return Err(DomainError::validation("output weight must be positive"));
                }
                if batch.produced_goods.iter().any(|g| g.unit_id == good.unit_id) {
                    return Err(DomainError::state_conflict(format!(
                        "unit {} is already recorded as output",
                        good.unit_id
                    )));
                }
                Ok(vec![ProductionRunEvent::OutputRecorded {
                    batch_id: *batch_id,
                    good: good.clone(),
                }])
            }

            ProductionRunCommand::AnnulOutput {
                batch_id,
                unit_id,
                reason,
                at,
            } => {
                let batch = self.ongoing_batch(batch_id)?;
                let good = batch
                    .produced_goods
                    .iter()
                    .find(|g| &g.unit_id == unit_id)
                    .ok_or_else(|| {
                        DomainError::not_found(format!("output {unit_id} in batch {}", batch.batch_number))
                    })?;
                if good.is_annulled {
                    return Err(DomainError::state_conflict(format!(
                        "output {unit_id} is already annulled"
                    )));
                }
                if reason.trim().is_empty() {
                    return Err(DomainError::validation("annulment needs a reason"));
                }
                Ok(vec![ProductionRunEvent::OutputAnnulled {
                    batch_id: *batch_id,
                    unit_id: unit_id.clone(),
                    reason: reason.trim().to_string(),
                    occurred_at: *at,
                }])
            }

            ProductionRunCommand::CompleteBatch { batch_id, at } => {
                self.ongoing_batch(batch_id)?;
                Ok(vec![ProductionRunEvent::BatchCompleted {
                    batch_id: *batch_id,
                    occurred_at: *at,
                }])
            }

            ProductionRunCommand::CompleteRun { at } => {
                if self.status != RunStatus::Ongoing {
                    return Err(DomainError::state_conflict(format!(
                        "run {} is not ongoing",
                        self.id
                    )));
                }
                if let Some(b) = self.batches.iter().find(|b| b.is_ongoing()) {
                    return Err(DomainError::state_conflict(format!(
                        "batch {} is still ongoing",
                        b.batch_number
                    )));
                }
                Ok(vec![ProductionRunEvent::RunCompleted {
                    run_id: self.id,
                    occurred_at: *at,
                }])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_run() -> ProductionRun {
        ProductionRun::plan(
            RunId::new(),
            "broiler-starter",
            Recipe::new([("wheat", dec!(600)), ("soy", dec!(400))]),
            &[dec!(1000), dec!(1000)],
        )
        .unwrap()
    }

    fn started(mut run: ProductionRun) -> (ProductionRun, BatchId) {
        let batch_id = run.batches()[0].id;
        run.execute(&ProductionRunCommand::StartRun { at: Utc::now() })
            .unwrap();
        run.execute(&ProductionRunCommand::StartBatch {
            batch_id,
            at: Utc::now(),
        })
        .unwrap();
        (run, batch_id)
    }

    fn entry(product: &str, weight: Decimal, is_adjustment: bool) -> ConsumedUnit {
        ConsumedUnit {
            unit_id: UnitId::new("U1"),
            product_name: product.to_string(),
            consumed_weight: weight,
            is_adjustment,
            consumed_by: "operator".to_string(),
            consumed_at: Utc::now(),
        }
    }

    fn good(id: &str, weight: Decimal) -> ProducedGood {
        ProducedGood {
            unit_id: UnitId::new(id),
            product_name: "broiler-starter".to_string(),
            weight,
            is_annulled: false,
            annul_reason: None,
            produced_at: Utc::now(),
        }
    }

    #[test]
    fn plan_numbers_batches_from_one() {
        let run = test_run();
        assert_eq!(run.batches()[0].batch_number, 1);
        assert_eq!(run.batches()[1].batch_number, 2);
        assert_eq!(run.status(), RunStatus::Planned);
    }

    #[test]
    fn consumption_needs_an_ongoing_batch() {
        let run = test_run();
        let batch_id = run.batches()[0].id;
        let err = run
            .handle(&ProductionRunCommand::RecordConsumption {
                batch_id,
                entry: entry("wheat", dec!(10), false),
            })
            .unwrap_err();
        assert!(matches!(err, DomainError::StateConflict(_)));
    }

    #[test]
    fn standard_consumption_must_follow_the_recipe() {
        let (mut run, batch_id) = started(test_run());
        let err = run
            .handle(&ProductionRunCommand::RecordConsumption {
                batch_id,
                entry: entry("salt", dec!(5), false),
            })
            .unwrap_err();
        assert!(matches!(err, DomainError::Denied { ref check, .. } if check == "recipe_mismatch"));

        run.execute(&ProductionRunCommand::RecordConsumption {
            batch_id,
            entry: entry("salt", dec!(5), true),
        })
        .unwrap();
        assert!(run.batch(&batch_id).unwrap().consumed_units[0].is_adjustment);
    }

    #[test]
    fn annulled_output_leaves_history_but_not_yield() {
        let (mut run, batch_id) = started(test_run());
        for (id, w) in [("F1", dec!(500)), ("F2", dec!(480))] {
            run.execute(&ProductionRunCommand::RecordOutput {
                batch_id,
                good: good(id, w),
            })
            .unwrap();
        }
        run.execute(&ProductionRunCommand::AnnulOutput {
            batch_id,
            unit_id: UnitId::new("F2"),
            reason: "mislabelled".to_string(),
            at: Utc::now(),
        })
        .unwrap();

        let batch = run.batch(&batch_id).unwrap();
        assert_eq!(batch.produced_goods.len(), 2);
        assert_eq!(batch.yield_weight(), dec!(500));
        assert!(run
            .handle(&ProductionRunCommand::AnnulOutput {
                batch_id,
                unit_id: UnitId::new("F2"),
                reason: "again".to_string(),
                at: Utc::now(),
            })
            .is_err());
    }

    #[test]
    fn completed_batch_is_immutable() {
        let (mut run, batch_id) = started(test_run());
        run.execute(&ProductionRunCommand::CompleteBatch {
            batch_id,
            at: Utc::now(),
        })
        .unwrap();

        let err = run
            .handle(&ProductionRunCommand::RecordOutput {
                batch_id,
                good: good("F1", dec!(100)),
            })
            .unwrap_err();
        assert!(matches!(err, DomainError::StateConflict(_)));

        run.execute(&ProductionRunCommand::CompleteRun { at: Utc::now() })
            .unwrap();
        assert_eq!(run.status(), RunStatus::Completed);
    }
}
