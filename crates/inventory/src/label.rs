//! Label output for newly received or produced units.

use std::sync::Mutex;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use feedflow_core::{AggregateRoot, DomainResult, LocationId, UnitId};

use crate::unit::{PackageForm, StockKind, StockUnit};

/// Data printed on a unit's physical label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitLabel {
    pub unit_id: UnitId,
    pub display_id: String,
    pub kind: StockKind,
    pub product_name: String,
    pub package_form: PackageForm,
    pub weight: Decimal,
    pub production_date: NaiveDate,
    pub expiry_date: Option<NaiveDate>,
    pub location_id: Option<LocationId>,
}

impl From<&StockUnit> for UnitLabel {
    fn from(unit: &StockUnit) -> Self {
        Self {
            unit_id: unit.id().clone(),
            display_id: unit.display_id().to_string(),
            kind: unit.kind(),
            product_name: unit.product_name().to_string(),
            package_form: unit.package_form(),
            weight: unit.current_weight(),
            production_date: unit.production_date(),
            expiry_date: unit.expiry_date(),
            location_id: unit.current_location_id().cloned(),
        }
    }
}

/// Downstream consumer of labels (printer, spooler). Never feeds back into the ledger.
pub trait LabelSink: Send + Sync {
    fn emit(&self, label: &UnitLabel) -> DomainResult<()>;
}

/// Writes labels to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingLabelSink;

impl LabelSink for LoggingLabelSink {
    fn emit(&self, label: &UnitLabel) -> DomainResult<()> {
        tracing::info!(
            unit = %label.unit_id,
            display_id = %label.display_id,
            product = %label.product_name,
            weight = %label.weight,
            "label emitted"
        );
        Ok(())
    }
}

/// Keeps every emitted label in memory.
#[derive(Debug, Default)]
pub struct RecordingLabelSink {
    labels: Mutex<Vec<UnitLabel>>,
}

impl RecordingLabelSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> Vec<UnitLabel> {
        self.labels
            .lock()
            .map(|labels| labels.clone())
            .unwrap_or_default()
    }
}

impl LabelSink for RecordingLabelSink {
    fn emit(&self, label: &UnitLabel) -> DomainResult<()> {
        if let Ok(mut labels) = self.labels.lock() {
            labels.push(label.clone());
        }
        Ok(())
    }
}
