//! Engine operational constants.
//!
//! The consumed-weight epsilon and the dispatch over-allocation tolerance differ
//! between sites, so both are configuration rather than hard-coded values.

use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::id::LocationId;

pub const ENV_CONSUMED_EPSILON: &str = "FEEDFLOW_CONSUMED_EPSILON";
pub const ENV_DISPATCH_TOLERANCE: &str = "FEEDFLOW_DISPATCH_TOLERANCE";
pub const ENV_ARCHIVE_LOCATION: &str = "FEEDFLOW_ARCHIVE_LOCATION";
pub const ENV_DISPATCH_LOCATION: &str = "FEEDFLOW_DISPATCH_LOCATION";

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// A unit whose remaining weight drops below this is fully consumed and archived.
    pub consumed_epsilon: Decimal,
    /// How far a scanned pallet may push an item past its requested weight before
    /// the engine asks for a split instead of committing.
    pub dispatch_tolerance: Decimal,
    /// Virtual location that represents archived (fully consumed) stock.
    pub archive_location_id: LocationId,
    /// Location dispatched pallets are moved to when a scan is committed.
    pub dispatch_location_id: LocationId,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            consumed_epsilon: Decimal::new(1, 2),
            dispatch_tolerance: Decimal::ZERO,
            archive_location_id: LocationId::new("ARCHIVE"),
            dispatch_location_id: LocationId::new("LOADING"),
        }
    }
}

impl EngineConfig {
    pub fn with_consumed_epsilon(mut self, epsilon: Decimal) -> Self {
        self.consumed_epsilon = epsilon;
        self
    }

    pub fn with_dispatch_tolerance(mut self, tolerance: Decimal) -> Self {
        self.dispatch_tolerance = tolerance;
        self
    }

    pub fn with_archive_location(mut self, id: LocationId) -> Self {
        self.archive_location_id = id;
        self
    }

    pub fn with_dispatch_location(mut self, id: LocationId) -> Self {
        self.dispatch_location_id = id;
        self
    }

    /// Defaults overridden by `FEEDFLOW_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the `FEEDFLOW_*` keys.
    ///
    /// Values that fail to parse (or are negative) are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(v) = decimal_setting(&lookup, ENV_CONSUMED_EPSILON) {
            config.consumed_epsilon = v;
        }
        if let Some(v) = decimal_setting(&lookup, ENV_DISPATCH_TOLERANCE) {
            config.dispatch_tolerance = v;
        }
        if let Some(v) = lookup(ENV_ARCHIVE_LOCATION).and_then(|s| LocationId::parse(&s).ok()) {
            config.archive_location_id = v;
        }
        if let Some(v) = lookup(ENV_DISPATCH_LOCATION).and_then(|s| LocationId::parse(&s).ok()) {
            config.dispatch_location_id = v;
        }

        config
    }

    /// Whether `weight` counts as fully consumed.
    pub fn is_consumed(&self, weight: Decimal) -> bool {
        weight < self.consumed_epsilon
    }
}

fn decimal_setting(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Decimal> {
    let raw = lookup(key)?;
    match Decimal::from_str(raw.trim()) {
        Ok(v) if v >= Decimal::ZERO => Some(v),
        Ok(v) => {
            tracing::warn!(key, value = %v, "negative value ignored; using default");
            None
        }
        Err(err) => {
            tracing::warn!(key, value = %raw, error = %err, "unparsable value ignored; using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.consumed_epsilon, dec!(0.01));
        assert_eq!(config.dispatch_tolerance, Decimal::ZERO);
        assert_eq!(config.archive_location_id.as_str(), "ARCHIVE");
        assert!(config.is_consumed(dec!(0.009)));
        assert!(!config.is_consumed(dec!(0.01)));
    }

    #[test]
    fn lookup_overrides_and_ignores_garbage() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_CONSUMED_EPSILON, "0.5"),
            (ENV_DISPATCH_TOLERANCE, "not-a-number"),
            (ENV_DISPATCH_LOCATION, " DOCK2 "),
        ]);
        let config = EngineConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.consumed_epsilon, dec!(0.5));
        assert_eq!(config.dispatch_tolerance, Decimal::ZERO);
        assert_eq!(config.dispatch_location_id.as_str(), "DOCK2");
        assert_eq!(config.archive_location_id.as_str(), "ARCHIVE");
    }

    #[test]
    fn negative_tolerance_is_rejected() {
        let config = EngineConfig::from_lookup(|k| {
            (k == ENV_DISPATCH_TOLERANCE).then(|| "-5".to_string())
        });
        assert_eq!(config.dispatch_tolerance, Decimal::ZERO);
    }
}
