//! Strongly-typed identifiers used across the engine.
//!
//! Physical things (units, locations) are identified by the codes printed on
//! their labels, so those ids wrap strings. Planning documents (orders, runs,
//! batches) get time-ordered UUIDs.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a user (actor identity).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

/// Identifier of a dispatch order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DispatchOrderId(Uuid);

/// Identifier of a production run (task).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

/// Identifier of a production batch within a run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

/// Identifier of an adjustment (corrective addition) order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdjustmentOrderId(Uuid);

/// Identifier of a queued offline command.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Mint a new identifier (UUIDv7, time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::validation(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(UserId, "UserId");
impl_uuid_newtype!(DispatchOrderId, "DispatchOrderId");
impl_uuid_newtype!(RunId, "RunId");
impl_uuid_newtype!(BatchId, "BatchId");
impl_uuid_newtype!(AdjustmentOrderId, "AdjustmentOrderId");
impl_uuid_newtype!(CommandId, "CommandId");

/// Identifier of a physical stock unit (pallet, bag, packaging lot).
///
/// Immutable once minted; matches the barcode on the unit's label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

/// Identifier (code) of a location, e.g. `MS01` or `BB01`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(String);

macro_rules! impl_code_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Wrap a code. Surrounding whitespace (scanner noise) is trimmed.
            pub fn new(code: impl Into<String>) -> Self {
                let code: String = code.into();
                Self(code.trim().to_string())
            }

            /// Parse a code, rejecting empty input.
            pub fn parse(code: &str) -> Result<Self, DomainError> {
                let trimmed = code.trim();
                if trimmed.is_empty() {
                    return Err(DomainError::validation(concat!($name, " cannot be empty")));
                }
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $t {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

impl_code_newtype!(UnitId, "UnitId");
impl_code_newtype!(LocationId, "LocationId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_trimmed() {
        assert_eq!(LocationId::new(" MS01\n").as_str(), "MS01");
        assert_eq!(UnitId::from("P-0001 ").to_string(), "P-0001");
    }

    #[test]
    fn empty_codes_are_rejected() {
        assert!(UnitId::parse("   ").is_err());
        assert!("".parse::<LocationId>().is_err());
    }

    #[test]
    fn uuid_ids_round_trip_through_display() {
        let id = BatchId::new();
        let parsed: BatchId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<RunId>().is_err());
    }
}
