//! Serialized engine commands for the offline log.
//!
//! A queued command carries its type name and a JSON payload so that a
//! client can persist it without knowing the engine's types. Decoding back to
//! a typed [`CommandPayload`] happens at replay time.

use anyhow::Context;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use feedflow_core::{Actor, BatchId, CommandId, DispatchOrderId, LocationId, UnitId};

/// Status of a queued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
    Discarded,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Syncing => "syncing",
            CommandStatus::Synced => "synced",
            CommandStatus::Failed => "failed",
            CommandStatus::Discarded => "discarded",
        }
    }
}

impl core::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed body of an engine command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum CommandPayload {
    MoveUnit {
        unit_id: UnitId,
        target_location_id: LocationId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
    },
    RecordConsumption {
        batch_id: BatchId,
        unit_id: UnitId,
        weight: Decimal,
        #[serde(default)]
        is_adjustment: bool,
    },
    FulfillScan {
        order_id: DispatchOrderId,
        scanned_code: String,
    },
    CompleteDispatch {
        order_id: DispatchOrderId,
    },
    BlockUnit {
        unit_id: UnitId,
        reason: String,
    },
    AnnulOutput {
        batch_id: BatchId,
        unit_id: UnitId,
        reason: String,
    },
}

impl CommandPayload {
    pub fn command_type(&self) -> &'static str {
        match self {
            CommandPayload::MoveUnit { .. } => "move_unit",
            CommandPayload::RecordConsumption { .. } => "record_consumption",
            CommandPayload::FulfillScan { .. } => "fulfill_scan",
            CommandPayload::CompleteDispatch { .. } => "complete_dispatch",
            CommandPayload::BlockUnit { .. } => "block_unit",
            CommandPayload::AnnulOutput { .. } => "annul_output",
        }
    }
}

/// A command as stored in the offline log: `{id, type, payload, timestamp}`,
/// plus the actor who issued it on the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineCommand {
    pub id: CommandId,
    #[serde(rename = "type")]
    pub command_type: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_by: Option<Actor>,
}

impl EngineCommand {
    /// Serialize a typed payload issued at `timestamp`.
    pub fn new(payload: &CommandPayload, timestamp: DateTime<Utc>) -> anyhow::Result<Self> {
        let encoded = serde_json::to_value(payload)
            .with_context(|| format!("failed to encode {} payload", payload.command_type()))?;
        let body = encoded.get("payload").cloned().unwrap_or(Value::Null);

        Ok(Self {
            id: CommandId::new(),
            command_type: payload.command_type().to_string(),
            payload: body,
            timestamp,
            issued_by: None,
        })
    }

    pub fn issued_by(mut self, actor: Actor) -> Self {
        self.issued_by = Some(actor);
        self
    }

    /// Decode the JSON body back into a typed payload.
    pub fn decode(&self) -> anyhow::Result<CommandPayload> {
        let mut envelope = Map::new();
        envelope.insert("type".to_string(), Value::String(self.command_type.clone()));
        envelope.insert("payload".to_string(), self.payload.clone());

        serde_json::from_value(Value::Object(envelope)).with_context(|| {
            format!(
                "failed to decode {} payload of command {}",
                self.command_type, self.id
            )
        })
    }
}

/// A command plus its sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedCommand {
    pub command: EngineCommand,
    pub status: CommandStatus,
    pub attempts: u32,
    pub synced_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl QueuedCommand {
    pub fn id(&self) -> CommandId {
        self.command.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn payload_body_omits_the_type_tag() {
        let cmd = EngineCommand::new(
            &CommandPayload::MoveUnit {
                unit_id: UnitId::new("U1"),
                target_location_id: LocationId::new("MGW02"),
                notes: None,
            },
            Utc::now(),
        )
        .unwrap();

        assert_eq!(cmd.command_type, "move_unit");
        assert_eq!(cmd.payload, json!({ "unit_id": "U1", "target_location_id": "MGW02" }));
    }

    #[test]
    fn decodes_hand_written_payloads() {
        let cmd = EngineCommand {
            id: CommandId::new(),
            command_type: "record_consumption".to_string(),
            payload: json!({
                "batch_id": BatchId::new(),
                "unit_id": "W-7",
                "weight": "12.5"
            }),
            timestamp: Utc::now(),
            issued_by: None,
        };

        match cmd.decode().unwrap() {
            CommandPayload::RecordConsumption {
                unit_id,
                weight,
                is_adjustment,
                ..
            } => {
                assert_eq!(unit_id.as_str(), "W-7");
                assert_eq!(weight, dec!(12.5));
                assert!(!is_adjustment);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn unknown_types_fail_with_context() {
        let cmd = EngineCommand {
            id: CommandId::new(),
            command_type: "teleport_unit".to_string(),
            payload: json!({}),
            timestamp: Utc::now(),
            issued_by: None,
        };
        let err = cmd.decode().unwrap_err();
        assert!(format!("{err:#}").contains("teleport_unit"));
    }

    #[test]
    fn logged_commands_without_an_issuer_still_load() {
        let logged = json!({
            "id": CommandId::new(),
            "type": "block_unit",
            "payload": { "unit_id": "U2", "reason": "torn bag" },
            "timestamp": Utc::now(),
        });
        let cmd: EngineCommand = serde_json::from_value(logged).unwrap();
        assert!(cmd.issued_by.is_none());

        let issued = cmd.issued_by(Actor::new(feedflow_core::UserId::new(), "night-shift"));
        let encoded = serde_json::to_value(&issued).unwrap();
        assert_eq!(encoded["issued_by"]["name"], "night-shift");
    }
}
