//! Offline-first command queue.
//!
//! Commands issued while the client is disconnected are stored here and
//! replayed, oldest first, once the authoritative ledger is reachable. A
//! command that fails on replay is kept with its error until an operator
//! retries or discards it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use feedflow_core::{Actor, CommandId, DomainError, DomainResult};
use feedflow_dispatch::DispatchOrders;
use feedflow_inventory::StockStore;
use feedflow_production::{ProductionRun, Repository};

use crate::apply::{CommandOutcome, EngineServices};
use crate::command::{CommandPayload, CommandStatus, EngineCommand, QueuedCommand};

/// Synced commands older than this are dropped by [`CommandQueue::clear_synced`].
pub const SYNCED_RETENTION_DAYS: i64 = 7;

/// Summary of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub synced: Vec<(CommandId, CommandOutcome)>,
    pub failed: Vec<(CommandId, String)>,
}

impl ReplayReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// In-memory command log. Safe to share across threads.
#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: Mutex<HashMap<CommandId, QueuedCommand>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<CommandId, QueuedCommand>> {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Encode and enqueue a typed payload issued by `issued_by`.
    pub fn enqueue_payload(
        &self,
        payload: &CommandPayload,
        issued_by: &Actor,
        timestamp: DateTime<Utc>,
    ) -> anyhow::Result<QueuedCommand> {
        let command = EngineCommand::new(payload, timestamp)?.issued_by(issued_by.clone());
        Ok(self.enqueue(command))
    }

    /// Enqueue a command. Re-enqueueing a known id returns the existing entry
    /// unchanged, so a client may resend its log safely.
    pub fn enqueue(&self, command: EngineCommand) -> QueuedCommand {
        let mut commands = self.guard();
        if let Some(existing) = commands.get(&command.id) {
            debug!(command = %command.id, status = %existing.status, "command already queued");
            return existing.clone();
        }

        let queued = QueuedCommand {
            command,
            status: CommandStatus::Pending,
            attempts: 0,
            synced_at: None,
            error: None,
        };
        info!(command = %queued.id(), kind = %queued.command.command_type, "command queued");
        commands.insert(queued.id(), queued.clone());
        queued
    }

    pub fn get(&self, id: &CommandId) -> Option<QueuedCommand> {
        self.guard().get(id).cloned()
    }

    /// Pending and failed commands, oldest first.
    pub fn list_pending(&self) -> Vec<QueuedCommand> {
        let mut pending: Vec<_> = self
            .guard()
            .values()
            .filter(|c| matches!(c.status, CommandStatus::Pending | CommandStatus::Failed))
            .cloned()
            .collect();
        sort_by_issue_time(&mut pending);
        pending
    }

    pub fn list_failed(&self) -> Vec<QueuedCommand> {
        let mut failed: Vec<_> = self
            .guard()
            .values()
            .filter(|c| c.status == CommandStatus::Failed)
            .cloned()
            .collect();
        sort_by_issue_time(&mut failed);
        failed
    }

    /// Apply every pending command in timestamp order against current state.
    ///
    /// Each command runs as the actor who issued it; `fallback` is used only
    /// for commands that carry no issuer. A failing command is marked `failed`
    /// with its error and the pass continues; nothing is dropped.
    pub fn replay<S, O, R>(&self, services: &EngineServices<S, O, R>, fallback: &Actor) -> ReplayReport
    where
        S: StockStore,
        O: DispatchOrders,
        R: Repository<ProductionRun>,
    {
        let mut batch: Vec<_> = self
            .guard()
            .values()
            .filter(|c| c.status == CommandStatus::Pending)
            .cloned()
            .collect();
        sort_by_issue_time(&mut batch);

        let mut report = ReplayReport::default();
        for queued in batch {
            let id = queued.id();
            if !self.claim(&id) {
                continue;
            }

            let actor = queued.command.issued_by.as_ref().unwrap_or(fallback);
            let result = queued
                .command
                .decode()
                .map_err(|err| format!("{err:#}"))
                .and_then(|payload| {
                    services
                        .apply(&payload, actor, queued.command.timestamp)
                        .map_err(|err| err.to_string())
                });

            match result {
                Ok(outcome) => {
                    self.finish(&id, None);
                    debug!(command = %id, "command synced");
                    report.synced.push((id, outcome));
                }
                Err(error) => {
                    warn!(command = %id, kind = %queued.command.command_type, %error, "command failed on replay");
                    self.finish(&id, Some(error.clone()));
                    report.failed.push((id, error));
                }
            }
        }

        info!(
            synced = report.synced.len(),
            failed = report.failed.len(),
            "replay finished"
        );
        report
    }

    /// Operator decision: drop a pending or failed command for good.
    pub fn discard(&self, id: &CommandId) -> DomainResult<QueuedCommand> {
        let mut commands = self.guard();
        let queued = commands
            .get_mut(id)
            .ok_or_else(|| DomainError::not_found(format!("queued command {id}")))?;
        if !matches!(queued.status, CommandStatus::Pending | CommandStatus::Failed) {
            return Err(DomainError::state_conflict(format!(
                "command {id} is {} and cannot be discarded",
                queued.status
            )));
        }
        queued.status = CommandStatus::Discarded;
        warn!(command = %id, error = queued.error.as_deref().unwrap_or("-"), "command discarded");
        Ok(queued.clone())
    }

    /// Move a failed command back to pending and clear its error.
    pub fn retry_failed(&self, id: &CommandId) -> DomainResult<QueuedCommand> {
        let mut commands = self.guard();
        let queued = commands
            .get_mut(id)
            .ok_or_else(|| DomainError::not_found(format!("queued command {id}")))?;
        if queued.status != CommandStatus::Failed {
            return Err(DomainError::state_conflict(format!(
                "command {id} is {}, only failed commands can be retried",
                queued.status
            )));
        }
        queued.status = CommandStatus::Pending;
        queued.error = None;
        info!(command = %id, "command requeued");
        Ok(queued.clone())
    }

    /// Drop synced commands older than the retention window.
    pub fn clear_synced(&self) -> usize {
        self.clear_synced_before(Utc::now() - Duration::days(SYNCED_RETENTION_DAYS))
    }

    pub fn clear_synced_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut commands = self.guard();
        let before = commands.len();
        commands.retain(|_, c| {
            !(c.status == CommandStatus::Synced && c.synced_at.is_some_and(|at| at < cutoff))
        });
        before - commands.len()
    }

    fn claim(&self, id: &CommandId) -> bool {
        let mut commands = self.guard();
        match commands.get_mut(id) {
            Some(c) if c.status == CommandStatus::Pending => {
                c.status = CommandStatus::Syncing;
                c.attempts += 1;
                true
            }
            _ => false,
        }
    }

    fn finish(&self, id: &CommandId, error: Option<String>) {
        let mut commands = self.guard();
        if let Some(c) = commands.get_mut(id) {
            match error {
                None => {
                    c.status = CommandStatus::Synced;
                    c.synced_at = Some(Utc::now());
                    c.error = None;
                }
                Some(error) => {
                    c.status = CommandStatus::Failed;
                    c.error = Some(error);
                }
            }
        }
    }
}

fn sort_by_issue_time(commands: &mut [QueuedCommand]) {
    commands.sort_by(|a, b| {
        a.command
            .timestamp
            .cmp(&b.command.timestamp)
            .then_with(|| a.id().cmp(&b.id()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedflow_core::{LocationId, UnitId};
    use serde_json::json;

    fn enqueue_move(queue: &CommandQueue, unit: &str, at: DateTime<Utc>) -> QueuedCommand {
        queue
            .enqueue_payload(&move_payload(unit, "MGW02"), &Actor::system(), at)
            .unwrap()
    }

    fn move_payload(unit: &str, target: &str) -> CommandPayload {
        CommandPayload::MoveUnit {
            unit_id: UnitId::new(unit),
            target_location_id: LocationId::new(target),
            notes: None,
        }
    }

    #[test]
    fn pending_list_is_in_issue_order_and_enqueue_is_idempotent() {
        let queue = CommandQueue::new();
        let t0 = Utc::now();
        let late = enqueue_move(&queue, "U2", t0 + Duration::minutes(5));
        let early = enqueue_move(&queue, "U1", t0);

        let again = queue.enqueue(late.command.clone());
        assert_eq!(again, late);

        let ids: Vec<_> = queue.list_pending().iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec![early.id(), late.id()]);
    }

    #[test]
    fn only_failed_commands_can_be_retried_and_synced_cannot_be_discarded() {
        let queue = CommandQueue::new();
        let queued = enqueue_move(&queue, "U1", Utc::now());
        let id = queued.id();

        assert!(matches!(queue.retry_failed(&id), Err(DomainError::StateConflict(_))));

        assert!(queue.claim(&id));
        queue.finish(&id, Some("unit U1 not found".to_string()));
        assert_eq!(queue.list_failed().len(), 1);

        let retried = queue.retry_failed(&id).unwrap();
        assert_eq!(retried.status, CommandStatus::Pending);
        assert!(retried.error.is_none());
        assert_eq!(retried.attempts, 1);

        assert!(queue.claim(&id));
        queue.finish(&id, None);
        assert!(matches!(queue.discard(&id), Err(DomainError::StateConflict(_))));
    }

    #[test]
    fn discarded_commands_leave_the_pending_list() {
        let queue = CommandQueue::new();
        let queued = enqueue_move(&queue, "U1", Utc::now());
        queue.discard(&queued.id()).unwrap();
        assert!(queue.list_pending().is_empty());
        assert_eq!(queue.get(&queued.id()).unwrap().status, CommandStatus::Discarded);
        assert!(matches!(queue.discard(&CommandId::new()), Err(DomainError::NotFound(_))));
    }

    #[test]
    fn clear_synced_keeps_recent_and_unsynced_commands() {
        let queue = CommandQueue::new();
        let synced = enqueue_move(&queue, "U1", Utc::now());
        let pending = queue.enqueue(EngineCommand {
            id: CommandId::new(),
            command_type: "block_unit".to_string(),
            payload: json!({ "unit_id": "U2", "reason": "torn bag" }),
            timestamp: Utc::now(),
            issued_by: None,
        });
        assert!(queue.claim(&synced.id()));
        queue.finish(&synced.id(), None);

        assert_eq!(queue.clear_synced(), 0);
        assert_eq!(queue.clear_synced_before(Utc::now() + Duration::seconds(1)), 1);
        assert!(queue.get(&synced.id()).is_none());
        assert!(queue.get(&pending.id()).is_some());
    }
}
