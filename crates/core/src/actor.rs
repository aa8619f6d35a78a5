//! Acting user and the permission gate.
//!
//! Authentication happens outside the engine. The engine receives an [`Actor`]
//! and asks a [`PermissionCheck`] for a yes/no answer where an operation is gated.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::UserId;

/// Permission identifier (e.g. "adjustments.manage"). `"*"` grants everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    /// Plan, execute and complete adjustment (corrective addition) orders.
    pub const MANAGE_ADJUSTMENTS: Permission = Permission(Cow::Borrowed("adjustments.manage"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The user on whose behalf an operation runs. Recorded as `movedBy` in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub name: String,
}

impl Actor {
    pub fn new(user_id: UserId, name: impl Into<String>) -> Self {
        Self {
            user_id,
            name: name.into(),
        }
    }

    /// Actor used for engine-internal bookkeeping (seeding, replays without a user).
    pub fn system() -> Self {
        Self::new(UserId::from_uuid(uuid::Uuid::nil()), "system")
    }
}

impl core::fmt::Display for Actor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Boolean permission decision supplied by the identity collaborator.
pub trait PermissionCheck: Send + Sync {
    fn is_allowed(&self, actor: &Actor, permission: &Permission) -> bool;

    /// Convenience: turn a negative decision into [`DomainError::Unauthorized`].
    fn require(&self, actor: &Actor, permission: &Permission) -> DomainResult<()> {
        if self.is_allowed(actor, permission) {
            Ok(())
        } else {
            Err(DomainError::unauthorized(format!(
                "{actor} lacks permission '{permission}'"
            )))
        }
    }
}

/// Grants every permission. Used where the host application already gated access.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl PermissionCheck for AllowAll {
    fn is_allowed(&self, _actor: &Actor, _permission: &Permission) -> bool {
        true
    }
}

/// Static permission table keyed by user.
#[derive(Debug, Default, Clone)]
pub struct StaticPermissions {
    grants: HashMap<UserId, HashSet<Permission>>,
}

impl StaticPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, user_id: UserId, permission: Permission) -> Self {
        self.grants.entry(user_id).or_default().insert(permission);
        self
    }
}

impl PermissionCheck for StaticPermissions {
    fn is_allowed(&self, actor: &Actor, permission: &Permission) -> bool {
        self.grants
            .get(&actor.user_id)
            .map(|perms| perms.iter().any(|p| p.is_wildcard() || p == permission))
            .unwrap_or(false)
    }
}
