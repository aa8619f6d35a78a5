//! Origin-aware movement allowlist.
//!
//! Some origins may only send stock to a fixed set of roles. Origins not listed
//! here are unrestricted beyond the general movement checks.

use crate::location::{Location, LocationRole};

/// Roles a unit may leave `origin` for, or `None` when the origin is unrestricted.
pub fn allowed_targets(origin: LocationRole) -> Option<&'static [LocationRole]> {
    use LocationRole::*;

    match origin {
        RawBuffer => Some(&[ProductionBuffer, RawWarehouse]),
        ProductionBuffer => Some(&[
            FeedStation,
            MixingZone,
            PsdZone,
            ConditioningZone,
            ProductionFloor,
            Rack,
            RawBuffer,
            RawWarehouse,
        ]),
        FeedStation => Some(&[ProductionBuffer, ProductionFloor, Rack, ConditioningZone]),
        _ => None,
    }
}

/// Check a move from `origin` to `target`. `Err` carries the denial reason.
pub fn check(origin: &Location, target: &Location) -> Result<(), String> {
    if origin.role == LocationRole::Rack && target.role == LocationRole::Rack {
        return Err(format!(
            "rack-to-rack moves are not allowed ({} -> {})",
            origin.id, target.id
        ));
    }

    match allowed_targets(origin.role) {
        Some(allowed) if !allowed.contains(&target.role) => Err(format!(
            "{} ({}) may not send stock to {} ({})",
            origin.id, origin.role, target.id, target.role
        )),
        _ => Ok(()),
    }
}
