//! Movement validation: an ordered, short-circuiting pipeline of named checks.
//!
//! Validation is pure with respect to the ledger. It only reads the unit, the
//! target and the site view, and reports every check it evaluated up to and
//! including the first failure.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use feedflow_core::{AggregateRoot, DomainError, DomainResult, LocationId, UnitId};

use crate::location::{Location, StationBinding};
use crate::topology;
use crate::unit::StockUnit;

/// Read access the validator needs from the site.
pub trait SiteView {
    fn location(&self, id: &LocationId) -> Option<Location>;

    fn occupancy(&self, id: &LocationId) -> DomainResult<usize>;

    fn station_binding(&self, station_id: &LocationId) -> Option<StationBinding>;
}

/// Movement checks, in evaluation order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    TargetExists,
    NoSelfMove,
    TypeSegregation,
    BlockRestriction,
    ExpiryRestriction,
    ArchiveRestriction,
    StationBinding,
    Capacity,
    TopologyAllowlist,
}

impl RuleKind {
    pub const ORDER: [RuleKind; 9] = [
        RuleKind::TargetExists,
        RuleKind::NoSelfMove,
        RuleKind::TypeSegregation,
        RuleKind::BlockRestriction,
        RuleKind::ExpiryRestriction,
        RuleKind::ArchiveRestriction,
        RuleKind::StationBinding,
        RuleKind::Capacity,
        RuleKind::TopologyAllowlist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::TargetExists => "target_exists",
            RuleKind::NoSelfMove => "no_self_move",
            RuleKind::TypeSegregation => "type_segregation",
            RuleKind::BlockRestriction => "block_restriction",
            RuleKind::ExpiryRestriction => "expiry_restriction",
            RuleKind::ArchiveRestriction => "archive_restriction",
            RuleKind::StationBinding => "station_binding",
            RuleKind::Capacity => "capacity",
            RuleKind::TopologyAllowlist => "topology_allowlist",
        }
    }
}

impl core::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub rule: RuleKind,
    pub description: String,
    pub passed: bool,
}

/// Outcome of validating one prospective move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveValidation {
    pub unit_id: UnitId,
    pub target_location_id: LocationId,
    pub allowed: bool,
    pub checks: Vec<CheckResult>,
    /// Empty when allowed; otherwise the failing check's reason.
    pub reason: String,
}

impl MoveValidation {
    pub fn failed_rule(&self) -> Option<RuleKind> {
        self.checks.iter().find(|c| !c.passed).map(|c| c.rule)
    }

    /// Turn a denial into [`DomainError::Denied`] naming the failing check.
    pub fn into_result(self) -> DomainResult<Self> {
        match self.failed_rule() {
            Some(rule) if !self.allowed => Err(DomainError::denied(rule.as_str(), self.reason)),
            _ => Ok(self),
        }
    }
}

/// Everything a single rule may look at.
struct RuleContext<'a, V: ?Sized> {
    unit: &'a StockUnit,
    target_id: &'a LocationId,
    target: Option<&'a Location>,
    origin: Option<&'a Location>,
    today: NaiveDate,
    site: &'a V,
}

/// Validates moves against the site's movement rules.
#[derive(Debug, Clone)]
pub struct MoveValidator {
    archive_location_id: LocationId,
}

impl Default for MoveValidator {
    fn default() -> Self {
        Self::new(LocationId::new("ARCHIVE"))
    }
}

impl MoveValidator {
    pub fn new(archive_location_id: LocationId) -> Self {
        Self {
            archive_location_id,
        }
    }

    /// Run every check in order, stopping at the first failure.
    pub fn validate<V: SiteView + ?Sized>(
        &self,
        unit: &StockUnit,
        target_id: &LocationId,
        site: &V,
        today: NaiveDate,
    ) -> DomainResult<MoveValidation> {
        let target = site.location(target_id);
        let origin = unit.current_location_id().and_then(|id| site.location(id));
        let ctx = RuleContext {
            unit,
            target_id,
            target: target.as_ref(),
            origin: origin.as_ref(),
            today,
            site,
        };

        let mut checks = Vec::with_capacity(RuleKind::ORDER.len());
        for rule in RuleKind::ORDER {
            match self.evaluate(rule, &ctx)? {
                Ok(description) => checks.push(CheckResult {
                    rule,
                    description,
                    passed: true,
                }),
                Err(reason) => {
                    checks.push(CheckResult {
                        rule,
                        description: reason.clone(),
                        passed: false,
                    });
                    return Ok(MoveValidation {
                        unit_id: unit.id().clone(),
                        target_location_id: target_id.clone(),
                        allowed: false,
                        checks,
                        reason,
                    });
                }
            }
        }

        Ok(MoveValidation {
            unit_id: unit.id().clone(),
            target_location_id: target_id.clone(),
            allowed: true,
            checks,
            reason: String::new(),
        })
    }

    /// Outer `Err` is a site read failure; inner `Err` is the denial reason.
    fn evaluate<V: SiteView + ?Sized>(
        &self,
        rule: RuleKind,
        ctx: &RuleContext<'_, V>,
    ) -> DomainResult<Result<String, String>> {
        let unit = ctx.unit;

        let Some(target) = ctx.target else {
            return Ok(Err(format!("unknown location {}", ctx.target_id)));
        };

        let verdict = match rule {
            RuleKind::TargetExists => Ok(format!("target {} exists", target.id)),

            RuleKind::NoSelfMove => match unit.current_location_id() {
                None if unit.is_archived() => Err("unit is archived".to_string()),
                Some(current) if current == &target.id => {
                    Err(format!("unit is already at {}", target.id))
                }
                _ => Ok("target differs from current location".to_string()),
            },

            RuleKind::TypeSegregation => match target.role.stock_class() {
                Some(class) if class != unit.kind() => Err(format!(
                    "{} unit cannot enter {} location {}",
                    unit.kind(),
                    class,
                    target.id
                )),
                _ => Ok(format!("{} unit may enter {}", unit.kind(), target.id)),
            },

            RuleKind::BlockRestriction => {
                if unit.is_blocked() && target.role.is_processing() {
                    Err(format!(
                        "blocked unit cannot enter processing zone {} ({})",
                        target.id,
                        unit.block_reason().unwrap_or("no reason recorded")
                    ))
                } else {
                    Ok("no block restriction applies".to_string())
                }
            }

            RuleKind::ExpiryRestriction => {
                if unit.is_expired(ctx.today) && target.role.is_processing() {
                    Err(format!(
                        "expired unit cannot enter processing zone {} (expired {})",
                        target.id,
                        unit.expiry_date()
                            .map(|d| d.to_string())
                            .unwrap_or_default()
                    ))
                } else {
                    Ok("no expiry restriction applies".to_string())
                }
            }

            RuleKind::ArchiveRestriction => {
                if target.is_archive() || target.id == self.archive_location_id {
                    Err("the archive is reachable only through full consumption".to_string())
                } else {
                    Ok("target is not the archive".to_string())
                }
            }

            RuleKind::StationBinding => {
                if target.is_feed_station() {
                    match ctx.site.station_binding(&target.id) {
                        None => Err(format!("feed station {} has no material binding", target.id)),
                        Some(binding)
                            if binding.accepts(unit.product_name(), unit.package_form()) =>
                        {
                            Ok(format!(
                                "station {} accepts {} ({})",
                                target.id, binding.product_name, binding.package_form
                            ))
                        }
                        Some(binding) => Err(format!(
                            "station {} accepts {} ({}), got {} ({})",
                            target.id,
                            binding.product_name,
                            binding.package_form,
                            unit.product_name(),
                            unit.package_form()
                        )),
                    }
                } else {
                    Ok("target is not a feed station".to_string())
                }
            }

            RuleKind::Capacity => {
                if target.is_locked {
                    Err(format!("location {} is locked", target.id))
                } else {
                    let occupancy = ctx.site.occupancy(&target.id)?;
                    if target.has_room_for_one(occupancy) {
                        Ok(format!(
                            "capacity available at {} ({occupancy}/{})",
                            target.id, target.capacity_units
                        ))
                    } else {
                        Err(format!(
                            "location {} is full ({occupancy}/{})",
                            target.id, target.capacity_units
                        ))
                    }
                }
            }

            RuleKind::TopologyAllowlist => match ctx.origin {
                Some(origin) => topology::check(origin, target)
                    .map(|()| format!("{} may send stock to {}", origin.id, target.id)),
                None => Ok("origin has no routing restriction".to_string()),
            },
        };

        Ok(verdict)
    }
}
