//! Celestial forge: the only source of Celestial items.

use serde::{Deserialize, Serialize};

use crate::config::CelestialConfig;
use crate::error::{ContractViolation, ValidationError};
use crate::item::Item;
use crate::merge::ATTRIBUTE_ROLLS;
use crate::roll::{AttemptId, RollKind, RollPlan, RollSheet};

/// Check the lifetime Legendary gate.
///
/// # Errors
///
/// Returns `ValidationError::CelestialLocked` below the unlock count.
pub const fn check_unlocked(
    cfg: &CelestialConfig,
    legendaries_obtained: u32,
) -> Result<(), ValidationError> {
    if legendaries_obtained < cfg.unlock_legendaries {
        return Err(ValidationError::CelestialLocked {
            required: cfg.unlock_legendaries,
            obtained: legendaries_obtained,
        });
    }
    Ok(())
}

#[must_use]
pub fn forge_plan() -> RollPlan {
    RollPlan::new()
        .with(RollKind::Celestial, 1)
        .with(RollKind::Slot, 1)
        .with(RollKind::Attribute, ATTRIBUTE_ROLLS)
}

/// Forge chance including the celestial pity bonus, clamped to `[0, 1]`.
#[must_use]
pub fn forge_chance(cfg: &CelestialConfig, pity_bonus: f64) -> f64 {
    let chance = cfg.chance + pity_bonus;
    if chance.is_nan() {
        return 0.0;
    }
    chance.clamp(0.0, 1.0)
}

/// Whether the forge roll landed.
///
/// # Errors
///
/// Returns `ContractViolation::RollPlanMismatch` when the sheet lacks the forge roll.
pub fn forge_succeeds(chance: f64, sheet: &RollSheet) -> Result<bool, ContractViolation> {
    Ok(sheet.value(RollKind::Celestial, 0)? < chance)
}

/// Result of one forge attempt. Coins are charged either way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForgeOutcome {
    pub attempt: AttemptId,
    pub success: bool,
    pub chance: f64,
    pub cost: u64,
    pub new_item: Option<Item>,
    pub rolls_used: RollSheet,
}
