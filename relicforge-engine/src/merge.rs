//! Merge lottery: selection validation, success odds, tier jumps and salvage.
//!
//! The functions here are pure. Randomness arrives as a [`RollSheet`] fixed by
//! the roll authority, so the same attempt and sheet always give the same
//! outcome.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::{MergeConfig, SalvageConfig};
use crate::error::{ContractViolation, ValidationError};
use crate::item::{Item, ItemId, MAX_LUCKY_OPTIONS, ROLLS_PER_OPTION, Slot};
use crate::numbers::{pick_weighted, usize_to_f64};
use crate::pity::PoolId;
use crate::rarity::Rarity;
use crate::roll::{AttemptId, RollKind, RollPlan, RollSheet};

/// Attribute rolls reserved for the merged item.
pub(crate) const ATTRIBUTE_ROLLS: u16 = (MAX_LUCKY_OPTIONS * ROLLS_PER_OPTION) as u16;

/// Player bonuses snapshotted when an attempt is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeBonuses {
    /// Merge luck in percentage points.
    pub merge_luck_pct: f64,
    /// Whole tiers added to a successful result.
    pub tier_bonus: u32,
    /// Chance in percent to reroll a +1 jump.
    pub reroll_chance_pct: f64,
}

/// A validated merge selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeAttempt {
    id: AttemptId,
    input_ids: Vec<ItemId>,
    fuel_count: usize,
    base_tier: Rarity,
    result_slot: Slot,
    optional_boost: bool,
    bonuses: MergeBonuses,
    created_at_ms: u64,
    retry_of: Option<AttemptId>,
}

impl MergeAttempt {
    /// Validate a selection against the current inventory snapshot.
    ///
    /// # Errors
    ///
    /// Returns the first `ValidationError` found: too few inputs, duplicates,
    /// stale or equipped or celestial inputs, or an all-fuel selection.
    #[allow(clippy::too_many_arguments)]
    pub fn select(
        id: AttemptId,
        selection: &[ItemId],
        items: &[Item],
        equipped: &[ItemId],
        cfg: &MergeConfig,
        bonuses: MergeBonuses,
        optional_boost: bool,
        created_at_ms: u64,
    ) -> Result<Self, ValidationError> {
        let inputs = validate_selection(selection, items, equipped, cfg)?;
        let fuel_count = inputs
            .iter()
            .filter(|item| item.rarity() <= cfg.fuel_tier)
            .count();
        let Some(anchor) = inputs
            .iter()
            .filter(|item| item.rarity() > cfg.fuel_tier)
            .reduce(|best, item| if item.rarity() > best.rarity() { item } else { best })
        else {
            return Err(ValidationError::AllFuel { fuel: cfg.fuel_tier });
        };
        Ok(Self {
            id,
            input_ids: selection.to_vec(),
            fuel_count,
            base_tier: anchor.rarity(),
            result_slot: anchor.slot(),
            optional_boost,
            bonuses,
            created_at_ms,
            retry_of: None,
        })
    }

    /// Same inputs under a new identity, marked as a near-miss retry.
    #[must_use]
    pub fn retry(&self, id: AttemptId) -> Self {
        Self {
            id,
            retry_of: Some(self.id),
            ..self.clone()
        }
    }

    /// Re-check the attempt against a newer snapshot.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` when an input vanished or became equipped.
    pub fn revalidate(
        &self,
        items: &[Item],
        equipped: &[ItemId],
        cfg: &MergeConfig,
    ) -> Result<(), ValidationError> {
        validate_selection(&self.input_ids, items, equipped, cfg).map(|_| ())
    }

    #[must_use]
    pub const fn id(&self) -> AttemptId {
        self.id
    }

    #[must_use]
    pub fn input_ids(&self) -> &[ItemId] {
        &self.input_ids
    }

    #[must_use]
    pub fn item_count(&self) -> usize {
        self.input_ids.len()
    }

    #[must_use]
    pub const fn fuel_count(&self) -> usize {
        self.fuel_count
    }

    #[must_use]
    pub const fn base_tier(&self) -> Rarity {
        self.base_tier
    }

    #[must_use]
    pub const fn result_slot(&self) -> Slot {
        self.result_slot
    }

    #[must_use]
    pub const fn optional_boost(&self) -> bool {
        self.optional_boost
    }

    #[must_use]
    pub const fn bonuses(&self) -> MergeBonuses {
        self.bonuses
    }

    #[must_use]
    pub const fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    #[must_use]
    pub const fn retry_of(&self) -> Option<AttemptId> {
        self.retry_of
    }

    /// Pity pool for this attempt.
    #[must_use]
    pub fn pool(&self) -> PoolId {
        PoolId::merge(self.base_tier)
    }

    /// Fixed roll plan: the shape depends only on the input count.
    #[must_use]
    pub fn roll_plan(&self, salvage: &SalvageConfig) -> RollPlan {
        RollPlan::new()
            .with(RollKind::Success, 1)
            .with(RollKind::TierJump, 1)
            .with(RollKind::RerollGate, 1)
            .with(RollKind::RerollTier, 1)
            .with(RollKind::Attribute, ATTRIBUTE_ROLLS)
            .with(RollKind::Salvage, salvage_roll_count(self.item_count(), salvage))
    }
}

fn validate_selection<'a>(
    selection: &[ItemId],
    items: &'a [Item],
    equipped: &[ItemId],
    cfg: &MergeConfig,
) -> Result<Vec<&'a Item>, ValidationError> {
    if selection.len() < cfg.min_inputs {
        return Err(ValidationError::TooFewInputs {
            min: cfg.min_inputs,
            got: selection.len(),
        });
    }
    let mut seen = HashSet::with_capacity(selection.len());
    let mut inputs = Vec::with_capacity(selection.len());
    for id in selection {
        if !seen.insert(*id) {
            return Err(ValidationError::DuplicateInput(*id));
        }
        let Some(item) = items.iter().find(|item| item.id() == *id) else {
            return Err(ValidationError::StaleSelection(*id));
        };
        if equipped.contains(id) {
            return Err(ValidationError::EquippedInput(*id));
        }
        if !item.rarity().is_ordinary() {
            return Err(ValidationError::CelestialInput(*id));
        }
        inputs.push(item);
    }
    if inputs.iter().all(|item| item.rarity() <= cfg.fuel_tier) {
        return Err(ValidationError::AllFuel {
            fuel: cfg.fuel_tier,
        });
    }
    Ok(inputs)
}

/// Success probability, clamped to `[0, success_cap]`.
#[must_use]
pub fn success_probability(
    cfg: &MergeConfig,
    item_count: usize,
    merge_luck_pct: f64,
    optional_boost: bool,
    pity_bonus: f64,
) -> f64 {
    let extra_items = usize_to_f64(item_count.saturating_sub(cfg.min_inputs));
    let boost = if optional_boost { cfg.boost_bonus } else { 0.0 };
    let raw = cfg.per_extra_item.mul_add(extra_items, cfg.base_success)
        + merge_luck_pct / 100.0
        + boost
        + pity_bonus;
    if raw.is_nan() {
        return 0.0;
    }
    raw.clamp(0.0, cfg.success_cap)
}

/// Independent salvage rolls needed for `item_count` inputs.
#[must_use]
pub fn salvage_roll_count(item_count: usize, cfg: &SalvageConfig) -> u16 {
    let count = if item_count < cfg.count_threshold {
        1
    } else {
        item_count - cfg.count_threshold
    };
    u16::try_from(count).unwrap_or(u16::MAX)
}

/// Materials earned from a merge, independent of success.
#[must_use]
pub fn salvage_yield(item_count: usize, cfg: &SalvageConfig, rolls: &[f64]) -> u32 {
    if item_count < cfg.count_threshold {
        return u32::from(rolls.first().is_some_and(|roll| *roll < cfg.below_threshold_chance));
    }
    let extra = rolls
        .iter()
        .take(item_count - cfg.count_threshold)
        .filter(|roll| **roll < cfg.per_extra_chance)
        .count();
    1 + u32::try_from(extra).unwrap_or(u32::MAX - 1)
}

/// Tier jump after the optional reroll of a +1 result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierJump {
    pub tiers: u32,
    pub rerolled: bool,
}

/// Resolve the jump; a +1 may be rerolled once and the better jump kept.
#[must_use]
pub fn resolve_tier_jump(
    weights: &[f64],
    jump_roll: f64,
    reroll_chance_pct: f64,
    gate_roll: f64,
    reroll_roll: f64,
) -> TierJump {
    let first = jump_from(weights, jump_roll);
    if first == 1 && gate_roll < reroll_chance_pct / 100.0 {
        let second = jump_from(weights, reroll_roll);
        return TierJump {
            tiers: first.max(second),
            rerolled: true,
        };
    }
    TierJump {
        tiers: first,
        rerolled: false,
    }
}

fn jump_from(weights: &[f64], roll: f64) -> u32 {
    u32::try_from(pick_weighted(weights, roll))
        .unwrap_or(0)
        .saturating_add(1)
}

/// Everything the lottery decided for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotteryOutcome {
    pub success: bool,
    pub probability: f64,
    pub pity_bonus: f64,
    pub success_roll: f64,
    pub tier_jump: Option<TierJump>,
    pub result_tier: Option<Rarity>,
    pub materials: u32,
    pub near_miss: bool,
}

/// Resolve an attempt from its canonical sheet.
///
/// # Errors
///
/// Returns `ContractViolation::RollPlanMismatch` when the sheet lacks a
/// planned roll.
pub fn resolve_lottery(
    attempt: &MergeAttempt,
    cfg: &MergeConfig,
    salvage: &SalvageConfig,
    pity_bonus: f64,
    sheet: &RollSheet,
) -> Result<LotteryOutcome, ContractViolation> {
    let bonuses = attempt.bonuses();
    let probability = success_probability(
        cfg,
        attempt.item_count(),
        bonuses.merge_luck_pct,
        attempt.optional_boost(),
        pity_bonus,
    );
    let success_roll = sheet.value(RollKind::Success, 0)?;
    let success = success_roll < probability;

    let (tier_jump, result_tier) = if success {
        let jump = resolve_tier_jump(
            &cfg.tier_jump_weights,
            sheet.value(RollKind::TierJump, 0)?,
            bonuses.reroll_chance_pct,
            sheet.value(RollKind::RerollGate, 0)?,
            sheet.value(RollKind::RerollTier, 0)?,
        );
        let tier = attempt
            .base_tier()
            .raised_by(jump.tiers.saturating_add(bonuses.tier_bonus));
        (Some(jump), Some(tier))
    } else {
        (None, None)
    };

    let near_miss = !success && success_roll < probability + cfg.near_miss_margin;
    let materials = salvage_yield(
        attempt.item_count(),
        salvage,
        &sheet.values(RollKind::Salvage),
    );

    log::debug!(
        "merge {} | p {probability:.3} roll {success_roll:.3} success {success} jump {:?} materials {materials}",
        attempt.id(),
        tier_jump.map(|jump| jump.tiers)
    );

    Ok(LotteryOutcome {
        success,
        probability,
        pity_bonus,
        success_roll,
        tier_jump,
        result_tier,
        materials,
        near_miss,
    })
}

/// Offer to retry a near miss with the same inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryOffer {
    pub attempt: AttemptId,
    pub cost: u64,
}

/// Outcome returned to the caller of `resolve_merge`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeResult {
    pub attempt: AttemptId,
    pub success: bool,
    pub probability: f64,
    pub tier_jump: Option<TierJump>,
    pub new_item: Option<Item>,
    pub materials_earned: u32,
    pub rolls_used: RollSheet,
    pub near_miss: Option<RetryOffer>,
}
