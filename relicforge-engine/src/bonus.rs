//! Bonus aggregation under an explicit stacking law.
//!
//! Percentage bonuses of the same stat stack additively (`A + B`), and a
//! multiplier group scales a base exactly once as `base × (1 + Σ group)`.
//! Scaling an already scaled value is rejected.

use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::entities::{EntityId, Variant};
use crate::error::{ConfigError, ContractViolation};
use crate::item::ItemId;
use crate::numbers::{floor_f64_to_u64, u64_to_f64};

/// Kind of bonus a source can contribute.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StatKey {
    CoinPct,
    XpPct,
    DropLuckPct,
    MergeLuckPct,
    EncounterPct,
    /// Whole tiers added to a successful merge result.
    TierBonus,
    CostReductionPct,
    RerollChancePct,
    CatchRatePct,
    PowerPct,
}

impl StatKey {
    pub const ALL: [Self; 10] = [
        Self::CoinPct,
        Self::XpPct,
        Self::DropLuckPct,
        Self::MergeLuckPct,
        Self::EncounterPct,
        Self::TierBonus,
        Self::CostReductionPct,
        Self::RerollChancePct,
        Self::CatchRatePct,
        Self::PowerPct,
    ];

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::CoinPct => "coin_pct",
            Self::XpPct => "xp_pct",
            Self::DropLuckPct => "drop_luck_pct",
            Self::MergeLuckPct => "merge_luck_pct",
            Self::EncounterPct => "encounter_pct",
            Self::TierBonus => "tier_bonus",
            Self::CostReductionPct => "cost_reduction_pct",
            Self::RerollChancePct => "reroll_chance_pct",
            Self::CatchRatePct => "catch_rate_pct",
            Self::PowerPct => "power_pct",
        }
    }
}

/// Combination law declared by a contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackingMode {
    Additive,
    /// Overrides the additive sum for the stat.
    Replace,
    /// Caps the stat total.
    Min,
    /// Floors the stat total.
    Max,
}

/// Stable identity of whatever granted a bonus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceId {
    Gear { item: ItemId },
    Entity { entity: EntityId, variant: Variant },
    Named { name: String },
}

impl SourceId {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named { name: name.into() }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gear { item } => write!(f, "gear:{item}"),
            Self::Entity { entity, variant } => {
                write!(f, "entity:{}:{}", entity.key(), variant.key())
            }
            Self::Named { name } => write!(f, "named:{name}"),
        }
    }
}

/// Single bonus granted by one source for one stat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusContribution {
    pub source_id: SourceId,
    pub stat: StatKey,
    pub amount: f64,
    #[serde(default = "BonusContribution::default_mode")]
    pub mode: StackingMode,
}

impl BonusContribution {
    const fn default_mode() -> StackingMode {
        StackingMode::Additive
    }

    #[must_use]
    pub fn additive(source_id: SourceId, stat: StatKey, amount: f64) -> Self {
        Self {
            source_id,
            stat,
            amount,
            mode: StackingMode::Additive,
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: StackingMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Modes a stat accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatRule {
    pub modes: SmallVec<[StackingMode; 4]>,
}

impl StatRule {
    fn additive_with(extra: &[StackingMode]) -> Self {
        let mut modes: SmallVec<[StackingMode; 4]> = smallvec![StackingMode::Additive];
        modes.extend_from_slice(extra);
        Self { modes }
    }

    #[must_use]
    pub fn permits(&self, mode: StackingMode) -> bool {
        self.modes.contains(&mode)
    }
}

/// Registry of stacking rules, one per stat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StackingRegistry {
    rules: BTreeMap<StatKey, StatRule>,
}

impl StackingRegistry {
    /// Registry with no rules; every lookup fails until rules are added.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            rules: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, stat: StatKey, rule: StatRule) {
        self.rules.insert(stat, rule);
    }

    /// Look up the rule for a stat.
    ///
    /// # Errors
    ///
    /// Returns `ContractViolation::UnregisteredStat` when the stat has no rule.
    pub fn rule(&self, stat: StatKey) -> Result<&StatRule, ContractViolation> {
        self.rules
            .get(&stat)
            .ok_or(ContractViolation::UnregisteredStat(stat))
    }

    /// Check that a contribution's mode is registered for its stat.
    ///
    /// # Errors
    ///
    /// Returns a contract violation when the stat or the mode is unregistered.
    pub fn check(&self, contribution: &BonusContribution) -> Result<(), ContractViolation> {
        let rule = self.rule(contribution.stat)?;
        if rule.permits(contribution.mode) {
            Ok(())
        } else {
            Err(ContractViolation::UnregisteredStackingMode {
                stat: contribution.stat,
                mode: contribution.mode,
            })
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        for stat in StatKey::ALL {
            match self.rules.get(&stat) {
                Some(rule) if !rule.modes.is_empty() => {}
                _ => return Err(ConfigError::MissingStatRule(stat)),
            }
        }
        Ok(())
    }
}

impl Default for StackingRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for stat in StatKey::ALL {
            let rule = match stat {
                StatKey::TierBonus => StatRule::additive_with(&[StackingMode::Replace]),
                StatKey::CostReductionPct => StatRule::additive_with(&[StackingMode::Min]),
                StatKey::PowerPct => StatRule::additive_with(&[]),
                StatKey::CoinPct
                | StatKey::XpPct
                | StatKey::DropLuckPct
                | StatKey::MergeLuckPct
                | StatKey::EncounterPct
                | StatKey::RerollChancePct
                | StatKey::CatchRatePct => StatRule::additive_with(&[StackingMode::Max]),
            };
            registry.register(stat, rule);
        }
        registry
    }
}

/// Combine every contribution for `stat` under the registered law.
///
/// The additive amounts are summed in a canonical order so the total is
/// identical for any permutation of `sources`.
///
/// # Errors
///
/// Returns a contract violation for unregistered stats or modes, duplicate
/// `(source, stat)` pairs, or conflicting replace values.
pub fn aggregate(
    registry: &StackingRegistry,
    stat: StatKey,
    sources: &[BonusContribution],
) -> Result<f64, ContractViolation> {
    registry.rule(stat)?;
    let mut seen: HashSet<&SourceId> = HashSet::new();
    let mut additive: Vec<f64> = Vec::new();
    let mut replace: Option<f64> = None;
    let mut cap: Option<f64> = None;
    let mut floor: Option<f64> = None;

    for contribution in sources.iter().filter(|c| c.stat == stat) {
        registry.check(contribution)?;
        if !seen.insert(&contribution.source_id) {
            return Err(ContractViolation::DuplicateContribution {
                source_id: contribution.source_id.clone(),
                stat,
            });
        }
        let amount = contribution.amount;
        match contribution.mode {
            StackingMode::Additive => additive.push(amount),
            StackingMode::Replace => {
                if replace.is_some_and(|existing| existing.total_cmp(&amount).is_ne()) {
                    return Err(ContractViolation::ConflictingReplace(stat));
                }
                replace = Some(amount);
            }
            StackingMode::Min => cap = Some(cap.map_or(amount, |c: f64| c.min(amount))),
            StackingMode::Max => floor = Some(floor.map_or(amount, |f: f64| f.max(amount))),
        }
    }

    additive.sort_by(f64::total_cmp);
    let mut total = replace.unwrap_or_else(|| additive.iter().sum());
    if let Some(floor) = floor {
        total = total.max(floor);
    }
    if let Some(cap) = cap {
        total = total.min(cap);
    }
    Ok(total)
}

/// Collects contributions from many independent sources and answers totals
/// per stat.
#[derive(Debug, Clone)]
pub struct BonusAggregator<'a> {
    registry: &'a StackingRegistry,
    contributions: Vec<BonusContribution>,
}

impl<'a> BonusAggregator<'a> {
    #[must_use]
    pub const fn new(registry: &'a StackingRegistry) -> Self {
        Self {
            registry,
            contributions: Vec::new(),
        }
    }

    /// Add a contribution, failing fast on contract violations.
    ///
    /// # Errors
    ///
    /// Returns a contract violation when the stat or mode is unregistered or the
    /// source already contributed to the stat.
    pub fn push(&mut self, contribution: BonusContribution) -> Result<(), ContractViolation> {
        self.registry.check(&contribution)?;
        if self
            .contributions
            .iter()
            .any(|c| c.stat == contribution.stat && c.source_id == contribution.source_id)
        {
            return Err(ContractViolation::DuplicateContribution {
                source_id: contribution.source_id,
                stat: contribution.stat,
            });
        }
        self.contributions.push(contribution);
        Ok(())
    }

    /// Add several contributions.
    ///
    /// # Errors
    ///
    /// Stops at the first contribution rejected by [`Self::push`].
    pub fn extend<I>(&mut self, contributions: I) -> Result<(), ContractViolation>
    where
        I: IntoIterator<Item = BonusContribution>,
    {
        for contribution in contributions {
            self.push(contribution)?;
        }
        Ok(())
    }

    /// Combined amount for the stat.
    ///
    /// # Errors
    ///
    /// Propagates violations from [`aggregate`].
    pub fn total(&self, stat: StatKey) -> Result<f64, ContractViolation> {
        aggregate(self.registry, stat, &self.contributions)
    }

    /// Contributions that feed `stat`, for breakdown displays.
    pub fn breakdown(&self, stat: StatKey) -> impl Iterator<Item = &BonusContribution> {
        self.contributions.iter().filter(move |c| c.stat == stat)
    }

    /// Multiplier group for the stat: every contribution summed into one factor.
    ///
    /// # Errors
    ///
    /// Propagates violations from [`aggregate`].
    pub fn group(&self, stat: StatKey) -> Result<MultiplierGroup, ContractViolation> {
        Ok(MultiplierGroup {
            stat,
            total_pct: self.total(stat)?,
        })
    }

    #[must_use]
    pub fn contributions(&self) -> &[BonusContribution] {
        &self.contributions
    }
}

/// Sum of percentage bonuses applied to a base as `base × (1 + Σ/100)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultiplierGroup {
    pub stat: StatKey,
    pub total_pct: f64,
}

impl MultiplierGroup {
    #[must_use]
    pub fn factor(&self) -> f64 {
        1.0 + self.total_pct / 100.0
    }
}

/// A whole-number base with at most one multiplier group applied.
///
/// The only way out is [`ScaledValue::finish`], which yields a
/// [`ScaledAmount`]. Amounts never convert back into a `ScaledValue`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledValue {
    base: u64,
    value: f64,
    applied: Option<StatKey>,
}

impl ScaledValue {
    #[must_use]
    pub fn new(base: u64) -> Self {
        Self {
            base,
            value: u64_to_f64(base),
            applied: None,
        }
    }

    /// Scale the base by the group.
    ///
    /// # Errors
    ///
    /// Returns `ContractViolation::NestedMultiplier` when a group was already
    /// applied; independent sources belong in the same group.
    pub fn apply(self, group: &MultiplierGroup) -> Result<Self, ContractViolation> {
        if self.applied.is_some() {
            log::warn!("rejected nested multiplier for {:?}", group.stat);
            return Err(ContractViolation::NestedMultiplier(group.stat));
        }
        Ok(Self {
            base: self.base,
            value: u64_to_f64(self.base) * group.factor(),
            applied: Some(group.stat),
        })
    }

    #[must_use]
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// Stat of the group applied so far, if any.
    #[must_use]
    pub const fn applied(&self) -> Option<StatKey> {
        self.applied
    }

    #[must_use]
    pub const fn finish(self) -> ScaledAmount {
        ScaledAmount(self.value)
    }
}

/// Final result of a scaling; readable only as whole units.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct ScaledAmount(f64);

impl ScaledAmount {
    /// Nearest whole unit.
    #[must_use]
    pub fn rounded(self) -> u64 {
        floor_f64_to_u64(self.0.round())
    }

    #[must_use]
    pub fn floored(self) -> u64 {
        floor_f64_to_u64(self.0)
    }
}
