//! Engine configuration loaded from JSON with per-field defaults.
//!
//! Every table starts from [`crate::constants`], so `{}` is a valid document.
//! [`EngineConfig::validate`] runs once at engine construction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::bonus::StackingRegistry;
use crate::constants::{
    CELESTIAL_FORGE_CHANCE, CELESTIAL_UNLOCK_LEGENDARIES, COST_REDUCTION_CAP_PCT, DEFAULT_COSTS,
    MERGE_BASE_SUCCESS, MERGE_BOOST_BONUS, MERGE_MIN_INPUTS, MERGE_NEAR_MISS_MARGIN,
    MERGE_PER_EXTRA_ITEM, MERGE_SUCCESS_CAP, RARITY_CEILING_SESSION_MINUTES,
    RARITY_CENTER_ANCHORS, RARITY_MIN_SESSION_MINUTES, RARITY_WINDOW_SHAPE, REQUIRED_COST_KEYS,
    SALVAGE_BELOW_THRESHOLD_CHANCE, SALVAGE_COUNT_THRESHOLD, SALVAGE_PER_EXTRA_CHANCE,
    TIER_JUMP_WEIGHTS,
};
use crate::error::ConfigError;
use crate::pity::PityTable;
use crate::rarity::Rarity;

const WEIGHT_TOLERANCE: f64 = 1e-6;

fn check_unit(field: &'static str, value: f64) -> Result<(), ConfigError> {
    check_range(field, 0.0, 1.0, value)
}

fn check_range(field: &'static str, min: f64, max: f64, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || !(min..=max).contains(&value) {
        return Err(ConfigError::RangeViolation {
            field,
            min,
            max,
            value,
        });
    }
    Ok(())
}

fn check_weights(field: &'static str, weights: &[f64]) -> Result<(), ConfigError> {
    if weights.is_empty() {
        return Err(ConfigError::Empty { field });
    }
    for weight in weights {
        check_unit(field, *weight)?;
    }
    let total: f64 = weights.iter().sum();
    if (total - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(ConfigError::WeightsDoNotSum { field, total });
    }
    Ok(())
}

/// Moving-window rarity tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RarityConfig {
    #[serde(default = "RarityConfig::default_center_anchors")]
    pub center_anchors: Vec<(f64, f64)>,
    #[serde(default = "RarityConfig::default_min_session_minutes")]
    pub min_session_minutes: f64,
    #[serde(default = "RarityConfig::default_ceiling_session_minutes")]
    pub ceiling_session_minutes: f64,
    /// Odd-length weights centered on the window tier.
    #[serde(default = "RarityConfig::default_window_shape")]
    pub window_shape: Vec<f64>,
}

impl RarityConfig {
    fn default_center_anchors() -> Vec<(f64, f64)> {
        RARITY_CENTER_ANCHORS.to_vec()
    }

    const fn default_min_session_minutes() -> f64 {
        RARITY_MIN_SESSION_MINUTES
    }

    const fn default_ceiling_session_minutes() -> f64 {
        RARITY_CEILING_SESSION_MINUTES
    }

    fn default_window_shape() -> Vec<f64> {
        RARITY_WINDOW_SHAPE.to_vec()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.center_anchors.is_empty() {
            return Err(ConfigError::Empty {
                field: "rarity.center_anchors",
            });
        }
        let increasing = self
            .center_anchors
            .windows(2)
            .all(|pair| pair[0].0 < pair[1].0 && pair[0].1 <= pair[1].1);
        if !increasing {
            return Err(ConfigError::NotIncreasing {
                field: "rarity.center_anchors",
            });
        }
        check_range(
            "rarity.min_session_minutes",
            0.0,
            self.ceiling_session_minutes,
            self.min_session_minutes,
        )?;
        check_weights("rarity.window_shape", &self.window_shape)?;
        if self.window_shape.len() % 2 == 0 {
            return Err(ConfigError::RangeViolation {
                field: "rarity.window_shape.len",
                min: 1.0,
                max: 9.0,
                value: crate::numbers::usize_to_f64(self.window_shape.len()),
            });
        }
        Ok(())
    }
}

impl Default for RarityConfig {
    fn default() -> Self {
        Self {
            center_anchors: Self::default_center_anchors(),
            min_session_minutes: Self::default_min_session_minutes(),
            ceiling_session_minutes: Self::default_ceiling_session_minutes(),
            window_shape: Self::default_window_shape(),
        }
    }
}

/// Merge lottery tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default = "MergeConfig::default_base_success")]
    pub base_success: f64,
    #[serde(default = "MergeConfig::default_per_extra_item")]
    pub per_extra_item: f64,
    #[serde(default = "MergeConfig::default_boost_bonus")]
    pub boost_bonus: f64,
    #[serde(default = "MergeConfig::default_success_cap")]
    pub success_cap: f64,
    #[serde(default = "MergeConfig::default_min_inputs")]
    pub min_inputs: usize,
    #[serde(default = "MergeConfig::default_near_miss_margin")]
    pub near_miss_margin: f64,
    /// Weights for jumps of +1, +2, ... tiers.
    #[serde(default = "MergeConfig::default_tier_jump_weights")]
    pub tier_jump_weights: Vec<f64>,
    /// Inputs at this tier count toward success odds but never the result tier.
    #[serde(default = "MergeConfig::default_fuel_tier")]
    pub fuel_tier: Rarity,
}

impl MergeConfig {
    const fn default_base_success() -> f64 {
        MERGE_BASE_SUCCESS
    }

    const fn default_per_extra_item() -> f64 {
        MERGE_PER_EXTRA_ITEM
    }

    const fn default_boost_bonus() -> f64 {
        MERGE_BOOST_BONUS
    }

    const fn default_success_cap() -> f64 {
        MERGE_SUCCESS_CAP
    }

    const fn default_min_inputs() -> usize {
        MERGE_MIN_INPUTS
    }

    const fn default_near_miss_margin() -> f64 {
        MERGE_NEAR_MISS_MARGIN
    }

    fn default_tier_jump_weights() -> Vec<f64> {
        TIER_JUMP_WEIGHTS.to_vec()
    }

    const fn default_fuel_tier() -> Rarity {
        Rarity::Common
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_unit("merge.base_success", self.base_success)?;
        check_unit("merge.per_extra_item", self.per_extra_item)?;
        check_unit("merge.boost_bonus", self.boost_bonus)?;
        check_range("merge.success_cap", 0.0, MERGE_SUCCESS_CAP, self.success_cap)?;
        check_range("merge.near_miss_margin", 0.0, 0.5, self.near_miss_margin)?;
        if self.min_inputs < 2 {
            return Err(ConfigError::RangeViolation {
                field: "merge.min_inputs",
                min: 2.0,
                max: f64::from(u16::MAX),
                value: crate::numbers::usize_to_f64(self.min_inputs),
            });
        }
        check_weights("merge.tier_jump_weights", &self.tier_jump_weights)?;
        if !self.fuel_tier.is_ordinary() {
            return Err(ConfigError::RangeViolation {
                field: "merge.fuel_tier",
                min: 0.0,
                max: 4.0,
                value: crate::numbers::usize_to_f64(self.fuel_tier.index()),
            });
        }
        Ok(())
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            base_success: Self::default_base_success(),
            per_extra_item: Self::default_per_extra_item(),
            boost_bonus: Self::default_boost_bonus(),
            success_cap: Self::default_success_cap(),
            min_inputs: Self::default_min_inputs(),
            near_miss_margin: Self::default_near_miss_margin(),
            tier_jump_weights: Self::default_tier_jump_weights(),
            fuel_tier: Self::default_fuel_tier(),
        }
    }
}

/// Salvage material yield tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalvageConfig {
    #[serde(default = "SalvageConfig::default_count_threshold")]
    pub count_threshold: usize,
    #[serde(default = "SalvageConfig::default_below_threshold_chance")]
    pub below_threshold_chance: f64,
    #[serde(default = "SalvageConfig::default_per_extra_chance")]
    pub per_extra_chance: f64,
}

impl SalvageConfig {
    const fn default_count_threshold() -> usize {
        SALVAGE_COUNT_THRESHOLD
    }

    const fn default_below_threshold_chance() -> f64 {
        SALVAGE_BELOW_THRESHOLD_CHANCE
    }

    const fn default_per_extra_chance() -> f64 {
        SALVAGE_PER_EXTRA_CHANCE
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_unit("salvage.below_threshold_chance", self.below_threshold_chance)?;
        check_unit("salvage.per_extra_chance", self.per_extra_chance)?;
        if self.count_threshold == 0 {
            return Err(ConfigError::RangeViolation {
                field: "salvage.count_threshold",
                min: 1.0,
                max: f64::from(u16::MAX),
                value: 0.0,
            });
        }
        Ok(())
    }
}

impl Default for SalvageConfig {
    fn default() -> Self {
        Self {
            count_threshold: Self::default_count_threshold(),
            below_threshold_chance: Self::default_below_threshold_chance(),
            per_extra_chance: Self::default_per_extra_chance(),
        }
    }
}

/// Celestial forge gate and odds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CelestialConfig {
    #[serde(default = "CelestialConfig::default_unlock_legendaries")]
    pub unlock_legendaries: u32,
    #[serde(default = "CelestialConfig::default_chance")]
    pub chance: f64,
}

impl CelestialConfig {
    const fn default_unlock_legendaries() -> u32 {
        CELESTIAL_UNLOCK_LEGENDARIES
    }

    const fn default_chance() -> f64 {
        CELESTIAL_FORGE_CHANCE
    }

    fn validate(&self) -> Result<(), ConfigError> {
        check_unit("celestial.chance", self.chance)
    }
}

impl Default for CelestialConfig {
    fn default() -> Self {
        Self {
            unlock_legendaries: Self::default_unlock_legendaries(),
            chance: Self::default_chance(),
        }
    }
}

/// Coin price per action key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CostTable(BTreeMap<String, u64>);

impl CostTable {
    /// Base price for an action.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingCost` when the action has no entry.
    pub fn get(&self, action: &str) -> Result<u64, ConfigError> {
        self.0
            .get(action)
            .copied()
            .ok_or_else(|| ConfigError::MissingCost(action.to_string()))
    }

    pub fn set(&mut self, action: impl Into<String>, price: u64) {
        self.0.insert(action.into(), price);
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for key in REQUIRED_COST_KEYS {
            self.get(key)?;
        }
        Ok(())
    }
}

impl Default for CostTable {
    fn default() -> Self {
        Self(
            DEFAULT_COSTS
                .iter()
                .map(|(key, price)| ((*key).to_string(), *price))
                .collect(),
        )
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub rarity: RarityConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub salvage: SalvageConfig,
    #[serde(default)]
    pub pity: PityTable,
    #[serde(default)]
    pub celestial: CelestialConfig,
    #[serde(default)]
    pub costs: CostTable,
    #[serde(default = "EngineConfig::default_cost_reduction_cap_pct")]
    pub cost_reduction_cap_pct: f64,
    #[serde(default)]
    pub stacking: StackingRegistry,
}

impl EngineConfig {
    const fn default_cost_reduction_cap_pct() -> f64 {
        COST_REDUCTION_CAP_PCT
    }

    /// Parse a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed JSON, or the first
    /// validation failure.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self =
            serde_json::from_str(json).map_err(|err| ConfigError::Parse(err.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate every table.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rarity.validate()?;
        self.merge.validate()?;
        self.salvage.validate()?;
        self.pity.validate()?;
        self.celestial.validate()?;
        self.costs.validate()?;
        check_range(
            "cost_reduction_cap_pct",
            0.0,
            100.0,
            self.cost_reduction_cap_pct,
        )?;
        self.stacking.validate()?;
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rarity: RarityConfig::default(),
            merge: MergeConfig::default(),
            salvage: SalvageConfig::default(),
            pity: PityTable::default(),
            celestial: CelestialConfig::default(),
            costs: CostTable::default(),
            cost_reduction_cap_pct: Self::default_cost_reduction_cap_pct(),
            stacking: StackingRegistry::default(),
        }
    }
}
