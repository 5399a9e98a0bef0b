//! Centralized balance and tuning constants for Relicforge progression logic.
//!
//! These values define the default math for drops, merges and yields. The
//! runtime [`EngineConfig`](crate::config::EngineConfig) starts from them and
//! may override the tables, but every default lives here so that balance
//! changes are reviewed in version control.

// Rarity window ------------------------------------------------------------
pub(crate) const RARITY_MIN_SESSION_MINUTES: f64 = 5.0;
pub(crate) const RARITY_CEILING_SESSION_MINUTES: f64 = 240.0;
pub(crate) const RARITY_CENTER_ANCHORS: [(f64, f64); 6] = [
    (5.0, -1.0),
    (30.0, 0.0),
    (60.0, 1.0),
    (90.0, 2.0),
    (120.0, 3.0),
    (180.0, 4.0),
];
/// Window weights for offsets -2..=+2 around the center tier.
pub(crate) const RARITY_WINDOW_SHAPE: [f64; 5] = [0.05, 0.20, 0.50, 0.20, 0.05];
/// Percentage points of luck that shift the window by one full tier.
pub(crate) const RARITY_PCT_PER_TIER: f64 = 100.0;

// Item power ---------------------------------------------------------------
pub(crate) const BASE_POWER_BY_TIER: [u32; 6] = [10, 25, 50, 100, 250, 600];
pub(crate) const LUCKY_OPTION_SLOTS: [u8; 6] = [0, 1, 1, 2, 2, 3];
pub(crate) const LUCKY_OPTION_CHANCE: [f64; 6] = [0.0, 0.10, 0.20, 0.30, 0.45, 1.0];
pub(crate) const LUCKY_OPTION_MAX_PCT: [u8; 6] = [0, 2, 3, 4, 5, 8];

// Set bonus ----------------------------------------------------------------
pub(crate) const SET_BONUS_STEPS: [(usize, u32); 3] = [(3, 10), (5, 20), (8, 35)];

// Merge lottery ------------------------------------------------------------
pub(crate) const MERGE_BASE_SUCCESS: f64 = 0.25;
pub(crate) const MERGE_PER_EXTRA_ITEM: f64 = 0.03;
pub(crate) const MERGE_BOOST_BONUS: f64 = 0.25;
pub(crate) const MERGE_SUCCESS_CAP: f64 = 0.90;
pub(crate) const MERGE_MIN_INPUTS: usize = 2;
pub(crate) const MERGE_NEAR_MISS_MARGIN: f64 = 0.05;
/// Tier jump distribution for +1..=+4.
pub(crate) const TIER_JUMP_WEIGHTS: [f64; 4] = [0.50, 0.30, 0.15, 0.05];

// Salvage yield ------------------------------------------------------------
pub(crate) const SALVAGE_COUNT_THRESHOLD: usize = 10;
pub(crate) const SALVAGE_BELOW_THRESHOLD_CHANCE: f64 = 0.25;
pub(crate) const SALVAGE_PER_EXTRA_CHANCE: f64 = 0.10;

// Pity ---------------------------------------------------------------------
pub(crate) const PITY_STEPS: [(u32, f64); 3] = [(5, 0.10), (10, 0.25), (15, 0.50)];

// Celestial forge ----------------------------------------------------------
pub(crate) const CELESTIAL_UNLOCK_LEGENDARIES: u32 = 5;
pub(crate) const CELESTIAL_FORGE_CHANCE: f64 = 0.10;

// Cost reduction -----------------------------------------------------------
pub(crate) const COST_REDUCTION_CAP_PCT: f64 = 50.0;

// Action cost keys ---------------------------------------------------------
pub const COST_MERGE: &str = "merge";
pub const COST_MERGE_BOOST: &str = "merge_boost";
pub const COST_MERGE_RETRY: &str = "merge_retry";
pub const COST_CELESTIAL_FORGE: &str = "celestial_forge";
pub(crate) const REQUIRED_COST_KEYS: [&str; 4] = [
    COST_MERGE,
    COST_MERGE_BOOST,
    COST_MERGE_RETRY,
    COST_CELESTIAL_FORGE,
];
pub(crate) const DEFAULT_COSTS: [(&str, u64); 4] = [
    (COST_MERGE, 50),
    (COST_MERGE_BOOST, 100),
    (COST_MERGE_RETRY, 35),
    (COST_CELESTIAL_FORGE, 2_500),
];

// RNG domains --------------------------------------------------------------
pub(crate) const RNG_DOMAIN_DROP: &[u8] = b"drop";
pub(crate) const RNG_DOMAIN_MERGE: &[u8] = b"merge";
pub(crate) const RNG_DOMAIN_SALVAGE: &[u8] = b"salvage";
pub(crate) const RNG_DOMAIN_CELESTIAL: &[u8] = b"celestial";

// Pool identifiers ---------------------------------------------------------
pub(crate) const POOL_MERGE_PREFIX: &str = "merge.";
pub(crate) const POOL_CELESTIAL: &str = "celestial.forge";

// Attempt bookkeeping ------------------------------------------------------
/// Settled attempt ids remembered for double-commit diagnostics.
pub(crate) const SETTLED_HISTORY: usize = 256;
