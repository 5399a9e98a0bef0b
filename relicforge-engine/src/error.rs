//! Error taxonomy for the progression engine.
//!
//! Validation errors are recoverable and user-displayable. Contract violations
//! and configuration errors mean the engine itself is inconsistent; the
//! operation aborts without partial mutation.

use thiserror::Error;

use crate::bonus::{SourceId, StackingMode, StatKey};
use crate::item::ItemId;
use crate::rarity::Rarity;
use crate::roll::{AttemptId, RollKind};

/// Recoverable, user-displayable input problems. The caller should re-fetch
/// the current snapshot and retry.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("selection changed, please retry (item {0} is no longer in the inventory)")]
    StaleSelection(ItemId),
    #[error("item {0} is equipped and cannot be used as a merge input")]
    EquippedInput(ItemId),
    #[error("item {0} was selected more than once")]
    DuplicateInput(ItemId),
    #[error("a merge needs at least {min} items (got {got})")]
    TooFewInputs { min: usize, got: usize },
    #[error("every selected item is {fuel:?} fuel; add an item above the fuel tier")]
    AllFuel { fuel: Rarity },
    #[error("celestial item {0} cannot be merged")]
    CelestialInput(ItemId),
    #[error("malformed context: {0}")]
    MalformedContext(&'static str),
    #[error("not enough coins: need {needed}, have {available}")]
    InsufficientCoins { needed: u64, available: u64 },
    #[error("celestial forge requires {required} legendary items (obtained {obtained})")]
    CelestialLocked { required: u32, obtained: u32 },
    #[error("item {item} does not fit the {expected} slot")]
    SlotMismatch {
        item: ItemId,
        expected: crate::item::Slot,
    },
    #[error("near-miss retry is not available for attempt {0}")]
    RetryUnavailable(AttemptId),
}

/// Programming errors: the engine or one of its callers broke a sequencing or
/// stacking contract.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ContractViolation {
    #[error("rolls for attempt {0} were already consumed")]
    RollConsumedTwice(AttemptId),
    #[error("rolls for attempt {0} were already resolved; the reveal must reuse them")]
    RollAlreadyResolved(AttemptId),
    #[error("no rolls recorded for attempt {0}")]
    RollsMissing(AttemptId),
    #[error("override for {kind:?}[{index}] diverges from the previewed roll")]
    DivergentRoll { kind: RollKind, index: u16 },
    #[error("override does not match the roll plan for attempt {0}")]
    RollPlanMismatch(AttemptId),
    #[error("roll value {value} for {kind:?} is outside [0, 1)")]
    RollOutOfRange { kind: RollKind, value: f64 },
    #[error("stat {0:?} is not registered with the stacking registry")]
    UnregisteredStat(StatKey),
    #[error("stacking mode {mode:?} is not registered for stat {stat:?}")]
    UnregisteredStackingMode { stat: StatKey, mode: StackingMode },
    #[error("source {source_id} contributes {stat:?} more than once")]
    DuplicateContribution { source_id: SourceId, stat: StatKey },
    #[error("conflicting replace contributions for {0:?}")]
    ConflictingReplace(StatKey),
    #[error("multiplier group for {0:?} would nest on an already scaled value")]
    NestedMultiplier(StatKey),
    #[error("reward for attempt {0} was committed before its reveal completed")]
    RevealIncomplete(AttemptId),
    #[error("reward for attempt {0} was already committed")]
    AlreadyCommitted(AttemptId),
    #[error("attempt {0} was superseded by a near-miss retry")]
    Superseded(AttemptId),
    #[error("attempt {0} has not been resolved")]
    Unresolved(AttemptId),
    #[error("attempt {0} was abandoned")]
    Abandoned(AttemptId),
    #[error("item {item} is held by previewed attempt {attempt}; resolve or abandon it first")]
    InputsLocked { attempt: AttemptId, item: ItemId },
    #[error("removed {removed} items but expected {expected}")]
    RemovalCountMismatch { expected: usize, removed: usize },
}

/// Startup configuration problems. Raised by `EngineConfig::validate`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("cost table is missing an entry for action `{0}`")]
    MissingCost(String),
    #[error("{field} must be between {min:.2} and {max:.2} (got {value:.2})")]
    RangeViolation {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },
    #[error("{field} weights must sum to 1.0 (got {total:.4})")]
    WeightsDoNotSum { field: &'static str, total: f64 },
    #[error("{field} must be strictly increasing")]
    NotIncreasing { field: &'static str },
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("stacking registry has no rule for {0:?}")]
    MissingStatRule(StatKey),
    #[error("failed to parse engine configuration: {0}")]
    Parse(String),
}

/// Top-level error returned by engine operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Contract(#[from] ContractViolation),
    #[error(transparent)]
    Configuration(#[from] ConfigError),
}

impl EngineError {
    /// Whether the error should be surfaced to the player as a retryable message.
    #[must_use]
    pub const fn is_user_facing(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_validation_errors_are_user_facing() {
        let stale = EngineError::from(ValidationError::MalformedContext("minutes"));
        assert!(stale.is_user_facing());

        let contract = EngineError::from(ContractViolation::RollConsumedTwice(AttemptId::new(3)));
        assert!(!contract.is_user_facing());

        let config = EngineError::from(ConfigError::MissingCost(String::from("merge")));
        assert!(!config.is_user_facing());
        assert_eq!(
            config.to_string(),
            "cost table is missing an entry for action `merge`"
        );
    }
}
