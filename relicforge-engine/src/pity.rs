//! Per-pool failure streaks and the step table they feed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::constants::{PITY_STEPS, POOL_CELESTIAL, POOL_MERGE_PREFIX};
use crate::error::ConfigError;
use crate::rarity::Rarity;

/// Identifier of an independent pity pool, e.g. `merge.rare`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolId(String);

impl PoolId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Merge pool keyed by the attempt's base tier.
    #[must_use]
    pub fn merge(base_tier: Rarity) -> Self {
        Self(format!("{POOL_MERGE_PREFIX}{}", base_tier.key()))
    }

    #[must_use]
    pub fn celestial() -> Self {
        Self(POOL_CELESTIAL.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Failure streak for one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PityCounter {
    pub consecutive_failures: u32,
}

/// One row of the step table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PityStep {
    pub failures: u32,
    pub bonus: f64,
}

/// Discrete step function from failure streak to additive success bonus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PityTable {
    steps: Vec<PityStep>,
}

impl PityTable {
    #[must_use]
    pub fn new(steps: Vec<PityStep>) -> Self {
        Self { steps }
    }

    /// Bonus of the highest step the streak has reached.
    #[must_use]
    pub fn bonus_for(&self, failures: u32) -> f64 {
        self.steps
            .iter()
            .take_while(|step| failures >= step.failures)
            .last()
            .map_or(0.0, |step| step.bonus)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let increasing = self
            .steps
            .windows(2)
            .all(|pair| pair[0].failures < pair[1].failures && pair[0].bonus <= pair[1].bonus);
        if !increasing {
            return Err(ConfigError::NotIncreasing {
                field: "pity.steps",
            });
        }
        for step in &self.steps {
            if !step.bonus.is_finite() || !(0.0..=1.0).contains(&step.bonus) {
                return Err(ConfigError::RangeViolation {
                    field: "pity.steps.bonus",
                    min: 0.0,
                    max: 1.0,
                    value: step.bonus,
                });
            }
        }
        Ok(())
    }
}

impl Default for PityTable {
    fn default() -> Self {
        Self::new(
            PITY_STEPS
                .iter()
                .map(|&(failures, bonus)| PityStep { failures, bonus })
                .collect(),
        )
    }
}

/// Counters for every pool a profile has touched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PityLedger {
    pools: BTreeMap<PoolId, PityCounter>,
}

impl PityLedger {
    #[must_use]
    pub fn counter(&self, pool: &PoolId) -> PityCounter {
        self.pools.get(pool).copied().unwrap_or_default()
    }

    /// Bonus the next attempt in `pool` receives.
    #[must_use]
    pub fn bonus(&self, pool: &PoolId, table: &PityTable) -> f64 {
        table.bonus_for(self.counter(pool).consecutive_failures)
    }

    /// Record a resolved attempt: failures extend the streak, success resets it.
    pub fn record(&mut self, pool: &PoolId, success: bool) {
        let counter = self.pools.entry(pool.clone()).or_default();
        if success {
            counter.consecutive_failures = 0;
        } else {
            counter.consecutive_failures = counter.consecutive_failures.saturating_add(1);
        }
        log::debug!(
            "pity {pool} -> {} consecutive failures",
            counter.consecutive_failures
        );
    }

    pub fn pools(&self) -> impl Iterator<Item = (&PoolId, &PityCounter)> {
        self.pools.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_table_is_discrete() {
        let table = PityTable::default();
        assert!(table.bonus_for(0).abs() < f64::EPSILON);
        assert!(table.bonus_for(4).abs() < f64::EPSILON);
        assert!((table.bonus_for(5) - 0.10).abs() < f64::EPSILON);
        assert!((table.bonus_for(9) - 0.10).abs() < f64::EPSILON);
        assert!((table.bonus_for(10) - 0.25).abs() < f64::EPSILON);
        assert!((table.bonus_for(15) - 0.50).abs() < f64::EPSILON);
        assert!((table.bonus_for(400) - 0.50).abs() < f64::EPSILON);
    }

    #[test]
    fn success_resets_only_its_own_pool() {
        let table = PityTable::default();
        let rare = PoolId::merge(Rarity::Rare);
        let epic = PoolId::merge(Rarity::Epic);
        let mut ledger = PityLedger::default();
        for _ in 0..5 {
            ledger.record(&rare, false);
            ledger.record(&epic, false);
        }
        assert!((ledger.bonus(&rare, &table) - 0.10).abs() < f64::EPSILON);
        ledger.record(&rare, true);
        assert_eq!(ledger.counter(&rare).consecutive_failures, 0);
        assert_eq!(ledger.counter(&epic).consecutive_failures, 5);
    }

    #[test]
    fn pool_ids_are_namespaced() {
        assert_eq!(PoolId::merge(Rarity::Uncommon).as_str(), "merge.uncommon");
        assert_eq!(PoolId::celestial().to_string(), "celestial.forge");
    }

    #[test]
    fn unordered_tables_fail_validation() {
        let table = PityTable::new(vec![
            PityStep {
                failures: 10,
                bonus: 0.2,
            },
            PityStep {
                failures: 5,
                bonus: 0.1,
            },
        ]);
        assert!(table.validate().is_err());
        assert!(PityTable::default().validate().is_ok());
    }
}
