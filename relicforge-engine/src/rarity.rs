//! Rarity tiers and the moving-window rarity resolver.
//!
//! Luck modifiers are expressed in the same unit as one tier width, so they
//! slide the `[5%, 20%, 50%, 20%, 5%]` window along the tier axis instead of
//! multiplying final odds. Mass that falls off either end of the ordinary
//! tiers is absorbed by the edge tier.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::RarityConfig;
use crate::constants::{BASE_POWER_BY_TIER, RARITY_PCT_PER_TIER};
use crate::error::ValidationError;
use crate::numbers::pick_weighted;

/// Number of tiers reachable through the ordinary drop window.
pub const ORDINARY_TIERS: usize = 5;

/// Ordered rarity tier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
    Celestial,
}

impl Rarity {
    /// Every tier in ascending order.
    pub const ALL: [Self; 6] = [
        Self::Common,
        Self::Uncommon,
        Self::Rare,
        Self::Epic,
        Self::Legendary,
        Self::Celestial,
    ];

    /// Tiers the ordinary window and merges can produce.
    pub const ORDINARY: [Self; ORDINARY_TIERS] = [
        Self::Common,
        Self::Uncommon,
        Self::Rare,
        Self::Epic,
        Self::Legendary,
    ];

    /// Highest tier reachable without the celestial forge.
    pub const MAX_ORDINARY: Self = Self::Legendary;

    /// Zero-based position on the tier axis.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Common => 0,
            Self::Uncommon => 1,
            Self::Rare => 2,
            Self::Epic => 3,
            Self::Legendary => 4,
            Self::Celestial => 5,
        }
    }

    /// Ordinary tier at `index`, clamped to Legendary.
    #[must_use]
    pub fn ordinary_from_index(index: usize) -> Self {
        Self::ORDINARY[index.min(ORDINARY_TIERS - 1)]
    }

    /// Fixed base power for the tier.
    #[must_use]
    pub const fn base_power(self) -> u32 {
        BASE_POWER_BY_TIER[self.index()]
    }

    #[must_use]
    pub const fn is_ordinary(self) -> bool {
        !matches!(self, Self::Celestial)
    }

    /// Raise the tier by `steps`, never past Legendary.
    #[must_use]
    pub fn raised_by(self, steps: u32) -> Self {
        let steps = usize::try_from(steps).unwrap_or(usize::MAX);
        Self::ordinary_from_index(self.index().saturating_add(steps))
    }

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Common => "common",
            Self::Uncommon => "uncommon",
            Self::Rare => "rare",
            Self::Epic => "epic",
            Self::Legendary => "legendary",
            Self::Celestial => "celestial",
        }
    }
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Context describing the session that earned a drop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DropContext {
    /// Length of the completed focus session in minutes.
    pub session_minutes: f64,
    /// Wall-clock creation time used for item identity.
    pub created_at_ms: u64,
}

impl DropContext {
    #[must_use]
    pub const fn new(session_minutes: f64, created_at_ms: u64) -> Self {
        Self {
            session_minutes,
            created_at_ms,
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if !self.session_minutes.is_finite() {
            return Err(ValidationError::MalformedContext(
                "session minutes must be finite",
            ));
        }
        if self.session_minutes < 0.0 {
            return Err(ValidationError::MalformedContext(
                "session minutes must not be negative",
            ));
        }
        Ok(())
    }
}

/// Kind of window shift applied by a modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifierKind {
    DropLuck,
    RarityBias,
}

/// Additive window shift expressed in percent of one tier width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RarityModifier {
    pub kind: ModifierKind,
    pub pct: f64,
}

impl RarityModifier {
    #[must_use]
    pub const fn drop_luck(pct: f64) -> Self {
        Self {
            kind: ModifierKind::DropLuck,
            pct,
        }
    }

    #[must_use]
    pub const fn rarity_bias(pct: f64) -> Self {
        Self {
            kind: ModifierKind::RarityBias,
            pct,
        }
    }
}

/// Probability per ordinary tier, Common first.
pub type TierDistribution = [f64; ORDINARY_TIERS];

/// Maps a drop context and luck modifiers onto a rarity tier.
#[derive(Debug, Clone, Copy)]
pub struct RarityResolver<'a> {
    cfg: &'a RarityConfig,
}

impl<'a> RarityResolver<'a> {
    #[must_use]
    pub const fn new(cfg: &'a RarityConfig) -> Self {
        Self { cfg }
    }

    /// Window center on the tier axis before modifiers.
    #[must_use]
    pub fn base_center(&self, minutes: f64) -> f64 {
        let anchors = &self.cfg.center_anchors;
        let Some(&(first_minutes, first_center)) = anchors.first() else {
            return 0.0;
        };
        if minutes <= first_minutes {
            return first_center;
        }
        for pair in anchors.windows(2) {
            let (lo_minutes, lo_center) = pair[0];
            let (hi_minutes, hi_center) = pair[1];
            if minutes <= hi_minutes {
                let span = hi_minutes - lo_minutes;
                let t = if span <= f64::EPSILON {
                    1.0
                } else {
                    (minutes - lo_minutes) / span
                };
                return (hi_center - lo_center).mul_add(t, lo_center);
            }
        }
        anchors.last().map_or(0.0, |&(_, center)| center)
    }

    /// Probability of each ordinary tier for the context.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::MalformedContext` when minutes or modifiers are
    /// not finite, or minutes are negative.
    pub fn tier_distribution(
        &self,
        context: &DropContext,
        modifiers: &[RarityModifier],
    ) -> Result<TierDistribution, ValidationError> {
        context.validate()?;
        if modifiers.iter().any(|m| !m.pct.is_finite()) {
            return Err(ValidationError::MalformedContext(
                "rarity modifiers must be finite",
            ));
        }
        let minutes = context.session_minutes;
        let mut dist = [0.0; ORDINARY_TIERS];
        if minutes < self.cfg.min_session_minutes {
            dist[0] = 1.0;
            return Ok(dist);
        }
        if minutes >= self.cfg.ceiling_session_minutes {
            dist[ORDINARY_TIERS - 1] = 1.0;
            return Ok(dist);
        }

        let shift: f64 = modifiers.iter().map(|m| m.pct).sum::<f64>() / RARITY_PCT_PER_TIER;
        let center = self.base_center(minutes) + shift;
        let floor = center.floor();
        let frac = center - floor;
        let lower = self.integer_window(floor);
        let upper = self.integer_window(floor + 1.0);
        for (idx, slot) in dist.iter_mut().enumerate() {
            *slot = (upper[idx] - lower[idx]).mul_add(frac, lower[idx]);
        }
        Ok(dist)
    }

    /// Resolve a tier from a unit roll.
    ///
    /// # Errors
    ///
    /// Propagates context validation failures from [`Self::distribution`].
    pub fn resolve_rarity(
        &self,
        context: &DropContext,
        modifiers: &[RarityModifier],
        roll: f64,
    ) -> Result<Rarity, ValidationError> {
        let dist = self.tier_distribution(context, modifiers)?;
        let idx = pick_weighted(&dist, roll);
        let rarity = Rarity::ordinary_from_index(idx);
        log::trace!(
            "rarity resolved | minutes {:.1} roll {roll:.4} -> {rarity}",
            context.session_minutes
        );
        Ok(rarity)
    }

    fn integer_window(&self, center: f64) -> TierDistribution {
        let mut dist = [0.0; ORDINARY_TIERS];
        let half = i64::try_from(self.cfg.window_shape.len() / 2).unwrap_or(0);
        let max_index = i64::try_from(ORDINARY_TIERS - 1).unwrap_or(4);
        // Centers are small on the tier axis; the cast cannot overflow.
        #[allow(clippy::cast_possible_truncation)]
        let center = center as i64;
        for (offset, weight) in self.cfg.window_shape.iter().enumerate() {
            let offset = i64::try_from(offset).unwrap_or(0) - half;
            let tier = center.saturating_add(offset).clamp(0, max_index);
            let tier = usize::try_from(tier).unwrap_or(0);
            dist[tier] += weight;
        }
        dist
    }
}

/// Expected tier index under a distribution.
#[must_use]
pub fn expected_tier(dist: &TierDistribution) -> f64 {
    dist.iter()
        .enumerate()
        .map(|(idx, p)| crate::numbers::usize_to_f64(idx) * p)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RarityConfig {
        RarityConfig::default()
    }

    fn ctx(minutes: f64) -> DropContext {
        DropContext::new(minutes, 0)
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn tiers_are_ordered_and_power_is_tabled() {
        assert!(Rarity::Common < Rarity::Uncommon);
        assert!(Rarity::Legendary < Rarity::Celestial);
        assert_eq!(Rarity::Rare.base_power(), 50);
        assert_eq!(Rarity::Celestial.base_power(), 600);
        assert_eq!(Rarity::Epic.raised_by(4), Rarity::Legendary);
        assert_eq!(Rarity::Common.raised_by(2), Rarity::Rare);
    }

    #[test]
    fn short_sessions_collapse_to_common() {
        let cfg = cfg();
        let resolver = RarityResolver::new(&cfg);
        let dist = resolver
            .tier_distribution(&ctx(2.0), &[RarityModifier::drop_luck(400.0)])
            .unwrap();
        assert_eq!(dist, [1.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn ceiling_collapses_to_legendary_never_celestial() {
        let cfg = cfg();
        let resolver = RarityResolver::new(&cfg);
        let dist = resolver.tier_distribution(&ctx(600.0), &[]).unwrap();
        assert_eq!(dist, [0.0, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(
            resolver.resolve_rarity(&ctx(600.0), &[], 0.999).unwrap(),
            Rarity::Legendary
        );
    }

    #[test]
    fn window_keeps_shape_around_center() {
        let cfg = cfg();
        let resolver = RarityResolver::new(&cfg);
        // 90 minutes centers the window on Rare.
        let dist = resolver.tier_distribution(&ctx(90.0), &[]).unwrap();
        assert_close(dist[0], 0.05);
        assert_close(dist[1], 0.20);
        assert_close(dist[2], 0.50);
        assert_close(dist[3], 0.20);
        assert_close(dist[4], 0.05);
    }

    #[test]
    fn luck_slides_window_by_whole_tiers() {
        let cfg = cfg();
        let resolver = RarityResolver::new(&cfg);
        let dist = resolver
            .tier_distribution(&ctx(60.0), &[RarityModifier::drop_luck(100.0)])
            .unwrap();
        let reference = resolver.tier_distribution(&ctx(90.0), &[]).unwrap();
        for (a, b) in dist.iter().zip(reference.iter()) {
            assert_close(*a, *b);
        }
    }

    #[test]
    fn fractional_center_interpolates_and_sums_to_one() {
        let cfg = cfg();
        let resolver = RarityResolver::new(&cfg);
        let dist = resolver
            .tier_distribution(
                &ctx(60.0),
                &[
                    RarityModifier::drop_luck(25.0),
                    RarityModifier::rarity_bias(25.0),
                ],
            )
            .unwrap();
        assert_close(dist.iter().sum(), 1.0);
        // Center 1.5: halfway between the Uncommon and Rare windows.
        assert_close(dist[2], 0.35);
    }

    #[test]
    fn edge_mass_is_absorbed() {
        let cfg = cfg();
        let resolver = RarityResolver::new(&cfg);
        let dist = resolver.tier_distribution(&ctx(5.0), &[]).unwrap();
        assert_close(dist[0], 0.95);
        assert_close(dist[1], 0.05);
    }

    #[test]
    fn malformed_context_is_rejected() {
        let cfg = cfg();
        let resolver = RarityResolver::new(&cfg);
        assert!(matches!(
            resolver.tier_distribution(&ctx(f64::NAN), &[]),
            Err(ValidationError::MalformedContext(_))
        ));
        assert!(matches!(
            resolver.tier_distribution(&ctx(-1.0), &[]),
            Err(ValidationError::MalformedContext(_))
        ));
        assert!(matches!(
            resolver.tier_distribution(&ctx(30.0), &[RarityModifier::drop_luck(f64::INFINITY)]),
            Err(ValidationError::MalformedContext(_))
        ));
    }

    #[test]
    fn expected_tier_never_decreases_with_duration() {
        let cfg = cfg();
        let resolver = RarityResolver::new(&cfg);
        let mut previous = -1.0;
        for minutes in 0..=300 {
            let dist = resolver
                .tier_distribution(&ctx(f64::from(minutes)), &[RarityModifier::drop_luck(10.0)])
                .unwrap();
            assert_close(dist.iter().sum(), 1.0);
            let expected = expected_tier(&dist);
            assert!(
                expected + 1e-9 >= previous,
                "expected tier dropped at {minutes} minutes"
            );
            previous = expected;
        }
    }
}
