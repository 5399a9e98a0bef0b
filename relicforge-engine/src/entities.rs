//! Collectible entities and the abilities their variants grant.
//!
//! Each entity has a normal and an exceptional variant. The two variants
//! usually grant *different* abilities; owning both keeps both. When they grant
//! the same stat the magnitudes add, unless the definition marks the
//! exceptional variant as replacing the normal one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::bonus::{BonusContribution, SourceId, StatKey};

/// Variant of a collectible.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Normal,
    Exceptional,
}

impl Variant {
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Exceptional => "exceptional",
        }
    }
}

/// Closed roster of collectible entities.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EntityId {
    EmberFox,
    TideTurtle,
    MossGolem,
    StormHawk,
    LanternMoth,
    FrostOwl,
    CopperBeetle,
    DuskCat,
    SunHeron,
    IronBoar,
    MistSerpent,
    StarWhale,
}

/// Ability granted by one variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityAbility {
    /// Percentage bonus on a stat.
    StatBonus { stat: StatKey, amount: f64 },
    /// Permanent whole-tier bonus on successful merges.
    TierBonus { tiers: u8 },
    /// Chance to reroll a minimal tier jump.
    RerollChance { pct: f64 },
}

impl EntityAbility {
    /// Stat the ability feeds into.
    #[must_use]
    pub const fn stat(self) -> StatKey {
        match self {
            Self::StatBonus { stat, .. } => stat,
            Self::TierBonus { .. } => StatKey::TierBonus,
            Self::RerollChance { .. } => StatKey::RerollChancePct,
        }
    }

    #[must_use]
    pub fn amount(self) -> f64 {
        match self {
            Self::StatBonus { amount, .. } => amount,
            Self::TierBonus { tiers } => f64::from(tiers),
            Self::RerollChance { pct } => pct,
        }
    }
}

/// Wiring of both variants for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariantAbilities {
    pub normal: EntityAbility,
    pub exceptional: EntityAbility,
    /// Exceptional replaces normal when both feed the same stat.
    pub exceptional_replaces: bool,
}

const fn stat(stat: StatKey, amount: f64) -> EntityAbility {
    EntityAbility::StatBonus { stat, amount }
}

const fn pair(normal: EntityAbility, exceptional: EntityAbility) -> VariantAbilities {
    VariantAbilities {
        normal,
        exceptional,
        exceptional_replaces: false,
    }
}

const fn replacing(normal: EntityAbility, exceptional: EntityAbility) -> VariantAbilities {
    VariantAbilities {
        normal,
        exceptional,
        exceptional_replaces: true,
    }
}

impl EntityId {
    pub const ALL: [Self; 12] = [
        Self::EmberFox,
        Self::TideTurtle,
        Self::MossGolem,
        Self::StormHawk,
        Self::LanternMoth,
        Self::FrostOwl,
        Self::CopperBeetle,
        Self::DuskCat,
        Self::SunHeron,
        Self::IronBoar,
        Self::MistSerpent,
        Self::StarWhale,
    ];

    /// Roster position; exhaustive so a new entity must be placed explicitly.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::EmberFox => 0,
            Self::TideTurtle => 1,
            Self::MossGolem => 2,
            Self::StormHawk => 3,
            Self::LanternMoth => 4,
            Self::FrostOwl => 5,
            Self::CopperBeetle => 6,
            Self::DuskCat => 7,
            Self::SunHeron => 8,
            Self::IronBoar => 9,
            Self::MistSerpent => 10,
            Self::StarWhale => 11,
        }
    }

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::EmberFox => "ember_fox",
            Self::TideTurtle => "tide_turtle",
            Self::MossGolem => "moss_golem",
            Self::StormHawk => "storm_hawk",
            Self::LanternMoth => "lantern_moth",
            Self::FrostOwl => "frost_owl",
            Self::CopperBeetle => "copper_beetle",
            Self::DuskCat => "dusk_cat",
            Self::SunHeron => "sun_heron",
            Self::IronBoar => "iron_boar",
            Self::MistSerpent => "mist_serpent",
            Self::StarWhale => "star_whale",
        }
    }

    /// Ability wiring for both variants.
    #[must_use]
    pub const fn abilities(self) -> VariantAbilities {
        match self {
            Self::EmberFox => pair(stat(StatKey::CoinPct, 2.0), stat(StatKey::CoinPct, 5.0)),
            Self::TideTurtle => replacing(stat(StatKey::XpPct, 3.0), stat(StatKey::XpPct, 6.0)),
            Self::MossGolem => pair(
                stat(StatKey::CostReductionPct, 5.0),
                stat(StatKey::CostReductionPct, 10.0),
            ),
            Self::StormHawk => pair(
                stat(StatKey::DropLuckPct, 5.0),
                stat(StatKey::EncounterPct, 10.0),
            ),
            Self::LanternMoth => pair(
                stat(StatKey::MergeLuckPct, 2.0),
                stat(StatKey::MergeLuckPct, 4.0),
            ),
            Self::FrostOwl => pair(
                stat(StatKey::CatchRatePct, 5.0),
                EntityAbility::RerollChance { pct: 10.0 },
            ),
            Self::CopperBeetle => pair(stat(StatKey::CoinPct, 1.0), stat(StatKey::PowerPct, 5.0)),
            Self::DuskCat => pair(
                stat(StatKey::EncounterPct, 5.0),
                stat(StatKey::DropLuckPct, 8.0),
            ),
            Self::SunHeron => pair(stat(StatKey::XpPct, 2.0), stat(StatKey::MergeLuckPct, 3.0)),
            Self::IronBoar => replacing(stat(StatKey::PowerPct, 3.0), stat(StatKey::PowerPct, 7.0)),
            Self::MistSerpent => pair(
                EntityAbility::RerollChance { pct: 15.0 },
                EntityAbility::TierBonus { tiers: 1 },
            ),
            Self::StarWhale => pair(
                EntityAbility::TierBonus { tiers: 1 },
                EntityAbility::RerollChance { pct: 50.0 },
            ),
        }
    }
}

/// Ownership flags for both variants of an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedVariants {
    pub has_normal: bool,
    pub has_exceptional: bool,
}

impl OwnedVariants {
    #[must_use]
    pub const fn owns(self, variant: Variant) -> bool {
        match variant {
            Variant::Normal => self.has_normal,
            Variant::Exceptional => self.has_exceptional,
        }
    }
}

/// Captured collectible. Records are only ever flagged, never removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity: EntityId,
    #[serde(default)]
    pub has_normal: bool,
    #[serde(default)]
    pub has_exceptional: bool,
}

impl EntityRecord {
    #[must_use]
    pub const fn owned(&self) -> OwnedVariants {
        OwnedVariants {
            has_normal: self.has_normal,
            has_exceptional: self.has_exceptional,
        }
    }
}

/// One ability currently granted to the player.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActiveAbility {
    pub entity: EntityId,
    pub variant: Variant,
    pub ability: EntityAbility,
}

/// Abilities granted by every owned variant after replacement rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActiveAbilities {
    pub entries: Vec<ActiveAbility>,
}

impl ActiveAbilities {
    /// Whether any active ability feeds `stat`.
    #[must_use]
    pub fn grants(&self, stat: StatKey) -> bool {
        self.entries.iter().any(|entry| entry.ability.stat() == stat)
    }

    /// Active abilities coming from one entity.
    pub fn for_entity(&self, entity: EntityId) -> impl Iterator<Item = &ActiveAbility> {
        self.entries.iter().filter(move |entry| entry.entity == entity)
    }

    /// Bonus contributions, one per active ability, keyed by variant source.
    #[must_use]
    pub fn contributions(&self) -> Vec<BonusContribution> {
        self.entries
            .iter()
            .map(|entry| {
                BonusContribution::additive(
                    SourceId::Entity {
                        entity: entry.entity,
                        variant: entry.variant,
                    },
                    entry.ability.stat(),
                    entry.ability.amount(),
                )
            })
            .collect()
    }
}

/// Abilities one entity grants for the variants owned.
#[must_use]
pub fn abilities_for(entity: EntityId, owned: OwnedVariants) -> Vec<ActiveAbility> {
    let wiring = entity.abilities();
    let same_stat = wiring.normal.stat() == wiring.exceptional.stat();
    let normal_replaced = owned.has_exceptional && wiring.exceptional_replaces && same_stat;

    let mut active = Vec::with_capacity(2);
    if owned.has_normal && !normal_replaced {
        active.push(ActiveAbility {
            entity,
            variant: Variant::Normal,
            ability: wiring.normal,
        });
    }
    if owned.has_exceptional {
        active.push(ActiveAbility {
            entity,
            variant: Variant::Exceptional,
            ability: wiring.exceptional,
        });
    }
    active
}

/// Owned collectibles keyed by entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCollection {
    #[serde(default)]
    records: BTreeMap<EntityId, EntityRecord>,
}

impl EntityCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag a captured variant. Returns true when the variant is newly owned.
    pub fn record_capture(&mut self, entity: EntityId, variant: Variant) -> bool {
        let record = self.records.entry(entity).or_insert(EntityRecord {
            entity,
            has_normal: false,
            has_exceptional: false,
        });
        let flag = match variant {
            Variant::Normal => &mut record.has_normal,
            Variant::Exceptional => &mut record.has_exceptional,
        };
        let newly = !*flag;
        *flag = true;
        if newly {
            log::debug!("entity captured | {} {}", entity.key(), variant.key());
        }
        newly
    }

    #[must_use]
    pub fn owned_variants(&self, entity: EntityId) -> OwnedVariants {
        self.records
            .get(&entity)
            .map(EntityRecord::owned)
            .unwrap_or_default()
    }

    pub fn records(&self) -> impl Iterator<Item = &EntityRecord> {
        self.records.values()
    }
}

impl crate::EntityStore for EntityCollection {
    fn owned_variants(&self, entity: EntityId) -> OwnedVariants {
        Self::owned_variants(self, entity)
    }
}

/// Resolve the active abilities from any entity store.
#[must_use]
pub fn active_abilities<E: crate::EntityStore + ?Sized>(store: &E) -> ActiveAbilities {
    let entries = EntityId::ALL
        .iter()
        .flat_map(|&entity| abilities_for(entity, store.owned_variants(entity)))
        .collect();
    ActiveAbilities { entries }
}
