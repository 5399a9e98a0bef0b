//! Immutable gear items, their stable identity and rolled bonus attributes.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::hash::Hasher;
use twox_hash::XxHash64;

use crate::bonus::{BonusContribution, SourceId, StatKey};
use crate::constants::{LUCKY_OPTION_CHANCE, LUCKY_OPTION_MAX_PCT, LUCKY_OPTION_SLOTS};
use crate::numbers::{floor_f64_to_u32, usize_to_f64};
use crate::rarity::Rarity;

/// Most lucky-option slots any tier carries.
pub const MAX_LUCKY_OPTIONS: usize = 3;
/// Rolls consumed per lucky-option slot: gate, stat, magnitude.
pub const ROLLS_PER_OPTION: usize = 3;

/// Stats a lucky option can land on.
pub const LUCKY_OPTION_STATS: [StatKey; 4] = [
    StatKey::CoinPct,
    StatKey::XpPct,
    StatKey::DropLuckPct,
    StatKey::MergeLuckPct,
];

const DIGEST_SEED: u64 = 0x5245_4c49_4346_4f52;

/// Stable opaque identity: creation time plus a content digest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ItemId {
    created_at_ms: u64,
    digest: u64,
}

impl ItemId {
    #[must_use]
    pub const fn from_parts(created_at_ms: u64, digest: u64) -> Self {
        Self {
            created_at_ms,
            digest,
        }
    }

    #[must_use]
    pub const fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    #[must_use]
    pub const fn digest(&self) -> u64 {
        self.digest
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:016x}", self.created_at_ms, self.digest)
    }
}

/// Equipment slot.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Helmet,
    Chestplate,
    Gauntlets,
    Boots,
    Shield,
    Weapon,
    Cloak,
    Amulet,
}

impl Slot {
    pub const ALL: [Self; 8] = [
        Self::Helmet,
        Self::Chestplate,
        Self::Gauntlets,
        Self::Boots,
        Self::Shield,
        Self::Weapon,
        Self::Cloak,
        Self::Amulet,
    ];

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Helmet => "helmet",
            Self::Chestplate => "chestplate",
            Self::Gauntlets => "gauntlets",
            Self::Boots => "boots",
            Self::Shield => "shield",
            Self::Weapon => "weapon",
            Self::Cloak => "cloak",
            Self::Amulet => "amulet",
        }
    }

    /// Uniform slot pick from a unit roll.
    #[must_use]
    pub fn from_roll(roll: f64) -> Self {
        Self::ALL[uniform_index(roll, Self::ALL.len())]
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A lucky option: a percentage bonus on one stat, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BonusAttribute {
    pub stat: StatKey,
    pub pct: u8,
}

pub type BonusAttributes = SmallVec<[BonusAttribute; MAX_LUCKY_OPTIONS]>;

/// Gear item. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    id: ItemId,
    rarity: Rarity,
    slot: Slot,
    #[serde(default)]
    bonus_attributes: BonusAttributes,
}

impl Item {
    /// Build an item and derive its identity from its content.
    #[must_use]
    pub fn new(
        created_at_ms: u64,
        sequence: u64,
        rarity: Rarity,
        slot: Slot,
        bonus_attributes: BonusAttributes,
    ) -> Self {
        let mut hasher = XxHash64::with_seed(DIGEST_SEED);
        hasher.write_u64(created_at_ms);
        hasher.write_u64(sequence);
        hasher.write(rarity.key().as_bytes());
        hasher.write(slot.key().as_bytes());
        for attr in &bonus_attributes {
            hasher.write(attr.stat.key().as_bytes());
            hasher.write_u8(attr.pct);
        }
        Self {
            id: ItemId::from_parts(created_at_ms, hasher.finish()),
            rarity,
            slot,
            bonus_attributes,
        }
    }

    #[must_use]
    pub const fn id(&self) -> ItemId {
        self.id
    }

    #[must_use]
    pub const fn rarity(&self) -> Rarity {
        self.rarity
    }

    #[must_use]
    pub const fn slot(&self) -> Slot {
        self.slot
    }

    /// Power derived solely from rarity.
    #[must_use]
    pub const fn base_power(&self) -> u32 {
        self.rarity.base_power()
    }

    #[must_use]
    pub fn bonus_attributes(&self) -> &[BonusAttribute] {
        &self.bonus_attributes
    }

    /// One contribution per attribute, sourced from this item.
    #[must_use]
    pub fn contributions(&self) -> Vec<BonusContribution> {
        self.bonus_attributes
            .iter()
            .map(|attr| {
                BonusContribution::additive(
                    SourceId::Gear { item: self.id },
                    attr.stat,
                    f64::from(attr.pct),
                )
            })
            .collect()
    }
}

fn uniform_index(roll: f64, len: usize) -> usize {
    let scaled = floor_f64_to_u32(roll.clamp(0.0, 1.0) * usize_to_f64(len));
    usize::try_from(scaled)
        .unwrap_or(0)
        .min(len.saturating_sub(1))
}

/// Roll lucky options for a rarity from gate/stat/magnitude triples.
///
/// Only the first `slots × 3` rolls are read; options landing on a stat the
/// item already carries fold into that attribute so each stat appears once.
#[must_use]
pub fn roll_attributes(rarity: Rarity, rolls: &[f64]) -> BonusAttributes {
    let tier = rarity.index();
    let slots = usize::from(LUCKY_OPTION_SLOTS[tier]);
    let chance = LUCKY_OPTION_CHANCE[tier];
    let max_pct = LUCKY_OPTION_MAX_PCT[tier];
    let mut attrs = BonusAttributes::new();

    for triple in rolls.chunks_exact(ROLLS_PER_OPTION).take(slots) {
        let (gate, stat_roll, magnitude) = (triple[0], triple[1], triple[2]);
        if gate >= chance {
            continue;
        }
        let stat = LUCKY_OPTION_STATS[uniform_index(stat_roll, LUCKY_OPTION_STATS.len())];
        let pct = u8::try_from(uniform_index(magnitude, usize::from(max_pct)))
            .unwrap_or(0)
            .saturating_add(1);
        if let Some(existing) = attrs.iter_mut().find(|attr| attr.stat == stat) {
            existing.pct = existing.pct.saturating_add(pct);
        } else {
            attrs.push(BonusAttribute { stat, pct });
        }
    }
    attrs
}
