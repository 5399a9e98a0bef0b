//! Equipped gear and the power breakdown it produces.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::bonus::{BonusContribution, MultiplierGroup, ScaledValue, StatKey};
use crate::constants::SET_BONUS_STEPS;
use crate::error::{ContractViolation, ValidationError};
use crate::item::{Item, ItemId, Slot};
use crate::rarity::Rarity;

/// At most one equipped item per slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Loadout {
    slots: BTreeMap<Slot, ItemId>,
}

impl Loadout {
    /// Equip `item` into `slot`, returning whatever it displaced.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::SlotMismatch` when the item belongs elsewhere.
    pub fn equip(&mut self, slot: Slot, item: &Item) -> Result<Option<ItemId>, ValidationError> {
        if item.slot() != slot {
            return Err(ValidationError::SlotMismatch {
                item: item.id(),
                expected: slot,
            });
        }
        Ok(self.slots.insert(slot, item.id()))
    }

    pub fn unequip(&mut self, slot: Slot) -> Option<ItemId> {
        self.slots.remove(&slot)
    }

    #[must_use]
    pub fn get(&self, slot: Slot) -> Option<ItemId> {
        self.slots.get(&slot).copied()
    }

    #[must_use]
    pub fn equipped_ids(&self) -> Vec<ItemId> {
        self.slots.values().copied().collect()
    }

    #[must_use]
    pub fn is_equipped(&self, id: ItemId) -> bool {
        self.slots.values().any(|equipped| *equipped == id)
    }

    /// Forget any slot pointing at an item that no longer exists.
    pub fn retain_present(&mut self, items: &[Item]) {
        self.slots
            .retain(|_, id| items.iter().any(|item| item.id() == *id));
    }
}

/// Power totals for a set of equipped items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerBreakdown {
    pub base: u32,
    pub set_bonus: u32,
    pub set_rarity: Option<Rarity>,
    pub total: u32,
    /// Aggregated power percentage from bonus sources.
    pub power_pct: f64,
    /// `total` scaled once by `power_pct`, rounded down.
    pub effective: u32,
}

/// Largest same-rarity group, ties going to the higher rarity.
fn dominant_group(equipped: &[&Item]) -> Option<(Rarity, usize, u32)> {
    let mut groups: BTreeMap<Rarity, (usize, u32)> = BTreeMap::new();
    for item in equipped {
        let entry = groups.entry(item.rarity()).or_default();
        entry.0 += 1;
        entry.1 = entry.1.saturating_add(item.base_power());
    }
    groups
        .into_iter()
        .max_by_key(|(rarity, (count, _))| (*count, *rarity))
        .map(|(rarity, (count, power))| (rarity, count, power))
}

fn set_bonus_pct(count: usize) -> u32 {
    SET_BONUS_STEPS
        .iter()
        .take_while(|(pieces, _)| count >= *pieces)
        .last()
        .map_or(0, |(_, pct)| *pct)
}

/// Base power, set bonus and their sum, before any power percentage.
#[must_use]
pub fn power_breakdown(equipped: &[&Item]) -> PowerBreakdown {
    let base = equipped
        .iter()
        .fold(0_u32, |acc, item| acc.saturating_add(item.base_power()));
    let (set_bonus, set_rarity) = match dominant_group(equipped) {
        Some((rarity, count, group_power)) => {
            let pct = set_bonus_pct(count);
            let bonus = u32::try_from(u64::from(group_power) * u64::from(pct) / 100)
                .unwrap_or(u32::MAX);
            (bonus, (pct > 0).then_some(rarity))
        }
        None => (0, None),
    };
    let total = base.saturating_add(set_bonus);
    PowerBreakdown {
        base,
        set_bonus,
        set_rarity,
        total,
        power_pct: 0.0,
        effective: total,
    }
}

impl PowerBreakdown {
    /// Apply the aggregated power percentage as a single multiplier group.
    ///
    /// # Errors
    ///
    /// Propagates `ContractViolation::NestedMultiplier`.
    pub fn with_power_pct(mut self, power_pct: f64) -> Result<Self, ContractViolation> {
        let group = MultiplierGroup {
            stat: StatKey::PowerPct,
            total_pct: power_pct,
        };
        let scaled = ScaledValue::new(u64::from(self.total)).apply(&group)?;
        self.power_pct = power_pct;
        self.effective = u32::try_from(scaled.finish().floored()).unwrap_or(u32::MAX);
        Ok(self)
    }
}

/// Bonus contributions from every equipped item's attributes.
#[must_use]
pub fn gear_contributions(equipped: &[&Item]) -> Vec<BonusContribution> {
    equipped
        .iter()
        .flat_map(|item| item.contributions())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::BonusAttributes;

    fn item(seq: u64, rarity: Rarity, slot: Slot) -> Item {
        Item::new(0, seq, rarity, slot, BonusAttributes::new())
    }

    #[test]
    fn equip_checks_slot_and_replaces() {
        let mut loadout = Loadout::default();
        let boots = item(1, Rarity::Rare, Slot::Boots);
        let better = item(2, Rarity::Epic, Slot::Boots);
        assert_eq!(
            loadout.equip(Slot::Helmet, &boots),
            Err(ValidationError::SlotMismatch {
                item: boots.id(),
                expected: Slot::Helmet
            })
        );
        assert_eq!(loadout.equip(Slot::Boots, &boots), Ok(None));
        assert_eq!(loadout.equip(Slot::Boots, &better), Ok(Some(boots.id())));
        assert!(loadout.is_equipped(better.id()));
        assert_eq!(loadout.unequip(Slot::Boots), Some(better.id()));
        assert!(loadout.equipped_ids().is_empty());
    }

    #[test]
    fn set_bonus_follows_the_largest_group() {
        let items: Vec<Item> = (0..3)
            .map(|seq| item(seq, Rarity::Rare, Slot::ALL[usize::try_from(seq).unwrap()]))
            .chain([item(10, Rarity::Legendary, Slot::Amulet)])
            .collect();
        let refs: Vec<&Item> = items.iter().collect();
        let breakdown = power_breakdown(&refs);
        assert_eq!(breakdown.base, 400);
        assert_eq!(breakdown.set_bonus, 15);
        assert_eq!(breakdown.set_rarity, Some(Rarity::Rare));
        assert_eq!(breakdown.total, 415);
    }

    #[test]
    fn set_bonus_ties_prefer_higher_rarity() {
        let items: Vec<Item> = Slot::ALL
            .iter()
            .enumerate()
            .map(|(idx, slot)| {
                let rarity = if idx < 4 { Rarity::Uncommon } else { Rarity::Epic };
                item(u64::try_from(idx).unwrap(), rarity, *slot)
            })
            .collect();
        let refs: Vec<&Item> = items.iter().collect();
        let breakdown = power_breakdown(&refs);
        assert_eq!(breakdown.set_rarity, Some(Rarity::Epic));
        assert_eq!(breakdown.set_bonus, 40);
    }

    #[test]
    fn full_set_reaches_top_step() {
        let items: Vec<Item> = Slot::ALL
            .iter()
            .enumerate()
            .map(|(idx, slot)| item(u64::try_from(idx).unwrap(), Rarity::Uncommon, *slot))
            .collect();
        let refs: Vec<&Item> = items.iter().collect();
        let breakdown = power_breakdown(&refs);
        assert_eq!(breakdown.base, 200);
        assert_eq!(breakdown.set_bonus, 70);
        assert_eq!(breakdown.total, 270);
    }

    #[test]
    fn power_pct_scales_total_once() {
        let items = [item(0, Rarity::Epic, Slot::Weapon)];
        let refs: Vec<&Item> = items.iter().collect();
        let breakdown = power_breakdown(&refs).with_power_pct(7.0).unwrap();
        assert_eq!(breakdown.total, 100);
        assert_eq!(breakdown.effective, 107);
        assert!(power_breakdown(&[]).set_rarity.is_none());
    }
}
