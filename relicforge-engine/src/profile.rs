//! In-memory player profile implementing the store contracts.

use serde::{Deserialize, Serialize};

use crate::entities::{EntityCollection, EntityId, OwnedVariants, Variant};
use crate::error::ValidationError;
use crate::item::{Item, ItemId, Slot};
use crate::loadout::Loadout;
use crate::pity::PityLedger;
use crate::rarity::Rarity;
use crate::{EntityStore, InventoryStore, PityStore};

/// Serializable snapshot of everything one player owns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    coins: u64,
    #[serde(default)]
    materials: u64,
    #[serde(default)]
    items: Vec<Item>,
    #[serde(default)]
    loadout: Loadout,
    #[serde(default)]
    entities: EntityCollection,
    #[serde(default)]
    pity: PityLedger,
    #[serde(default)]
    legendaries_obtained: u32,
}

impl Profile {
    #[must_use]
    pub fn with_coins(coins: u64) -> Self {
        Self {
            coins,
            ..Self::default()
        }
    }

    /// Equip an owned item into its own slot.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::StaleSelection` when the item is not owned.
    pub fn equip(&mut self, id: ItemId) -> Result<Option<ItemId>, ValidationError> {
        let item = self
            .items
            .iter()
            .find(|item| item.id() == id)
            .ok_or(ValidationError::StaleSelection(id))?;
        self.loadout.equip(item.slot(), item)
    }

    pub fn unequip(&mut self, slot: Slot) -> Option<ItemId> {
        self.loadout.unequip(slot)
    }

    #[must_use]
    pub const fn loadout(&self) -> &Loadout {
        &self.loadout
    }

    /// Flag a captured entity variant.
    pub fn record_capture(&mut self, entity: EntityId, variant: Variant) -> bool {
        self.entities.record_capture(entity, variant)
    }

    #[must_use]
    pub const fn entities(&self) -> &EntityCollection {
        &self.entities
    }

    #[must_use]
    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.iter().find(|item| item.id() == id)
    }

    /// Equipped items in slot order.
    #[must_use]
    pub fn equipped_items(&self) -> Vec<&Item> {
        Slot::ALL
            .iter()
            .filter_map(|slot| self.loadout.get(*slot))
            .filter_map(|id| self.item(id))
            .collect()
    }

    /// Count of owned items per rarity, Common first.
    #[must_use]
    pub fn rarity_counts(&self) -> [usize; Rarity::ALL.len()] {
        let mut counts = [0; Rarity::ALL.len()];
        for item in &self.items {
            counts[item.rarity().index()] += 1;
        }
        counts
    }

    /// Drop loadout entries whose items no longer exist.
    #[must_use]
    pub fn with_consistent_loadout(mut self) -> Self {
        self.loadout.retain_present(&self.items);
        self
    }
}

impl InventoryStore for Profile {
    fn current_items(&self) -> &[Item] {
        &self.items
    }

    fn equipped_ids(&self) -> Vec<ItemId> {
        self.loadout.equipped_ids()
    }

    fn remove(&mut self, ids: &[ItemId]) -> usize {
        let before = self.items.len();
        self.items.retain(|item| !ids.contains(&item.id()));
        before - self.items.len()
    }

    fn add(&mut self, item: Item) {
        if item.rarity() == Rarity::Legendary {
            self.legendaries_obtained = self.legendaries_obtained.saturating_add(1);
        }
        self.items.push(item);
    }

    fn coins(&self) -> u64 {
        self.coins
    }

    fn set_coins(&mut self, coins: u64) {
        self.coins = coins;
    }

    fn materials(&self) -> u64 {
        self.materials
    }

    fn set_materials(&mut self, materials: u64) {
        self.materials = materials;
    }

    fn legendaries_obtained(&self) -> u32 {
        self.legendaries_obtained
    }
}

impl EntityStore for Profile {
    fn owned_variants(&self, entity: EntityId) -> OwnedVariants {
        self.entities.owned_variants(entity)
    }
}

impl PityStore for Profile {
    fn pity_ledger(&self) -> &PityLedger {
        &self.pity
    }

    fn pity_ledger_mut(&mut self) -> &mut PityLedger {
        &mut self.pity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::BonusAttributes;

    fn item(seq: u64, rarity: Rarity, slot: Slot) -> Item {
        Item::new(42, seq, rarity, slot, BonusAttributes::new())
    }

    #[test]
    fn legendaries_are_counted_for_life() {
        let mut profile = Profile::default();
        let legendary = item(1, Rarity::Legendary, Slot::Weapon);
        profile.add(legendary.clone());
        profile.add(item(2, Rarity::Rare, Slot::Weapon));
        assert_eq!(profile.remove(&[legendary.id()]), 1);
        assert_eq!(profile.legendaries_obtained(), 1);
        assert_eq!(profile.rarity_counts()[Rarity::Rare.index()], 1);
    }

    #[test]
    fn remove_reports_what_was_actually_removed() {
        let mut profile = Profile::default();
        let a = item(1, Rarity::Rare, Slot::Boots);
        profile.add(a.clone());
        let ghost = item(2, Rarity::Rare, Slot::Boots).id();
        assert_eq!(profile.remove(&[a.id(), ghost]), 1);
        assert!(profile.current_items().is_empty());
    }

    #[test]
    fn equip_requires_ownership() {
        let mut profile = Profile::default();
        let boots = item(1, Rarity::Epic, Slot::Boots);
        assert_eq!(
            profile.equip(boots.id()),
            Err(ValidationError::StaleSelection(boots.id()))
        );
        profile.add(boots.clone());
        assert_eq!(profile.equip(boots.id()), Ok(None));
        assert_eq!(profile.equipped_ids(), vec![boots.id()]);
        assert_eq!(profile.equipped_items(), vec![&boots]);
    }

    #[test]
    fn snapshot_roundtrips_through_json() {
        let mut profile = Profile::with_coins(120);
        let helm = item(7, Rarity::Uncommon, Slot::Helmet);
        profile.add(helm.clone());
        profile.equip(helm.id()).unwrap();
        profile.record_capture(EntityId::EmberFox, Variant::Exceptional);
        profile
            .pity_ledger_mut()
            .record(&crate::pity::PoolId::merge(Rarity::Rare), false);

        let json = serde_json::to_string(&profile).unwrap();
        let restored: Profile = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, profile);
        let empty: Profile = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, Profile::default());
    }

    #[test]
    fn stale_loadout_entries_are_dropped_on_load() {
        let mut profile = Profile::default();
        let helm = item(7, Rarity::Uncommon, Slot::Helmet);
        profile.add(helm.clone());
        profile.equip(helm.id()).unwrap();
        profile.items.clear();
        let repaired = profile.with_consistent_loadout();
        assert!(repaired.equipped_ids().is_empty());
    }
}
