//! Relicforge Progression Engine
//!
//! Platform-agnostic reward resolution for the Relicforge focus companion:
//! drop rarity, bonus stacking, merge lotteries and the roll authority that
//! keeps displayed rolls and committed rolls identical. No UI or platform
//! dependencies live here; stores and persistence are supplied by the host.

pub mod bonus;
pub mod celestial;
pub mod config;
pub mod constants;
pub mod engine;
pub mod entities;
pub mod error;
pub mod item;
pub mod loadout;
pub mod merge;
pub mod numbers;
pub mod pity;
pub mod profile;
pub mod rarity;
pub mod roll;

// Re-export commonly used types
pub use bonus::{
    BonusAggregator, BonusContribution, MultiplierGroup, ScaledAmount, ScaledValue, SourceId,
    StackingMode, StackingRegistry, StatKey, StatRule, aggregate,
};
pub use celestial::ForgeOutcome;
pub use config::{
    CelestialConfig, CostTable, EngineConfig, MergeConfig, RarityConfig, SalvageConfig,
};
pub use engine::{CommitReceipt, ProgressionEngine, RewardTicket};
pub use entities::{
    ActiveAbilities, ActiveAbility, EntityAbility, EntityCollection, EntityId, EntityRecord,
    OwnedVariants, Variant, VariantAbilities,
};
pub use error::{ConfigError, ContractViolation, EngineError, ValidationError};
pub use item::{BonusAttribute, Item, ItemId, Slot};
pub use loadout::{Loadout, PowerBreakdown};
pub use merge::{MergeAttempt, MergeBonuses, MergeResult, RetryOffer, TierJump};
pub use pity::{PityCounter, PityLedger, PityTable, PoolId};
pub use profile::Profile;
pub use rarity::{DropContext, ModifierKind, Rarity, RarityModifier, RarityResolver};
pub use roll::{
    AttemptId, RollAuthority, RollKind, RollOrigin, RollOverrides, RollPlan, RollRecord,
    RollSheet, RollStream, RollValue,
};

/// Inventory and wallet owned by the host.
///
/// Every mutating engine call re-reads this snapshot before changing it.
pub trait InventoryStore {
    /// Items currently owned, equipped or not.
    fn current_items(&self) -> &[Item];

    /// Identities of equipped items.
    fn equipped_ids(&self) -> Vec<ItemId>;

    /// Remove items by identity, returning how many were actually removed.
    fn remove(&mut self, ids: &[ItemId]) -> usize;

    /// Add an item. Adding a Legendary counts toward the lifetime total.
    fn add(&mut self, item: Item);

    fn coins(&self) -> u64;

    fn set_coins(&mut self, coins: u64);

    fn materials(&self) -> u64;

    fn set_materials(&mut self, materials: u64);

    /// Legendary items ever obtained, including ones since consumed.
    fn legendaries_obtained(&self) -> u32;
}

/// Collected entity variants owned by the host.
pub trait EntityStore {
    fn owned_variants(&self, entity: EntityId) -> OwnedVariants;
}

/// Pity counters persisted alongside the profile.
pub trait PityStore {
    fn pity_ledger(&self) -> &PityLedger;

    fn pity_ledger_mut(&mut self) -> &mut PityLedger;
}

/// Everything the engine reads and writes for one player.
pub trait ProgressStore: InventoryStore + EntityStore + PityStore {}

impl<T> ProgressStore for T where T: InventoryStore + EntityStore + PityStore {}

/// Trait for abstracting configuration loading.
/// Platform-specific implementations should provide this
pub trait ConfigLoader {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the engine configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be read or parsed.
    fn load_engine_config(&self) -> Result<EngineConfig, Self::Error>;
}

/// Trait for abstracting save/load operations.
/// Implementations must replace saves atomically (write temp, then rename).
pub trait ProfileStorage {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Save a profile
    ///
    /// # Errors
    ///
    /// Returns an error if the profile cannot be saved.
    fn save_profile(&self, name: &str, profile: &Profile) -> Result<(), Self::Error>;

    /// Load a profile
    ///
    /// # Errors
    ///
    /// Returns an error if the profile cannot be loaded.
    fn load_profile(&self, name: &str) -> Result<Option<Profile>, Self::Error>;

    /// Delete a saved profile
    ///
    /// # Errors
    ///
    /// Returns an error if the save cannot be deleted.
    fn delete_profile(&self, name: &str) -> Result<(), Self::Error>;
}

/// Host-facing entry point wiring configuration and persistence together.
pub struct Relicforge<L, S>
where
    L: ConfigLoader,
    S: ProfileStorage,
{
    config_loader: L,
    storage: S,
}

impl<L, S> Relicforge<L, S>
where
    L: ConfigLoader,
    S: ProfileStorage,
{
    /// Create a new host with the provided config loader and storage
    pub const fn new(config_loader: L, storage: S) -> Self {
        Self {
            config_loader,
            storage,
        }
    }

    /// Load and validate configuration, then start an engine for `seed`.
    ///
    /// # Errors
    ///
    /// Returns the loader's error, or a validation failure converted into it.
    pub fn start(&self, seed: u64) -> Result<ProgressionEngine, L::Error>
    where
        L::Error: From<ConfigError>,
    {
        let config = self.config_loader.load_engine_config()?;
        Ok(ProgressionEngine::new(config, seed)?)
    }

    /// Save a profile
    ///
    /// # Errors
    ///
    /// Returns an error if the profile cannot be saved.
    pub fn save_profile(&self, name: &str, profile: &Profile) -> Result<(), S::Error> {
        self.storage.save_profile(name, profile)
    }

    /// Load a profile, dropping loadout entries that point at missing items.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile cannot be loaded.
    pub fn load_profile(&self, name: &str) -> Result<Option<Profile>, S::Error> {
        Ok(self
            .storage
            .load_profile(name)?
            .map(Profile::with_consistent_loadout))
    }

    /// Delete a saved profile
    ///
    /// # Errors
    ///
    /// Returns an error if the save cannot be deleted.
    pub fn delete_profile(&self, name: &str) -> Result<(), S::Error> {
        self.storage.delete_profile(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::convert::Infallible;
    use std::rc::Rc;

    #[derive(Debug, thiserror::Error)]
    enum FixtureError {
        #[error(transparent)]
        Config(#[from] ConfigError),
    }

    #[derive(Clone, Default)]
    struct FixtureLoader {
        json: Option<&'static str>,
    }

    impl ConfigLoader for FixtureLoader {
        type Error = FixtureError;

        fn load_engine_config(&self) -> Result<EngineConfig, Self::Error> {
            Ok(EngineConfig::from_json(self.json.unwrap_or("{}"))?)
        }
    }

    #[derive(Clone, Default)]
    struct MemoryStorage {
        saves: Rc<RefCell<HashMap<String, Profile>>>,
    }

    impl ProfileStorage for MemoryStorage {
        type Error = Infallible;

        fn save_profile(&self, name: &str, profile: &Profile) -> Result<(), Self::Error> {
            self.saves
                .borrow_mut()
                .insert(name.to_string(), profile.clone());
            Ok(())
        }

        fn load_profile(&self, name: &str) -> Result<Option<Profile>, Self::Error> {
            Ok(self.saves.borrow().get(name).cloned())
        }

        fn delete_profile(&self, name: &str) -> Result<(), Self::Error> {
            self.saves.borrow_mut().remove(name);
            Ok(())
        }
    }

    #[test]
    fn host_starts_engine_and_roundtrips_profiles() {
        let host = Relicforge::new(FixtureLoader::default(), MemoryStorage::default());
        let mut engine = host.start(0xABCD).unwrap();
        let mut profile = Profile::with_coins(500);
        let item = engine
            .generate_item(&DropContext::new(90.0, 1_000), &[])
            .unwrap();
        profile.add(item.clone());
        host.save_profile("slot-one", &profile).unwrap();

        let loaded = host.load_profile("slot-one").unwrap().expect("save exists");
        assert_eq!(loaded.coins(), 500);
        assert_eq!(loaded.current_items(), &[item]);
        assert!(host.load_profile("missing").unwrap().is_none());
        host.delete_profile("slot-one").unwrap();
        assert!(host.load_profile("slot-one").unwrap().is_none());
    }

    #[test]
    fn host_rejects_invalid_configuration() {
        let loader = FixtureLoader {
            json: Some(r#"{"costs":{"merge":1}}"#),
        };
        let host = Relicforge::new(loader, MemoryStorage::default());
        assert!(matches!(
            host.start(1),
            Err(FixtureError::Config(ConfigError::MissingCost(_)))
        ));
    }
}
