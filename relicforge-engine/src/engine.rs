//! Progression engine: validates selections, resolves attempts through the
//! roll authority, and commits rewards to the host's stores.
//!
//! Ordering is always resolve, then (optional) reveal, then commit. Pity is
//! counted when an attempt resolves, so dropping a reward ticket never undoes
//! a failure. A previewed attempt holds its inputs until it is resolved or
//! abandoned, and abandoning it still counts the previewed outcome.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

use crate::bonus::{
    BonusAggregator, BonusContribution, MultiplierGroup, ScaledValue, SourceId, StackingMode,
    StatKey,
};
use crate::celestial::{self, ForgeOutcome};
use crate::config::EngineConfig;
use crate::constants::{
    COST_CELESTIAL_FORGE, COST_MERGE, COST_MERGE_BOOST, COST_MERGE_RETRY, SETTLED_HISTORY,
};
use crate::entities::active_abilities;
use crate::error::{ConfigError, ContractViolation, EngineError, ValidationError};
use crate::item::{self, Item, ItemId, Slot};
use crate::loadout::{PowerBreakdown, gear_contributions, power_breakdown};
use crate::merge::{self, ATTRIBUTE_ROLLS, MergeAttempt, MergeBonuses, MergeResult, RetryOffer};
use crate::numbers::floor_f64_to_u32;
use crate::pity::PoolId;
use crate::rarity::{DropContext, Rarity, RarityModifier, RarityResolver};
use crate::roll::{
    AttemptId, RollAuthority, RollKind, RollOverrides, RollPlan, RollSheet, RollStream,
};
use crate::{InventoryStore, ProgressStore};

const COST_CAP_SOURCE: &str = "cost_reduction_cap";

#[derive(Debug, Clone)]
enum AttemptState {
    Open(MergeAttempt),
    Resolved {
        attempt: MergeAttempt,
        result: MergeResult,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Committed,
    Superseded,
    Abandoned,
}

impl Settlement {
    const fn violation(self, attempt: AttemptId) -> ContractViolation {
        match self {
            Self::Committed => ContractViolation::AlreadyCommitted(attempt),
            Self::Superseded => ContractViolation::Superseded(attempt),
            Self::Abandoned => ContractViolation::Abandoned(attempt),
        }
    }
}

/// Permission to commit a resolved attempt once its reveal has finished.
#[derive(Debug, PartialEq, Eq)]
pub struct RewardTicket {
    attempt: AttemptId,
    revealed: bool,
}

impl RewardTicket {
    #[must_use]
    pub const fn attempt(&self) -> AttemptId {
        self.attempt
    }

    /// Called by the presentation when the reveal animation has finished.
    pub fn complete_reveal(&mut self) {
        self.revealed = true;
    }

    #[must_use]
    pub const fn is_revealed(&self) -> bool {
        self.revealed
    }
}

/// Side effects applied by a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub attempt: AttemptId,
    pub coins_spent: u64,
    pub items_removed: usize,
    pub item_added: Option<ItemId>,
    pub materials_added: u32,
}

/// Orchestrates drops, merges and the celestial forge for one player.
#[derive(Debug, Clone)]
pub struct ProgressionEngine {
    config: EngineConfig,
    rolls: RollAuthority,
    attempts: HashMap<AttemptId, AttemptState>,
    settled: VecDeque<(AttemptId, Settlement)>,
    item_sequence: u64,
}

impl ProgressionEngine {
    /// Build an engine over a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` found by [`EngineConfig::validate`].
    pub fn new(config: EngineConfig, seed: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        log::debug!("progression engine started | seed {seed:#x}");
        Ok(Self {
            config,
            rolls: RollAuthority::from_user_seed(seed),
            attempts: HashMap::new(),
            settled: VecDeque::new(),
            item_sequence: 0,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Draw calls performed on one RNG stream so far.
    #[must_use]
    pub const fn draws(&self, stream: RollStream) -> u64 {
        self.rolls.rngs().draws(stream)
    }

    /// Attempts opened but not yet committed, superseded or abandoned.
    #[must_use]
    pub fn pending_attempts(&self) -> usize {
        self.attempts.len()
    }

    fn settle(&mut self, attempt: AttemptId, how: Settlement) {
        self.attempts.remove(&attempt);
        self.rolls.forget(attempt);
        self.settled.push_back((attempt, how));
        while self.settled.len() > SETTLED_HISTORY {
            self.settled.pop_front();
        }
    }

    /// Error for an attempt with no live state: how it settled, if still
    /// remembered, otherwise `fallback`.
    fn missing(&self, attempt: AttemptId, fallback: ContractViolation) -> ContractViolation {
        self.settled
            .iter()
            .rev()
            .find(|(id, _)| *id == attempt)
            .map_or(fallback, |(_, how)| how.violation(attempt))
    }

    /// First selected item held by a previewed, unresolved attempt.
    fn locked_input(&self, selection: &[ItemId]) -> Option<(AttemptId, ItemId)> {
        self.attempts
            .iter()
            .filter_map(|(id, state)| match state {
                AttemptState::Open(open) if self.rolls.sheet(*id).is_some() => Some((*id, open)),
                _ => None,
            })
            .filter_map(|(id, open)| {
                selection
                    .iter()
                    .find(|item| open.input_ids().contains(*item))
                    .map(|item| (id, *item))
            })
            .min_by_key(|(id, _)| *id)
    }

    fn next_sequence(&mut self) -> u64 {
        self.item_sequence = self.item_sequence.wrapping_add(1);
        self.item_sequence
    }

    fn build_item(
        &mut self,
        created_at_ms: u64,
        rarity: Rarity,
        slot: Slot,
        sheet: &RollSheet,
    ) -> Item {
        let attributes = item::roll_attributes(rarity, &sheet.values(RollKind::Attribute));
        let sequence = self.next_sequence();
        Item::new(created_at_ms, sequence, rarity, slot, attributes)
    }

    /// Roll a fresh item for a completed session. Rolls are drawn and consumed
    /// immediately; the caller adds the item to its inventory.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::MalformedContext` for invalid contexts.
    pub fn generate_item(
        &mut self,
        context: &DropContext,
        modifiers: &[RarityModifier],
    ) -> Result<Item, EngineError> {
        let resolver = RarityResolver::new(&self.config.rarity);
        resolver.tier_distribution(context, modifiers)?;

        let attempt = self.rolls.next_attempt();
        let plan = RollPlan::new()
            .with(RollKind::Rarity, 1)
            .with(RollKind::Slot, 1)
            .with(RollKind::Attribute, ATTRIBUTE_ROLLS);
        let sheet = self.rolls.author(attempt, &plan, None)?;
        self.rolls.consume(attempt)?;
        self.rolls.forget(attempt);

        let rarity = RarityResolver::new(&self.config.rarity).resolve_rarity(
            context,
            modifiers,
            sheet.value(RollKind::Rarity, 0)?,
        )?;
        let slot = Slot::from_roll(sheet.value(RollKind::Slot, 0)?);
        let item = self.build_item(context.created_at_ms, rarity, slot, &sheet);
        log::debug!("item generated | {} {rarity} {slot}", item.id());
        Ok(item)
    }

    /// Drop-luck modifiers derived from the player's current bonuses.
    ///
    /// # Errors
    ///
    /// Propagates stacking contract violations.
    pub fn drop_modifiers<S: ProgressStore + ?Sized>(
        &self,
        store: &S,
    ) -> Result<Vec<RarityModifier>, EngineError> {
        let luck = self.aggregate_bonus(store, StatKey::DropLuckPct)?;
        Ok(if luck == 0.0 {
            Vec::new()
        } else {
            vec![RarityModifier::drop_luck(luck)]
        })
    }

    fn aggregator<S: ProgressStore + ?Sized>(
        &self,
        store: &S,
    ) -> Result<BonusAggregator<'_>, ContractViolation> {
        let mut aggregator = BonusAggregator::new(&self.config.stacking);
        let equipped = equipped_items(store);
        aggregator.extend(gear_contributions(&equipped))?;
        aggregator.extend(active_abilities(store).contributions())?;
        aggregator.push(
            BonusContribution::additive(
                SourceId::named(COST_CAP_SOURCE),
                StatKey::CostReductionPct,
                self.config.cost_reduction_cap_pct,
            )
            .with_mode(StackingMode::Min),
        )?;
        Ok(aggregator)
    }

    /// Combined bonus for one stat from equipped gear and owned entities.
    ///
    /// # Errors
    ///
    /// Propagates stacking contract violations.
    pub fn aggregate_bonus<S: ProgressStore + ?Sized>(
        &self,
        store: &S,
        stat: StatKey,
    ) -> Result<f64, EngineError> {
        Ok(self.aggregator(store)?.total(stat)?)
    }

    /// Power of the equipped loadout.
    ///
    /// # Errors
    ///
    /// Propagates stacking contract violations.
    pub fn get_power_breakdown<S: ProgressStore + ?Sized>(
        &self,
        store: &S,
    ) -> Result<PowerBreakdown, EngineError> {
        let power_pct = self.aggregate_bonus(store, StatKey::PowerPct)?;
        let equipped = equipped_items(store);
        Ok(power_breakdown(&equipped).with_power_pct(power_pct)?)
    }

    /// Price of an action after cost reduction, rounded to the nearest coin.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingCost` for unknown actions, or stacking
    /// contract violations.
    pub fn action_cost<S: ProgressStore + ?Sized>(
        &self,
        store: &S,
        action: &str,
    ) -> Result<u64, EngineError> {
        let base = self.config.costs.get(action)?;
        let reduction = self.aggregate_bonus(store, StatKey::CostReductionPct)?;
        let group = MultiplierGroup {
            stat: StatKey::CostReductionPct,
            total_pct: -reduction.max(0.0),
        };
        let scaled = ScaledValue::new(base).apply(&group)?;
        Ok(scaled.finish().rounded())
    }

    fn merge_price<S: ProgressStore + ?Sized>(
        &self,
        store: &S,
        retry: bool,
        optional_boost: bool,
    ) -> Result<u64, EngineError> {
        let action = if retry { COST_MERGE_RETRY } else { COST_MERGE };
        let mut cost = self.action_cost(store, action)?;
        if optional_boost {
            cost = cost.saturating_add(self.action_cost(store, COST_MERGE_BOOST)?);
        }
        Ok(cost)
    }

    /// Price the player pays to settle `attempt`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingCost` or stacking contract violations.
    pub fn merge_cost<S: ProgressStore + ?Sized>(
        &self,
        store: &S,
        attempt: &MergeAttempt,
    ) -> Result<u64, EngineError> {
        self.merge_price(store, attempt.retry_of().is_some(), attempt.optional_boost())
    }

    fn merge_bonuses<S: ProgressStore + ?Sized>(
        &self,
        store: &S,
    ) -> Result<MergeBonuses, EngineError> {
        let aggregator = self.aggregator(store)?;
        Ok(MergeBonuses {
            merge_luck_pct: aggregator.total(StatKey::MergeLuckPct)?,
            tier_bonus: floor_f64_to_u32(aggregator.total(StatKey::TierBonus)?),
            reroll_chance_pct: aggregator.total(StatKey::RerollChancePct)?,
        })
    }

    fn ensure_coins<S: InventoryStore + ?Sized>(
        store: &S,
        needed: u64,
    ) -> Result<(), ValidationError> {
        let available = store.coins();
        if available < needed {
            return Err(ValidationError::InsufficientCoins { needed, available });
        }
        Ok(())
    }

    /// Build and register a merge attempt from a UI selection.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for invalid selections or when the player
    /// cannot afford the merge, and `ContractViolation::InputsLocked` while a
    /// selected item belongs to a previewed attempt that is still open.
    pub fn new_merge_attempt<S: ProgressStore + ?Sized>(
        &mut self,
        store: &S,
        selection: &[ItemId],
        optional_boost: bool,
        created_at_ms: u64,
    ) -> Result<MergeAttempt, EngineError> {
        if let Some((attempt, item)) = self.locked_input(selection) {
            log::warn!("selection reuses {item} held by previewed attempt {attempt}");
            return Err(ContractViolation::InputsLocked { attempt, item }.into());
        }
        let bonuses = self.merge_bonuses(store)?;
        let equipped = store.equipped_ids();
        let id = self.rolls.next_attempt();
        let attempt = MergeAttempt::select(
            id,
            selection,
            store.current_items(),
            &equipped,
            &self.config.merge,
            bonuses,
            optional_boost,
            created_at_ms,
        )?;
        Self::ensure_coins(store, self.merge_cost(store, &attempt)?)?;
        self.attempts.insert(id, AttemptState::Open(attempt.clone()));
        Ok(attempt)
    }

    /// Draw the attempt's rolls ahead of resolution for a presentation.
    ///
    /// # Errors
    ///
    /// Returns a contract violation for unknown or already resolved attempts.
    pub fn preview_rolls(&mut self, attempt: AttemptId) -> Result<RollSheet, EngineError> {
        let plan = match self.attempts.get(&attempt) {
            Some(AttemptState::Open(open)) => open.roll_plan(&self.config.salvage),
            Some(AttemptState::Resolved { .. }) => {
                return Err(ContractViolation::RollAlreadyResolved(attempt).into());
            }
            None => {
                return Err(self
                    .missing(attempt, ContractViolation::RollsMissing(attempt))
                    .into());
            }
        };
        Ok(self.rolls.preview(attempt, &plan)?)
    }

    /// Resolve a merge exactly once. Resolving a resolved attempt again returns
    /// the stored result, provided any overrides match the rolls used.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` when the selection went stale, and contract
    /// violations for ill-formed or divergent overrides.
    pub fn resolve_merge<S: ProgressStore + ?Sized>(
        &mut self,
        store: &mut S,
        attempt: AttemptId,
        overrides: Option<&RollOverrides>,
    ) -> Result<MergeResult, EngineError> {
        let open = match self.attempts.get(&attempt) {
            Some(AttemptState::Open(open)) => open.clone(),
            Some(AttemptState::Resolved { result, .. }) => {
                if let Some(overrides) = overrides {
                    check_matches_sheet(overrides, &result.rolls_used)?;
                }
                return Ok(result.clone());
            }
            None => {
                return Err(self
                    .missing(attempt, ContractViolation::RollsMissing(attempt))
                    .into());
            }
        };

        let equipped = store.equipped_ids();
        open.revalidate(store.current_items(), &equipped, &self.config.merge)?;
        Self::ensure_coins(store, self.merge_cost(store, &open)?)?;

        let plan = open.roll_plan(&self.config.salvage);
        let sheet = self.rolls.author(attempt, &plan, overrides)?;
        let pool = open.pool();
        let pity_bonus = store.pity_ledger().bonus(&pool, &self.config.pity);
        let outcome = merge::resolve_lottery(
            &open,
            &self.config.merge,
            &self.config.salvage,
            pity_bonus,
            &sheet,
        )?;
        store.pity_ledger_mut().record(&pool, outcome.success);

        let new_item = outcome
            .result_tier
            .map(|tier| self.build_item(open.created_at_ms(), tier, open.result_slot(), &sheet));
        let near_miss = if outcome.near_miss {
            Some(RetryOffer {
                attempt,
                cost: self.merge_price(store, true, open.optional_boost())?,
            })
        } else {
            None
        };

        let result = MergeResult {
            attempt,
            success: outcome.success,
            probability: outcome.probability,
            tier_jump: outcome.tier_jump,
            new_item,
            materials_earned: outcome.materials,
            rolls_used: sheet,
            near_miss,
        };
        self.attempts.insert(
            attempt,
            AttemptState::Resolved {
                attempt: open,
                result: result.clone(),
            },
        );
        Ok(result)
    }

    /// Open the reveal phase for a resolved attempt.
    ///
    /// # Errors
    ///
    /// Returns a contract violation unless the attempt is resolved and unsettled.
    pub fn begin_reward(&self, attempt: AttemptId) -> Result<RewardTicket, ContractViolation> {
        match self.attempts.get(&attempt) {
            Some(AttemptState::Resolved { .. }) => Ok(RewardTicket {
                attempt,
                revealed: false,
            }),
            Some(AttemptState::Open(_)) => Err(ContractViolation::Unresolved(attempt)),
            None => Err(self.missing(attempt, ContractViolation::Unresolved(attempt))),
        }
    }

    fn settled_attempt(
        &self,
        ticket: &RewardTicket,
    ) -> Result<(MergeAttempt, MergeResult), ContractViolation> {
        let attempt = ticket.attempt;
        if !ticket.revealed {
            log::warn!("commit requested before reveal finished for {attempt}");
            return Err(ContractViolation::RevealIncomplete(attempt));
        }
        match self.attempts.get(&attempt) {
            Some(AttemptState::Resolved { attempt, result }) => {
                Ok((attempt.clone(), result.clone()))
            }
            Some(AttemptState::Open(_)) => Err(ContractViolation::Unresolved(attempt)),
            None => Err(self.missing(attempt, ContractViolation::Unresolved(attempt))),
        }
    }

    /// Drop an attempt the player walked away from and free its bookkeeping.
    ///
    /// A previewed attempt resolves against its shown rolls first, so the
    /// pity ledger sees the outcome the player saw. Resolved attempts were
    /// already counted. Unpreviewed open attempts leave pity untouched.
    ///
    /// # Errors
    ///
    /// Returns a contract violation for unknown or already settled attempts.
    pub fn abandon_attempt<S: ProgressStore + ?Sized>(
        &mut self,
        store: &mut S,
        attempt: AttemptId,
    ) -> Result<(), EngineError> {
        let previewed = match self.attempts.get(&attempt) {
            Some(AttemptState::Open(open)) => self
                .rolls
                .sheet(attempt)
                .map(|sheet| (open.clone(), sheet)),
            Some(AttemptState::Resolved { .. }) => None,
            None => {
                return Err(self
                    .missing(attempt, ContractViolation::RollsMissing(attempt))
                    .into());
            }
        };

        if let Some((open, sheet)) = previewed {
            let pool = open.pool();
            let pity_bonus = store.pity_ledger().bonus(&pool, &self.config.pity);
            let outcome = merge::resolve_lottery(
                &open,
                &self.config.merge,
                &self.config.salvage,
                pity_bonus,
                &sheet,
            )?;
            store.pity_ledger_mut().record(&pool, outcome.success);
            log::debug!(
                "previewed attempt {attempt} abandoned | counted success {}",
                outcome.success
            );
        }
        self.settle(attempt, Settlement::Abandoned);
        Ok(())
    }

    /// Apply a resolved merge: charge coins, consume inputs, grant the result
    /// and materials. A declined near miss settles like any failure.
    ///
    /// # Errors
    ///
    /// Fails without mutating the store when the reveal is incomplete, the
    /// attempt was already settled, the selection went stale, or coins ran out.
    /// When the store removes a different number of inputs than selected, the
    /// attempt is settled as committed without charging or granting anything.
    pub fn commit_reward<S: ProgressStore + ?Sized>(
        &mut self,
        store: &mut S,
        ticket: RewardTicket,
    ) -> Result<CommitReceipt, EngineError> {
        let (attempt, result) = self.settled_attempt(&ticket)?;
        let equipped = store.equipped_ids();
        attempt.revalidate(store.current_items(), &equipped, &self.config.merge)?;
        let cost = self.merge_cost(store, &attempt)?;
        Self::ensure_coins(store, cost)?;

        let expected = attempt.item_count();
        let removed = store.remove(attempt.input_ids());
        if removed != expected {
            log::warn!("removal mismatch for {}: {removed} of {expected}", attempt.id());
            self.settle(attempt.id(), Settlement::Committed);
            return Err(ContractViolation::RemovalCountMismatch { expected, removed }.into());
        }
        self.rolls.consume(attempt.id())?;
        store.set_coins(store.coins() - cost);
        store.set_materials(store.materials().saturating_add(u64::from(result.materials_earned)));
        let item_added = result.new_item.map(|item| {
            let id = item.id();
            store.add(item);
            id
        });

        self.settle(attempt.id(), Settlement::Committed);
        log::debug!(
            "merge {} committed | spent {cost} removed {removed} added {:?}",
            attempt.id(),
            item_added
        );
        Ok(CommitReceipt {
            attempt: attempt.id(),
            coins_spent: cost,
            items_removed: removed,
            item_added,
            materials_added: result.materials_earned,
        })
    }

    /// Accept a near-miss retry: the original attempt is settled without
    /// consuming its inputs, and a new attempt over the same inputs is opened
    /// at the retry price.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::RetryUnavailable` when the attempt was not a
    /// near miss, plus the same failures as [`Self::commit_reward`].
    pub fn retry_near_miss<S: ProgressStore + ?Sized>(
        &mut self,
        store: &mut S,
        ticket: RewardTicket,
    ) -> Result<MergeAttempt, EngineError> {
        let (attempt, result) = self.settled_attempt(&ticket)?;
        if result.near_miss.is_none() {
            return Err(ValidationError::RetryUnavailable(attempt.id()).into());
        }
        let equipped = store.equipped_ids();
        attempt.revalidate(store.current_items(), &equipped, &self.config.merge)?;
        let cost = self.merge_cost(store, &attempt)?;
        Self::ensure_coins(store, cost)?;
        self.rolls.consume(attempt.id())?;

        store.set_coins(store.coins() - cost);
        store.set_materials(store.materials().saturating_add(u64::from(result.materials_earned)));
        self.settle(attempt.id(), Settlement::Superseded);

        let retry = attempt.retry(self.rolls.next_attempt());
        self.attempts.insert(retry.id(), AttemptState::Open(retry.clone()));
        log::debug!("near miss {} retried as {}", attempt.id(), retry.id());
        Ok(retry)
    }

    /// Spend the forge cost for a chance at a Celestial item. Resolution and
    /// settlement happen together; there is no reveal phase.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::CelestialLocked` below the Legendary gate, or
    /// `ValidationError::InsufficientCoins`.
    pub fn forge_celestial<S: ProgressStore + ?Sized>(
        &mut self,
        store: &mut S,
        created_at_ms: u64,
    ) -> Result<ForgeOutcome, EngineError> {
        celestial::check_unlocked(&self.config.celestial, store.legendaries_obtained())?;
        let cost = self.action_cost(store, COST_CELESTIAL_FORGE)?;
        Self::ensure_coins(store, cost)?;

        let attempt = self.rolls.next_attempt();
        let sheet = self.rolls.author(attempt, &celestial::forge_plan(), None)?;
        self.rolls.consume(attempt)?;
        self.rolls.forget(attempt);

        let pool = PoolId::celestial();
        let chance = celestial::forge_chance(
            &self.config.celestial,
            store.pity_ledger().bonus(&pool, &self.config.pity),
        );
        let success = celestial::forge_succeeds(chance, &sheet)?;
        store.pity_ledger_mut().record(&pool, success);
        store.set_coins(store.coins() - cost);

        let new_item = if success {
            let slot = Slot::from_roll(sheet.value(RollKind::Slot, 0)?);
            let item = self.build_item(created_at_ms, Rarity::Celestial, slot, &sheet);
            store.add(item.clone());
            Some(item)
        } else {
            None
        };
        log::debug!("celestial forge {attempt} | chance {chance:.3} success {success}");
        Ok(ForgeOutcome {
            attempt,
            success,
            chance,
            cost,
            new_item,
            rolls_used: sheet,
        })
    }
}

fn equipped_items<S: InventoryStore + ?Sized>(store: &S) -> Vec<&Item> {
    let equipped = store.equipped_ids();
    store
        .current_items()
        .iter()
        .filter(|item| equipped.contains(&item.id()))
        .collect()
}

fn check_matches_sheet(
    overrides: &RollOverrides,
    sheet: &RollSheet,
) -> Result<(), ContractViolation> {
    if overrides.values().len() != sheet.records().len() {
        return Err(ContractViolation::RollPlanMismatch(sheet.attempt()));
    }
    for (supplied, record) in overrides.values().iter().zip(sheet.records()) {
        if supplied.kind != record.kind || supplied.index != record.index {
            return Err(ContractViolation::RollPlanMismatch(sheet.attempt()));
        }
        if supplied.value.to_bits() != record.value.to_bits() {
            return Err(ContractViolation::DivergentRoll {
                kind: record.kind,
                index: record.index,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{EntityId, OwnedVariants, Variant};
    use crate::item::BonusAttributes;
    use crate::pity::PityLedger;
    use crate::profile::Profile;
    use crate::roll::RollValue;
    use crate::{EntityStore, InventoryStore, PityStore};

    /// Store whose removal reports one item fewer than it was asked for.
    struct ShortRemoval(Profile);

    impl InventoryStore for ShortRemoval {
        fn current_items(&self) -> &[Item] {
            self.0.current_items()
        }
        fn equipped_ids(&self) -> Vec<ItemId> {
            self.0.equipped_ids()
        }
        fn remove(&mut self, ids: &[ItemId]) -> usize {
            self.0.remove(ids).saturating_sub(1)
        }
        fn add(&mut self, item: Item) {
            self.0.add(item);
        }
        fn coins(&self) -> u64 {
            self.0.coins()
        }
        fn set_coins(&mut self, coins: u64) {
            self.0.set_coins(coins);
        }
        fn materials(&self) -> u64 {
            self.0.materials()
        }
        fn set_materials(&mut self, materials: u64) {
            self.0.set_materials(materials);
        }
        fn legendaries_obtained(&self) -> u32 {
            self.0.legendaries_obtained()
        }
    }

    impl EntityStore for ShortRemoval {
        fn owned_variants(&self, entity: EntityId) -> OwnedVariants {
            self.0.owned_variants(entity)
        }
    }

    impl PityStore for ShortRemoval {
        fn pity_ledger(&self) -> &PityLedger {
            self.0.pity_ledger()
        }
        fn pity_ledger_mut(&mut self) -> &mut PityLedger {
            self.0.pity_ledger_mut()
        }
    }

    fn engine() -> ProgressionEngine {
        ProgressionEngine::new(EngineConfig::default(), 0x5EED).unwrap()
    }

    fn stocked_profile(rarities: &[Rarity]) -> (Profile, Vec<ItemId>) {
        let mut profile = Profile::with_coins(10_000);
        let ids = rarities
            .iter()
            .enumerate()
            .map(|(seq, rarity)| {
                let item = Item::new(
                    7,
                    u64::try_from(seq).unwrap(),
                    *rarity,
                    Slot::Boots,
                    BonusAttributes::new(),
                );
                let id = item.id();
                profile.add(item);
                id
            })
            .collect();
        (profile, ids)
    }

    /// Overrides that pin the success roll and leave everything else high.
    fn overrides_for(
        engine: &ProgressionEngine,
        attempt: &MergeAttempt,
        success_roll: f64,
    ) -> RollOverrides {
        let plan = attempt.roll_plan(&engine.config().salvage);
        RollOverrides::new(
            plan.slots()
                .map(|(kind, index)| RollValue {
                    kind,
                    index,
                    value: match kind {
                        RollKind::Success => success_roll,
                        RollKind::TierJump => 0.1,
                        _ => 0.99,
                    },
                })
                .collect(),
        )
    }

    #[test]
    fn successful_merge_commits_once() {
        let mut engine = engine();
        let (mut profile, ids) = stocked_profile(&[Rarity::Rare, Rarity::Rare]);
        let attempt = engine.new_merge_attempt(&profile, &ids, false, 9).unwrap();
        let overrides = overrides_for(&engine, &attempt, 0.0);
        let result = engine
            .resolve_merge(&mut profile, attempt.id(), Some(&overrides))
            .unwrap();
        assert!(result.success);
        let new_item = result.new_item.clone().unwrap();
        assert_eq!(new_item.rarity(), Rarity::Epic);
        assert_eq!(new_item.slot(), Slot::Boots);

        let again = engine.resolve_merge(&mut profile, attempt.id(), None).unwrap();
        assert_eq!(again, result);

        let mut ticket = engine.begin_reward(attempt.id()).unwrap();
        ticket.complete_reveal();
        let receipt = engine.commit_reward(&mut profile, ticket).unwrap();
        assert_eq!(receipt.items_removed, 2);
        assert_eq!(receipt.coins_spent, 50);
        assert_eq!(profile.coins(), 9_950);
        assert_eq!(profile.current_items(), &[new_item]);

        let mut second = RewardTicket {
            attempt: attempt.id(),
            revealed: true,
        };
        second.complete_reveal();
        assert_eq!(
            engine.commit_reward(&mut profile, second),
            Err(EngineError::Contract(ContractViolation::AlreadyCommitted(
                attempt.id()
            )))
        );
    }

    #[test]
    fn commit_waits_for_reveal() {
        let mut engine = engine();
        let (mut profile, ids) = stocked_profile(&[Rarity::Rare, Rarity::Rare]);
        let attempt = engine.new_merge_attempt(&profile, &ids, false, 9).unwrap();
        engine.resolve_merge(&mut profile, attempt.id(), None).unwrap();
        let ticket = engine.begin_reward(attempt.id()).unwrap();
        assert_eq!(
            engine.commit_reward(&mut profile, ticket),
            Err(EngineError::Contract(ContractViolation::RevealIncomplete(
                attempt.id()
            )))
        );
        assert_eq!(profile.current_items().len(), 2);
        assert_eq!(profile.coins(), 10_000);
    }

    #[test]
    fn divergent_re_resolution_is_rejected() {
        let mut engine = engine();
        let (mut profile, ids) = stocked_profile(&[Rarity::Rare, Rarity::Rare]);
        let attempt = engine.new_merge_attempt(&profile, &ids, false, 9).unwrap();
        let first = overrides_for(&engine, &attempt, 0.0);
        engine
            .resolve_merge(&mut profile, attempt.id(), Some(&first))
            .unwrap();
        let second = overrides_for(&engine, &attempt, 0.5);
        assert_eq!(
            engine.resolve_merge(&mut profile, attempt.id(), Some(&second)),
            Err(EngineError::Contract(ContractViolation::DivergentRoll {
                kind: RollKind::Success,
                index: 0
            }))
        );
    }

    #[test]
    fn stale_selection_is_reported_at_resolution() {
        let mut engine = engine();
        let (mut profile, ids) = stocked_profile(&[Rarity::Rare, Rarity::Rare]);
        let attempt = engine.new_merge_attempt(&profile, &ids, false, 9).unwrap();
        profile.remove(&ids[..1]);
        assert_eq!(
            engine.resolve_merge(&mut profile, attempt.id(), None),
            Err(EngineError::Validation(ValidationError::StaleSelection(
                ids[0]
            )))
        );
    }

    #[test]
    fn equipped_items_cannot_be_merged_even_after_selection() {
        let mut engine = engine();
        let (mut profile, ids) = stocked_profile(&[Rarity::Rare, Rarity::Rare]);
        let attempt = engine.new_merge_attempt(&profile, &ids, false, 9).unwrap();
        profile.equip(ids[1]).unwrap();
        assert_eq!(
            engine.resolve_merge(&mut profile, attempt.id(), None),
            Err(EngineError::Validation(ValidationError::EquippedInput(
                ids[1]
            )))
        );
    }

    #[test]
    fn pity_counts_at_resolution() {
        let mut engine = engine();
        let (mut profile, ids) = stocked_profile(&[Rarity::Rare, Rarity::Rare]);
        let pool = PoolId::merge(Rarity::Rare);
        let attempt = engine.new_merge_attempt(&profile, &ids, false, 9).unwrap();
        let overrides = overrides_for(&engine, &attempt, 0.95);
        engine
            .resolve_merge(&mut profile, attempt.id(), Some(&overrides))
            .unwrap();
        assert_eq!(
            profile.pity_ledger().counter(&pool).consecutive_failures,
            1
        );
        // Abandoning the ticket does not undo the failure.
        let _ = engine.begin_reward(attempt.id()).unwrap();
        assert_eq!(
            profile.pity_ledger().counter(&pool).consecutive_failures,
            1
        );
    }

    #[test]
    fn near_miss_retry_keeps_inputs_and_supersedes() {
        let mut engine = engine();
        let (mut profile, ids) = stocked_profile(&[Rarity::Rare, Rarity::Rare]);
        let attempt = engine.new_merge_attempt(&profile, &ids, false, 9).unwrap();
        let overrides = overrides_for(&engine, &attempt, 0.27);
        let result = engine
            .resolve_merge(&mut profile, attempt.id(), Some(&overrides))
            .unwrap();
        let offer = result.near_miss.unwrap();
        assert_eq!(offer.cost, 35);

        let mut ticket = engine.begin_reward(attempt.id()).unwrap();
        ticket.complete_reveal();
        let retry = engine.retry_near_miss(&mut profile, ticket).unwrap();
        assert_eq!(retry.retry_of(), Some(attempt.id()));
        assert_eq!(profile.current_items().len(), 2);
        assert_eq!(profile.coins(), 9_950);
        assert_eq!(
            engine.begin_reward(attempt.id()),
            Err(ContractViolation::Superseded(attempt.id()))
        );

        let retry_overrides = overrides_for(&engine, &retry, 0.0);
        engine
            .resolve_merge(&mut profile, retry.id(), Some(&retry_overrides))
            .unwrap();
        let mut ticket = engine.begin_reward(retry.id()).unwrap();
        ticket.complete_reveal();
        let receipt = engine.commit_reward(&mut profile, ticket).unwrap();
        assert_eq!(receipt.coins_spent, 35);
    }

    #[test]
    fn retry_requires_a_near_miss() {
        let mut engine = engine();
        let (mut profile, ids) = stocked_profile(&[Rarity::Rare, Rarity::Rare]);
        let attempt = engine.new_merge_attempt(&profile, &ids, false, 9).unwrap();
        let overrides = overrides_for(&engine, &attempt, 0.8);
        engine
            .resolve_merge(&mut profile, attempt.id(), Some(&overrides))
            .unwrap();
        let mut ticket = engine.begin_reward(attempt.id()).unwrap();
        ticket.complete_reveal();
        assert_eq!(
            engine.retry_near_miss(&mut profile, ticket),
            Err(EngineError::Validation(ValidationError::RetryUnavailable(
                attempt.id()
            )))
        );
    }

    #[test]
    fn insufficient_coins_block_selection() {
        let mut engine = engine();
        let (mut profile, ids) = stocked_profile(&[Rarity::Rare, Rarity::Rare]);
        profile.set_coins(10);
        assert_eq!(
            engine.new_merge_attempt(&profile, &ids, true, 0),
            Err(EngineError::Validation(ValidationError::InsufficientCoins {
                needed: 150,
                available: 10
            }))
        );
    }

    #[test]
    fn cost_reduction_is_capped() {
        let engine = engine();
        let mut profile = Profile::default();
        assert_eq!(engine.action_cost(&profile, COST_MERGE).unwrap(), 50);
        profile.record_capture(EntityId::MossGolem, Variant::Normal);
        profile.record_capture(EntityId::MossGolem, Variant::Exceptional);
        assert_eq!(engine.action_cost(&profile, COST_MERGE_BOOST).unwrap(), 85);

        let mut generous = EngineConfig::default();
        generous.cost_reduction_cap_pct = 10.0;
        let capped = ProgressionEngine::new(generous, 1).unwrap();
        assert_eq!(capped.action_cost(&profile, COST_MERGE_BOOST).unwrap(), 90);
    }

    #[test]
    fn entity_bonuses_flow_into_merges() {
        let mut engine = engine();
        let (mut profile, ids) = stocked_profile(&[Rarity::Uncommon, Rarity::Uncommon]);
        profile.record_capture(EntityId::StarWhale, Variant::Normal);
        profile.record_capture(EntityId::StarWhale, Variant::Exceptional);
        profile.record_capture(EntityId::LanternMoth, Variant::Normal);
        let attempt = engine.new_merge_attempt(&profile, &ids, false, 0).unwrap();
        assert_eq!(attempt.bonuses().tier_bonus, 1);
        assert!((attempt.bonuses().reroll_chance_pct - 50.0).abs() < 1e-12);
        assert!((attempt.bonuses().merge_luck_pct - 2.0).abs() < 1e-12);

        let overrides = overrides_for(&engine, &attempt, 0.0);
        let result = engine
            .resolve_merge(&mut profile, attempt.id(), Some(&overrides))
            .unwrap();
        assert_eq!(result.new_item.unwrap().rarity(), Rarity::Epic);
    }

    #[test]
    fn generated_items_are_unique_and_deterministic() {
        let mut a = engine();
        let mut b = engine();
        let ctx = DropContext::new(75.0, 123);
        let first = a.generate_item(&ctx, &[]).unwrap();
        let second = a.generate_item(&ctx, &[]).unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(b.generate_item(&ctx, &[]).unwrap(), first);
        assert_eq!(a.draws(RollStream::Drop), 22);
        assert!(matches!(
            a.generate_item(&DropContext::new(f64::NAN, 0), &[]),
            Err(EngineError::Validation(ValidationError::MalformedContext(_)))
        ));
        assert_eq!(a.draws(RollStream::Drop), 22);
    }

    #[test]
    fn celestial_forge_is_gated_and_charged() {
        let mut engine = engine();
        let mut profile = Profile::with_coins(10_000);
        assert!(matches!(
            engine.forge_celestial(&mut profile, 0),
            Err(EngineError::Validation(ValidationError::CelestialLocked { .. }))
        ));
        for seq in 0..5 {
            profile.add(Item::new(
                0,
                seq,
                Rarity::Legendary,
                Slot::Weapon,
                BonusAttributes::new(),
            ));
        }
        let outcome = engine.forge_celestial(&mut profile, 0).unwrap();
        assert_eq!(outcome.cost, 2_500);
        assert_eq!(profile.coins(), 7_500);
        let pool = PoolId::celestial();
        let failures = profile.pity_ledger().counter(&pool).consecutive_failures;
        assert_eq!(failures, u32::from(!outcome.success));
        if let Some(item) = outcome.new_item {
            assert_eq!(item.rarity(), Rarity::Celestial);
        }
    }

    #[test]
    fn power_breakdown_uses_equipped_gear() {
        let engine = engine();
        let (mut profile, ids) = stocked_profile(&[Rarity::Epic]);
        profile.equip(ids[0]).unwrap();
        profile.record_capture(EntityId::IronBoar, Variant::Normal);
        profile.record_capture(EntityId::IronBoar, Variant::Exceptional);
        let breakdown = engine.get_power_breakdown(&profile).unwrap();
        assert_eq!(breakdown.total, 100);
        assert_eq!(breakdown.effective, 107);
    }

    #[test]
    fn removal_mismatch_settles_without_charging() {
        let mut engine = engine();
        let (profile, ids) = stocked_profile(&[Rarity::Rare, Rarity::Rare]);
        let mut store = ShortRemoval(profile);
        let attempt = engine.new_merge_attempt(&store, &ids, false, 9).unwrap();
        let overrides = overrides_for(&engine, &attempt, 0.0);
        engine
            .resolve_merge(&mut store, attempt.id(), Some(&overrides))
            .unwrap();

        let mut ticket = engine.begin_reward(attempt.id()).unwrap();
        ticket.complete_reveal();
        assert_eq!(
            engine.commit_reward(&mut store, ticket),
            Err(EngineError::Contract(
                ContractViolation::RemovalCountMismatch {
                    expected: 2,
                    removed: 1
                }
            ))
        );
        assert_eq!(store.coins(), 10_000);
        assert_eq!(store.materials(), 0);
        assert!(store.current_items().is_empty());
        assert_eq!(engine.pending_attempts(), 0);
        assert_eq!(engine.rolls.pending(), 0);

        let retry = RewardTicket {
            attempt: attempt.id(),
            revealed: true,
        };
        assert_eq!(
            engine.commit_reward(&mut store, retry),
            Err(EngineError::Contract(ContractViolation::AlreadyCommitted(
                attempt.id()
            )))
        );
    }

    #[test]
    fn abandoned_attempts_release_bookkeeping() {
        let mut engine = engine();
        let (mut profile, ids) = stocked_profile(&[Rarity::Rare, Rarity::Rare]);
        let pool = PoolId::merge(Rarity::Rare);

        let unpreviewed = engine.new_merge_attempt(&profile, &ids, false, 0).unwrap();
        engine
            .abandon_attempt(&mut profile, unpreviewed.id())
            .unwrap();
        assert_eq!(profile.pity_ledger().counter(&pool).consecutive_failures, 0);
        assert_eq!(
            engine.begin_reward(unpreviewed.id()),
            Err(ContractViolation::Abandoned(unpreviewed.id()))
        );
        assert_eq!(
            engine.abandon_attempt(&mut profile, unpreviewed.id()),
            Err(EngineError::Contract(ContractViolation::Abandoned(
                unpreviewed.id()
            )))
        );

        for _ in 0..300 {
            let attempt = engine.new_merge_attempt(&profile, &ids, false, 0).unwrap();
            let overrides = overrides_for(&engine, &attempt, 0.95);
            engine
                .resolve_merge(&mut profile, attempt.id(), Some(&overrides))
                .unwrap();
            engine.abandon_attempt(&mut profile, attempt.id()).unwrap();
        }
        assert_eq!(
            profile.pity_ledger().counter(&pool).consecutive_failures,
            300
        );
        assert_eq!(engine.pending_attempts(), 0);
        assert_eq!(engine.rolls.pending(), 0);
        assert_eq!(engine.settled.len(), SETTLED_HISTORY);
        // Evicted from the history, the oldest id reads as never seen.
        assert_eq!(
            engine.begin_reward(unpreviewed.id()),
            Err(ContractViolation::Unresolved(unpreviewed.id()))
        );
    }

    #[test]
    fn abandoning_a_preview_counts_the_shown_outcome() {
        let mut engine = engine();
        let (mut profile, ids) = stocked_profile(&[Rarity::Rare, Rarity::Rare]);
        let pool = PoolId::merge(Rarity::Rare);
        let attempt = engine.new_merge_attempt(&profile, &ids, false, 0).unwrap();
        let shown = engine.preview_rolls(attempt.id()).unwrap();
        let expected = merge::resolve_lottery(
            &attempt,
            &engine.config().merge,
            &engine.config().salvage,
            profile.pity_ledger().bonus(&pool, &engine.config().pity),
            &shown,
        )
        .unwrap();

        engine.abandon_attempt(&mut profile, attempt.id()).unwrap();
        assert_eq!(
            profile.pity_ledger().counter(&pool).consecutive_failures,
            u32::from(!expected.success)
        );
        assert_eq!(
            engine.preview_rolls(attempt.id()),
            Err(EngineError::Contract(ContractViolation::Abandoned(
                attempt.id()
            )))
        );
        assert_eq!(engine.pending_attempts(), 0);
    }
}
