//! Monte-Carlo drivers over the progression engine.
//!
//! Engine randomness comes from the engine's own seeded streams. Player
//! behaviour (session lengths, whether to boost) uses a separate `ChaCha8Rng`
//! so changing a policy never perturbs the engine's rolls.

use anyhow::{Context, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use relicforge_engine::item::BonusAttributes;
use relicforge_engine::rarity::expected_tier;
use relicforge_engine::{
    DropContext, EngineConfig, EngineError, InventoryStore, Item, ItemId, PityStore, Profile,
    ProgressionEngine, Rarity, RarityModifier, RarityResolver, Slot, ValidationError,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// Coins awarded per focused minute.
const COINS_PER_MINUTE: u64 = 2;
const SESSION_EPOCH_MS: u64 = 1_700_000_000_000;
const SESSION_SPACING_MS: u64 = 3_600_000;

#[derive(Debug, Clone, Serialize)]
pub struct RarityRow {
    pub minutes: f64,
    pub luck_pct: f64,
    pub distribution: [f64; 5],
    pub expected_tier: f64,
}

/// Tier distributions over a sweep of session lengths.
pub fn rarity_sweep(
    config: &EngineConfig,
    minutes: &[f64],
    luck_pct: f64,
) -> Result<Vec<RarityRow>> {
    let resolver = RarityResolver::new(&config.rarity);
    let modifiers = if luck_pct == 0.0 {
        Vec::new()
    } else {
        vec![RarityModifier::drop_luck(luck_pct)]
    };
    minutes
        .iter()
        .map(|&minutes| {
            let distribution = resolver
                .tier_distribution(&DropContext::new(minutes, 0), &modifiers)
                .with_context(|| format!("invalid session length {minutes}"))?;
            Ok(RarityRow {
                minutes,
                luck_pct,
                distribution,
                expected_tier: expected_tier(&distribution),
            })
        })
        .collect()
}

/// Parameters for a merge Monte-Carlo run.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MergeScenario {
    pub inputs: usize,
    pub rarity: Rarity,
    pub boost: bool,
    pub trials: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeSummary {
    pub trials: usize,
    pub successes: usize,
    pub success_rate: f64,
    pub mean_probability: f64,
    pub near_misses: usize,
    /// Successful merges keyed by tiers gained, tier bonus excluded.
    pub tier_jumps: BTreeMap<u32, usize>,
    pub rerolls: usize,
    pub mean_materials: f64,
}

fn count_f64(count: usize) -> f64 {
    u32::try_from(count).map_or(f64::from(u32::MAX), f64::from)
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    count_f64(part) / count_f64(whole)
}

/// Resolve `trials` independent merges, each on a fresh profile so pity
/// never carries over between trials.
pub fn merge_trials(
    engine: &mut ProgressionEngine,
    scenario: MergeScenario,
) -> Result<MergeSummary> {
    let mut summary = MergeSummary {
        trials: scenario.trials,
        ..MergeSummary::default()
    };
    let mut probability_sum = 0.0;
    let mut materials = 0usize;
    for trial in 0..scenario.trials {
        let mut profile = Profile::with_coins(u64::MAX / 2);
        let ids: Vec<ItemId> = (0..scenario.inputs)
            .map(|seq| {
                let item = Item::new(
                    SESSION_EPOCH_MS,
                    u64::try_from(seq).unwrap_or(u64::MAX),
                    scenario.rarity,
                    Slot::ALL[seq % Slot::ALL.len()],
                    BonusAttributes::new(),
                );
                let id = item.id();
                profile.add(item);
                id
            })
            .collect();
        let attempt = engine
            .new_merge_attempt(&profile, &ids, scenario.boost, 0)
            .with_context(|| format!("trial {trial}: merge rejected"))?;
        let result = engine.resolve_merge(&mut profile, attempt.id(), None)?;
        engine.abandon_attempt(&mut profile, attempt.id())?;

        probability_sum += result.probability;
        materials += usize::try_from(result.materials_earned).unwrap_or(usize::MAX);
        if result.near_miss.is_some() {
            summary.near_misses += 1;
        }
        if let Some(jump) = result.tier_jump {
            summary.successes += 1;
            *summary.tier_jumps.entry(jump.tiers).or_default() += 1;
            if jump.rerolled {
                summary.rerolls += 1;
            }
        }
    }
    summary.success_rate = ratio(summary.successes, scenario.trials);
    summary.mean_probability = if scenario.trials == 0 {
        0.0
    } else {
        probability_sum / count_f64(scenario.trials)
    };
    summary.mean_materials = ratio(materials, scenario.trials);
    Ok(summary)
}

/// Player behaviour for a seeded session run.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SessionPolicy {
    pub sessions: u32,
    pub min_minutes: u32,
    pub max_minutes: u32,
    /// Chance in `[0, 1]` of paying for the boost on each merge.
    pub boost_chance: f64,
    pub merge_batch: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSummary {
    pub sessions: u32,
    pub minutes_focused: u64,
    pub drops: BTreeMap<String, usize>,
    pub merges: usize,
    pub merge_successes: usize,
    pub near_misses: usize,
    pub retries: usize,
    pub forge_attempts: usize,
    pub celestials: usize,
    pub coins: u64,
    pub materials: u64,
    pub legendaries_obtained: u32,
    pub power_total: u32,
    pub inventory: BTreeMap<String, usize>,
}

fn merge_candidates(profile: &Profile, batch: usize) -> Option<Vec<ItemId>> {
    let equipped = profile.equipped_ids();
    let mut by_rarity: BTreeMap<Rarity, Vec<ItemId>> = BTreeMap::new();
    for item in profile.current_items() {
        if item.rarity() < Rarity::Legendary && !equipped.contains(&item.id()) {
            by_rarity.entry(item.rarity()).or_default().push(item.id());
        }
    }
    // Lowest non-fuel tier with at least two spare items, padded with fuel.
    let fuel = by_rarity.remove(&Rarity::Common).unwrap_or_default();
    let (_, mut ids) = by_rarity.into_iter().find(|(_, ids)| ids.len() >= 2)?;
    ids.truncate(batch);
    ids.extend(fuel.into_iter().take(batch.saturating_sub(ids.len())));
    Some(ids)
}

fn equip_upgrades(profile: &mut Profile) -> Result<()> {
    let mut picks: BTreeMap<Slot, (Rarity, ItemId)> = BTreeMap::new();
    for item in profile.current_items() {
        let current = picks.entry(item.slot()).or_insert((item.rarity(), item.id()));
        if item.rarity() > current.0 {
            *current = (item.rarity(), item.id());
        }
    }
    for (_, id) in picks.into_values() {
        profile.equip(id)?;
    }
    Ok(())
}

/// Run one merge to settlement, accepting near-miss retries while affordable.
/// Returns whether the inputs were settled.
fn run_merge(
    engine: &mut ProgressionEngine,
    profile: &mut Profile,
    ids: &[ItemId],
    boost: bool,
    summary: &mut SessionSummary,
) -> Result<bool> {
    let mut attempt = match engine.new_merge_attempt(&*profile, ids, boost, 0) {
        Ok(attempt) => attempt,
        Err(EngineError::Validation(ValidationError::InsufficientCoins { .. })) => return Ok(false),
        Err(err) => return Err(err.into()),
    };
    loop {
        summary.merges += 1;
        let result = engine.resolve_merge(profile, attempt.id(), None)?;
        if result.success {
            summary.merge_successes += 1;
        }
        let mut ticket = engine.begin_reward(attempt.id())?;
        ticket.complete_reveal();

        if let Some(offer) = result.near_miss {
            summary.near_misses += 1;
            let settle = engine.merge_cost(&*profile, &attempt)?;
            if profile.coins() >= settle.saturating_add(offer.cost) {
                summary.retries += 1;
                attempt = engine.retry_near_miss(profile, ticket)?;
                continue;
            }
        }
        return match engine.commit_reward(profile, ticket) {
            Ok(_) => Ok(true),
            Err(EngineError::Validation(ValidationError::InsufficientCoins { .. })) => {
                engine.abandon_attempt(profile, attempt.id())?;
                Ok(false)
            }
            Err(err) => Err(err.into()),
        };
    }
}

/// Play `policy.sessions` focus sessions: collect a drop after each, merge
/// greedily, equip upgrades and try the forge whenever it is open.
pub fn run_sessions(
    engine: &mut ProgressionEngine,
    profile: &mut Profile,
    policy: SessionPolicy,
    behaviour_seed: u64,
) -> Result<SessionSummary> {
    let mut rng = ChaCha8Rng::seed_from_u64(behaviour_seed);
    let mut summary = SessionSummary {
        sessions: policy.sessions,
        ..SessionSummary::default()
    };
    let max_minutes = policy.max_minutes.max(policy.min_minutes);

    for session in 0..policy.sessions {
        let minutes = rng.gen_range(policy.min_minutes..=max_minutes);
        summary.minutes_focused += u64::from(minutes);
        profile.set_coins(
            profile
                .coins()
                .saturating_add(u64::from(minutes) * COINS_PER_MINUTE),
        );

        let ctx = DropContext::new(
            f64::from(minutes),
            SESSION_EPOCH_MS + u64::from(session) * SESSION_SPACING_MS,
        );
        let modifiers = engine.drop_modifiers(&*profile)?;
        let item = engine.generate_item(&ctx, &modifiers)?;
        log::debug!("session {session}: {minutes} min -> {}", item.rarity());
        *summary.drops.entry(item.rarity().to_string()).or_default() += 1;
        profile.add(item);

        while let Some(ids) = merge_candidates(profile, policy.merge_batch) {
            let boost = rng.gen_bool(policy.boost_chance.clamp(0.0, 1.0));
            if !run_merge(engine, profile, &ids, boost, &mut summary)? {
                break;
            }
        }
        equip_upgrades(profile)?;

        if profile.legendaries_obtained() >= engine.config().celestial.unlock_legendaries {
            match engine.forge_celestial(profile, ctx.created_at_ms) {
                Ok(outcome) => {
                    summary.forge_attempts += 1;
                    if outcome.success {
                        summary.celestials += 1;
                    }
                }
                Err(EngineError::Validation(ValidationError::InsufficientCoins { .. })) => {}
                Err(err) => return Err(err.into()),
            }
        }
    }

    summary.coins = profile.coins();
    summary.materials = profile.materials();
    summary.legendaries_obtained = profile.legendaries_obtained();
    summary.power_total = engine.get_power_breakdown(&*profile)?.effective;
    for (rarity, count) in Rarity::ALL.iter().zip(profile.rarity_counts()) {
        if count > 0 {
            summary.inventory.insert(rarity.to_string(), count);
        }
    }
    let streaks = profile
        .pity_ledger()
        .pools()
        .filter(|(_, counter)| counter.consecutive_failures > 0)
        .count();
    log::debug!("sessions finished with {streaks} open pity streaks");
    Ok(summary)
}
