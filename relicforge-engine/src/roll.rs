//! Roll authority: the single owner of randomness.
//!
//! Every attempt declares a fixed roll plan. Values are either drawn ahead of
//! time for a presentation (`preview`) and handed back as overrides, or drawn
//! by the authority at resolution. Either way the resolver sees one canonical
//! sheet per attempt, and the sheet is consumed exactly once.

use hmac::{Hmac, Mac};
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;

use crate::constants::{
    RNG_DOMAIN_CELESTIAL, RNG_DOMAIN_DROP, RNG_DOMAIN_MERGE, RNG_DOMAIN_SALVAGE,
};
use crate::error::ContractViolation;
use crate::numbers::unit_from_u64;

/// Identity of one resolvable attempt (drop, merge or forge).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AttemptId(u64);

impl AttemptId {
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// RNG stream a roll is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollStream {
    Drop,
    Merge,
    Salvage,
    Celestial,
}

impl RollStream {
    const fn domain_tag(self) -> &'static [u8] {
        match self {
            Self::Drop => RNG_DOMAIN_DROP,
            Self::Merge => RNG_DOMAIN_MERGE,
            Self::Salvage => RNG_DOMAIN_SALVAGE,
            Self::Celestial => RNG_DOMAIN_CELESTIAL,
        }
    }
}

/// What a roll decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollKind {
    Rarity,
    Slot,
    Attribute,
    Success,
    TierJump,
    RerollGate,
    RerollTier,
    Salvage,
    Celestial,
}

impl RollKind {
    #[must_use]
    pub const fn stream(self) -> RollStream {
        match self {
            Self::Rarity | Self::Slot | Self::Attribute => RollStream::Drop,
            Self::Success | Self::TierJump | Self::RerollGate | Self::RerollTier => {
                RollStream::Merge
            }
            Self::Salvage => RollStream::Salvage,
            Self::Celestial => RollStream::Celestial,
        }
    }
}

/// Who produced a roll value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollOrigin {
    /// Drawn for, or supplied by, a presentation before resolution.
    Display,
    /// Drawn by the authority during resolution.
    Backend,
}

/// One recorded roll.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RollRecord {
    pub attempt: AttemptId,
    pub kind: RollKind,
    pub index: u16,
    pub value: f64,
    pub origin: RollOrigin,
    pub consumed: bool,
}

/// Ordered roll kinds with counts for one attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollPlan {
    steps: SmallVec<[(RollKind, u16); 8]>,
}

impl RollPlan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, kind: RollKind, count: u16) -> Self {
        if count > 0 {
            self.steps.push((kind, count));
        }
        self
    }

    /// Every `(kind, index)` slot in draw order.
    pub fn slots(&self) -> impl Iterator<Item = (RollKind, u16)> + '_ {
        self.steps
            .iter()
            .flat_map(|&(kind, count)| (0..count).map(move |index| (kind, index)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.iter().map(|&(_, count)| usize::from(count)).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn count(&self, kind: RollKind) -> u16 {
        self.steps
            .iter()
            .filter(|(step, _)| *step == kind)
            .map(|&(_, count)| count)
            .sum()
    }
}

/// Canonical rolls for one attempt, in plan order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollSheet {
    attempt: AttemptId,
    records: Vec<RollRecord>,
}

impl RollSheet {
    #[must_use]
    pub const fn attempt(&self) -> AttemptId {
        self.attempt
    }

    #[must_use]
    pub fn records(&self) -> &[RollRecord] {
        &self.records
    }

    /// Value of one planned roll.
    ///
    /// # Errors
    ///
    /// Returns `ContractViolation::RollPlanMismatch` when the slot was never planned.
    pub fn value(&self, kind: RollKind, index: u16) -> Result<f64, ContractViolation> {
        self.records
            .iter()
            .find(|record| record.kind == kind && record.index == index)
            .map(|record| record.value)
            .ok_or(ContractViolation::RollPlanMismatch(self.attempt))
    }

    /// Every value of a kind in index order.
    #[must_use]
    pub fn values(&self, kind: RollKind) -> Vec<f64> {
        self.records
            .iter()
            .filter(|record| record.kind == kind)
            .map(|record| record.value)
            .collect()
    }
}

/// One externally supplied roll value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RollValue {
    pub kind: RollKind,
    pub index: u16,
    pub value: f64,
}

/// Roll values handed back by a presentation (or another external source).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollOverrides {
    values: Vec<RollValue>,
}

impl RollOverrides {
    #[must_use]
    pub const fn new(values: Vec<RollValue>) -> Self {
        Self { values }
    }

    /// Echo a previewed sheet back unchanged.
    #[must_use]
    pub fn from_sheet(sheet: &RollSheet) -> Self {
        Self {
            values: sheet
                .records
                .iter()
                .map(|record| RollValue {
                    kind: record.kind,
                    index: record.index,
                    value: record.value,
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn values(&self) -> &[RollValue] {
        &self.values
    }
}

/// Deterministic bundle of RNG streams segregated by roll domain.
#[derive(Debug, Clone)]
pub struct RngBundle {
    drop: CountingRng<SmallRng>,
    merge: CountingRng<SmallRng>,
    salvage: CountingRng<SmallRng>,
    celestial: CountingRng<SmallRng>,
}

impl RngBundle {
    /// Construct the bundle from a user-visible seed.
    #[must_use]
    pub fn from_user_seed(seed: u64) -> Self {
        Self {
            drop: CountingRng::new(derive_stream_seed(seed, RollStream::Drop.domain_tag())),
            merge: CountingRng::new(derive_stream_seed(seed, RollStream::Merge.domain_tag())),
            salvage: CountingRng::new(derive_stream_seed(seed, RollStream::Salvage.domain_tag())),
            celestial: CountingRng::new(derive_stream_seed(
                seed,
                RollStream::Celestial.domain_tag(),
            )),
        }
    }

    pub fn stream(&mut self, stream: RollStream) -> &mut CountingRng<SmallRng> {
        match stream {
            RollStream::Drop => &mut self.drop,
            RollStream::Merge => &mut self.merge,
            RollStream::Salvage => &mut self.salvage,
            RollStream::Celestial => &mut self.celestial,
        }
    }

    /// Draw calls performed against one stream.
    #[must_use]
    pub const fn draws(&self, stream: RollStream) -> u64 {
        match stream {
            RollStream::Drop => self.drop.draws(),
            RollStream::Merge => self.merge.draws(),
            RollStream::Salvage => self.salvage.draws(),
            RollStream::Celestial => self.celestial.draws(),
        }
    }
}

/// Counting wrapper for RNG streams providing instrumentation.
#[derive(Debug, Clone)]
pub struct CountingRng<R> {
    rng: R,
    draws: u64,
}

impl CountingRng<SmallRng> {
    fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            draws: 0,
        }
    }
}

impl<R: RngCore> CountingRng<R> {
    /// Number of draw calls performed against this stream.
    #[must_use]
    pub const fn draws(&self) -> u64 {
        self.draws
    }
}

impl<R: RngCore> RngCore for CountingRng<R> {
    fn next_u32(&mut self) -> u32 {
        self.draws = self.draws.saturating_add(1);
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.draws = self.draws.saturating_add(1);
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.draws = self.draws.saturating_add(1);
        self.rng.fill_bytes(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.draws = self.draws.saturating_add(1);
        self.rng.try_fill_bytes(dest)
    }
}

fn derive_stream_seed(user_seed: u64, domain_tag: &[u8]) -> u64 {
    let key = user_seed.to_le_bytes();
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(&key) else {
        return user_seed;
    };
    mac.update(domain_tag);
    let digest = mac.finalize().into_bytes();
    let mut seed_bytes = [0_u8; 8];
    seed_bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(seed_bytes)
}

/// Draw one unit value from any RNG.
pub fn draw_unit<R: RngCore + ?Sized>(rng: &mut R) -> f64 {
    unit_from_u64(rng.next_u64())
}

#[derive(Debug, Clone)]
struct AttemptRolls {
    plan: RollPlan,
    records: Vec<RollRecord>,
    resolved: bool,
}

impl AttemptRolls {
    fn sheet(&self, attempt: AttemptId) -> RollSheet {
        RollSheet {
            attempt,
            records: self.records.clone(),
        }
    }
}

/// Owns the RNG streams and the roll ledger for every open attempt.
#[derive(Debug, Clone)]
pub struct RollAuthority {
    rngs: RngBundle,
    ledger: HashMap<AttemptId, AttemptRolls>,
    next_attempt: u64,
}

impl RollAuthority {
    #[must_use]
    pub fn from_user_seed(seed: u64) -> Self {
        Self {
            rngs: RngBundle::from_user_seed(seed),
            ledger: HashMap::new(),
            next_attempt: 1,
        }
    }

    /// Allocate a fresh attempt identity.
    pub fn next_attempt(&mut self) -> AttemptId {
        let id = AttemptId::new(self.next_attempt);
        self.next_attempt = self.next_attempt.saturating_add(1);
        id
    }

    #[must_use]
    pub const fn rngs(&self) -> &RngBundle {
        &self.rngs
    }

    fn draw_plan(
        &mut self,
        attempt: AttemptId,
        plan: &RollPlan,
        origin: RollOrigin,
    ) -> Vec<RollRecord> {
        plan.slots()
            .map(|(kind, index)| {
                let value = draw_unit(self.rngs.stream(kind.stream()));
                log::trace!("roll {attempt} {kind:?}[{index}] = {value:.6} ({origin:?})");
                RollRecord {
                    attempt,
                    kind,
                    index,
                    value,
                    origin,
                    consumed: false,
                }
            })
            .collect()
    }

    /// Draw the plan ahead of resolution so a presentation can animate it.
    ///
    /// Previewing the same attempt again returns the same values.
    ///
    /// # Errors
    ///
    /// Fails when the attempt was already resolved or was previewed under a
    /// different plan.
    pub fn preview(
        &mut self,
        attempt: AttemptId,
        plan: &RollPlan,
    ) -> Result<RollSheet, ContractViolation> {
        if let Some(existing) = self.ledger.get(&attempt) {
            if existing.resolved {
                log::warn!("preview requested for resolved attempt {attempt}");
                return Err(ContractViolation::RollAlreadyResolved(attempt));
            }
            if existing.plan != *plan {
                return Err(ContractViolation::RollPlanMismatch(attempt));
            }
            return Ok(existing.sheet(attempt));
        }
        let records = self.draw_plan(attempt, plan, RollOrigin::Display);
        let rolls = AttemptRolls {
            plan: plan.clone(),
            records,
            resolved: false,
        };
        let sheet = rolls.sheet(attempt);
        self.ledger.insert(attempt, rolls);
        Ok(sheet)
    }

    /// Fix the canonical sheet used by resolution.
    ///
    /// With overrides, the values must match the plan slot-for-slot, lie in
    /// `[0, 1)`, and equal any earlier preview. Without overrides, an earlier
    /// preview is reused, otherwise the authority draws.
    ///
    /// # Errors
    ///
    /// Returns a contract violation on resolved attempts, plan mismatches,
    /// out-of-range values, or divergence from the preview.
    pub fn author(
        &mut self,
        attempt: AttemptId,
        plan: &RollPlan,
        overrides: Option<&RollOverrides>,
    ) -> Result<RollSheet, ContractViolation> {
        let previous = match self.ledger.get(&attempt) {
            Some(existing) if existing.resolved => {
                return Err(ContractViolation::RollAlreadyResolved(attempt));
            }
            Some(existing) if existing.plan != *plan => {
                return Err(ContractViolation::RollPlanMismatch(attempt));
            }
            Some(existing) => Some(existing.records.clone()),
            None => None,
        };

        let records = match (overrides, previous) {
            (Some(overrides), previous) => {
                Self::check_overrides(attempt, plan, overrides, previous.as_deref())?
            }
            (None, Some(previewed)) => previewed,
            (None, None) => self.draw_plan(attempt, plan, RollOrigin::Backend),
        };

        let rolls = AttemptRolls {
            plan: plan.clone(),
            records,
            resolved: true,
        };
        let sheet = rolls.sheet(attempt);
        self.ledger.insert(attempt, rolls);
        Ok(sheet)
    }

    fn check_overrides(
        attempt: AttemptId,
        plan: &RollPlan,
        overrides: &RollOverrides,
        preview: Option<&[RollRecord]>,
    ) -> Result<Vec<RollRecord>, ContractViolation> {
        if overrides.values.len() != plan.len() {
            log::warn!("override count mismatch for attempt {attempt}");
            return Err(ContractViolation::RollPlanMismatch(attempt));
        }
        let mut records = Vec::with_capacity(plan.len());
        for (pos, ((kind, index), supplied)) in plan.slots().zip(&overrides.values).enumerate() {
            if supplied.kind != kind || supplied.index != index {
                log::warn!("override slot mismatch for attempt {attempt}");
                return Err(ContractViolation::RollPlanMismatch(attempt));
            }
            if !supplied.value.is_finite() || !(0.0..1.0).contains(&supplied.value) {
                return Err(ContractViolation::RollOutOfRange {
                    kind,
                    value: supplied.value,
                });
            }
            if let Some(previewed) = preview.and_then(|records| records.get(pos))
                && previewed.value.to_bits() != supplied.value.to_bits()
            {
                log::warn!("override diverges from preview for attempt {attempt}");
                return Err(ContractViolation::DivergentRoll { kind, index });
            }
            records.push(RollRecord {
                attempt,
                kind,
                index,
                value: supplied.value,
                origin: RollOrigin::Display,
                consumed: false,
            });
        }
        Ok(records)
    }

    /// Mark every roll of the attempt consumed.
    ///
    /// # Errors
    ///
    /// Fails when the attempt has no resolved rolls or they were already consumed.
    pub fn consume(&mut self, attempt: AttemptId) -> Result<(), ContractViolation> {
        let Some(rolls) = self.ledger.get_mut(&attempt) else {
            return Err(ContractViolation::RollsMissing(attempt));
        };
        if !rolls.resolved {
            return Err(ContractViolation::Unresolved(attempt));
        }
        if rolls.records.iter().any(|record| record.consumed) {
            log::warn!("rolls for attempt {attempt} consumed twice");
            return Err(ContractViolation::RollConsumedTwice(attempt));
        }
        for record in &mut rolls.records {
            record.consumed = true;
        }
        Ok(())
    }

    /// Current sheet for an attempt, if any rolls are recorded.
    #[must_use]
    pub fn sheet(&self, attempt: AttemptId) -> Option<RollSheet> {
        self.ledger.get(&attempt).map(|rolls| rolls.sheet(attempt))
    }

    /// Drop the ledger entry once the attempt is settled.
    pub fn forget(&mut self, attempt: AttemptId) {
        self.ledger.remove(&attempt);
    }

    /// Attempts with rolls still held in the ledger.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.ledger.len()
    }
}
