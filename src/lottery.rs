//! Lottery Engine - weighted perk selection and pity evaluation
//!
//! Pure: no I/O, no clock. The RNG is a type parameter so the orchestrator can
//! run on an entropy-seeded generator while tests and benches replay a fixed
//! `Xoshiro256PlusPlus` seed.

use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::sync::Arc;
use tracing::debug;

use crate::catalog::{CatalogSnapshot, Perk};
use crate::error::{PerkError, PerkResult};

/// Default number of cumulative draws that forces a guaranteed-tier hit
pub const DEFAULT_PITY_THRESHOLD: i64 = 500;

/// Index of the winner for a roll in `[0, total_weight)`.
///
/// The winner is the first perk whose running weight sum strictly exceeds
/// `roll`, so zero-weight perks are never chosen while any weight is positive.
/// `None` when no perk carries weight.
pub fn select_weighted(perks: &[Arc<Perk>], roll: f64) -> Option<usize> {
    let mut running = 0.0;
    let mut last_positive = None;
    for (i, perk) in perks.iter().enumerate() {
        if perk.draw_weight <= 0.0 {
            continue;
        }
        running += perk.draw_weight;
        last_positive = Some(i);
        if roll < running {
            return Some(i);
        }
    }
    // Float rounding can leave `roll` a hair above the final sum
    last_positive
}

/// Random source for perk and level draws
pub struct Lottery<R: Rng> {
    rng: R,
}

impl Lottery<Xoshiro256PlusPlus> {
    pub fn seeded(seed: u64) -> Self {
        Self::new(Xoshiro256PlusPlus::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self::seeded(rand::random())
    }
}

impl<R: Rng> Lottery<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Draw a perk. With a guaranteed tier that has members the pick is uniform
    /// within the tier; otherwise it is weighted over the whole catalog.
    pub fn draw_perk<'a>(
        &mut self,
        catalog: &'a CatalogSnapshot,
        guarantee_tier: Option<&str>,
    ) -> PerkResult<&'a Arc<Perk>> {
        let perks = catalog.perks();
        if perks.is_empty() {
            return Err(PerkError::CatalogEmpty);
        }

        if let Some(tier) = guarantee_tier {
            let tier_perks = catalog.in_category(tier);
            if !tier_perks.is_empty() {
                let pick = tier_perks[self.rng.gen_range(0..tier_perks.len())];
                debug!(perk = %pick.id, tier, "Guaranteed tier draw");
                return Ok(pick);
            }
            debug!(tier, "Guaranteed tier has no perks, using weighted draw");
        }

        let total = catalog.total_weight();
        if total <= 0.0 || !total.is_finite() {
            return Ok(&perks[self.rng.gen_range(0..perks.len())]);
        }

        let roll = self.rng.gen_range(0.0..total);
        let index = select_weighted(perks, roll).unwrap_or(0);
        Ok(&perks[index])
    }

    /// Uniform over the defined levels; a perk without levels is level 1
    pub fn draw_level(&mut self, perk: &Perk) -> u32 {
        let levels = perk.level_numbers();
        if levels.is_empty() {
            return 1;
        }
        levels[self.rng.gen_range(0..levels.len())]
    }
}

/// Result of evaluating pity for one roll sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PityOutcome {
    pub guaranteed: bool,
    pub next_pity: i64,
}

/// Cumulative-draw guarantee, evaluated once per sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PityPolicy {
    pub threshold: i64,
}

impl Default for PityPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_PITY_THRESHOLD,
        }
    }
}

impl PityPolicy {
    pub fn new(threshold: i64) -> Self {
        Self { threshold }
    }

    pub fn evaluate(&self, pity: i64, draw_count: i64) -> PityOutcome {
        let reached = pity.max(0).saturating_add(draw_count.max(0));
        if reached >= self.threshold {
            PityOutcome {
                guaranteed: true,
                next_pity: 0,
            }
        } else {
            PityOutcome {
                guaranteed: false,
                next_pity: reached,
            }
        }
    }
}
