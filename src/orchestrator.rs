//! Roll Orchestrator - executes a roll sequence end to end
//!
//! ## Sequence
//! ```text
//! validate count ─▶ managed tool? ─▶ reserve actor ─▶ draws >= n?
//!        │                                               │ (nothing mutated before here)
//!        ▼                                               ▼
//!   deduct n draws, lifetime += n, evaluate pity once (from the same read), store next pity
//!        │
//!        ├─ draws 1..n-1: DrawApplier::apply (embed, await upsert, spawn history)
//!        └─ draw n: PendingReveal ─▶ RevealPresenter ─▶ DrawApplier::apply
//! ```
//!
//! A failed draw inside the loop is logged and the loop carries on. Draws and
//! pity already deducted are never refunded. The actor stays reserved until
//! the final draw has been applied (or its reveal dropped), so a second
//! sequence cannot start while a reveal is on screen.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::catalog::{CatalogSnapshot, Perk, TraitCatalog};
use crate::error::{PerkError, PerkResult};
use crate::host::{ActorId, HostIntegration};
use crate::item_state::{ItemStateCodec, SharedTool};
use crate::lottery::{Lottery, PityPolicy};
use crate::reconcile::ToolLocks;
use crate::storage::repository::{AssignmentKey, PlayerProgress};
use crate::storage::PersistenceGateway;

/// One finalized draw
#[derive(Debug, Clone, PartialEq)]
pub struct DrawOutcome {
    pub perk: Arc<Perk>,
    pub level: u32,
    pub was_guaranteed: bool,
}

impl DrawOutcome {
    pub fn key(&self) -> AssignmentKey {
        AssignmentKey::new(self.perk.id.clone(), self.level)
    }
}

/// Summary returned once the final draw has been handed to the presenter
#[derive(Debug, Clone)]
pub struct SequenceReport {
    pub draws_consumed: u32,
    pub remaining_draws: i64,
    pub guaranteed: bool,
    pub pity_after: i64,
    /// Draws applied immediately, in order
    pub applied: Vec<DrawOutcome>,
    /// Draws whose apply failed (logged, not refunded)
    pub failed: usize,
    /// The draw handed to the presenter
    pub final_draw: Option<DrawOutcome>,
}

// ============================================================================
// Apply path
// ============================================================================

/// Shared apply path: embed on the tool, await the ledger upsert, spawn history.
/// Holds the tool's lock throughout, so a reconciliation pass sees both writes or neither.
pub struct DrawApplier {
    codec: ItemStateCodec,
    gateway: PersistenceGateway,
    locks: Arc<ToolLocks>,
}

impl DrawApplier {
    pub fn new(codec: ItemStateCodec, gateway: PersistenceGateway, locks: Arc<ToolLocks>) -> Self {
        Self { codec, gateway, locks }
    }

    /// Returns the tool identity the draw was persisted under
    pub async fn apply(&self, actor: &ActorId, tool: &SharedTool, draw: &DrawOutcome) -> PerkResult<String> {
        let tool_id = self.codec.identity(&mut tool.lock());
        let _held = self.locks.lock(&tool_id).await;

        self.codec.apply(&mut tool.lock(), &draw.perk, draw.level);
        let key = draw.key();

        self.gateway.save_assignment(&tool_id, actor, &key).await?;

        // History never blocks or rolls back the assignment
        drop(self.gateway.spawn_record_draw_history(
            actor.clone(),
            key.clone(),
            draw.perk.category.clone(),
            draw.was_guaranteed,
        ));

        info!(
            actor = %actor,
            tool = %tool_id,
            perk = %key,
            guaranteed = draw.was_guaranteed,
            "Perk applied"
        );
        Ok(tool_id)
    }
}

// ============================================================================
// Presentation
// ============================================================================

struct RollGuard {
    actor: ActorId,
    in_flight: Arc<Mutex<HashSet<ActorId>>>,
}

impl Drop for RollGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.actor);
    }
}

/// The final draw of a sequence, waiting for its reveal to finish
pub struct PendingReveal {
    draw: DrawOutcome,
    actor: ActorId,
    tool: SharedTool,
    applier: Arc<DrawApplier>,
    _guard: RollGuard,
}

impl PendingReveal {
    pub fn draw(&self) -> &DrawOutcome {
        &self.draw
    }

    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    /// Run the apply path; the actor may roll again once this returns
    pub async fn apply(self) -> PerkResult<String> {
        self.applier.apply(&self.actor, &self.tool, &self.draw).await
    }
}

/// Receives the final draw of every sequence and eventually applies it
#[async_trait]
pub trait RevealPresenter: Send + Sync {
    async fn present(&self, reveal: PendingReveal);
}

fn log_reveal_result(actor: &ActorId, result: PerkResult<String>) {
    if let Err(e) = result {
        error!(actor = %actor, error = %e, "Final draw could not be applied");
    }
}

/// Applies the final draw immediately
pub struct InstantReveal;

#[async_trait]
impl RevealPresenter for InstantReveal {
    async fn present(&self, reveal: PendingReveal) {
        let actor = reveal.actor().clone();
        log_reveal_result(&actor, reveal.apply().await);
    }
}

/// Applies the final draw after the reveal animation has had time to play
pub struct DelayedReveal {
    delay: Duration,
}

impl DelayedReveal {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl RevealPresenter for DelayedReveal {
    async fn present(&self, reveal: PendingReveal) {
        let delay = self.delay;
        debug!(actor = %reveal.actor(), perk = %reveal.draw().key(), ?delay, "Reveal scheduled");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let actor = reveal.actor().clone();
            log_reveal_result(&actor, reveal.apply().await);
        });
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct OrchestratorSettings {
    pub pity: PityPolicy,
    pub guaranteed_category: Option<String>,
    pub max_draws_per_sequence: u32,
    pub starting_draws: i64,
}

pub struct RollOrchestrator {
    host: Arc<dyn HostIntegration>,
    catalog: Arc<TraitCatalog>,
    gateway: PersistenceGateway,
    applier: Arc<DrawApplier>,
    presenter: Arc<dyn RevealPresenter>,
    lottery: Mutex<Lottery<Xoshiro256PlusPlus>>,
    settings: OrchestratorSettings,
    in_flight: Arc<Mutex<HashSet<ActorId>>>,
}

impl RollOrchestrator {
    pub fn new(
        host: Arc<dyn HostIntegration>,
        catalog: Arc<TraitCatalog>,
        gateway: PersistenceGateway,
        codec: ItemStateCodec,
        locks: Arc<ToolLocks>,
        presenter: Arc<dyn RevealPresenter>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            applier: Arc::new(DrawApplier::new(codec, gateway.clone(), locks)),
            host,
            catalog,
            gateway,
            presenter,
            lottery: Mutex::new(Lottery::from_entropy()),
            settings,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Replace the entropy-seeded lottery (replays in tests and audits)
    pub fn with_lottery(self, lottery: Lottery<Xoshiro256PlusPlus>) -> Self {
        *self.lottery.lock() = lottery;
        self
    }

    pub fn pity_threshold(&self) -> i64 {
        self.settings.pity.threshold
    }

    /// Whether the actor still has a reveal pending
    pub fn is_rolling(&self, actor: &ActorId) -> bool {
        self.in_flight.lock().contains(actor)
    }

    pub fn rolls_in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    fn reserve(&self, actor: &ActorId) -> PerkResult<RollGuard> {
        if !self.in_flight.lock().insert(actor.clone()) {
            return Err(PerkError::RollInProgress(actor.clone()));
        }
        Ok(RollGuard {
            actor: actor.clone(),
            in_flight: self.in_flight.clone(),
        })
    }

    fn draw(&self, snapshot: &CatalogSnapshot, tier: Option<&str>) -> PerkResult<DrawOutcome> {
        let mut lottery = self.lottery.lock();
        let perk = lottery.draw_perk(snapshot, tier)?.clone();
        let level = lottery.draw_level(&perk);
        Ok(DrawOutcome {
            was_guaranteed: tier.is_some_and(|t| perk.category == t),
            perk,
            level,
        })
    }

    /// Roll `draw_count` times on `tool` for `actor`
    pub async fn execute_roll_sequence(
        &self,
        actor: &ActorId,
        tool: &SharedTool,
        draw_count: u32,
    ) -> PerkResult<SequenceReport> {
        let max = self.settings.max_draws_per_sequence;
        if draw_count == 0 || draw_count > max {
            return Err(PerkError::InvalidDrawCount {
                requested: draw_count,
                max,
            });
        }
        if !self.host.is_managed_tool(&tool.lock()) {
            return Err(PerkError::NotAManagedItem);
        }
        let guard = self.reserve(actor)?;

        let snapshot = self.catalog.snapshot();
        if snapshot.is_empty() {
            return Err(PerkError::CatalogEmpty);
        }

        // One read serves the affordability check and the pity evaluation
        let need = i64::from(draw_count);
        let progress = self.gateway.progress(actor).await?;
        let have = progress.available_draws;
        if have < need {
            return Err(PerkError::InsufficientDraws { have, need });
        }
        let pity = progress.pity_counter;

        // Point of no return
        let remaining_draws = self.gateway.add_draws(actor, -need).await?;
        if let Err(e) = self.gateway.increment_lifetime_draws(actor, need).await {
            warn!(actor = %actor, error = %e, "Lifetime draws not incremented");
        }
        let pity_outcome = self.settings.pity.evaluate(pity, need);
        if let Err(e) = self.gateway.set_pity(actor, pity_outcome.next_pity).await {
            warn!(actor = %actor, error = %e, "Pity counter not stored");
        }

        let tier = self
            .settings
            .guaranteed_category
            .clone()
            .unwrap_or_else(|| snapshot.guaranteed_category().to_string());

        info!(
            actor = %actor,
            draws = draw_count,
            pity_before = pity,
            guaranteed = pity_outcome.guaranteed,
            "Roll sequence started"
        );

        let mut report = SequenceReport {
            draws_consumed: draw_count,
            remaining_draws,
            guaranteed: pity_outcome.guaranteed,
            pity_after: pity_outcome.next_pity,
            applied: Vec::with_capacity(draw_count as usize),
            failed: 0,
            final_draw: None,
        };

        let last = draw_count - 1;
        for i in 0..last {
            let draw = match self.draw(&snapshot, None) {
                Ok(d) => d,
                Err(e) => {
                    error!(actor = %actor, draw = i, error = %e, "Draw failed");
                    report.failed += 1;
                    continue;
                }
            };
            match self.applier.apply(actor, tool, &draw).await {
                Ok(_) => report.applied.push(draw),
                Err(e) => {
                    error!(actor = %actor, draw = i, perk = %draw.key(), error = %e, "Draw not persisted");
                    report.failed += 1;
                }
            }
        }

        let final_tier = pity_outcome.guaranteed.then_some(tier.as_str());
        match self.draw(&snapshot, final_tier) {
            Ok(draw) => {
                report.final_draw = Some(draw.clone());
                let reveal = PendingReveal {
                    draw,
                    actor: actor.clone(),
                    tool: tool.clone(),
                    applier: self.applier.clone(),
                    _guard: guard,
                };
                self.presenter.present(reveal).await;
            }
            Err(e) => {
                error!(actor = %actor, draw = last, error = %e, "Final draw failed");
                report.failed += 1;
            }
        }

        Ok(report)
    }

    /// Buy draws with in-game money
    pub async fn purchase_draws(&self, actor: &ActorId, amount: i64, cost: f64) -> PerkResult<i64> {
        if amount <= 0 {
            return Err(PerkError::InvalidAmount(format!("draw amount {}", amount)));
        }
        if !cost.is_finite() || cost < 0.0 {
            return Err(PerkError::InvalidAmount(format!("cost {}", cost)));
        }

        let balance = self.host.currency_balance(actor).await;
        if balance < cost {
            return Err(PerkError::InsufficientFunds {
                have: balance,
                need: cost,
            });
        }
        if !self.host.adjust_currency(actor, -cost).await {
            return Err(PerkError::CurrencyRejected);
        }

        match self.gateway.add_draws(actor, amount).await {
            Ok(total) => {
                info!(actor = %actor, amount, cost, total, "Draws purchased");
                Ok(total)
            }
            Err(e) => {
                // The money is ours to give back; the draws never existed
                if !self.host.adjust_currency(actor, cost).await {
                    error!(actor = %actor, cost, "Refund after failed purchase was rejected");
                }
                Err(e)
            }
        }
    }

    /// First observation of an actor; a first-time actor's balance is set to the starting draws
    pub async fn on_actor_join(&self, actor: &ActorId, first_time: bool) -> PerkResult<PlayerProgress> {
        self.gateway.ensure_actor(actor).await?;
        if first_time {
            self.gateway
                .set_draws(actor, self.settings.starting_draws)
                .await?;
            info!(actor = %actor, draws = self.settings.starting_draws, "Starting draws set");
        }
        self.gateway.progress(actor).await
    }

    /// `(pity, threshold)` for display
    pub async fn pity_progress(&self, actor: &ActorId) -> PerkResult<(i64, i64)> {
        let pity = self.gateway.get_pity(actor).await?;
        Ok((pity, self.settings.pity.threshold))
    }
}
