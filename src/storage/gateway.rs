//! Persistence Gateway - the only path from game logic to the ledger
//!
//! Every operation is an `async fn`; the caller decides whether to await it
//! (durable writes on the critical path) or hand it to the runtime with one of
//! the `spawn_*` variants (history writes, display reads). Failures are logged
//! here once, with the operation name, and converted into [`PerkError`].

use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use super::repository::{
    AssignmentKey, DrawRecord, LedgerResult, LedgerStore, PlayerProgress, ToolAssignment,
};
use crate::error::{PerkError, PerkResult};
use crate::host::ActorId;

#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn LedgerStore>,
}

fn surface<T>(op: &'static str, result: LedgerResult<T>) -> PerkResult<T> {
    result.map_err(|e| {
        if e.is_unavailable() {
            error!(op, error = %e, "Ledger unavailable");
        } else {
            warn!(op, error = %e, "Ledger returned a malformed record");
        }
        PerkError::from(e)
    })
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    // ========================================================================
    // Player progress
    // ========================================================================

    pub async fn ensure_actor(&self, actor: &ActorId) -> PerkResult<()> {
        surface("ensure_actor", self.store.ensure_actor(actor).await)
    }

    pub async fn progress(&self, actor: &ActorId) -> PerkResult<PlayerProgress> {
        surface("progress", self.store.progress(actor).await)
    }

    pub async fn get_draws(&self, actor: &ActorId) -> PerkResult<i64> {
        Ok(self.progress(actor).await?.available_draws)
    }

    pub async fn set_draws(&self, actor: &ActorId, value: i64) -> PerkResult<()> {
        surface("set_draws", self.store.set_draws(actor, value).await)
    }

    pub async fn add_draws(&self, actor: &ActorId, delta: i64) -> PerkResult<i64> {
        surface("add_draws", self.store.add_draws(actor, delta).await)
    }

    pub async fn get_lifetime_draws(&self, actor: &ActorId) -> PerkResult<i64> {
        Ok(self.progress(actor).await?.lifetime_draws)
    }

    pub async fn increment_lifetime_draws(&self, actor: &ActorId, delta: i64) -> PerkResult<i64> {
        surface(
            "increment_lifetime_draws",
            self.store.increment_lifetime_draws(actor, delta).await,
        )
    }

    pub async fn get_pity(&self, actor: &ActorId) -> PerkResult<i64> {
        Ok(self.progress(actor).await?.pity_counter)
    }

    pub async fn set_pity(&self, actor: &ActorId, value: i64) -> PerkResult<()> {
        surface("set_pity", self.store.set_pity(actor, value).await)
    }

    // ========================================================================
    // Tool assignments
    // ========================================================================

    pub async fn save_assignment(
        &self,
        tool_id: &str,
        owner: &ActorId,
        key: &AssignmentKey,
    ) -> PerkResult<()> {
        let assignment = ToolAssignment::new(tool_id, owner.clone(), key);
        surface("save_assignment", self.store.save_assignment(&assignment).await)
    }

    pub async fn get_assignment(&self, tool_id: &str) -> PerkResult<Option<ToolAssignment>> {
        surface("get_assignment", self.store.get_assignment(tool_id).await)
    }

    pub async fn remove_assignment(&self, tool_id: &str) -> PerkResult<bool> {
        surface("remove_assignment", self.store.remove_assignment(tool_id).await)
    }

    // ========================================================================
    // History
    // ========================================================================

    pub async fn record_draw_history(
        &self,
        actor: &ActorId,
        key: &AssignmentKey,
        category: &str,
        was_guaranteed: bool,
    ) -> PerkResult<()> {
        let record = DrawRecord {
            actor: actor.clone(),
            perk_id: key.perk_id.clone(),
            level: key.level,
            category: category.to_string(),
            was_guaranteed,
            timestamp: Utc::now(),
        };
        surface("record_draw_history", self.store.record_draw(&record).await)
    }

    pub async fn draw_history(&self, actor: &ActorId, limit: usize) -> PerkResult<Vec<DrawRecord>> {
        surface("draw_history", self.store.draw_history(actor, limit).await)
    }

    // ========================================================================
    // Fire-and-forget variants
    // ========================================================================

    /// History write off the critical path; the handle may be dropped
    pub fn spawn_record_draw_history(
        &self,
        actor: ActorId,
        key: AssignmentKey,
        category: String,
        was_guaranteed: bool,
    ) -> JoinHandle<PerkResult<()>> {
        let gateway = self.clone();
        tokio::spawn(async move {
            gateway
                .record_draw_history(&actor, &key, &category, was_guaranteed)
                .await
        })
    }

    /// Progress read for display (menus, scoreboards)
    pub fn spawn_progress(&self, actor: ActorId) -> JoinHandle<PerkResult<PlayerProgress>> {
        let gateway = self.clone();
        tokio::spawn(async move { gateway.progress(&actor).await })
    }
}
