//! In-memory ledger for tests and local development
//!
//! Counts every successful write so tests can assert that an operation was a
//! no-op, and can be switched offline to simulate an unreachable store.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::repository::{
    DrawRecord, LedgerError, LedgerResult, LedgerStore, PlayerProgress, ToolAssignment,
};
use crate::host::ActorId;

#[derive(Default)]
struct MemoryState {
    players: HashMap<ActorId, PlayerProgress>,
    assignments: HashMap<String, ToolAssignment>,
    history: Vec<DrawRecord>,
}

#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<MemoryState>,
    offline: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with `LedgerError::Unavailable`
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Successful mutating calls so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn assignment_count(&self) -> usize {
        self.state.lock().assignments.len()
    }

    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    fn check(&self) -> LedgerResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("memory ledger is offline".into()));
        }
        Ok(())
    }

    fn write<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> LedgerResult<T> {
        self.check()?;
        let out = f(&mut *self.state.lock());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(out)
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ensure_actor(&self, actor: &ActorId) -> LedgerResult<()> {
        self.check()?;
        let mut state = self.state.lock();
        if !state.players.contains_key(actor) {
            state.players.insert(actor.clone(), PlayerProgress::default());
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn progress(&self, actor: &ActorId) -> LedgerResult<PlayerProgress> {
        self.ensure_actor(actor).await?;
        Ok(self.state.lock().players.get(actor).copied().unwrap_or_default())
    }

    async fn set_draws(&self, actor: &ActorId, value: i64) -> LedgerResult<()> {
        self.write(|s| {
            s.players.entry(actor.clone()).or_default().available_draws = value.max(0);
        })
    }

    async fn add_draws(&self, actor: &ActorId, delta: i64) -> LedgerResult<i64> {
        self.write(|s| {
            let p = s.players.entry(actor.clone()).or_default();
            p.available_draws = p.available_draws.saturating_add(delta).max(0);
            p.available_draws
        })
    }

    async fn increment_lifetime_draws(&self, actor: &ActorId, delta: i64) -> LedgerResult<i64> {
        self.write(|s| {
            let p = s.players.entry(actor.clone()).or_default();
            p.lifetime_draws = p.lifetime_draws.saturating_add(delta.max(0));
            p.lifetime_draws
        })
    }

    async fn set_pity(&self, actor: &ActorId, value: i64) -> LedgerResult<()> {
        self.write(|s| {
            s.players.entry(actor.clone()).or_default().pity_counter = value.max(0);
        })
    }

    async fn save_assignment(&self, assignment: &ToolAssignment) -> LedgerResult<()> {
        let assignment = assignment.clone().validate()?;
        self.write(|s| {
            s.assignments.insert(assignment.tool_id.clone(), assignment);
        })
    }

    async fn get_assignment(&self, tool_id: &str) -> LedgerResult<Option<ToolAssignment>> {
        self.check()?;
        Ok(self.state.lock().assignments.get(tool_id).cloned())
    }

    async fn remove_assignment(&self, tool_id: &str) -> LedgerResult<bool> {
        self.write(|s| s.assignments.remove(tool_id).is_some())
    }

    async fn record_draw(&self, record: &DrawRecord) -> LedgerResult<()> {
        self.write(|s| s.history.push(record.clone()))
    }

    async fn draw_history(&self, actor: &ActorId, limit: usize) -> LedgerResult<Vec<DrawRecord>> {
        self.check()?;
        Ok(self
            .state
            .lock()
            .history
            .iter()
            .rev()
            .filter(|r| &r.actor == actor)
            .take(limit)
            .cloned()
            .collect())
    }
}
