//! LMDB Ledger - embedded single-node backend
//!
//! Four named databases in one environment, values encoded as JSON:
//! - `players`: actor id → `PlayerProgress`
//! - `assignments`: tool id → `ToolAssignment`
//! - `history`: `actor \x1f seq` → `DrawRecord` (seq zero-padded so keys sort by time)
//! - `meta`: `history_seq` → next history sequence number (u64 BE)
//!
//! LMDB allows one writer at a time, so every counter delta is a
//! read-modify-write inside a single write transaction and cannot lose
//! updates. All transactions run on the blocking pool.

use async_trait::async_trait;
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::repository::{
    DrawRecord, LedgerError, LedgerResult, LedgerStore, PlayerProgress, ToolAssignment,
};
use crate::host::ActorId;

const HISTORY_SEQ_KEY: &str = "history_seq";
const HISTORY_SEPARATOR: char = '\u{1f}';

/// LMDB-backed ledger
#[derive(Clone)]
pub struct LmdbLedger {
    env: Arc<Env>,
    players: Database<Str, Bytes>,
    assignments: Database<Str, Bytes>,
    history: Database<Str, Bytes>,
    meta: Database<Str, Bytes>,
}

impl LmdbLedger {
    /// Open or create the ledger
    ///
    /// # Arguments
    /// * `path` - Directory for LMDB data files
    /// * `max_size` - Map size in bytes, a multiple of the OS page size
    pub fn new<P: AsRef<Path>>(path: P, max_size: usize) -> LedgerResult<Self> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size)
                .max_dbs(4)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let players = env.create_database::<Str, Bytes>(&mut wtxn, Some("players"))?;
        let assignments = env.create_database::<Str, Bytes>(&mut wtxn, Some("assignments"))?;
        let history = env.create_database::<Str, Bytes>(&mut wtxn, Some("history"))?;
        let meta = env.create_database::<Str, Bytes>(&mut wtxn, Some("meta"))?;
        wtxn.commit()?;

        info!("LMDB ledger opened ({}MB map)", max_size / (1024 * 1024));

        Ok(Self {
            env: Arc::new(env),
            players,
            assignments,
            history,
            meta,
        })
    }

    async fn blocking<T, F>(&self, op: F) -> LedgerResult<T>
    where
        F: FnOnce(&LmdbLedger) -> LedgerResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || op(&this))
            .await
            .map_err(|e| LedgerError::Unavailable(format!("LMDB worker failed: {}", e)))?
    }

    // ========================================================================
    // Synchronous primitives
    // ========================================================================

    fn update_progress<T>(
        &self,
        actor: &str,
        f: impl FnOnce(&mut PlayerProgress) -> T,
    ) -> LedgerResult<T> {
        let mut wtxn = self.env.write_txn()?;
        let mut progress: PlayerProgress = match self.players.get(&wtxn, actor)? {
            Some(bytes) => serde_json::from_slice(bytes)?,
            None => PlayerProgress::default(),
        };
        let out = f(&mut progress);
        let bytes = serde_json::to_vec(&progress)?;
        self.players.put(&mut wtxn, actor, &bytes)?;
        wtxn.commit()?;
        Ok(out)
    }

    fn ensure_actor_sync(&self, actor: &str) -> LedgerResult<()> {
        let mut wtxn = self.env.write_txn()?;
        if self.players.get(&wtxn, actor)?.is_none() {
            let bytes = serde_json::to_vec(&PlayerProgress::default())?;
            self.players.put(&mut wtxn, actor, &bytes)?;
            wtxn.commit()?;
        }
        Ok(())
    }

    fn read_progress(&self, actor: &str) -> LedgerResult<PlayerProgress> {
        {
            let rtxn = self.env.read_txn()?;
            if let Some(bytes) = self.players.get(&rtxn, actor)? {
                return Ok(serde_json::from_slice(bytes)?);
            }
        }
        self.ensure_actor_sync(actor)?;
        Ok(PlayerProgress::default())
    }

    fn get_assignment_sync(&self, tool_id: &str) -> LedgerResult<Option<ToolAssignment>> {
        let rtxn = self.env.read_txn()?;
        match self.assignments.get(&rtxn, tool_id)? {
            Some(bytes) => {
                let assignment: ToolAssignment = serde_json::from_slice(bytes)
                    .map_err(|e| LedgerError::InvalidFormat(format!("{}: {}", tool_id, e)))?;
                Ok(Some(assignment.validate()?))
            }
            None => Ok(None),
        }
    }

    fn append_history(&self, record: &DrawRecord) -> LedgerResult<()> {
        let mut wtxn = self.env.write_txn()?;
        let seq = match self.meta.get(&wtxn, HISTORY_SEQ_KEY)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| LedgerError::InvalidFormat("history sequence".into()))?;
                u64::from_be_bytes(raw)
            }
            None => 0,
        };
        let key = history_key(&record.actor, seq);
        let bytes = serde_json::to_vec(record)?;
        self.history.put(&mut wtxn, &key, &bytes)?;
        self.meta
            .put(&mut wtxn, HISTORY_SEQ_KEY, &(seq + 1).to_be_bytes())?;
        wtxn.commit()?;
        Ok(())
    }

    fn read_history(&self, actor: &ActorId, limit: usize) -> LedgerResult<Vec<DrawRecord>> {
        let rtxn = self.env.read_txn()?;
        let prefix = format!("{}{}", actor, HISTORY_SEPARATOR);
        let mut records = Vec::new();
        for entry in self.history.rev_prefix_iter(&rtxn, &prefix)?.take(limit) {
            let (_, bytes) = entry?;
            records.push(serde_json::from_slice(bytes)?);
        }
        Ok(records)
    }
}

fn history_key(actor: &ActorId, seq: u64) -> String {
    format!("{}{}{:020}", actor, HISTORY_SEPARATOR, seq)
}

#[async_trait]
impl LedgerStore for LmdbLedger {
    fn backend_name(&self) -> &'static str {
        "lmdb"
    }

    async fn ensure_actor(&self, actor: &ActorId) -> LedgerResult<()> {
        let actor = actor.to_string();
        self.blocking(move |db| db.ensure_actor_sync(&actor)).await
    }

    async fn progress(&self, actor: &ActorId) -> LedgerResult<PlayerProgress> {
        let actor = actor.to_string();
        self.blocking(move |db| db.read_progress(&actor)).await
    }

    async fn set_draws(&self, actor: &ActorId, value: i64) -> LedgerResult<()> {
        let actor = actor.to_string();
        self.blocking(move |db| db.update_progress(&actor, |p| p.available_draws = value.max(0)))
            .await
    }

    async fn add_draws(&self, actor: &ActorId, delta: i64) -> LedgerResult<i64> {
        let actor = actor.to_string();
        self.blocking(move |db| {
            db.update_progress(&actor, |p| {
                p.available_draws = p.available_draws.saturating_add(delta).max(0);
                p.available_draws
            })
        })
        .await
    }

    async fn increment_lifetime_draws(&self, actor: &ActorId, delta: i64) -> LedgerResult<i64> {
        let actor = actor.to_string();
        self.blocking(move |db| {
            db.update_progress(&actor, |p| {
                p.lifetime_draws = p.lifetime_draws.saturating_add(delta.max(0));
                p.lifetime_draws
            })
        })
        .await
    }

    async fn set_pity(&self, actor: &ActorId, value: i64) -> LedgerResult<()> {
        let actor = actor.to_string();
        self.blocking(move |db| db.update_progress(&actor, |p| p.pity_counter = value.max(0)))
            .await
    }

    async fn save_assignment(&self, assignment: &ToolAssignment) -> LedgerResult<()> {
        let assignment = assignment.clone().validate()?;
        self.blocking(move |db| {
            let bytes = serde_json::to_vec(&assignment)?;
            let mut wtxn = db.env.write_txn()?;
            db.assignments.put(&mut wtxn, &assignment.tool_id, &bytes)?;
            wtxn.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_assignment(&self, tool_id: &str) -> LedgerResult<Option<ToolAssignment>> {
        let tool_id = tool_id.to_string();
        self.blocking(move |db| db.get_assignment_sync(&tool_id)).await
    }

    async fn remove_assignment(&self, tool_id: &str) -> LedgerResult<bool> {
        let tool_id = tool_id.to_string();
        self.blocking(move |db| {
            let mut wtxn = db.env.write_txn()?;
            let existed = db.assignments.delete(&mut wtxn, &tool_id)?;
            wtxn.commit()?;
            Ok(existed)
        })
        .await
    }

    async fn record_draw(&self, record: &DrawRecord) -> LedgerResult<()> {
        let record = record.clone();
        self.blocking(move |db| db.append_history(&record)).await
    }

    async fn draw_history(&self, actor: &ActorId, limit: usize) -> LedgerResult<Vec<DrawRecord>> {
        let actor = actor.clone();
        self.blocking(move |db| db.read_history(&actor, limit)).await
    }
}
