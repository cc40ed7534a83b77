//! Ledger repository trait - abstraction over the durable store
//!
//! Every backend (PostgreSQL, LMDB, in-memory) implements [`LedgerStore`], so
//! the gateway and the services above it never name a concrete database.
//! Counter deltas are atomic inside each backend; callers never read-modify-write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::host::ActorId;

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Error type for ledger backends
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("LMDB error: {0}")]
    Heed(#[from] heed::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid persisted record: {0}")]
    InvalidFormat(String),
}

impl LedgerError {
    /// Whether the failure is about reaching the store rather than the data in it
    pub fn is_unavailable(&self) -> bool {
        !matches!(
            self,
            LedgerError::InvalidFormat(_) | LedgerError::Serialization(_)
        )
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}

// ============================================================================
// Records
// ============================================================================

/// Per-actor counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProgress {
    pub available_draws: i64,
    pub lifetime_draws: i64,
    pub pity_counter: i64,
}

/// `(perk_id, level)` pair, rendered in the compact `perk_id:level` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssignmentKey {
    pub perk_id: String,
    pub level: u32,
}

impl AssignmentKey {
    pub fn new(perk_id: impl Into<String>, level: u32) -> Self {
        Self {
            perk_id: perk_id.into(),
            level,
        }
    }

    /// Parse `perk_id:level`; the id must be non-empty and the level positive
    pub fn parse(raw: &str) -> LedgerResult<Self> {
        let (perk_id, level) = raw
            .rsplit_once(':')
            .ok_or_else(|| LedgerError::InvalidFormat(format!("missing ':' in '{}'", raw)))?;
        let perk_id = perk_id.trim();
        if perk_id.is_empty() {
            return Err(LedgerError::InvalidFormat(format!("empty perk id in '{}'", raw)));
        }
        let level: u32 = level
            .trim()
            .parse()
            .ok()
            .filter(|l| *l >= 1)
            .ok_or_else(|| LedgerError::InvalidFormat(format!("bad level in '{}'", raw)))?;
        Ok(Self::new(perk_id, level))
    }
}

impl fmt::Display for AssignmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.perk_id, self.level)
    }
}

impl FromStr for AssignmentKey {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Ledger row: the perk currently held by one tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolAssignment {
    pub tool_id: String,
    pub owner: ActorId,
    pub perk_id: String,
    pub level: u32,
}

impl ToolAssignment {
    pub fn new(tool_id: impl Into<String>, owner: ActorId, key: &AssignmentKey) -> Self {
        Self {
            tool_id: tool_id.into(),
            owner,
            perk_id: key.perk_id.clone(),
            level: key.level,
        }
    }

    pub fn key(&self) -> AssignmentKey {
        AssignmentKey::new(self.perk_id.clone(), self.level)
    }

    pub(crate) fn validate(self) -> LedgerResult<Self> {
        if self.perk_id.trim().is_empty() || self.level == 0 {
            return Err(LedgerError::InvalidFormat(format!(
                "assignment for {} is '{}:{}'",
                self.tool_id, self.perk_id, self.level
            )));
        }
        Ok(self)
    }
}

/// Append-only audit entry for one applied draw
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawRecord {
    pub actor: ActorId,
    pub perk_id: String,
    pub level: u32,
    pub category: String,
    pub was_guaranteed: bool,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Repository trait
// ============================================================================

/// Durable store for player counters, tool assignments and draw history.
///
/// Every counter method creates the actor row with zeroed counters when it is
/// missing. `add_draws` and `increment_lifetime_draws` are store-level atomic
/// increments and return the new value. Draw balances never go below zero.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn ensure_actor(&self, actor: &ActorId) -> LedgerResult<()>;
    async fn progress(&self, actor: &ActorId) -> LedgerResult<PlayerProgress>;
    async fn set_draws(&self, actor: &ActorId, value: i64) -> LedgerResult<()>;
    async fn add_draws(&self, actor: &ActorId, delta: i64) -> LedgerResult<i64>;
    async fn increment_lifetime_draws(&self, actor: &ActorId, delta: i64) -> LedgerResult<i64>;
    async fn set_pity(&self, actor: &ActorId, value: i64) -> LedgerResult<()>;

    /// Insert or overwrite the row keyed by `tool_id`
    async fn save_assignment(&self, assignment: &ToolAssignment) -> LedgerResult<()>;
    async fn get_assignment(&self, tool_id: &str) -> LedgerResult<Option<ToolAssignment>>;
    /// Returns whether a row existed
    async fn remove_assignment(&self, tool_id: &str) -> LedgerResult<bool>;

    async fn record_draw(&self, record: &DrawRecord) -> LedgerResult<()>;
    /// Most recent entries first
    async fn draw_history(&self, actor: &ActorId, limit: usize) -> LedgerResult<Vec<DrawRecord>>;
}
