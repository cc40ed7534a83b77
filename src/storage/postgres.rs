//! PostgreSQL Ledger - production backend
//!
//! Uses `sqlx` with a pooled connection. Counter deltas are single
//! `INSERT ... ON CONFLICT DO UPDATE SET x = players.x + $n` statements so the
//! row lock serialises concurrent sequences for the same actor, and assignment
//! upserts rely on the `tool_id` primary key.
//!
//! ## Tables
//! - players, tool_assignments, draw_history

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info};

use super::migrations;
use super::repository::{
    DrawRecord, LedgerError, LedgerResult, LedgerStore, PlayerProgress, ToolAssignment,
};
use crate::host::ActorId;

/// PostgreSQL connection pool wrapper
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct ProgressRow {
    draws: i64,
    lifetime_draws: i64,
    pity_counter: i64,
}

#[derive(Debug, FromRow)]
struct AssignmentRow {
    tool_id: String,
    owner_id: String,
    perk_id: String,
    level: i32,
}

#[derive(Debug, FromRow)]
struct HistoryRow {
    actor_id: String,
    perk_id: String,
    level: i32,
    category: String,
    was_guaranteed: bool,
    created_at: DateTime<Utc>,
}

impl PostgresLedger {
    /// Connect to PostgreSQL and run migrations
    pub async fn new(database_url: &str, max_connections: u32) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("PostgreSQL connected (max_connections={})", max_connections);

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Wrap an existing pool (shared with the host server)
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run all pending migrations
    pub async fn run_migrations(&self) -> LedgerResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS _migrations (
                name VARCHAR(100) PRIMARY KEY,
                applied_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )",
        )
        .execute(&self.pool)
        .await?;

        for (name, sql) in migrations::get_migrations() {
            let applied: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM _migrations WHERE name = $1)")
                    .bind(name)
                    .fetch_one(&self.pool)
                    .await?;

            if !applied {
                info!("Running migration: {}", name);
                sqlx::raw_sql(sql)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| LedgerError::Migration(format!("{}: {}", name, e)))?;

                sqlx::query("INSERT INTO _migrations (name) VALUES ($1)")
                    .bind(name)
                    .execute(&self.pool)
                    .await?;

                info!("Migration applied: {}", name);
            } else {
                debug!("Migration already applied: {}", name);
            }
        }

        Ok(())
    }
}

fn level_from_row(tool_or_actor: &str, level: i32) -> LedgerResult<u32> {
    u32::try_from(level)
        .ok()
        .filter(|l| *l >= 1)
        .ok_or_else(|| LedgerError::InvalidFormat(format!("{} has level {}", tool_or_actor, level)))
}

#[async_trait]
impl LedgerStore for PostgresLedger {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    // ========================================================================
    // Player progress
    // ========================================================================

    async fn ensure_actor(&self, actor: &ActorId) -> LedgerResult<()> {
        sqlx::query("INSERT INTO players (actor_id) VALUES ($1) ON CONFLICT (actor_id) DO NOTHING")
            .bind(actor.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn progress(&self, actor: &ActorId) -> LedgerResult<PlayerProgress> {
        self.ensure_actor(actor).await?;
        let row: ProgressRow = sqlx::query_as(
            "SELECT draws, lifetime_draws, pity_counter FROM players WHERE actor_id = $1",
        )
        .bind(actor.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(PlayerProgress {
            available_draws: row.draws,
            lifetime_draws: row.lifetime_draws,
            pity_counter: row.pity_counter,
        })
    }

    async fn set_draws(&self, actor: &ActorId, value: i64) -> LedgerResult<()> {
        sqlx::query(
            "INSERT INTO players (actor_id, draws) VALUES ($1, $2)
             ON CONFLICT (actor_id) DO UPDATE SET draws = EXCLUDED.draws, updated_at = NOW()",
        )
        .bind(actor.as_str())
        .bind(value.max(0))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_draws(&self, actor: &ActorId, delta: i64) -> LedgerResult<i64> {
        let draws: i64 = sqlx::query_scalar(
            "INSERT INTO players (actor_id, draws) VALUES ($1, GREATEST($2, 0))
             ON CONFLICT (actor_id) DO UPDATE
                SET draws = GREATEST(players.draws + $2, 0), updated_at = NOW()
             RETURNING draws",
        )
        .bind(actor.as_str())
        .bind(delta)
        .fetch_one(&self.pool)
        .await?;
        Ok(draws)
    }

    async fn increment_lifetime_draws(&self, actor: &ActorId, delta: i64) -> LedgerResult<i64> {
        let lifetime: i64 = sqlx::query_scalar(
            "INSERT INTO players (actor_id, lifetime_draws) VALUES ($1, $2)
             ON CONFLICT (actor_id) DO UPDATE
                SET lifetime_draws = players.lifetime_draws + $2, updated_at = NOW()
             RETURNING lifetime_draws",
        )
        .bind(actor.as_str())
        .bind(delta.max(0))
        .fetch_one(&self.pool)
        .await?;
        Ok(lifetime)
    }

    async fn set_pity(&self, actor: &ActorId, value: i64) -> LedgerResult<()> {
        sqlx::query(
            "INSERT INTO players (actor_id, pity_counter) VALUES ($1, $2)
             ON CONFLICT (actor_id) DO UPDATE SET pity_counter = EXCLUDED.pity_counter, updated_at = NOW()",
        )
        .bind(actor.as_str())
        .bind(value.max(0))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ========================================================================
    // Tool assignments
    // ========================================================================

    async fn save_assignment(&self, assignment: &ToolAssignment) -> LedgerResult<()> {
        let assignment = assignment.clone().validate()?;
        let level = i32::try_from(assignment.level)
            .map_err(|_| LedgerError::InvalidFormat(format!("level {} too large", assignment.level)))?;

        sqlx::query(
            "INSERT INTO tool_assignments (tool_id, owner_id, perk_id, level)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (tool_id) DO UPDATE SET
                owner_id = EXCLUDED.owner_id,
                perk_id = EXCLUDED.perk_id,
                level = EXCLUDED.level,
                updated_at = NOW()",
        )
        .bind(&assignment.tool_id)
        .bind(assignment.owner.as_str())
        .bind(&assignment.perk_id)
        .bind(level)
        .execute(&self.pool)
        .await?;

        debug!(tool = %assignment.tool_id, perk = %assignment.perk_id, perk_level = level, "Assignment upserted");
        Ok(())
    }

    async fn get_assignment(&self, tool_id: &str) -> LedgerResult<Option<ToolAssignment>> {
        let row: Option<AssignmentRow> = sqlx::query_as(
            "SELECT tool_id, owner_id, perk_id, level FROM tool_assignments WHERE tool_id = $1",
        )
        .bind(tool_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let level = level_from_row(&row.tool_id, row.level)?;
                let assignment = ToolAssignment {
                    tool_id: row.tool_id,
                    owner: ActorId::new(row.owner_id),
                    perk_id: row.perk_id,
                    level,
                };
                Ok(Some(assignment.validate()?))
            }
            None => Ok(None),
        }
    }

    async fn remove_assignment(&self, tool_id: &str) -> LedgerResult<bool> {
        let result = sqlx::query("DELETE FROM tool_assignments WHERE tool_id = $1")
            .bind(tool_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Draw history
    // ========================================================================

    async fn record_draw(&self, record: &DrawRecord) -> LedgerResult<()> {
        sqlx::query(
            "INSERT INTO draw_history (actor_id, perk_id, level, category, was_guaranteed, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(record.actor.as_str())
        .bind(&record.perk_id)
        .bind(i32::try_from(record.level).unwrap_or(i32::MAX))
        .bind(&record.category)
        .bind(record.was_guaranteed)
        .bind(record.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn draw_history(&self, actor: &ActorId, limit: usize) -> LedgerResult<Vec<DrawRecord>> {
        let rows: Vec<HistoryRow> = sqlx::query_as(
            "SELECT actor_id, perk_id, level, category, was_guaranteed, created_at
             FROM draw_history WHERE actor_id = $1 ORDER BY id DESC LIMIT $2",
        )
        .bind(actor.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(DrawRecord {
                    level: level_from_row(&row.actor_id, row.level)?,
                    actor: ActorId::new(row.actor_id),
                    perk_id: row.perk_id,
                    category: row.category,
                    was_guaranteed: row.was_guaranteed,
                    timestamp: row.created_at,
                })
            })
            .collect()
    }
}
