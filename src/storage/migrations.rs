//! Database Migrations - PostgreSQL schema for the perk ledger

/// SQL migration for creating all tables
pub const MIGRATION_V1: &str = r#"
-- ============================================================================
-- Perk Ledger Schema v1
-- ============================================================================

-- ============================================================================
-- 1. Player progress
-- ============================================================================

CREATE TABLE IF NOT EXISTS players (
    actor_id        VARCHAR(64) PRIMARY KEY,
    draws           BIGINT NOT NULL DEFAULT 0 CHECK (draws >= 0),
    lifetime_draws  BIGINT NOT NULL DEFAULT 0 CHECK (lifetime_draws >= 0),
    pity_counter    BIGINT NOT NULL DEFAULT 0 CHECK (pity_counter >= 0),
    created_at      TIMESTAMP WITH TIME ZONE DEFAULT NOW(),
    updated_at      TIMESTAMP WITH TIME ZONE DEFAULT NOW()
);

-- ============================================================================
-- 2. Tool assignments (one row per tool identity)
-- ============================================================================

CREATE TABLE IF NOT EXISTS tool_assignments (
    tool_id         VARCHAR(128) PRIMARY KEY,
    owner_id        VARCHAR(64) NOT NULL,
    perk_id         VARCHAR(64) NOT NULL,
    level           INTEGER NOT NULL CHECK (level >= 1),
    created_at      TIMESTAMP WITH TIME ZONE DEFAULT NOW(),
    updated_at      TIMESTAMP WITH TIME ZONE DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_tool_assignments_owner ON tool_assignments(owner_id);

-- ============================================================================
-- 3. Draw history (append-only audit)
-- ============================================================================

CREATE TABLE IF NOT EXISTS draw_history (
    id              BIGSERIAL PRIMARY KEY,
    actor_id        VARCHAR(64) NOT NULL,
    perk_id         VARCHAR(64) NOT NULL,
    level           INTEGER NOT NULL,
    category        VARCHAR(64) NOT NULL,
    was_guaranteed  BOOLEAN NOT NULL DEFAULT FALSE,
    created_at      TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_draw_history_actor ON draw_history(actor_id, id DESC);
"#;

/// Get all migrations in order
pub fn get_migrations() -> Vec<(&'static str, &'static str)> {
    vec![("v1_perk_ledger", MIGRATION_V1)]
}
