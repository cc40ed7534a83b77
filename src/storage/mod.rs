//! Storage Layer - durable ledger behind the Persistence Gateway
//!
//! Implements the Repository pattern with three interchangeable backends:
//! - **PostgreSQL**: production ledger, shared with the host server
//! - **LMDB**: embedded single-node ledger
//! - **Memory**: tests and local development
//!
//! ## Architecture
//! ```text
//! [Orchestrator / Reconciler / Admin]
//!                ↓
//!       [PersistenceGateway]   (await or spawn, logs failures)
//!                ↓
//!        [LedgerStore trait]
//!                ↓
//! ┌──────────────┬─────────────┬──────────────┐
//! │PostgresLedger│ LmdbLedger  │ MemoryLedger │
//! └──────────────┴─────────────┴──────────────┘
//! ```

pub mod gateway;
pub mod lmdb;
pub mod memory;
pub mod migrations;
pub mod postgres;
pub mod repository;

use std::sync::Arc;
use tracing::info;

use self::lmdb::LmdbLedger;
use self::memory::MemoryLedger;
use self::postgres::PostgresLedger;
use self::repository::{LedgerResult, LedgerStore};
use crate::config::{StorageBackend, StorageConfig};

pub use self::gateway::PersistenceGateway;

/// Build the configured ledger backend
pub async fn open_ledger(config: &StorageConfig) -> LedgerResult<Arc<dyn LedgerStore>> {
    let store: Arc<dyn LedgerStore> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryLedger::new()),
        StorageBackend::Lmdb => Arc::new(LmdbLedger::new(&config.lmdb_path, config.lmdb_max_size)?),
        StorageBackend::Postgres => Arc::new(
            PostgresLedger::new(&config.postgres_url, config.pg_max_connections).await?,
        ),
    };
    info!(backend = store.backend_name(), "Ledger opened");
    Ok(store)
}
