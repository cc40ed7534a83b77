//! Tool Perks Library
//!
//! Core modules for the tool perk server:
//! - Weighted perk lottery with a pity guarantee
//! - Trait catalog with atomic reload
//! - Perk state embedded on tools, mirrored in a durable ledger
//! - Reconciliation between the two mirrors
//! - Roll-sequence orchestration and operator commands

pub mod admin;  // Operator commands (grant, reset, regenerate, reload)
pub mod catalog;  // Perk/category snapshot + atomic publication
pub mod config;  // Env/JSON configuration
pub mod context;  // Process-scoped service wiring
pub mod error;
pub mod host;  // Host capability surface (managed tools, currency)
pub mod item_state;  // Embedded perk attributes + tool identity
pub mod logging;
pub mod lottery;  // Weighted draws + pity policy
pub mod orchestrator;  // Roll sequences, reveal presenters
pub mod reconcile;  // Embedded vs ledger convergence
pub mod storage;  // Ledger backends (PostgreSQL, LMDB, memory)

// Re-export commonly used types
pub use catalog::{CatalogSnapshot, TraitCatalog};
pub use context::PerksContext;
pub use error::{PerkError, PerkResult};
pub use host::{ActorId, HostIntegration, LocalHost};
pub use item_state::{shared_tool, ItemStateCodec, SharedTool, ToolItem};
pub use reconcile::ReconcileOutcome;
pub use storage::PersistenceGateway;
