//! Reconciliation Service - converges embedded state and the ledger
//!
//! Runs whenever a tool is observed (equipped, opened in a menu, ...). The two
//! sides are read through their ports, [`decide`] picks the action, and any
//! ledger write is awaited before the pass returns.
//!
//! ```text
//! embedded │ ledger          │ action
//! ─────────┼─────────────────┼──────────────────────────────────────
//! absent   │ absent          │ nothing
//! present  │ absent          │ ledger := embedded
//! present  │ equal           │ nothing
//! present  │ differs         │ ledger := embedded, conflict logged
//! absent   │ present         │ embedded := ledger (re-apply perk)
//! ```

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::TraitCatalog;
use crate::error::{PerkError, PerkResult};
use crate::host::ActorId;
use crate::item_state::{ItemStateCodec, SharedTool};
use crate::storage::repository::AssignmentKey;
use crate::storage::PersistenceGateway;

/// Why a pass left both sides untouched although they differ
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The ledger names a perk the current catalog no longer has
    UnknownPerk(String),
}

/// Branch taken by one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    NoAssignment,
    Converged,
    LedgerRebuilt,
    ConflictResolved { previous: AssignmentKey },
    EmbeddedRestored,
    Skipped(SkipReason),
}

/// Pure decision over the two observed sides
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Nothing,
    WriteLedger { conflict_with: Option<AssignmentKey> },
    RestoreEmbedded(AssignmentKey),
}

pub fn decide(embedded: Option<&AssignmentKey>, ledger: Option<&AssignmentKey>) -> Decision {
    match (embedded, ledger) {
        (None, None) => Decision::Nothing,
        (Some(_), None) => Decision::WriteLedger { conflict_with: None },
        (Some(e), Some(l)) if e == l => Decision::Nothing,
        (Some(_), Some(l)) => Decision::WriteLedger {
            conflict_with: Some(l.clone()),
        },
        (None, Some(l)) => Decision::RestoreEmbedded(l.clone()),
    }
}

/// Per-tool async locks shared by every writer of a tool's perk
///
/// A reconciliation pass and a draw apply on the same tool identity never
/// interleave. Entries are pruned once nobody holds or waits on them.
#[derive(Default)]
pub struct ToolLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ToolLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `tool_id`
    pub async fn lock(&self, tool_id: &str) -> ToolLockGuard<'_> {
        let entry = self
            .locks
            .lock()
            .entry(tool_id.to_string())
            .or_default()
            .clone();
        let held = entry.lock_owned().await;
        ToolLockGuard {
            registry: self,
            tool_id: tool_id.to_string(),
            held: Some(held),
        }
    }

    /// Tools with a live entry
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, tool_id: &str) {
        let mut locks = self.locks.lock();
        // Only the map holds it once no pass is waiting
        if locks.get(tool_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(tool_id);
        }
    }
}

pub struct ToolLockGuard<'a> {
    registry: &'a ToolLocks,
    tool_id: String,
    held: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for ToolLockGuard<'_> {
    fn drop(&mut self) {
        self.held.take();
        self.registry.release(&self.tool_id);
    }
}

pub struct ReconciliationService {
    codec: ItemStateCodec,
    gateway: PersistenceGateway,
    catalog: Arc<TraitCatalog>,
    locks: Arc<ToolLocks>,
}

impl ReconciliationService {
    pub fn new(
        codec: ItemStateCodec,
        gateway: PersistenceGateway,
        catalog: Arc<TraitCatalog>,
        locks: Arc<ToolLocks>,
    ) -> Self {
        Self {
            codec,
            gateway,
            catalog,
            locks,
        }
    }

    /// Lock registry shared with the other writers of embedded state
    pub fn locks(&self) -> &Arc<ToolLocks> {
        &self.locks
    }

    fn read_embedded(&self, tool_id: &str, tool: &SharedTool) -> Option<AssignmentKey> {
        match self.codec.read(&tool.lock()) {
            Ok(key) => key,
            Err(e) => {
                warn!(tool = %tool_id, error = %e, "Embedded perk unreadable, treating as absent");
                None
            }
        }
    }

    async fn read_ledger(&self, tool_id: &str) -> PerkResult<Option<AssignmentKey>> {
        match self.gateway.get_assignment(tool_id).await {
            Ok(row) => Ok(row.map(|a| a.key())),
            Err(PerkError::InvalidPersistedFormat(msg)) => {
                warn!(tool = %tool_id, error = %msg, "Ledger row unreadable, treating as absent");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Observe a tool and converge both sides
    pub async fn reconcile(&self, owner: &ActorId, tool: &SharedTool) -> PerkResult<ReconcileOutcome> {
        let tool_id = self.codec.identity(&mut tool.lock());
        let _held = self.locks.lock(&tool_id).await;
        self.reconcile_locked(owner, &tool_id, tool).await
    }

    async fn reconcile_locked(
        &self,
        owner: &ActorId,
        tool_id: &str,
        tool: &SharedTool,
    ) -> PerkResult<ReconcileOutcome> {
        let embedded = self.read_embedded(tool_id, tool);
        let ledger = self.read_ledger(tool_id).await?;

        match decide(embedded.as_ref(), ledger.as_ref()) {
            Decision::Nothing if embedded.is_none() => Ok(ReconcileOutcome::NoAssignment),
            Decision::Nothing => {
                debug!(tool = %tool_id, "Tool already converged");
                Ok(ReconcileOutcome::Converged)
            }
            Decision::WriteLedger { conflict_with } => {
                let Some(key) = embedded else {
                    return Ok(ReconcileOutcome::NoAssignment);
                };
                if let Some(previous) = &conflict_with {
                    warn!(
                        tool = %tool_id,
                        embedded = %key,
                        ledger = %previous,
                        "ConflictDetected: embedded perk wins over ledger"
                    );
                }
                self.gateway.save_assignment(tool_id, owner, &key).await?;
                match conflict_with {
                    Some(previous) => Ok(ReconcileOutcome::ConflictResolved { previous }),
                    None => {
                        info!(tool = %tool_id, perk = %key, "Ledger rebuilt from embedded perk");
                        Ok(ReconcileOutcome::LedgerRebuilt)
                    }
                }
            }
            Decision::RestoreEmbedded(key) => {
                let snapshot = self.catalog.snapshot();
                let Some(perk) = snapshot.get(&key.perk_id) else {
                    warn!(tool = %tool_id, perk = %key, "Ledger perk not in catalog, skipping restore");
                    return Ok(ReconcileOutcome::Skipped(SkipReason::UnknownPerk(key.perk_id)));
                };
                self.codec.apply(&mut tool.lock(), perk, key.level);
                info!(tool = %tool_id, perk = %key, "Embedded perk restored from ledger");
                Ok(ReconcileOutcome::EmbeddedRestored)
            }
        }
    }

    /// Rewrite the ledger from the tool and refresh the embedded perk, whatever the ledger says
    pub async fn force_reconcile(&self, owner: &ActorId, tool: &SharedTool) -> PerkResult<ReconcileOutcome> {
        let tool_id = self.codec.identity(&mut tool.lock());
        let _held = self.locks.lock(&tool_id).await;
        self.force_locked(owner, &tool_id, tool).await
    }

    async fn force_locked(
        &self,
        owner: &ActorId,
        tool_id: &str,
        tool: &SharedTool,
    ) -> PerkResult<ReconcileOutcome> {
        let key = self.codec.read(&tool.lock())?.ok_or(PerkError::NoPerkOnTool)?;
        let snapshot = self.catalog.snapshot();
        let perk = snapshot
            .get(&key.perk_id)
            .ok_or_else(|| PerkError::UnknownPerk(key.perk_id.clone()))?;

        // Previous ledger state is informational only
        let previous = self.read_ledger(tool_id).await.ok().flatten();

        self.gateway.save_assignment(tool_id, owner, &key).await?;
        self.codec.apply(&mut tool.lock(), perk, key.level);
        info!(tool = %tool_id, perk = %key, "Forced reconcile");

        Ok(match previous {
            Some(prev) if prev != key => ReconcileOutcome::ConflictResolved { previous: prev },
            Some(_) => ReconcileOutcome::Converged,
            None => ReconcileOutcome::LedgerRebuilt,
        })
    }
}
