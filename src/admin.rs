//! Operator commands
//!
//! Thin wrappers over the gateway, the reconciler and the catalog. Command
//! parsing and permission checks belong to the host.

use std::sync::Arc;
use tracing::{info, warn};

use crate::catalog::TraitCatalog;
use crate::error::{PerkError, PerkResult};
use crate::host::ActorId;
use crate::item_state::{ItemStateCodec, SharedTool};
use crate::reconcile::{ReconcileOutcome, ReconciliationService};
use crate::storage::repository::{AssignmentKey, DrawRecord};
use crate::storage::PersistenceGateway;

/// Identity change performed by [`PerkAdmin::regenerate_identity`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegeneratedIdentity {
    pub previous: String,
    pub current: String,
    /// Assignment carried over to the new identity
    pub carried: Option<AssignmentKey>,
}

pub struct PerkAdmin {
    codec: ItemStateCodec,
    gateway: PersistenceGateway,
    catalog: Arc<TraitCatalog>,
    reconciler: Arc<ReconciliationService>,
}

impl PerkAdmin {
    pub fn new(
        codec: ItemStateCodec,
        gateway: PersistenceGateway,
        catalog: Arc<TraitCatalog>,
        reconciler: Arc<ReconciliationService>,
    ) -> Self {
        Self {
            codec,
            gateway,
            catalog,
            reconciler,
        }
    }

    pub async fn grant_draws(&self, actor: &ActorId, amount: i64) -> PerkResult<i64> {
        if amount == 0 {
            return Err(PerkError::InvalidAmount("grant of 0 draws".into()));
        }
        let total = self.gateway.add_draws(actor, amount).await?;
        info!(actor = %actor, amount, total, "Admin granted draws");
        Ok(total)
    }

    pub async fn set_draws(&self, actor: &ActorId, value: i64) -> PerkResult<()> {
        if value < 0 {
            return Err(PerkError::InvalidAmount(format!("draw balance {}", value)));
        }
        self.gateway.set_draws(actor, value).await?;
        info!(actor = %actor, value, "Admin set draws");
        Ok(())
    }

    pub async fn reset_pity(&self, actor: &ActorId) -> PerkResult<()> {
        self.gateway.set_pity(actor, 0).await?;
        info!(actor = %actor, "Admin reset pity");
        Ok(())
    }

    pub async fn force_reconcile(&self, owner: &ActorId, tool: &SharedTool) -> PerkResult<ReconcileOutcome> {
        self.reconciler.force_reconcile(owner, tool).await
    }

    /// Drop the tool's generated identity and re-file its perk under a fresh one.
    /// The old ledger row is left in place for audit.
    pub async fn regenerate_identity(&self, owner: &ActorId, tool: &SharedTool) -> PerkResult<RegeneratedIdentity> {
        let (previous, embedded) = {
            let mut item = tool.lock();
            let previous = self.codec.identity(&mut item);
            let embedded = self.codec.read(&item).unwrap_or_else(|e| {
                warn!(tool = %previous, error = %e, "Embedded perk unreadable during regeneration");
                None
            });
            (previous, embedded)
        };

        let carried = match embedded {
            Some(key) => Some(key),
            None => self.gateway.get_assignment(&previous).await?.map(|a| a.key()),
        };

        let current = {
            let mut item = tool.lock();
            self.codec.clear_identity(&mut item);
            self.codec.identity(&mut item)
        };
        if current == previous {
            warn!(tool = %current, "Tool identity is owned by the host and was not regenerated");
        }

        if let Some(key) = &carried {
            self.gateway.save_assignment(&current, owner, key).await?;
            let snapshot = self.catalog.snapshot();
            match snapshot.get(&key.perk_id) {
                Some(perk) => self.codec.apply(&mut tool.lock(), perk, key.level),
                None => warn!(tool = %current, perk = %key, "Carried perk not in catalog, embedded state untouched"),
            }
        }

        info!(previous = %previous, current = %current, "Tool identity regenerated");
        Ok(RegeneratedIdentity {
            previous,
            current,
            carried,
        })
    }

    /// Strip the perk from the tool and delete its ledger row
    pub async fn remove_perk(&self, tool: &SharedTool) -> PerkResult<bool> {
        let tool_id = self.codec.identity(&mut tool.lock());
        let _held = self.reconciler.locks().lock(&tool_id).await;

        let had_embedded = self.codec.remove(&mut tool.lock());
        let had_row = self.gateway.remove_assignment(&tool_id).await?;
        info!(tool = %tool_id, had_embedded, had_row, "Perk removed");
        Ok(had_embedded || had_row)
    }

    pub fn reload_catalog(&self, json: &str) -> PerkResult<usize> {
        Ok(self.catalog.reload_from_json(json)?)
    }

    pub async fn history(&self, actor: &ActorId, limit: usize) -> PerkResult<Vec<DrawRecord>> {
        self.gateway.draw_history(actor, limit).await
    }
}
