//! Process-scoped context
//!
//! Owns every long-lived service and hands out shared references. Built once
//! at startup (`init` / `open`), reloaded in place (`reload_catalog`), and torn
//! down with `shutdown`, which waits for pending reveals to land.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::admin::PerkAdmin;
use crate::catalog::{CatalogError, CatalogSnapshot, TraitCatalog};
use crate::config::PerksConfig;
use crate::error::PerkResult;
use crate::host::HostIntegration;
use crate::item_state::ItemStateCodec;
use crate::lottery::PityPolicy;
use crate::orchestrator::{DelayedReveal, InstantReveal, OrchestratorSettings, RevealPresenter, RollOrchestrator};
use crate::reconcile::{ReconciliationService, ToolLocks};
use crate::storage::repository::{LedgerResult, LedgerStore};
use crate::storage::{self, PersistenceGateway};

/// Catalog shipped with the server, used when no catalog file is configured
pub const DEMO_CATALOG: &str = include_str!("../data/perks.json");

pub struct PerksContext {
    pub config: PerksConfig,
    pub catalog: Arc<TraitCatalog>,
    pub gateway: PersistenceGateway,
    pub codec: ItemStateCodec,
    pub reconciler: Arc<ReconciliationService>,
    pub orchestrator: Arc<RollOrchestrator>,
    pub admin: PerkAdmin,
}

impl PerksContext {
    /// Wire the services with the presenter implied by `reveal_delay_ms`
    pub fn init(
        config: PerksConfig,
        host: Arc<dyn HostIntegration>,
        store: Arc<dyn LedgerStore>,
        catalog: CatalogSnapshot,
    ) -> Self {
        let presenter: Arc<dyn RevealPresenter> = if config.reveal_delay_ms == 0 {
            Arc::new(InstantReveal)
        } else {
            Arc::new(DelayedReveal::new(Duration::from_millis(config.reveal_delay_ms)))
        };
        Self::init_with_presenter(config, host, store, catalog, presenter)
    }

    pub fn init_with_presenter(
        config: PerksConfig,
        host: Arc<dyn HostIntegration>,
        store: Arc<dyn LedgerStore>,
        catalog: CatalogSnapshot,
        presenter: Arc<dyn RevealPresenter>,
    ) -> Self {
        let catalog = Arc::new(TraitCatalog::new(catalog));
        let gateway = PersistenceGateway::new(store);
        let codec = ItemStateCodec::new();

        let locks = Arc::new(ToolLocks::new());

        let reconciler = Arc::new(ReconciliationService::new(
            codec,
            gateway.clone(),
            catalog.clone(),
            locks.clone(),
        ));
        let orchestrator = Arc::new(RollOrchestrator::new(
            host,
            catalog.clone(),
            gateway.clone(),
            codec,
            locks,
            presenter,
            OrchestratorSettings {
                pity: PityPolicy::new(config.pity_threshold),
                guaranteed_category: config.guaranteed_category.clone(),
                max_draws_per_sequence: config.max_draws_per_sequence,
                starting_draws: config.starting_draws,
            },
        ));
        let admin = PerkAdmin::new(codec, gateway.clone(), catalog.clone(), reconciler.clone());

        info!(
            backend = gateway.backend_name(),
            perks = catalog.snapshot().len(),
            pity_threshold = config.pity_threshold,
            "Perk context initialized"
        );

        Self {
            config,
            catalog,
            gateway,
            codec,
            reconciler,
            orchestrator,
            admin,
        }
    }

    /// Open the configured ledger and catalog, then wire the services
    pub async fn open(config: PerksConfig, host: Arc<dyn HostIntegration>) -> LedgerResult<Self> {
        let store = storage::open_ledger(&config.storage).await?;
        let catalog = match load_catalog(&config) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Configured catalog unusable, starting with an empty catalog");
                CatalogSnapshot::empty()
            }
        };
        Ok(Self::init(config, host, store, catalog))
    }

    pub fn reload_catalog(&self, json: &str) -> PerkResult<usize> {
        self.admin.reload_catalog(json)
    }

    /// Wait (bounded) for pending reveals, then release everything
    pub async fn shutdown(self) {
        let deadline = Duration::from_millis(self.config.reveal_delay_ms) + Duration::from_secs(1);
        let started = tokio::time::Instant::now();
        while self.orchestrator.rolls_in_flight() > 0 && started.elapsed() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        let abandoned = self.orchestrator.rolls_in_flight();
        if abandoned > 0 {
            warn!(abandoned, "Shutting down with reveals still pending");
        }
        info!("Perk context shut down");
    }
}

/// Catalog from `catalog_path`, or the built-in demo catalog
pub fn load_catalog(config: &PerksConfig) -> Result<CatalogSnapshot, CatalogError> {
    match &config.catalog_path {
        Some(path) => {
            let snapshot = CatalogSnapshot::from_file(path)?;
            info!(path = %path.display(), perks = snapshot.len(), "Catalog loaded");
            Ok(snapshot)
        }
        None => CatalogSnapshot::from_json(DEMO_CATALOG),
    }
}
