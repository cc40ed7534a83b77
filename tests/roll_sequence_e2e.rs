//! Roll Sequence End-to-End Tests
//!
//! Drives `RollOrchestrator` against the memory ledger and a local host:
//! validation, pity, partial failures inside the loop and the reveal guard.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tool_perks::catalog::{CatalogSnapshot, TraitCatalog};
use tool_perks::lottery::{Lottery, PityPolicy};
use tool_perks::orchestrator::{
    DelayedReveal, InstantReveal, OrchestratorSettings, RevealPresenter, RollOrchestrator,
};
use tool_perks::reconcile::{ReconcileOutcome, ReconciliationService, ToolLocks};
use tool_perks::storage::memory::MemoryLedger;
use tool_perks::storage::repository::{
    DrawRecord, LedgerError, LedgerResult, LedgerStore, PlayerProgress, ToolAssignment,
};
use tool_perks::{shared_tool, ActorId, ItemStateCodec, LocalHost, PerkError, PersistenceGateway, ToolItem};

const CATALOG: &str = r#"{
    "perks": [
        { "id": "harvester", "category": "verde", "weight": 5, "levels": {
            "1": { "boost-type": "crops", "boost-amount": 1.1 },
            "2": { "boost-type": "crops", "boost-amount": 1.2 } } },
        { "id": "greed", "category": "roja", "weight": 3, "levels": {
            "1": { "boost-type": "money", "boost-amount": 1.2 } } },
        { "id": "fertility", "category": "morada", "weight": 1, "levels": {
            "1": { "boost-type": "crops", "boost-amount": 1.5 },
            "2": { "boost-type": "crops", "boost-amount": 2.0 } } },
        { "id": "season_pass", "category": "morada", "weight": 1, "levels": {
            "1": { "boost-type": "crops,money", "boost-amount": "1.3,1.3" } } }
    ]
}"#;

/// Memory ledger with injected faults: the N-th `save_assignment` fails
/// (0 = never), `progress` fails from a given read on, assignment reads are slow
struct FlakyLedger {
    inner: MemoryLedger,
    fail_on_save: usize,
    saves: AtomicUsize,
    fail_progress_from: usize,
    progress_reads: AtomicUsize,
    read_delay: Duration,
}

impl FlakyLedger {
    fn new(fail_on_save: usize) -> Self {
        Self {
            inner: MemoryLedger::new(),
            fail_on_save,
            saves: AtomicUsize::new(0),
            fail_progress_from: 0,
            progress_reads: AtomicUsize::new(0),
            read_delay: Duration::ZERO,
        }
    }

    fn failing_progress_from(mut self, read: usize) -> Self {
        self.fail_progress_from = read;
        self
    }

    fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }
}

#[async_trait]
impl LedgerStore for FlakyLedger {
    fn backend_name(&self) -> &'static str {
        "flaky"
    }
    async fn ensure_actor(&self, actor: &ActorId) -> LedgerResult<()> {
        self.inner.ensure_actor(actor).await
    }
    async fn progress(&self, actor: &ActorId) -> LedgerResult<PlayerProgress> {
        let read = self.progress_reads.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_progress_from > 0 && read >= self.fail_progress_from {
            return Err(LedgerError::Unavailable("read timed out".into()));
        }
        self.inner.progress(actor).await
    }
    async fn set_draws(&self, actor: &ActorId, value: i64) -> LedgerResult<()> {
        self.inner.set_draws(actor, value).await
    }
    async fn add_draws(&self, actor: &ActorId, delta: i64) -> LedgerResult<i64> {
        self.inner.add_draws(actor, delta).await
    }
    async fn increment_lifetime_draws(&self, actor: &ActorId, delta: i64) -> LedgerResult<i64> {
        self.inner.increment_lifetime_draws(actor, delta).await
    }
    async fn set_pity(&self, actor: &ActorId, value: i64) -> LedgerResult<()> {
        self.inner.set_pity(actor, value).await
    }
    async fn save_assignment(&self, assignment: &ToolAssignment) -> LedgerResult<()> {
        let call = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on_save {
            return Err(LedgerError::Unavailable("connection reset".into()));
        }
        self.inner.save_assignment(assignment).await
    }
    async fn get_assignment(&self, tool_id: &str) -> LedgerResult<Option<ToolAssignment>> {
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        self.inner.get_assignment(tool_id).await
    }
    async fn remove_assignment(&self, tool_id: &str) -> LedgerResult<bool> {
        self.inner.remove_assignment(tool_id).await
    }
    async fn record_draw(&self, record: &DrawRecord) -> LedgerResult<()> {
        self.inner.record_draw(record).await
    }
    async fn draw_history(&self, actor: &ActorId, limit: usize) -> LedgerResult<Vec<DrawRecord>> {
        self.inner.draw_history(actor, limit).await
    }
}

fn catalog() -> Arc<TraitCatalog> {
    Arc::new(TraitCatalog::new(CatalogSnapshot::from_json(CATALOG).unwrap()))
}

fn orchestrator(
    store: Arc<dyn LedgerStore>,
    host: Arc<LocalHost>,
    catalog: Arc<TraitCatalog>,
    presenter: Arc<dyn RevealPresenter>,
) -> RollOrchestrator {
    orchestrator_with_locks(store, host, catalog, presenter, Arc::new(ToolLocks::new()))
}

fn orchestrator_with_locks(
    store: Arc<dyn LedgerStore>,
    host: Arc<LocalHost>,
    catalog: Arc<TraitCatalog>,
    presenter: Arc<dyn RevealPresenter>,
    locks: Arc<ToolLocks>,
) -> RollOrchestrator {
    RollOrchestrator::new(
        host,
        catalog,
        PersistenceGateway::new(store),
        ItemStateCodec::new(),
        locks,
        presenter,
        OrchestratorSettings {
            pity: PityPolicy::new(500),
            guaranteed_category: None,
            max_draws_per_sequence: 10,
            starting_draws: 5,
        },
    )
    .with_lottery(Lottery::seeded(42))
}

fn hoe_host() -> Arc<LocalHost> {
    Arc::new(LocalHost::new(["hoe"]))
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

// ============================================================================
// Pity
// ============================================================================

#[tokio::test]
async fn test_pity_crossing_guarantees_final_draw() {
    let ledger = Arc::new(MemoryLedger::new());
    let orch = orchestrator(ledger.clone(), hoe_host(), catalog(), Arc::new(InstantReveal));
    let actor = ActorId::new("steve");
    ledger.set_draws(&actor, 3).await.unwrap();
    ledger.set_pity(&actor, 498).await.unwrap();

    let tool = shared_tool(ToolItem::new("hoe"));
    let report = orch.execute_roll_sequence(&actor, &tool, 3).await.unwrap();

    assert_eq!(report.draws_consumed, 3);
    assert_eq!(report.remaining_draws, 0);
    assert!(report.guaranteed);
    assert_eq!(report.pity_after, 0);
    assert_eq!(report.applied.len(), 2);
    assert_eq!(report.failed, 0);

    let last = report.final_draw.expect("final draw presented");
    assert_eq!(last.perk.category, "morada");
    assert!(last.was_guaranteed);
    assert!(report.applied.iter().all(|d| !d.was_guaranteed));

    let progress = ledger.progress(&actor).await.unwrap();
    assert_eq!(progress.available_draws, 0);
    assert_eq!(progress.lifetime_draws, 3);
    assert_eq!(progress.pity_counter, 0);

    // Instant reveal: the tool ends up carrying the final draw, mirrored in the ledger
    let codec = ItemStateCodec::new();
    let embedded = codec.read(&tool.lock()).unwrap();
    assert_eq!(embedded, Some(last.key()));
    let tool_id = codec.peek_identity(&tool.lock()).unwrap();
    assert_eq!(ledger.get_assignment(&tool_id).await.unwrap().unwrap().key(), last.key());
    assert!(!orch.is_rolling(&actor));

    wait_for(|| ledger.history_len() == 3).await;
    let history = ledger.draw_history(&actor, 10).await.unwrap();
    assert_eq!(history.iter().filter(|r| r.was_guaranteed).count(), 1);
}

#[tokio::test]
async fn test_pity_accumulates_below_threshold() {
    let ledger = Arc::new(MemoryLedger::new());
    let orch = orchestrator(ledger.clone(), hoe_host(), catalog(), Arc::new(InstantReveal));
    let actor = ActorId::new("alex");
    ledger.set_draws(&actor, 10).await.unwrap();
    ledger.set_pity(&actor, 100).await.unwrap();

    let tool = shared_tool(ToolItem::new("hoe"));
    let report = orch.execute_roll_sequence(&actor, &tool, 4).await.unwrap();

    assert!(!report.guaranteed);
    assert_eq!(report.pity_after, 104);
    assert_eq!(report.remaining_draws, 6);
    assert_eq!(orch.pity_progress(&actor).await.unwrap(), (104, 500));
    assert!(!report.final_draw.unwrap().was_guaranteed);
}

// ============================================================================
// Rejections leave no trace
// ============================================================================

#[tokio::test]
async fn test_unmanaged_tool_rejected_without_writes() {
    let ledger = Arc::new(MemoryLedger::new());
    let orch = orchestrator(ledger.clone(), hoe_host(), catalog(), Arc::new(InstantReveal));
    let actor = ActorId::new("steve");
    ledger.set_draws(&actor, 5).await.unwrap();
    let writes = ledger.write_count();

    let stick = shared_tool(ToolItem::new("stick"));
    let err = orch.execute_roll_sequence(&actor, &stick, 1).await.unwrap_err();

    assert!(matches!(err, PerkError::NotAManagedItem));
    assert_eq!(ledger.write_count(), writes);
    assert!(ItemStateCodec::new().peek_identity(&stick.lock()).is_none());
    assert!(!orch.is_rolling(&actor));
}

#[tokio::test]
async fn test_insufficient_draws_rejected_without_writes() {
    let ledger = Arc::new(MemoryLedger::new());
    let orch = orchestrator(ledger.clone(), hoe_host(), catalog(), Arc::new(InstantReveal));
    let actor = ActorId::new("steve");
    ledger.set_draws(&actor, 2).await.unwrap();
    ledger.set_pity(&actor, 499).await.unwrap();
    let writes = ledger.write_count();

    let tool = shared_tool(ToolItem::new("hoe"));
    let err = orch.execute_roll_sequence(&actor, &tool, 3).await.unwrap_err();

    assert!(matches!(err, PerkError::InsufficientDraws { have: 2, need: 3 }));
    assert_eq!(ledger.write_count(), writes);
    let progress = ledger.progress(&actor).await.unwrap();
    assert_eq!(progress.available_draws, 2);
    assert_eq!(progress.pity_counter, 499, "pity untouched");
    assert_eq!(ItemStateCodec::new().read(&tool.lock()).unwrap(), None);
    assert!(!orch.is_rolling(&actor), "reservation released on rejection");
}

#[tokio::test]
async fn test_draw_count_bounds() {
    let ledger = Arc::new(MemoryLedger::new());
    let orch = orchestrator(ledger.clone(), hoe_host(), catalog(), Arc::new(InstantReveal));
    let actor = ActorId::new("steve");
    ledger.set_draws(&actor, 50).await.unwrap();
    let tool = shared_tool(ToolItem::new("hoe"));

    assert!(matches!(
        orch.execute_roll_sequence(&actor, &tool, 0).await,
        Err(PerkError::InvalidDrawCount { requested: 0, max: 10 })
    ));
    assert!(matches!(
        orch.execute_roll_sequence(&actor, &tool, 11).await,
        Err(PerkError::InvalidDrawCount { requested: 11, max: 10 })
    ));
    assert_eq!(ledger.progress(&actor).await.unwrap().available_draws, 50);
}

#[tokio::test]
async fn test_empty_catalog_rejected() {
    let ledger = Arc::new(MemoryLedger::new());
    let empty = Arc::new(TraitCatalog::new(CatalogSnapshot::empty()));
    let orch = orchestrator(ledger.clone(), hoe_host(), empty, Arc::new(InstantReveal));
    let actor = ActorId::new("steve");
    ledger.set_draws(&actor, 5).await.unwrap();

    let tool = shared_tool(ToolItem::new("hoe"));
    let err = orch.execute_roll_sequence(&actor, &tool, 1).await.unwrap_err();
    assert!(matches!(err, PerkError::CatalogEmpty));
    assert_eq!(ledger.progress(&actor).await.unwrap().available_draws, 5);
}

#[tokio::test]
async fn test_store_outage_before_deduction() {
    let ledger = Arc::new(MemoryLedger::new());
    let orch = orchestrator(ledger.clone(), hoe_host(), catalog(), Arc::new(InstantReveal));
    let actor = ActorId::new("steve");
    ledger.set_draws(&actor, 5).await.unwrap();
    ledger.set_offline(true);

    let tool = shared_tool(ToolItem::new("hoe"));
    let err = orch.execute_roll_sequence(&actor, &tool, 2).await.unwrap_err();
    assert!(matches!(err, PerkError::StoreUnavailable(_)));

    ledger.set_offline(false);
    assert_eq!(ledger.progress(&actor).await.unwrap().available_draws, 5);
    assert!(!orch.is_rolling(&actor));
}

// ============================================================================
// Partial failure
// ============================================================================

#[tokio::test]
async fn test_failed_save_mid_sequence_continues() {
    let ledger = Arc::new(FlakyLedger::new(2));
    let orch = orchestrator(ledger.clone(), hoe_host(), catalog(), Arc::new(InstantReveal));
    let actor = ActorId::new("steve");
    ledger.set_draws(&actor, 5).await.unwrap();

    let tool = shared_tool(ToolItem::new("hoe"));
    let report = orch.execute_roll_sequence(&actor, &tool, 4).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.applied.len(), 2);
    assert!(report.final_draw.is_some());
    assert_eq!(report.remaining_draws, 1, "failed draw is not refunded");
    assert_eq!(ledger.saves.load(Ordering::SeqCst), 4);

    let codec = ItemStateCodec::new();
    let tool_id = codec.peek_identity(&tool.lock()).unwrap();
    let row = ledger.get_assignment(&tool_id).await.unwrap().unwrap();
    assert_eq!(Some(row.key()), codec.read(&tool.lock()).unwrap());
}

#[tokio::test]
async fn test_pity_kept_when_progress_read_fails_after_check() {
    let ledger = Arc::new(FlakyLedger::new(0).failing_progress_from(2));
    let orch = orchestrator(ledger.clone(), hoe_host(), catalog(), Arc::new(InstantReveal));
    let actor = ActorId::new("steve");
    ledger.set_draws(&actor, 5).await.unwrap();
    ledger.set_pity(&actor, 490).await.unwrap();

    let tool = shared_tool(ToolItem::new("hoe"));
    let report = orch.execute_roll_sequence(&actor, &tool, 2).await.unwrap();

    assert_eq!(report.pity_after, 492);
    assert_eq!(report.remaining_draws, 3);
    let stored = ledger.inner.progress(&actor).await.unwrap();
    assert_eq!(stored.pity_counter, 492, "accumulated pity survives a failing read");
}

// ============================================================================
// Roll vs reconciliation
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reconcile_during_roll_keeps_tool_converged() {
    let ledger = Arc::new(FlakyLedger::new(0).with_read_delay(Duration::from_millis(100)));
    let catalog = catalog();
    let locks = Arc::new(ToolLocks::new());
    let codec = ItemStateCodec::new();
    let service = Arc::new(ReconciliationService::new(
        codec,
        PersistenceGateway::new(ledger.clone()),
        catalog.clone(),
        locks.clone(),
    ));
    let orch = orchestrator_with_locks(
        ledger.clone(),
        hoe_host(),
        catalog.clone(),
        Arc::new(InstantReveal),
        locks.clone(),
    );
    let actor = ActorId::new("steve");
    ledger.set_draws(&actor, 1).await.unwrap();

    let tool = {
        let mut item = ToolItem::new("hoe");
        codec.apply(&mut item, catalog.snapshot().get("greed").unwrap(), 1);
        shared_tool(item)
    };
    assert_eq!(
        service.reconcile(&actor, &tool).await.unwrap(),
        ReconcileOutcome::LedgerRebuilt
    );

    // The pass is parked on the slow ledger read while the roll applies
    let pass = {
        let service = service.clone();
        let tool = tool.clone();
        let actor = actor.clone();
        tokio::spawn(async move { service.reconcile(&actor, &tool).await.unwrap() })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let report = orch.execute_roll_sequence(&actor, &tool, 1).await.unwrap();

    assert_eq!(pass.await.unwrap(), ReconcileOutcome::Converged);
    let last = report.final_draw.unwrap();
    let tool_id = codec.peek_identity(&tool.lock()).unwrap();
    let row = ledger.get_assignment(&tool_id).await.unwrap().unwrap();
    assert_eq!(codec.read(&tool.lock()).unwrap(), Some(last.key()));
    assert_eq!(row.key(), last.key(), "ledger == embedded");
    assert!(locks.is_empty());
}

// ============================================================================
// Reveal guard
// ============================================================================

#[tokio::test]
async fn test_second_sequence_blocked_until_reveal_applies() {
    let ledger = Arc::new(MemoryLedger::new());
    let presenter = Arc::new(DelayedReveal::new(Duration::from_millis(150)));
    let orch = orchestrator(ledger.clone(), hoe_host(), catalog(), presenter);
    let actor = ActorId::new("steve");
    ledger.set_draws(&actor, 4).await.unwrap();
    let tool = shared_tool(ToolItem::new("hoe"));

    let report = orch.execute_roll_sequence(&actor, &tool, 1).await.unwrap();
    let pending = report.final_draw.unwrap();
    assert!(orch.is_rolling(&actor));
    assert_eq!(orch.rolls_in_flight(), 1);
    assert_eq!(ItemStateCodec::new().read(&tool.lock()).unwrap(), None, "not applied before the reveal");

    let err = orch.execute_roll_sequence(&actor, &tool, 1).await.unwrap_err();
    assert!(matches!(err, PerkError::RollInProgress(_)));
    assert_eq!(ledger.progress(&actor).await.unwrap().available_draws, 3);

    // Another actor is not blocked
    let other = ActorId::new("alex");
    ledger.set_draws(&other, 1).await.unwrap();
    let other_tool = shared_tool(ToolItem::new("hoe"));
    orch.execute_roll_sequence(&other, &other_tool, 1).await.unwrap();

    wait_for(|| !orch.is_rolling(&actor)).await;
    assert_eq!(ItemStateCodec::new().read(&tool.lock()).unwrap(), Some(pending.key()));
    orch.execute_roll_sequence(&actor, &tool, 1).await.unwrap();
}

// ============================================================================
// Draw economy
// ============================================================================

#[tokio::test]
async fn test_purchase_draws() {
    let ledger = Arc::new(MemoryLedger::new());
    let actor = ActorId::new("steve");
    let host = Arc::new(LocalHost::new(["hoe"]).with_balance(&actor, 1_000.0));
    let orch = orchestrator(ledger.clone(), host.clone(), catalog(), Arc::new(InstantReveal));

    let err = orch.purchase_draws(&actor, 5, 2_500.0).await.unwrap_err();
    assert!(matches!(err, PerkError::InsufficientFunds { .. }));
    assert_eq!(host.balance(&actor), 1_000.0);

    assert_eq!(orch.purchase_draws(&actor, 2, 600.0).await.unwrap(), 2);
    assert_eq!(host.balance(&actor), 400.0);
    assert!(matches!(
        orch.purchase_draws(&actor, 0, 1.0).await,
        Err(PerkError::InvalidAmount(_))
    ));
}

#[tokio::test]
async fn test_purchase_refunded_when_ledger_down() {
    let ledger = Arc::new(MemoryLedger::new());
    let actor = ActorId::new("steve");
    let host = Arc::new(LocalHost::new(["hoe"]).with_balance(&actor, 1_000.0));
    let orch = orchestrator(ledger.clone(), host.clone(), catalog(), Arc::new(InstantReveal));
    ledger.set_offline(true);

    assert!(orch.purchase_draws(&actor, 2, 600.0).await.is_err());
    assert_eq!(host.balance(&actor), 1_000.0);
}

#[tokio::test]
async fn test_first_join_sets_starting_draws() {
    let ledger = Arc::new(MemoryLedger::new());
    let orch = orchestrator(ledger.clone(), hoe_host(), catalog(), Arc::new(InstantReveal));
    let actor = ActorId::new("newcomer");
    ledger.add_draws(&actor, 12).await.unwrap();

    let progress = orch.on_actor_join(&actor, true).await.unwrap();
    assert_eq!(progress.available_draws, 5);

    let progress = orch.on_actor_join(&actor, false).await.unwrap();
    assert_eq!(progress.available_draws, 5, "returning actors get nothing");
}
