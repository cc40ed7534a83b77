use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use tool_perks::config::PerksConfig;
use tool_perks::logging;
use tool_perks::{shared_tool, ActorId, LocalHost, PerksContext, ToolItem};

/// Scripted session against an in-process host: join, buy draws, roll, observe.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing_default();

    println!("Starting tool perks server...");

    // ========================================================================
    // 1. Configuration + storage
    // ========================================================================
    let config = PerksConfig::from_env().context("invalid perks configuration")?;
    info!(
        backend = ?config.storage.backend,
        pity_threshold = config.pity_threshold,
        "Configuration loaded"
    );

    let actor = ActorId::new("demo-player");
    let host = Arc::new(LocalHost::new(["hoe", "pickaxe"]).with_balance(&actor, 10_000.0));
    let ctx = PerksContext::open(config, host.clone())
        .await
        .context("failed to open the perk ledger")?;

    // ========================================================================
    // 2. Session
    // ========================================================================
    let progress = ctx.orchestrator.on_actor_join(&actor, true).await?;
    info!(draws = progress.available_draws, "Player joined");

    let hoe_perks = ctx.catalog.snapshot().perks_for_tool("hoe").len();
    info!(hoe_perks, "Catalog ready");

    let total = ctx.orchestrator.purchase_draws(&actor, 5, 2_500.0).await?;
    info!(draws = total, money = host.balance(&actor), "Draws purchased");

    // Rolling on something the host does not manage is turned away
    let stick = shared_tool(ToolItem::new("stick"));
    match ctx.orchestrator.execute_roll_sequence(&actor, &stick, 1).await {
        Err(e) if e.is_user_facing() => info!(reason = %e, "Roll refused"),
        Err(e) => return Err(e.into()),
        Ok(_) => warn!("Unmanaged item was rolled"),
    }

    let tool = shared_tool(ToolItem::new("hoe"));
    let outcome = ctx.reconciler.reconcile(&actor, &tool).await?;
    info!(?outcome, "Fresh tool observed");

    let report = ctx.orchestrator.execute_roll_sequence(&actor, &tool, 3).await?;
    for draw in &report.applied {
        info!(perk = %draw.key(), category = %draw.perk.category, "Draw applied");
    }
    if let Some(last) = &report.final_draw {
        let snapshot = ctx.catalog.snapshot();
        let tier = snapshot.category_or_default(&last.perk.category);
        info!(
            perk = %last.key(),
            tier = %tier.display_name,
            color = %tier.color,
            guaranteed = last.was_guaranteed,
            "Final draw revealing"
        );
    }

    // Let the reveal land before observing the tool again
    tokio::select! {
        _ = async {
            while ctx.orchestrator.is_rolling(&actor) {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        } => {}
        _ = tokio::signal::ctrl_c() => warn!("Interrupted while waiting for the reveal"),
    }

    let outcome = ctx.reconciler.reconcile(&actor, &tool).await?;
    info!(?outcome, lore = ?tool.lock().lore, "Tool observed after roll");

    let (pity, threshold) = ctx.orchestrator.pity_progress(&actor).await?;
    let progress = ctx
        .gateway
        .spawn_progress(actor.clone())
        .await
        .context("progress read task failed")??;
    info!(
        pity,
        threshold,
        draws = progress.available_draws,
        lifetime = progress.lifetime_draws,
        "Pity progress"
    );

    for record in ctx.admin.history(&actor, 10).await? {
        info!(
            perk = %record.perk_id,
            perk_level = record.level,
            category = %record.category,
            guaranteed = record.was_guaranteed,
            "History"
        );
    }

    ctx.shutdown().await;
    Ok(())
}
