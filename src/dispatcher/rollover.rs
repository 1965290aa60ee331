use anyhow::Result;
use colored::Colorize;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;

use super::Context;
use crate::cli::formatters::format_rollover_outcome;
use folio::scheduler::{RolloverOutcome, RolloverScheduler};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RolloverRow {
    user_id: String,
    committed: bool,
    positions: usize,
    total: Option<Decimal>,
}

impl RolloverRow {
    fn new(user_id: &str, outcome: &RolloverOutcome) -> Self {
        match outcome {
            RolloverOutcome::Committed { positions, total } => Self {
                user_id: user_id.to_string(),
                committed: true,
                positions: *positions,
                total: Some(*total),
            },
            RolloverOutcome::Skipped => Self {
                user_id: user_id.to_string(),
                committed: false,
                positions: 0,
                total: None,
            },
        }
    }
}

/// The engine's scheduler, so rollovers reprice through the same gateway
/// and limits as reports.
fn scheduler(ctx: &Context) -> Result<RolloverScheduler> {
    Ok(ctx.engine()?.scheduler())
}

pub async fn dispatch_rollover(ctx: &Context, all: bool) -> Result<()> {
    let scheduler = scheduler(ctx)?;

    let outcomes = if all {
        scheduler.run_for_all_users().await?
    } else {
        vec![(
            ctx.user.clone(),
            scheduler.run_daily_rollover(&ctx.user).await?,
        )]
    };

    if ctx.json {
        let rows: Vec<RolloverRow> = outcomes
            .iter()
            .map(|(user, outcome)| RolloverRow::new(user, outcome))
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if outcomes.is_empty() {
        println!("{} No users in the ledger", "ℹ".blue().bold());
    }
    for (user, outcome) in &outcomes {
        println!("{}", format_rollover_outcome(user, outcome));
    }
    Ok(())
}

/// Run the scheduler in the foreground until Ctrl-C.
pub async fn dispatch_daemon(ctx: &Context) -> Result<()> {
    let scheduler = scheduler(ctx)?;
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = shutdown_tx.send(());
            }
            Err(e) => tracing::warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    println!(
        "{} Rollover scheduler running (Ctrl-C to stop)",
        "▶".green().bold()
    );
    scheduler.run(shutdown_rx).await?;
    Ok(())
}
