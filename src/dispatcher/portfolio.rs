use anyhow::Result;

use super::Context;
use crate::cli::formatters::{format_empty_portfolio, format_report_table};

pub async fn dispatch_report(ctx: &Context, narrative: bool) -> Result<()> {
    tracing::info!("Generating portfolio report for {}", ctx.user);

    let engine = ctx.engine()?;

    // An empty ledger is an error for the engine, but not worth failing the
    // command over.
    if engine.store().read_transactions(&ctx.user)?.is_empty() {
        if ctx.json {
            println!("null");
        } else {
            print!("{}", format_empty_portfolio());
        }
        return Ok(());
    }

    let report = engine.compute_portfolio_report(&ctx.user).await?;

    if narrative {
        println!("{}", serde_json::to_string_pretty(&report.narrative())?);
    } else if ctx.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", format_report_table(&report));
    }

    Ok(())
}
