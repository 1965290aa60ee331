use anyhow::Result;
use chrono::Utc;
use colored::Colorize;

use super::{parse_date, Context};
use crate::cli::formatters::{format_backfill_summary, format_history_table};
use folio::db::DailyValuationStore;

pub async fn dispatch_backfill(ctx: &Context, from: &str, to: Option<&str>) -> Result<()> {
    let from = parse_date(from)?;
    let to = match to {
        Some(raw) => parse_date(raw)?,
        None => Utc::now().date_naive(),
    };

    tracing::info!("Backfilling {} from {} to {}", ctx.user, from, to);
    let engine = ctx.engine()?;
    let summary = engine.backfill_history(&ctx.user, from, to).await?;

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", format_backfill_summary(&summary));
    }
    Ok(())
}

pub fn dispatch_history(ctx: &Context, from: Option<&str>, to: Option<&str>) -> Result<()> {
    let from = from.map(parse_date).transpose()?;
    let to = to.map(parse_date).transpose()?;

    let store = ctx.open_store()?;
    let points = store.list_daily_points(&ctx.user, from, to)?;

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&points)?);
    } else if points.is_empty() {
        println!(
            "{} No valuation history yet. Run {} or {}",
            "ℹ".blue().bold(),
            "folio rollover".bold(),
            "folio backfill --from <date>".bold()
        );
    } else {
        println!("{}", format_history_table(&points));
    }
    Ok(())
}
