use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use rust_decimal::Decimal;
use std::str::FromStr;

use super::{parse_date, Context};
use crate::cli::formatters::{format_empty_portfolio, format_transactions_table};
use crate::cli::TransactionCommands;
use folio::db::{Side, Transaction, TransactionLedger};
use folio::utils::format_currency;

pub async fn dispatch_transactions(ctx: &Context, action: &TransactionCommands) -> Result<()> {
    match action {
        TransactionCommands::Add {
            symbol,
            side,
            quantity,
            price,
            date,
        } => dispatch_transaction_add(ctx, symbol, side, *quantity, price, date.as_deref()),
        TransactionCommands::List { symbol } => {
            dispatch_transactions_list(ctx, symbol.as_deref())
        }
    }
}

/// Accepts a plain day (midnight UTC) or a full RFC 3339 timestamp.
fn parse_timestamp(raw: Option<&str>) -> Result<DateTime<Utc>> {
    let Some(raw) = raw else {
        return Ok(Utc::now());
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw.trim()) {
        return Ok(ts.with_timezone(&Utc));
    }
    let day = parse_date(raw)?;
    day.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .with_context(|| format!("Invalid date '{}'", raw))
}

fn dispatch_transaction_add(
    ctx: &Context,
    symbol: &str,
    side: &str,
    quantity: u64,
    price: &str,
    date: Option<&str>,
) -> Result<()> {
    tracing::info!("Adding transaction for {}", symbol);

    let side: Side = side.parse()?;
    let price = Decimal::from_str(price.trim()).context("Invalid price. Must be a decimal number")?;
    let timestamp = parse_timestamp(date)?;

    let tx = Transaction::new(&ctx.user, symbol, side, quantity, price, timestamp)?;

    let store = ctx.open_store()?;
    let id = store.append_transaction(&tx)?;

    if ctx.json {
        let stored = Transaction { id: Some(id), ..tx };
        println!("{}", serde_json::to_string_pretty(&stored)?);
        return Ok(());
    }

    println!("\n{} Transaction added successfully!", "✓".green().bold());
    println!("  Transaction ID: {}", id);
    println!("  User:           {}", tx.user_id);
    println!("  Symbol:         {}", tx.symbol.cyan().bold());
    println!("  Side:           {}", tx.side.as_str());
    println!("  Date:           {}", tx.timestamp.format("%Y-%m-%d %H:%M UTC"));
    println!("  Quantity:       {}", tx.quantity);
    println!("  Price:          {}", format_currency(tx.price).cyan());
    println!("  Total:          {}", format_currency(tx.total()).cyan().bold());
    println!();

    Ok(())
}

fn dispatch_transactions_list(ctx: &Context, symbol: Option<&str>) -> Result<()> {
    let store = ctx.open_store()?;
    let mut transactions = store.read_transactions(&ctx.user)?;
    if let Some(symbol) = symbol {
        transactions.retain(|t| t.symbol.eq_ignore_ascii_case(symbol));
    }

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&transactions)?);
    } else if transactions.is_empty() {
        print!("{}", format_empty_portfolio());
    } else {
        println!("{}", format_transactions_table(&transactions));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_timestamp_accepts_day_or_rfc3339() {
        assert_eq!(
            parse_timestamp(Some("2025-01-06")).unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 6, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_timestamp(Some("2025-01-06T14:30:00-05:00")).unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 6, 19, 30, 0).unwrap()
        );
        assert!(parse_timestamp(Some("yesterday")).is_err());
    }
}
