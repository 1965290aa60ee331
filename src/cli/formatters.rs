//! Output formatting module for CLI display
//!
//! This module handles all terminal output formatting, separating
//! the concerns of data calculation from presentation.

use colored::Colorize;
use folio::db::{DailyValuationPoint, Transaction};
use folio::engine::BackfillSummary;
use folio::reports::{PortfolioReport, RiskLevel};
use folio::scheduler::RolloverOutcome;
use folio::utils::{
    format_compact, format_currency, format_percent, format_signed_currency,
    format_signed_percent,
};
use rust_decimal::Decimal;
use tabled::{
    settings::{object::Columns, Alignment, Style},
    Table, Tabled,
};

fn colored_signed(value: Decimal, text: String) -> String {
    if value > Decimal::ZERO {
        text.green().to_string()
    } else if value < Decimal::ZERO {
        text.red().to_string()
    } else {
        text
    }
}

/// Format a portfolio report for terminal table output
pub fn format_report_table(report: &PortfolioReport) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "\n{} Portfolio for {}\n\n",
        "📊".cyan().bold(),
        report.user_id.bold()
    ));

    #[derive(Tabled)]
    struct HoldingRow {
        #[tabled(rename = "Symbol")]
        symbol: String,
        #[tabled(rename = "Qty")]
        quantity: String,
        #[tabled(rename = "Avg Cost")]
        avg_cost: String,
        #[tabled(rename = "Price")]
        price: String,
        #[tabled(rename = "Value")]
        value: String,
        #[tabled(rename = "Alloc %")]
        allocation: String,
        #[tabled(rename = "P&L")]
        pl: String,
        #[tabled(rename = "Return %")]
        return_pct: String,
        #[tabled(rename = "Today")]
        today: String,
        #[tabled(rename = "Mkt Cap")]
        market_cap: String,
    }

    let rows: Vec<HoldingRow> = report
        .holdings
        .iter()
        .map(|h| {
            if h.data_unavailable {
                return HoldingRow {
                    symbol: h.symbol.clone(),
                    quantity: h.quantity.to_string(),
                    avg_cost: format_currency(h.average_cost),
                    price: "N/A".yellow().to_string(),
                    value: "N/A".to_string(),
                    allocation: "-".to_string(),
                    pl: "-".to_string(),
                    return_pct: "-".to_string(),
                    today: "-".to_string(),
                    market_cap: "-".to_string(),
                };
            }

            HoldingRow {
                symbol: h.symbol.clone(),
                quantity: h.quantity.to_string(),
                avg_cost: format_currency(h.average_cost),
                price: format_currency(h.price),
                value: format_currency(h.value),
                allocation: format_percent(h.allocation_percent),
                pl: colored_signed(h.profit_loss, format_signed_currency(h.profit_loss)),
                return_pct: colored_signed(h.gain_percent, format_signed_percent(h.gain_percent)),
                today: colored_signed(
                    h.today_profit_loss,
                    format_signed_currency(h.today_profit_loss),
                ),
                market_cap: h
                    .market_cap
                    .map(format_compact)
                    .unwrap_or_else(|| "-".to_string()),
            }
        })
        .collect();

    let mut table = Table::new(&rows);
    table.with(Style::modern());
    table.modify(Columns::new(1..), Alignment::right());
    output.push_str(&table.to_string());

    output.push_str(&format!("\n\n{} Summary", "━".repeat(80).bright_black()));
    output.push_str(&format!(
        "\n{:<22} {}",
        "Total Invested:".bold(),
        format_currency(report.total_invested)
    ));
    output.push_str(&format!(
        "\n{:<22} {}",
        "Total Value:".bold(),
        format_currency(report.total_value)
    ));
    output.push_str(&format!(
        "\n{:<22} {} ({})",
        "Total P&L:".bold(),
        colored_signed(
            report.total_profit_loss,
            format_signed_currency(report.total_profit_loss)
        ),
        format_signed_percent(report.total_gain_percent)
    ));
    output.push_str(&format!(
        "\n{:<22} {} ({})",
        "Today:".bold(),
        colored_signed(
            report.today_profit_loss,
            format_signed_currency(report.today_profit_loss)
        ),
        format_signed_percent(report.today_gain_percent)
    ));
    if !report.realized_profit_loss.is_zero() {
        output.push_str(&format!(
            "\n{:<22} {}",
            "Realized P&L:".bold(),
            format_signed_currency(report.realized_profit_loss)
        ));
    }

    if let Some(largest) = &report.largest_holding {
        output.push_str(&format!(
            "\n{:<22} {} ({})",
            "Largest Holding:".bold(),
            largest.symbol.cyan(),
            format_percent(largest.allocation)
        ));
    }
    if let Some(pe) = report.weighted_pe {
        output.push_str(&format!("\n{:<22} {:.2}", "Weighted P/E:".bold(), pe.round_dp(2)));
    }
    if let Some(yield_pct) = report.weighted_div_yield {
        output.push_str(&format!(
            "\n{:<22} {}",
            "Weighted Div Yield:".bold(),
            format_percent(yield_pct)
        ));
    }

    let risk = match report.risk.level {
        RiskLevel::Aggressive => report.risk.level.as_str().red(),
        RiskLevel::Moderate => report.risk.level.as_str().yellow(),
        RiskLevel::Conservative => report.risk.level.as_str().green(),
    };
    output.push_str(&format!(
        "\n{:<22} {} (score {}: {} large, {} mid, {} small)",
        "Risk:".bold(),
        risk,
        report.risk.score,
        report.risk.large_caps,
        report.risk.mid_caps,
        report.risk.small_caps
    ));

    if !report.gainers.is_empty() {
        output.push_str(&format!(
            "\n{:<22} {}",
            "Gainers:".bold(),
            report.gainers.join(", ").green()
        ));
    }
    if !report.losers.is_empty() {
        output.push_str(&format!(
            "\n{:<22} {}",
            "Losers:".bold(),
            report.losers.join(", ").red()
        ));
    }
    if !report.unavailable_symbols.is_empty() {
        output.push_str(&format!(
            "\n\n{} No quote for: {}",
            "⚠".yellow().bold(),
            report.unavailable_symbols.join(", ")
        ));
    }
    output.push('\n');

    output
}

/// Format ledger entries as a table
pub fn format_transactions_table(transactions: &[Transaction]) -> String {
    #[derive(Tabled)]
    struct TransactionRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Symbol")]
        symbol: String,
        #[tabled(rename = "Side")]
        side: String,
        #[tabled(rename = "Qty")]
        quantity: String,
        #[tabled(rename = "Price")]
        price: String,
        #[tabled(rename = "Total")]
        total: String,
    }

    let rows: Vec<TransactionRow> = transactions
        .iter()
        .map(|tx| TransactionRow {
            id: tx.id.map(|id| id.to_string()).unwrap_or_default(),
            date: tx.timestamp.format("%Y-%m-%d %H:%M").to_string(),
            symbol: tx.symbol.clone(),
            side: tx.side.as_str().to_string(),
            quantity: tx.quantity.to_string(),
            price: format_currency(tx.price),
            total: format_currency(tx.total()),
        })
        .collect();

    let mut table = Table::new(&rows);
    table.with(Style::rounded());
    table.modify(Columns::new(4..), Alignment::right());
    table.to_string()
}

/// Format the daily valuation series with day-over-day change
pub fn format_history_table(points: &[DailyValuationPoint]) -> String {
    #[derive(Tabled)]
    struct PointRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Valuation")]
        valuation: String,
        #[tabled(rename = "Change")]
        change: String,
    }

    let mut previous: Option<Decimal> = None;
    let rows: Vec<PointRow> = points
        .iter()
        .map(|p| {
            let change = match previous {
                Some(prev) => {
                    let delta = p.total_valuation - prev;
                    colored_signed(delta, format_signed_currency(delta))
                }
                None => "-".to_string(),
            };
            previous = Some(p.total_valuation);
            PointRow {
                date: p.date.format("%Y-%m-%d").to_string(),
                valuation: format_currency(p.total_valuation),
                change,
            }
        })
        .collect();

    let mut table = Table::new(&rows);
    table.with(Style::rounded());
    table.modify(Columns::new(1..), Alignment::right());
    table.to_string()
}

pub fn format_rollover_outcome(user_id: &str, outcome: &RolloverOutcome) -> String {
    match outcome {
        RolloverOutcome::Committed { positions, total } => format!(
            "{} Rolled over {} positions for {} (baseline {})",
            "✓".green().bold(),
            positions,
            user_id.bold(),
            format_currency(*total)
        ),
        RolloverOutcome::Skipped => format!(
            "{} Rollover for {} skipped: already done today",
            "ℹ".blue().bold(),
            user_id.bold()
        ),
    }
}

pub fn format_backfill_summary(summary: &BackfillSummary) -> String {
    let mut output = format!(
        "{} Backfill complete\n  Appended: {}\n  Skipped:  {}",
        "✓".green().bold(),
        summary.appended.to_string().green(),
        summary.skipped
    );
    if !summary.unavailable_symbols.is_empty() {
        output.push_str(&format!(
            "\n  No history for: {}",
            summary.unavailable_symbols.join(", ").yellow()
        ));
    }
    output
}

/// Format empty ledger message
pub fn format_empty_portfolio() -> String {
    format!(
        "{} No transactions found\nRecord one first using: {} transactions add <symbol> buy <qty> <price>\n",
        "ℹ".blue().bold(),
        "folio".bold()
    )
}
