use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod formatters;

#[derive(Parser)]
#[command(name = "folio")]
#[command(version, about = "Equity portfolio valuation and daily performance tracker")]
#[command(
    long_about = "Track equity holdings from a transaction ledger, value them against live quotes, keep a daily valuation baseline and report gain/loss, allocation and risk."
)]
pub struct Cli {
    /// Disable colorized/ANSI output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Output results in JSON format
    #[arg(long = "json", global = true)]
    pub json: bool,

    /// Portfolio owner
    #[arg(long, short, global = true, default_value = "default")]
    pub user: String,

    /// Database file (defaults to ~/.folio/data.db or FOLIO_DB_PATH)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Config file (defaults to ~/.folio/config.toml or FOLIO_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the database and schema
    Init,

    /// Ledger management
    Transactions {
        #[command(subcommand)]
        action: TransactionCommands,
    },

    /// Value the portfolio against live quotes
    Report {
        /// Print the flat summarization payload instead of the full report
        #[arg(long)]
        narrative: bool,
    },

    /// Run the daily baseline rollover if it is due
    Rollover {
        /// Run for every user in the ledger
        #[arg(long)]
        all: bool,
    },

    /// Fill the daily valuation series from historical closes
    Backfill {
        /// First day (YYYY-MM-DD)
        #[arg(long)]
        from: String,

        /// Last day (YYYY-MM-DD), defaults to today
        #[arg(long)]
        to: Option<String>,
    },

    /// Show the daily valuation series
    History {
        /// First day (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// Last day (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,
    },

    /// Run the rollover scheduler until interrupted
    Daemon,
}

#[derive(Subcommand)]
pub enum TransactionCommands {
    /// Record a buy or sell
    Add {
        /// Ticker symbol (e.g., AAPL)
        symbol: String,

        /// Transaction side: buy or sell
        #[arg(value_parser = ["buy", "sell", "BUY", "SELL"])]
        side: String,

        /// Whole number of shares
        quantity: u64,

        /// Price per share
        price: String,

        /// Trade date (YYYY-MM-DD) or RFC 3339 timestamp, defaults to now
        #[arg(long)]
        date: Option<String>,
    },

    /// List ledger entries
    List {
        /// Only this symbol
        #[arg(long)]
        symbol: Option<String>,
    },
}
