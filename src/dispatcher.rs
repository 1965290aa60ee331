//! Command dispatcher that routes parsed clap commands to their handlers.
//!
//! Handlers share a [`Context`] built from the global flags, which knows how
//! to open the store, load configuration and assemble the engine.

mod history;
mod portfolio;
mod rollover;
mod transactions;

use anyhow::{Context as _, Result};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::cli::{Cli, Commands};
use folio::config::Config;
use folio::db::{self, Database};
use folio::engine::PortfolioEngine;
use folio::pricing::{CachingGateway, MarketDataGateway, OfflineGateway, YahooGateway};

/// Settings shared by every command invocation
pub struct Context {
    pub user: String,
    pub db_path: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
    pub json: bool,
}

impl Context {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            user: cli.user.clone(),
            db_path: cli.db.clone(),
            config_path: cli.config.clone(),
            json: cli.json,
        }
    }

    pub fn config(&self) -> Result<Config> {
        Config::load(self.config_path.as_deref()).context("Failed to load configuration")
    }

    pub fn open_store(&self) -> Result<Arc<Database>> {
        let store = Database::open(self.db_path.clone()).context("Failed to open database")?;
        Ok(Arc::new(store))
    }

    /// Engine over the SQLite store and a cached Yahoo Finance gateway.
    /// `FOLIO_SKIP_PRICE_FETCH` swaps in a gateway that never goes online.
    pub fn engine(&self) -> Result<PortfolioEngine> {
        let config = self.config()?;
        let store = self.open_store()?;

        let skip_price_fetch = std::env::var("FOLIO_SKIP_PRICE_FETCH")
            .map(|v| v != "0")
            .unwrap_or(false);
        let gateway: Arc<dyn MarketDataGateway> = if skip_price_fetch {
            info!("Price fetching disabled; quotes will be unavailable");
            Arc::new(OfflineGateway)
        } else {
            let yahoo = YahooGateway::new(config.pricing.lookup_timeout())
                .context("Failed to create market data client")?;
            Arc::new(CachingGateway::new(yahoo, config.pricing.cache_ttl()))
        };

        Ok(PortfolioEngine::new(store, gateway, config))
    }
}

/// Route a parsed command to its handler
pub async fn dispatch_command(cli: Cli) -> Result<()> {
    let ctx = Context::from_cli(&cli);

    match cli.command {
        Commands::Init => dispatch_init(&ctx),
        Commands::Transactions { action } => {
            transactions::dispatch_transactions(&ctx, &action).await
        }
        Commands::Report { narrative } => portfolio::dispatch_report(&ctx, narrative).await,
        Commands::Rollover { all } => rollover::dispatch_rollover(&ctx, all).await,
        Commands::Backfill { from, to } => {
            history::dispatch_backfill(&ctx, &from, to.as_deref()).await
        }
        Commands::History { from, to } => {
            history::dispatch_history(&ctx, from.as_deref(), to.as_deref())
        }
        Commands::Daemon => rollover::dispatch_daemon(&ctx).await,
    }
}

fn dispatch_init(ctx: &Context) -> Result<()> {
    let path = match &ctx.db_path {
        Some(p) => p.clone(),
        None => db::get_default_db_path()?,
    };
    info!("Initializing database at {:?}", path);
    db::init_database(Some(path.clone())).context("Failed to initialize database")?;

    if ctx.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "database": path }))?
        );
    } else {
        println!(
            "{} Database ready at {}",
            "✓".green().bold(),
            path.display()
        );
    }
    Ok(())
}

/// Parse `YYYY-MM-DD` for command arguments
pub(crate) fn parse_date(raw: &str) -> Result<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}'. Use YYYY-MM-DD", raw))
}
