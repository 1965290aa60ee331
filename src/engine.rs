//! Engine facade: wires the ledger, position store, market data and
//! scheduler together behind the three entry points callers use.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::{EngineStore, Position, PositionUpdate, Transaction};
use crate::error::{EngineError, Result};
use crate::positions::{reconstruct_positions, reconstruct_positions_as_of};
use crate::pricing::{
    fetch_histories, fetch_quotes, FetchLimits, Interval, MarketDataGateway, Quote,
};
use crate::reports::{build_report, value_portfolio, PortfolioReport, RiskClassifier};
use crate::scheduler::{Clock, RolloverOutcome, RolloverScheduler, SystemClock};

/// Ledger positions merged with the stored baselines and today's quotes
pub(crate) struct Repriced {
    pub positions: Vec<Position>,
    pub quotes: BTreeMap<String, Result<Quote>>,
    pub realized: Decimal,
}

/// Fold `transactions`, quote every open symbol and refresh the stored rows.
///
/// Quotes are fetched before the store is touched; the merge itself goes
/// through [`crate::db::PositionStore::refresh_positions`] so a rollover that commits
/// while lookups are in flight keeps its baseline. A failed quote keeps the
/// previous `current_holding`.
pub(crate) async fn reprice_positions(
    store: &dyn EngineStore,
    gateway: Arc<dyn MarketDataGateway>,
    limits: FetchLimits,
    user_id: &str,
    transactions: &[Transaction],
) -> Result<Repriced> {
    let reconstruction = reconstruct_positions(transactions)?;
    let realized = reconstruction.total_realized();
    debug!(
        "Reconstructed {} positions for {} from {} transactions",
        reconstruction.positions.len(),
        user_id,
        transactions.len()
    );

    let symbols: Vec<String> = reconstruction.positions.keys().cloned().collect();
    let quotes = fetch_quotes(gateway, &symbols, limits).await;

    let updates: Vec<PositionUpdate> = reconstruction
        .into_positions()
        .into_iter()
        .map(|p| {
            let price = match quotes.get(&p.symbol) {
                Some(Ok(q)) if q.price.checked_mul(Decimal::from(p.quantity)).is_some() => {
                    Some(q.price)
                }
                _ => None,
            };
            PositionUpdate {
                symbol: p.symbol,
                quantity: p.quantity,
                average_cost: p.average_cost,
                price,
            }
        })
        .collect();

    let positions = store.refresh_positions(user_id, &updates)?;
    Ok(Repriced {
        positions,
        quotes,
        realized,
    })
}

/// Outcome of a history backfill
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillSummary {
    pub appended: usize,
    /// Days already recorded, with nothing held, or missing a close
    pub skipped: usize,
    pub unavailable_symbols: Vec<String>,
}

pub struct PortfolioEngine {
    store: Arc<dyn EngineStore>,
    gateway: Arc<dyn MarketDataGateway>,
    clock: Arc<dyn Clock>,
    config: Config,
    limits: FetchLimits,
}

impl PortfolioEngine {
    pub fn new(
        store: Arc<dyn EngineStore>,
        gateway: Arc<dyn MarketDataGateway>,
        config: Config,
    ) -> Self {
        let limits = FetchLimits::from(&config.pricing);
        Self {
            store,
            gateway,
            clock: Arc::new(SystemClock),
            config,
            limits,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_fetch_limits(mut self, limits: FetchLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn EngineStore> {
        &self.store
    }

    pub fn scheduler(&self) -> RolloverScheduler {
        RolloverScheduler::new(
            self.store.clone(),
            self.gateway.clone(),
            self.clock.clone(),
            self.config.rollover.clone(),
        )
        .with_fetch_limits(self.limits)
    }

    /// Rebuild positions from the ledger, price them, refresh the stored
    /// holdings and assemble the report.
    ///
    /// A symbol whose quote fails is reported as unavailable and keeps its
    /// previous `current_holding`. Ledger problems fail the whole call.
    pub async fn compute_portfolio_report(&self, user_id: &str) -> Result<PortfolioReport> {
        let transactions = self.store.read_transactions(user_id)?;
        let Repriced {
            positions,
            quotes,
            realized,
        } = reprice_positions(
            self.store.as_ref(),
            self.gateway.clone(),
            self.limits,
            user_id,
            &transactions,
        )
        .await?;

        let valuation = value_portfolio(&positions, &quotes);
        let risk = RiskClassifier::new(self.config.risk.clone()).classify(
            valuation
                .holdings
                .iter()
                .map(|h| (h.symbol.as_str(), h.market_cap)),
        );

        let report = build_report(user_id, self.clock.now(), valuation, risk, realized);
        if !report.unavailable_symbols.is_empty() {
            warn!(
                "Report for {} is missing prices for {:?}",
                user_id, report.unavailable_symbols
            );
        }
        info!(
            "Valued {} holdings for {}: total {}",
            report.holdings.len(),
            user_id,
            report.total_value
        );
        Ok(report)
    }

    pub async fn run_daily_rollover(&self, user_id: &str) -> Result<RolloverOutcome> {
        self.scheduler().run_daily_rollover(user_id).await
    }

    /// Fill the daily valuation series from closing prices.
    ///
    /// Each day in `[from, to]` with at least one close is valued with the
    /// positions held at the end of that day and the latest close on or
    /// before it. Days where a held symbol has no such close are skipped, as
    /// are days that already have a point.
    pub async fn backfill_history(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<BackfillSummary> {
        if from > to {
            return Err(EngineError::invalid(format!(
                "backfill range starts after it ends ({} > {})",
                from, to
            )));
        }

        let transactions = self.store.read_transactions(user_id)?;
        if transactions.is_empty() {
            return Err(EngineError::invalid("ledger contains no transactions"));
        }

        let symbols: Vec<String> = transactions
            .iter()
            .filter(|t| t.timestamp.date_naive() <= to)
            .map(|t| t.symbol.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        // Look back far enough to carry a close into the first days of the
        // range (weekends, holidays).
        let lookback = from - chrono::Duration::days(7);
        let histories = fetch_histories(
            self.gateway.clone(),
            &symbols,
            lookback,
            to,
            Interval::Daily,
            self.limits,
        )
        .await;

        let mut summary = BackfillSummary::default();
        let mut closes: BTreeMap<String, BTreeMap<NaiveDate, Decimal>> = BTreeMap::new();
        for (symbol, history) in histories {
            match history {
                Ok(bars) => {
                    closes.insert(symbol, bars.into_iter().map(|b| (b.date, b.close)).collect());
                }
                Err(e) => {
                    warn!("Skipping {} in backfill: {}", symbol, e);
                    summary.unavailable_symbols.push(symbol);
                }
            }
        }

        let trading_days: BTreeSet<NaiveDate> = closes
            .values()
            .flat_map(|series| series.range(from..=to).map(|(d, _)| *d))
            .collect();

        for day in trading_days {
            let held = reconstruct_positions_as_of(&transactions, day)?;
            if held.positions.is_empty() {
                summary.skipped += 1;
                continue;
            }

            // A day with any held symbol unpriced is left for a later run
            // rather than recorded short.
            let values: Option<Vec<Decimal>> = held
                .positions
                .values()
                .map(|p| {
                    let close = closes.get(&p.symbol)?.range(..=day).next_back()?.1;
                    Decimal::from(p.quantity).checked_mul(*close)
                })
                .collect();
            let Some(total) = values.and_then(|v| {
                v.into_iter()
                    .try_fold(Decimal::ZERO, |acc, x| acc.checked_add(x))
            }) else {
                debug!("No complete set of closes for {} on {}", user_id, day);
                summary.skipped += 1;
                continue;
            };

            if self.store.append_daily_point(user_id, day, total)? {
                summary.appended += 1;
            } else {
                summary.skipped += 1;
            }
        }

        info!(
            "Backfilled {} days for {} ({} skipped)",
            summary.appended, user_id, summary.skipped
        );
        Ok(summary)
    }
}
