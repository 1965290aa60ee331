//! Integration tests for the valuation engine over the SQLite store
//!
//! These tests exercise the public API end to end:
//! - Ledger folding with average cost
//! - Valuation with a degraded quote source
//! - Daily rollover idempotence, repricing and the valuation series
//! - History backfill against stored points

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use folio::config::Config;
use folio::db::{
    init_database, DailyValuationStore, Database, JobRunStore, PositionStore, Side, Transaction,
    TransactionLedger,
};
use folio::pricing::{HistoricalBar, Interval, MarketDataGateway, Quote};
use folio::scheduler::{ManualClock, RolloverOutcome};
use folio::{EngineError, PortfolioEngine};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Quote source with fixed answers; unknown symbols fail.
#[derive(Default)]
struct StaticGateway {
    quotes: Mutex<HashMap<String, Quote>>,
    history: Mutex<HashMap<String, Vec<HistoricalBar>>>,
}

impl StaticGateway {
    fn set_price(&self, symbol: &str, price: Decimal) {
        self.quotes
            .lock()
            .unwrap()
            .insert(symbol.to_string(), Quote::new(symbol, price));
    }

    fn set_quote(&self, quote: Quote) {
        self.quotes
            .lock()
            .unwrap()
            .insert(quote.symbol.clone(), quote);
    }

    fn set_closes(&self, symbol: &str, closes: &[(NaiveDate, Decimal)]) {
        let bars = closes
            .iter()
            .map(|(date, close)| HistoricalBar {
                date: *date,
                open: None,
                high: None,
                low: None,
                close: *close,
                volume: None,
            })
            .collect();
        self.history
            .lock()
            .unwrap()
            .insert(symbol.to_string(), bars);
    }
}

#[async_trait]
impl MarketDataGateway for StaticGateway {
    async fn get_quote(&self, symbol: &str) -> folio::Result<Quote> {
        self.quotes
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| EngineError::unavailable(symbol, "no quote"))
    }

    async fn get_historical(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        _interval: Interval,
    ) -> folio::Result<Vec<HistoricalBar>> {
        let bars = self
            .history
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .ok_or_else(|| EngineError::unavailable(symbol, "no history"))?;
        Ok(bars
            .into_iter()
            .filter(|b| b.date >= start && b.date <= end)
            .collect())
    }
}

struct Harness {
    _dir: TempDir,
    store: Arc<Database>,
    gateway: Arc<StaticGateway>,
    clock: Arc<ManualClock>,
    engine: PortfolioEngine,
}

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Test helper: engine over a temporary SQLite database
fn harness() -> Result<Harness> {
    let dir = TempDir::new()?;
    let db_path = dir.path().join("test.db");
    init_database(Some(db_path.clone()))?;

    let store = Arc::new(Database::open(Some(db_path))?);
    let gateway = Arc::new(StaticGateway::default());
    let clock = Arc::new(ManualClock::new(at(2025, 3, 4, 15)));
    let engine = PortfolioEngine::new(store.clone(), gateway.clone(), Config::default())
        .with_clock(clock.clone());

    Ok(Harness {
        _dir: dir,
        store,
        gateway,
        clock,
        engine,
    })
}

fn record(
    store: &Database,
    user: &str,
    symbol: &str,
    side: Side,
    qty: u64,
    price: Decimal,
    ts: DateTime<Utc>,
) -> Result<()> {
    store.append_transaction(&Transaction::new(user, symbol, side, qty, price, ts)?)?;
    Ok(())
}

#[tokio::test]
async fn test_buys_and_sells_fold_into_positions() -> Result<()> {
    let h = harness()?;
    record(&h.store, "alice", "AAA", Side::Buy, 10, dec!(100), at(2025, 3, 1, 10))?;
    record(&h.store, "alice", "AAA", Side::Buy, 10, dec!(200), at(2025, 3, 2, 10))?;
    record(&h.store, "alice", "BBB", Side::Buy, 4, dec!(25), at(2025, 3, 2, 11))?;
    record(&h.store, "alice", "BBB", Side::Sell, 4, dec!(30), at(2025, 3, 3, 11))?;
    h.gateway.set_price("AAA", dec!(180));

    let report = h.engine.compute_portfolio_report("alice").await?;

    // BBB was fully sold and drops out
    assert_eq!(report.holdings.len(), 1);
    let aaa = report.holding("AAA").unwrap();
    assert_eq!(aaa.quantity, 20);
    assert_eq!(aaa.average_cost, dec!(150));
    assert_eq!(report.total_value, dec!(3600));
    assert_eq!(report.total_invested, dec!(3000));
    assert_eq!(report.total_profit_loss, dec!(600));
    assert_eq!(report.total_gain_percent, dec!(20));
    assert_eq!(report.realized_profit_loss, dec!(20));

    let stored = h.store.read_positions("alice")?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].current_holding, dec!(3600));
    Ok(())
}

#[tokio::test]
async fn test_over_sell_is_rejected_before_valuation() -> Result<()> {
    let h = harness()?;
    record(&h.store, "alice", "AAA", Side::Buy, 5, dec!(10), at(2025, 3, 1, 10))?;
    record(&h.store, "alice", "AAA", Side::Sell, 8, dec!(10), at(2025, 3, 2, 10))?;

    let err = h.engine.compute_portfolio_report("alice").await.unwrap_err();
    assert!(matches!(err, EngineError::InsufficientHolding { .. }));
    Ok(())
}

#[tokio::test]
async fn test_missing_quote_is_flagged_not_fatal() -> Result<()> {
    let h = harness()?;
    record(&h.store, "alice", "AAA", Side::Buy, 20, dec!(150), at(2025, 3, 1, 10))?;
    record(&h.store, "alice", "ZZZ", Side::Buy, 3, dec!(10), at(2025, 3, 1, 10))?;
    let mut quote = Quote::new("AAA", dec!(180));
    quote.market_cap = Some(dec!(2500000000000));
    quote.trailing_pe = Some(dec!(28.5));
    h.gateway.set_quote(quote);

    let report = h.engine.compute_portfolio_report("alice").await?;

    assert_eq!(report.total_value, dec!(3600));
    assert_eq!(report.unavailable_symbols, vec!["ZZZ"]);
    assert_eq!(report.weighted_pe, Some(dec!(28.5)));
    assert_eq!(report.largest_holding.as_ref().unwrap().symbol, "AAA");

    let narrative = serde_json::to_value(report.narrative())?;
    assert_eq!(narrative["totalStocks"], 2);
    assert_eq!(narrative["riskLevel"], "Conservative");
    assert_eq!(narrative["unavailableSymbols"][0], "ZZZ");
    Ok(())
}

#[tokio::test]
async fn test_rollover_commits_once_per_day() -> Result<()> {
    let h = harness()?;
    record(&h.store, "alice", "AAA", Side::Buy, 10, dec!(100), at(2025, 3, 1, 10))?;
    h.gateway.set_price("AAA", dec!(120));
    h.engine.compute_portfolio_report("alice").await?;

    h.clock.set(at(2025, 3, 5, 0));
    let first = h.engine.run_daily_rollover("alice").await?;
    assert_eq!(
        first,
        RolloverOutcome::Committed {
            positions: 1,
            total: dec!(1200)
        }
    );
    h.clock.advance(ChronoDuration::hours(6));
    assert_eq!(h.engine.run_daily_rollover("alice").await?, RolloverOutcome::Skipped);

    let positions = h.store.read_positions("alice")?;
    assert_eq!(positions[0].yesterday_holding, positions[0].current_holding);

    let record = h.store.read_job_record("alice", "daily-rollover")?.unwrap();
    assert_eq!(record.last_run, at(2025, 3, 5, 0));

    let points = h.store.list_daily_points("alice", None, None)?;
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].date, day(2025, 3, 5));
    assert_eq!(points[0].total_valuation, dec!(1200));

    // Next day, after the price moved
    h.gateway.set_price("AAA", dec!(132));
    let report = h.engine.compute_portfolio_report("alice").await?;
    assert_eq!(report.today_profit_loss, dec!(120));
    assert_eq!(report.today_gain_percent, dec!(10));

    h.clock.set(at(2025, 3, 6, 0));
    assert!(matches!(
        h.engine.run_daily_rollover("alice").await?,
        RolloverOutcome::Committed { .. }
    ));
    assert_eq!(h.store.list_daily_points("alice", None, None)?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_rollover_reprices_when_no_report_ran() -> Result<()> {
    let h = harness()?;
    record(&h.store, "alice", "AAA", Side::Buy, 10, dec!(100), at(2025, 3, 1, 10))?;
    h.gateway.set_price("AAA", dec!(100));
    h.engine.compute_portfolio_report("alice").await?;

    h.gateway.set_price("AAA", dec!(200));
    for d in 5..=7 {
        h.clock.set(at(2025, 3, d, 0));
        h.engine.run_daily_rollover("alice").await?;
    }

    let values: Vec<Decimal> = h
        .store
        .list_daily_points("alice", None, None)?
        .into_iter()
        .map(|p| p.total_valuation)
        .collect();
    assert_eq!(values, vec![dec!(2000), dec!(2000), dec!(2000)]);

    let positions = h.store.read_positions("alice")?;
    assert_eq!(positions[0].current_holding, dec!(2000));
    assert_eq!(positions[0].yesterday_holding, dec!(2000));
    Ok(())
}

#[tokio::test]
async fn test_rollover_for_all_users() -> Result<()> {
    let h = harness()?;
    record(&h.store, "alice", "AAA", Side::Buy, 1, dec!(10), at(2025, 3, 1, 10))?;
    record(&h.store, "bob", "BBB", Side::Buy, 2, dec!(10), at(2025, 3, 1, 10))?;

    let outcomes = h.engine.scheduler().run_for_all_users().await?;
    let users: Vec<&str> = outcomes.iter().map(|(u, _)| u.as_str()).collect();
    assert_eq!(users, vec!["alice", "bob"]);
    assert!(outcomes
        .iter()
        .all(|(_, o)| matches!(o, RolloverOutcome::Committed { .. })));

    let again = h.engine.scheduler().run_for_all_users().await?;
    assert!(again.iter().all(|(_, o)| *o == RolloverOutcome::Skipped));
    Ok(())
}

#[tokio::test]
async fn test_backfill_does_not_overwrite_rollover_points() -> Result<()> {
    let h = harness()?;
    record(&h.store, "alice", "AAA", Side::Buy, 10, dec!(10), at(2025, 1, 6, 15))?;
    h.gateway.set_closes(
        "AAA",
        &[
            (day(2025, 1, 6), dec!(10)),
            (day(2025, 1, 7), dec!(10.5)),
            (day(2025, 1, 8), dec!(11)),
        ],
    );

    // A rollover already recorded the 7th.
    assert!(h.store.append_daily_point("alice", day(2025, 1, 7), dec!(999))?);

    let summary = h
        .engine
        .backfill_history("alice", day(2025, 1, 6), day(2025, 1, 8))
        .await?;
    assert_eq!(summary.appended, 2);
    assert_eq!(summary.skipped, 1);

    let points = h
        .store
        .list_daily_points("alice", Some(day(2025, 1, 7)), None)?;
    assert_eq!(points[0].total_valuation, dec!(999));
    assert_eq!(points[1].total_valuation, dec!(110));
    Ok(())
}

#[tokio::test]
async fn test_backfill_skips_days_missing_a_close() -> Result<()> {
    let h = harness()?;
    record(&h.store, "alice", "AAA", Side::Buy, 10, dec!(10), at(2025, 1, 6, 15))?;
    record(&h.store, "alice", "BBB", Side::Buy, 1, dec!(50), at(2025, 1, 6, 15))?;
    h.gateway.set_closes("AAA", &[(day(2025, 1, 6), dec!(10))]);

    let summary = h
        .engine
        .backfill_history("alice", day(2025, 1, 6), day(2025, 1, 6))
        .await?;
    assert_eq!(summary.appended, 0);
    assert_eq!(summary.unavailable_symbols, vec!["BBB"]);
    assert!(h.store.list_daily_points("alice", None, None)?.is_empty());

    h.gateway.set_closes("BBB", &[(day(2025, 1, 6), dec!(100))]);
    let retry = h
        .engine
        .backfill_history("alice", day(2025, 1, 6), day(2025, 1, 6))
        .await?;
    assert_eq!(retry.appended, 1);
    assert_eq!(
        h.store.list_daily_points("alice", None, None)?[0].total_valuation,
        dec!(200)
    );
    Ok(())
}

#[tokio::test]
async fn test_empty_ledger_is_invalid() -> Result<()> {
    let h = harness()?;
    let err = h.engine.compute_portfolio_report("nobody").await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidPortfolioFormat(_)));
    Ok(())
}
