// Pricing module - market data gateway contract and bounded quote fan-out

pub mod cache;
pub mod yahoo;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::PricingConfig;
use crate::error::{EngineError, Result};

pub use cache::CachingGateway;
pub use yahoo::YahooGateway;

/// Latest quote for a symbol. Fundamentals are optional: not every provider
/// reports them for every instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub symbol: String,
    pub price: Decimal,
    pub market_cap: Option<Decimal>,
    /// Percent change versus the previous close
    pub change_percent: Option<Decimal>,
    pub trailing_pe: Option<Decimal>,
    /// Percent, e.g. 2.5 for 2.5%
    pub dividend_yield: Option<Decimal>,
}

impl Quote {
    pub fn new(symbol: &str, price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            price,
            market_cap: None,
            change_percent: None,
            trailing_pe: None,
            dividend_yield: None,
        }
    }
}

/// Bar size for historical series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Daily,
    Weekly,
    Monthly,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Daily => "1d",
            Interval::Weekly => "1wk",
            Interval::Monthly => "1mo",
        }
    }
}

/// Historical OHLC bar
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoricalBar {
    pub date: NaiveDate,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Decimal,
    pub volume: Option<u64>,
}

/// Source of quotes and price history
#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    async fn get_quote(&self, symbol: &str) -> Result<Quote>;

    /// Bars between `start` and `end` inclusive, oldest first.
    async fn get_historical(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        interval: Interval,
    ) -> Result<Vec<HistoricalBar>>;
}

/// Gateway that fails every lookup. Stands in for a live provider when
/// price fetching is switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineGateway;

#[async_trait]
impl MarketDataGateway for OfflineGateway {
    async fn get_quote(&self, symbol: &str) -> Result<Quote> {
        Err(EngineError::unavailable(symbol, "price fetching is disabled"))
    }

    async fn get_historical(
        &self,
        symbol: &str,
        _start: NaiveDate,
        _end: NaiveDate,
        _interval: Interval,
    ) -> Result<Vec<HistoricalBar>> {
        Err(EngineError::unavailable(symbol, "price fetching is disabled"))
    }
}

/// Concurrency cap and per-call deadline for a fan-out
#[derive(Debug, Clone, Copy)]
pub struct FetchLimits {
    pub max_concurrent: usize,
    pub timeout: Duration,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self::from(&PricingConfig::default())
    }
}

impl From<&PricingConfig> for FetchLimits {
    fn from(config: &PricingConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent_lookups.max(1),
            timeout: config.lookup_timeout(),
        }
    }
}

/// Run `op` once per distinct symbol with at most `limits.max_concurrent`
/// calls in flight, each bounded by `limits.timeout`, and wait for all of
/// them. Every requested symbol gets an entry; a failed, timed-out or
/// aborted call yields `SymbolDataUnavailable` for that symbol only.
///
/// The calls run on a `JoinSet`, so dropping the returned future aborts
/// whatever is still outstanding.
pub async fn fan_out<T, F, Fut>(
    symbols: &[String],
    limits: FetchLimits,
    op: F,
) -> BTreeMap<String, Result<T>>
where
    T: Send + 'static,
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let distinct: BTreeSet<String> = symbols.iter().cloned().collect();
    let semaphore = Arc::new(Semaphore::new(limits.max_concurrent.max(1)));
    let mut join_set = JoinSet::new();

    let mut results: BTreeMap<String, Result<T>> = BTreeMap::new();
    for symbol in &distinct {
        results.insert(
            symbol.clone(),
            Err(EngineError::unavailable(symbol, "lookup did not complete")),
        );
    }

    for symbol in distinct {
        let sem = semaphore.clone();
        let call = op(symbol.clone());
        let deadline = limits.timeout;

        join_set.spawn(async move {
            let _permit = match sem.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    let err = EngineError::unavailable(&symbol, "lookup pool closed");
                    return (symbol, Err(err));
                }
            };

            let outcome = match tokio::time::timeout(deadline, call).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::unavailable(
                    &symbol,
                    format!("timed out after {:?}", deadline),
                )),
            };
            (symbol, outcome)
        });
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((symbol, outcome)) => {
                if let Err(e) = &outcome {
                    warn!("Lookup failed for {}: {}", symbol, e);
                } else {
                    debug!("Lookup finished for {}", symbol);
                }
                results.insert(symbol, outcome);
            }
            Err(e) => warn!("Lookup task aborted: {}", e),
        }
    }

    results
}

/// Fetch quotes for `symbols` through `gateway` with bounded concurrency.
pub async fn fetch_quotes(
    gateway: Arc<dyn MarketDataGateway>,
    symbols: &[String],
    limits: FetchLimits,
) -> BTreeMap<String, Result<Quote>> {
    fan_out(symbols, limits, move |symbol| {
        let gateway = gateway.clone();
        async move { gateway.get_quote(&symbol).await }
    })
    .await
}

/// Fetch price history for `symbols` with bounded concurrency.
pub async fn fetch_histories(
    gateway: Arc<dyn MarketDataGateway>,
    symbols: &[String],
    start: NaiveDate,
    end: NaiveDate,
    interval: Interval,
    limits: FetchLimits,
) -> BTreeMap<String, Result<Vec<HistoricalBar>>> {
    fan_out(symbols, limits, move |symbol| {
        let gateway = gateway.clone();
        async move {
            gateway
                .get_historical(&symbol, start, end, interval)
                .await
        }
    })
    .await
}

/// Convert a provider float to Decimal, trimming binary noise.
pub(crate) fn to_decimal(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64_retain(value).map(|d| d.round_dp(6).normalize())
}
