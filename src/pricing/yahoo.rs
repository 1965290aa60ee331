use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Url};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::{to_decimal, HistoricalBar, Interval, MarketDataGateway, Quote};
use crate::error::{EngineError, Result};

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";

/// Yahoo Finance quote response (`/v7/finance/quote`)
#[derive(Debug, Deserialize)]
struct QuoteEnvelope {
    #[serde(rename = "quoteResponse")]
    quote_response: QuoteResponse,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    result: Option<Vec<QuoteResult>>,
    error: Option<YahooError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResult {
    symbol: String,
    regular_market_price: Option<f64>,
    market_cap: Option<f64>,
    regular_market_change_percent: Option<f64>,
    #[serde(rename = "trailingPE")]
    trailing_pe: Option<f64>,
    /// Already a percentage
    dividend_yield: Option<f64>,
    /// A fraction
    trailing_annual_dividend_yield: Option<f64>,
}

/// Yahoo Finance chart response (`/v8/finance/chart`)
#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartData,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    result: Option<Vec<ChartResult>>,
    error: Option<YahooError>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<OhlcSeries>,
}

#[derive(Debug, Deserialize)]
struct OhlcSeries {
    open: Option<Vec<Option<f64>>>,
    high: Option<Vec<Option<f64>>>,
    low: Option<Vec<Option<f64>>>,
    close: Option<Vec<Option<f64>>>,
    volume: Option<Vec<Option<u64>>>,
}

#[derive(Debug, Deserialize)]
struct YahooError {
    code: String,
    description: String,
}

/// Market data gateway backed by Yahoo Finance's public endpoints
pub struct YahooGateway {
    client: Client,
    base_url: String,
}

impl YahooGateway {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, request_timeout)
    }

    pub fn with_base_url(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent("Mozilla/5.0 (compatible; FolioBot/1.0)")
            .timeout(request_timeout)
            .build()
            .map_err(|e| EngineError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_text(&self, symbol: &str, url: Url) -> Result<String> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EngineError::unavailable(symbol, format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(EngineError::unavailable(
                symbol,
                format!("Yahoo Finance returned status {}", response.status()),
            ));
        }

        response
            .text()
            .await
            .map_err(|e| EngineError::unavailable(symbol, format!("failed to read body: {}", e)))
    }
}

#[async_trait]
impl MarketDataGateway for YahooGateway {
    async fn get_quote(&self, symbol: &str) -> Result<Quote> {
        info!("Fetching quote for {} from Yahoo Finance", symbol);
        let url = quote_url(&self.base_url, symbol)?;
        let body = self.get_text(symbol, url).await?;
        parse_quote_response(symbol, &body)
    }

    async fn get_historical(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        interval: Interval,
    ) -> Result<Vec<HistoricalBar>> {
        info!(
            "Fetching {} history for {} from {} to {}",
            interval.as_str(),
            symbol,
            start,
            end
        );

        let period1 = start
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| EngineError::invalid("invalid start date"))?
            .and_utc()
            .timestamp();
        let period2 = end
            .and_hms_opt(23, 59, 59)
            .ok_or_else(|| EngineError::invalid("invalid end date"))?
            .and_utc()
            .timestamp();

        let url = chart_url(&self.base_url, symbol, period1, period2, interval)?;
        let body = self.get_text(symbol, url).await?;
        let bars = parse_chart_response(symbol, &body)?;
        debug!("Fetched {} bars for {}", bars.len(), symbol);
        Ok(bars)
    }
}

/// `base` plus escaped path segments. Symbols such as `^GSPC` or `BRK/B`
/// must stay a single segment.
fn endpoint(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| EngineError::Config(format!("invalid market data URL '{}': {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| EngineError::Config(format!("market data URL '{}' cannot take a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn quote_url(base: &str, symbol: &str) -> Result<Url> {
    let mut url = endpoint(base, &["v7", "finance", "quote"])?;
    url.query_pairs_mut().append_pair("symbols", symbol);
    Ok(url)
}

fn chart_url(
    base: &str,
    symbol: &str,
    period1: i64,
    period2: i64,
    interval: Interval,
) -> Result<Url> {
    let mut url = endpoint(base, &["v8", "finance", "chart", symbol])?;
    url.query_pairs_mut()
        .append_pair("period1", &period1.to_string())
        .append_pair("period2", &period2.to_string())
        .append_pair("interval", interval.as_str());
    Ok(url)
}

fn parse_quote_response(symbol: &str, body: &str) -> Result<Quote> {
    let envelope: QuoteEnvelope = serde_json::from_str(body)
        .map_err(|e| EngineError::unavailable(symbol, format!("unexpected quote payload: {}", e)))?;

    if let Some(error) = envelope.quote_response.error {
        return Err(EngineError::unavailable(
            symbol,
            format!("{} - {}", error.code, error.description),
        ));
    }

    let result = envelope
        .quote_response
        .result
        .unwrap_or_default()
        .into_iter()
        .find(|r| r.symbol.eq_ignore_ascii_case(symbol))
        .ok_or_else(|| EngineError::unavailable(symbol, "no quote returned"))?;

    let price = result
        .regular_market_price
        .and_then(to_decimal)
        .ok_or_else(|| EngineError::unavailable(symbol, "no price in quote"))?;

    let dividend_yield = result.dividend_yield.and_then(to_decimal).or_else(|| {
        result
            .trailing_annual_dividend_yield
            .and_then(to_decimal)
            .map(|fraction| fraction * Decimal::ONE_HUNDRED)
    });

    Ok(Quote {
        symbol: symbol.to_string(),
        price,
        market_cap: result.market_cap.and_then(to_decimal),
        change_percent: result.regular_market_change_percent.and_then(to_decimal),
        trailing_pe: result.trailing_pe.and_then(to_decimal),
        dividend_yield,
    })
}

fn parse_chart_response(symbol: &str, body: &str) -> Result<Vec<HistoricalBar>> {
    let envelope: ChartEnvelope = serde_json::from_str(body)
        .map_err(|e| EngineError::unavailable(symbol, format!("unexpected chart payload: {}", e)))?;

    if let Some(error) = envelope.chart.error {
        return Err(EngineError::unavailable(
            symbol,
            format!("{} - {}", error.code, error.description),
        ));
    }

    let result = envelope
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| EngineError::unavailable(symbol, "no chart data returned"))?;

    // A range with no trading days comes back without timestamps.
    let Some(timestamps) = result.timestamp else {
        return Ok(Vec::new());
    };

    let series = result
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::unavailable(symbol, "no OHLC series"))?;

    let opens = series.open.unwrap_or_default();
    let highs = series.high.unwrap_or_default();
    let lows = series.low.unwrap_or_default();
    let closes = series.close.unwrap_or_default();
    let volumes = series.volume.unwrap_or_default();

    let pick = |values: &[Option<f64>], i: usize| values.get(i).copied().flatten().and_then(to_decimal);

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let date = chrono::DateTime::from_timestamp(ts, 0)
            .ok_or_else(|| EngineError::unavailable(symbol, format!("invalid timestamp {}", ts)))?
            .date_naive();

        // Halted days carry null closes; skip them rather than invent a price.
        let Some(close) = pick(&closes, i) else {
            continue;
        };

        bars.push(HistoricalBar {
            date,
            open: pick(&opens, i),
            high: pick(&highs, i),
            low: pick(&lows, i),
            close,
            volume: volumes.get(i).copied().flatten(),
        });
    }

    Ok(bars)
}
