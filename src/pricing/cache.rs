use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

use super::{HistoricalBar, Interval, MarketDataGateway, Quote};
use crate::error::Result;

/// Quote cache entry
#[derive(Debug, Clone)]
struct CacheEntry {
    quote: Quote,
    fetched_at: Instant,
}

/// Gateway wrapper that reuses recent quotes for `ttl`.
///
/// Failures are never cached, so a symbol that timed out is retried on the
/// next valuation run. History requests pass straight through.
pub struct CachingGateway<G> {
    inner: G,
    cache: Arc<Mutex<HashMap<String, CacheEntry>>>,
    ttl: Duration,
}

impl<G: MarketDataGateway> CachingGateway<G> {
    pub fn new(inner: G, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        // A panic while holding the lock cannot leave an entry half-written.
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn clear_cache(&self) {
        self.entries().clear();
        debug!("Quote cache cleared");
    }

    pub fn cache_size(&self) -> usize {
        self.entries().len()
    }
}

#[async_trait]
impl<G: MarketDataGateway> MarketDataGateway for CachingGateway<G> {
    async fn get_quote(&self, symbol: &str) -> Result<Quote> {
        let cached = self
            .entries()
            .get(symbol)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .cloned();
        if let Some(entry) = cached {
            debug!(
                "Using cached quote for {} (age: {}s)",
                symbol,
                entry.fetched_at.elapsed().as_secs()
            );
            return Ok(entry.quote);
        }

        let quote = self.inner.get_quote(symbol).await?;

        self.entries().insert(
            symbol.to_string(),
            CacheEntry {
                quote: quote.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(quote)
    }

    async fn get_historical(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        interval: Interval,
    ) -> Result<Vec<HistoricalBar>> {
        self.inner.get_historical(symbol, start, end, interval).await
    }
}
