//! Daily rollover of the "yesterday" baseline.
//!
//! A rollover reprices every position, copies its `current_holding` into
//! `yesterday_holding` at most once per UTC calendar day and records the
//! day's total in the valuation series. Whether a run is due depends only on the
//! injected clock and the persisted job record, so the startup catch-up and
//! the daily timer go through the same check.

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::RolloverConfig;
use crate::db::{EngineStore, RolloverCommit};
use crate::engine::reprice_positions;
use crate::error::{EngineError, Result};
use crate::pricing::{FetchLimits, MarketDataGateway};

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used by tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: ChronoDuration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Whether a rollover should run at `now` given the last committed run.
///
/// Due when nothing has run yet, or when at least `24h - tolerance` has
/// passed and `now` is on a later UTC day than `last_run`.
pub fn is_due(now: DateTime<Utc>, last_run: Option<DateTime<Utc>>, tolerance: ChronoDuration) -> bool {
    match last_run {
        None => true,
        Some(last) => {
            now.date_naive() > last.date_naive()
                && now - last >= ChronoDuration::hours(24) - tolerance
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloverOutcome {
    Committed { positions: usize, total: Decimal },
    /// Not due yet, or another instance committed first
    Skipped,
}

pub struct RolloverScheduler {
    store: Arc<dyn EngineStore>,
    gateway: Arc<dyn MarketDataGateway>,
    clock: Arc<dyn Clock>,
    config: RolloverConfig,
    limits: FetchLimits,
}

impl RolloverScheduler {
    pub fn new(
        store: Arc<dyn EngineStore>,
        gateway: Arc<dyn MarketDataGateway>,
        clock: Arc<dyn Clock>,
        config: RolloverConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
            config,
            limits: FetchLimits::default(),
        }
    }

    pub fn with_fetch_limits(mut self, limits: FetchLimits) -> Self {
        self.limits = limits;
        self
    }

    fn tolerance(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.config.tolerance_minutes.max(0))
    }

    /// Run the rollover for one user if it is due.
    ///
    /// Holdings are repriced first, so the baseline and the day's point
    /// reflect today's quotes even when nobody asked for a report. A
    /// repricing error aborts the run before anything is committed.
    pub async fn run_daily_rollover(&self, user_id: &str) -> Result<RolloverOutcome> {
        let job = self.config.job_name.as_str();
        let now = self.clock.now();
        let last_run = self
            .store
            .read_job_record(user_id, job)?
            .map(|r| r.last_run);

        if !is_due(now, last_run, self.tolerance()) {
            debug!(
                "Rollover for {} not due (last run {:?}, now {})",
                user_id, last_run, now
            );
            return Ok(RolloverOutcome::Skipped);
        }

        let transactions = self.store.read_transactions(user_id)?;
        if !transactions.is_empty() {
            let repriced = reprice_positions(
                self.store.as_ref(),
                self.gateway.clone(),
                self.limits,
                user_id,
                &transactions,
            )
            .await?;
            debug!(
                "Repriced {} positions for {} before rollover",
                repriced.positions.len(),
                user_id
            );
        }

        let positions = match self.store.commit_rollover(user_id, job, last_run, now)? {
            RolloverCommit::Applied { positions } => positions,
            RolloverCommit::Superseded => {
                info!("Rollover for {} already committed elsewhere", user_id);
                return Ok(RolloverOutcome::Skipped);
            }
        };

        let total: Decimal = self
            .store
            .read_positions(user_id)?
            .iter()
            .map(|p| p.current_holding)
            .sum();

        let day = now.date_naive();
        if !self.store.append_daily_point(user_id, day, total)? {
            debug!("Valuation point for {} on {} already recorded", user_id, day);
        }

        info!(
            "Rolled over {} positions for {} (total {})",
            positions, user_id, total
        );
        Ok(RolloverOutcome::Committed { positions, total })
    }

    /// Run the guarded rollover for every user in the ledger. Per-user
    /// failures are logged and retried on the next pass.
    pub async fn run_for_all_users(&self) -> Result<Vec<(String, RolloverOutcome)>> {
        let mut outcomes = Vec::new();
        for user in self.store.list_users()? {
            match self.run_daily_rollover(&user).await {
                Ok(outcome) => outcomes.push((user, outcome)),
                Err(e) => warn!("Rollover failed for {}: {}", user, e),
            }
        }
        Ok(outcomes)
    }

    /// Next time the daily timer fires strictly after `now`.
    pub fn next_trigger(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let at = NaiveTime::from_hms_opt(
            self.config.trigger_hour_utc,
            self.config.trigger_minute_utc,
            0,
        )
        .ok_or_else(|| EngineError::Config("invalid rollover trigger time".to_string()))?;

        let today = now.date_naive().and_time(at).and_utc();
        if today > now {
            Ok(today)
        } else {
            Ok(today + ChronoDuration::days(1))
        }
    }

    /// Catch up once, then fire at the daily trigger until `shutdown`
    /// receives a message or its sender is dropped.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!("Rollover scheduler starting; running catch-up check");
        if let Err(e) = self.run_for_all_users().await {
            warn!("Catch-up rollover failed: {}", e);
        }

        loop {
            let now = self.clock.now();
            let next = self.next_trigger(now)?;
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!("Next rollover check at {}", next);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    if let Err(e) = self.run_for_all_users().await {
                        warn!("Scheduled rollover failed: {}", e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Rollover scheduler shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}
