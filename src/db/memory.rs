use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::db::models::{
    merge_positions, DailyValuationPoint, JobRunRecord, Position, PositionUpdate, Transaction,
};
use crate::db::store::{
    DailyValuationStore, JobRunStore, PositionStore, RolloverCommit, RolloverStore,
    TransactionLedger,
};
use crate::error::{EngineError, Result};

/// Process-local store with the same contracts as the SQLite one.
#[derive(Default)]
pub struct MemoryStore {
    transactions: Mutex<Vec<Transaction>>,
    positions: Mutex<HashMap<String, Vec<Position>>>,
    jobs: Mutex<HashMap<(String, String), JobRunRecord>>,
    points: Mutex<HashMap<String, BTreeMap<NaiveDate, Decimal>>>,
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    m.lock()
        .map_err(|_| EngineError::Persistence("memory store lock poisoned".to_string()))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransactionLedger for MemoryStore {
    fn read_transactions(&self, user_id: &str) -> Result<Vec<Transaction>> {
        let mut txs: Vec<Transaction> = lock(&self.transactions)?
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        txs.sort_by_key(|t| t.timestamp);
        Ok(txs)
    }

    fn append_transaction(&self, tx: &Transaction) -> Result<i64> {
        tx.validate()?;
        let mut txs = lock(&self.transactions)?;
        let id = txs.len() as i64 + 1;
        txs.push(Transaction {
            id: Some(id),
            ..tx.clone()
        });
        Ok(id)
    }

    fn list_users(&self) -> Result<Vec<String>> {
        let mut users: Vec<String> = lock(&self.transactions)?
            .iter()
            .map(|t| t.user_id.clone())
            .collect();
        users.sort();
        users.dedup();
        Ok(users)
    }
}

impl PositionStore for MemoryStore {
    fn read_positions(&self, user_id: &str) -> Result<Vec<Position>> {
        Ok(lock(&self.positions)?
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    fn write_positions(&self, user_id: &str, positions: &[Position]) -> Result<()> {
        lock(&self.positions)?.insert(user_id.to_string(), positions.to_vec());
        Ok(())
    }

    fn refresh_positions(&self, user_id: &str, updates: &[PositionUpdate]) -> Result<Vec<Position>> {
        let mut positions = lock(&self.positions)?;
        let stored = positions.get(user_id).cloned().unwrap_or_default();
        let merged = merge_positions(stored, updates)?;
        positions.insert(user_id.to_string(), merged.clone());
        Ok(merged)
    }
}

impl JobRunStore for MemoryStore {
    fn read_job_record(&self, user_id: &str, job_name: &str) -> Result<Option<JobRunRecord>> {
        Ok(lock(&self.jobs)?
            .get(&(user_id.to_string(), job_name.to_string()))
            .cloned())
    }

    fn write_job_record(&self, record: &JobRunRecord) -> Result<()> {
        lock(&self.jobs)?.insert(
            (record.user_id.clone(), record.job_name.clone()),
            record.clone(),
        );
        Ok(())
    }
}

impl RolloverStore for MemoryStore {
    /// Holds the job and position locks for the whole swap.
    fn commit_rollover(
        &self,
        user_id: &str,
        job_name: &str,
        expected_last_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<RolloverCommit> {
        let mut jobs = lock(&self.jobs)?;
        let key = (user_id.to_string(), job_name.to_string());
        if jobs.get(&key).map(|r| r.last_run) != expected_last_run {
            return Ok(RolloverCommit::Superseded);
        }

        let mut positions = lock(&self.positions)?;
        let rolled = positions.entry(user_id.to_string()).or_default();
        for p in rolled.iter_mut() {
            p.yesterday_holding = p.current_holding;
        }
        let count = rolled.len();

        jobs.insert(
            key,
            JobRunRecord {
                job_name: job_name.to_string(),
                user_id: user_id.to_string(),
                last_run: now,
            },
        );
        Ok(RolloverCommit::Applied { positions: count })
    }
}

impl DailyValuationStore for MemoryStore {
    fn append_daily_point(&self, user_id: &str, date: NaiveDate, value: Decimal) -> Result<bool> {
        let mut points = lock(&self.points)?;
        let series = points.entry(user_id.to_string()).or_default();
        if series.contains_key(&date) {
            return Ok(false);
        }
        series.insert(date, value);
        Ok(true)
    }

    fn list_daily_points(
        &self,
        user_id: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<DailyValuationPoint>> {
        let points = lock(&self.points)?;
        let Some(series) = points.get(user_id) else {
            return Ok(Vec::new());
        };
        Ok(series
            .iter()
            .filter(|(d, _)| from.map_or(true, |f| **d >= f) && to.map_or(true, |t| **d <= t))
            .map(|(d, v)| DailyValuationPoint {
                date: *d,
                total_valuation: *v,
            })
            .collect())
    }
}
