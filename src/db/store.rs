//! Collaborator contracts for persisted state.
//!
//! The engine only talks to storage through these traits. [`Database`]
//! (SQLite) is the production implementation and [`MemoryStore`] backs
//! tests and dry runs.
//!
//! [`Database`]: crate::db::Database
//! [`MemoryStore`]: crate::db::MemoryStore

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::db::models::{
    merge_positions, DailyValuationPoint, JobRunRecord, Position, PositionUpdate, Transaction,
};
use crate::error::Result;

/// Read side of the append-only transaction ledger
pub trait TransactionLedger: Send + Sync {
    /// All transactions for a user, oldest first.
    fn read_transactions(&self, user_id: &str) -> Result<Vec<Transaction>>;

    fn append_transaction(&self, tx: &Transaction) -> Result<i64>;

    /// Users with at least one ledger entry
    fn list_users(&self) -> Result<Vec<String>>;
}

pub trait PositionStore: Send + Sync {
    fn read_positions(&self, user_id: &str) -> Result<Vec<Position>>;

    /// Replace the stored position set for a user in one step.
    fn write_positions(&self, user_id: &str, positions: &[Position]) -> Result<()>;

    /// Merge freshly reconstructed and priced positions into the stored
    /// rows and return the result. Stored `yesterday_holding` baselines are
    /// kept, so this must read and write without letting a rollover commit
    /// in between.
    ///
    /// The default is staged (read, then write). Stores with real
    /// transactions should override it.
    fn refresh_positions(&self, user_id: &str, updates: &[PositionUpdate]) -> Result<Vec<Position>> {
        let merged = merge_positions(self.read_positions(user_id)?, updates)?;
        self.write_positions(user_id, &merged)?;
        Ok(merged)
    }
}

pub trait JobRunStore: Send + Sync {
    fn read_job_record(&self, user_id: &str, job_name: &str) -> Result<Option<JobRunRecord>>;

    fn write_job_record(&self, record: &JobRunRecord) -> Result<()>;
}

pub trait DailyValuationStore: Send + Sync {
    /// Returns `false` (and writes nothing) when the day already has a point.
    fn append_daily_point(&self, user_id: &str, date: NaiveDate, value: Decimal) -> Result<bool>;

    fn list_daily_points(
        &self,
        user_id: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<DailyValuationPoint>>;
}

/// Result of trying to commit a rollover
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloverCommit {
    /// Baselines advanced and the job record moved to `now`.
    Applied { positions: usize },
    /// The job record no longer matched what the caller observed;
    /// someone else already committed.
    Superseded,
}

/// Commit point of the daily rollover.
pub trait RolloverStore: PositionStore + JobRunStore {
    /// Copy `current_holding` into `yesterday_holding` for every position and
    /// stamp the job record, provided the record still equals
    /// `expected_last_run`.
    ///
    /// The default is staged: the whole position set is swapped in one
    /// `write_positions` call, then the job record is written. A failure in
    /// the first step leaves the job record untouched. Stores with real
    /// transactions should override this with a single atomic
    /// compare-and-swap.
    fn commit_rollover(
        &self,
        user_id: &str,
        job_name: &str,
        expected_last_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<RolloverCommit> {
        let observed = self
            .read_job_record(user_id, job_name)?
            .map(|r| r.last_run);
        if observed != expected_last_run {
            return Ok(RolloverCommit::Superseded);
        }

        let rolled: Vec<Position> = self
            .read_positions(user_id)?
            .into_iter()
            .map(|p| Position {
                yesterday_holding: p.current_holding,
                ..p
            })
            .collect();
        self.write_positions(user_id, &rolled)?;

        self.write_job_record(&JobRunRecord {
            job_name: job_name.to_string(),
            user_id: user_id.to_string(),
            last_run: now,
        })?;

        Ok(RolloverCommit::Applied {
            positions: rolled.len(),
        })
    }
}

/// Everything the engine needs from storage.
pub trait EngineStore: TransactionLedger + RolloverStore + DailyValuationStore {}

impl<T> EngineStore for T where T: TransactionLedger + RolloverStore + DailyValuationStore {}
