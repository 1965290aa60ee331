// Database module - SQLite-backed ledger, positions, job records and daily series

pub mod memory;
pub mod models;
pub mod store;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::{EngineError, Result};
pub use memory::MemoryStore;
pub use models::{
    merge_positions, DailyValuationPoint, JobRunRecord, Position, PositionUpdate, Side,
    Transaction, MAX_PRICE, MAX_QUANTITY,
};
pub use store::{
    DailyValuationStore, EngineStore, JobRunStore, PositionStore, RolloverCommit, RolloverStore,
    TransactionLedger,
};

/// Get the default database path (~/.folio/data.db), honoring FOLIO_DB_PATH
pub fn get_default_db_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("FOLIO_DB_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = std::env::var("HOME")
        .map_err(|_| EngineError::Persistence("HOME environment variable not set".to_string()))?;
    let folio_dir = PathBuf::from(home).join(".folio");

    std::fs::create_dir_all(&folio_dir).map_err(|e| {
        EngineError::Persistence(format!("failed to create {:?}: {}", folio_dir, e))
    })?;

    Ok(folio_dir.join("data.db"))
}

/// Open database connection
pub fn open_db(db_path: Option<PathBuf>) -> Result<Connection> {
    let path = match db_path {
        Some(p) => p,
        None => get_default_db_path()?,
    };
    let conn = Connection::open(&path).map_err(|e| {
        EngineError::Persistence(format!("failed to open database at {:?}: {}", path, e))
    })?;

    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;

    Ok(conn)
}

/// Initialize the database with schema
pub fn init_database(db_path: Option<PathBuf>) -> Result<()> {
    let path = match db_path {
        Some(p) => p,
        None => get_default_db_path()?,
    };

    info!("Initializing database at: {:?}", path);

    let conn = open_db(Some(path))?;
    apply_schema(&conn)?;

    info!("Database initialized successfully");
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(include_str!("schema.sql"))
        .map_err(|e| EngineError::Persistence(format!("failed to execute schema: {}", e)))
}

/// SQLite implementation of every storage contract the engine uses
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and apply the schema.
    pub fn open(db_path: Option<PathBuf>) -> Result<Self> {
        let conn = open_db(db_path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| EngineError::Persistence("database lock poisoned".to_string()))
    }
}

fn millis_to_utc(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(0, ms))
}

fn read_quantity(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<u64> {
    let raw: i64 = row.get(idx)?;
    u64::try_from(raw).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, raw))
}

impl TransactionLedger for Database {
    fn read_transactions(&self, user_id: &str) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, symbol, side, quantity, price, executed_at
             FROM transactions
             WHERE user_id = ?1
             ORDER BY executed_at ASC, id ASC",
        )?;

        let rows = stmt
            .query_map([user_id], |row| {
                let side: String = row.get(3)?;
                Ok((
                    Transaction {
                        id: Some(row.get(0)?),
                        user_id: row.get(1)?,
                        symbol: row.get(2)?,
                        side: Side::Buy,
                        quantity: read_quantity(row, 4)?,
                        price: get_decimal_value(row, 5)?,
                        timestamp: row.get(6)?,
                    },
                    side,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // A side we cannot parse means the ledger is malformed; surface it
        // instead of guessing.
        rows.into_iter()
            .map(|(tx, side)| {
                Ok(Transaction {
                    side: side.parse()?,
                    ..tx
                })
            })
            .collect()
    }

    fn append_transaction(&self, tx: &Transaction) -> Result<i64> {
        tx.validate()?;
        let quantity = i64::try_from(tx.quantity)
            .map_err(|_| EngineError::invalid(format!("{}: quantity too large", tx.symbol)))?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO transactions (user_id, symbol, side, quantity, price, executed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                tx.user_id,
                tx.symbol,
                tx.side.as_str(),
                quantity,
                tx.price.to_string(),
                tx.timestamp,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn list_users(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT DISTINCT user_id FROM transactions ORDER BY user_id")?;
        let users = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(users)
    }
}

fn query_positions(conn: &Connection, user_id: &str) -> Result<Vec<Position>> {
    let mut stmt = conn.prepare(
        "SELECT symbol, quantity, average_cost, current_holding, yesterday_holding
         FROM positions
         WHERE user_id = ?1
         ORDER BY symbol",
    )?;

    let positions = stmt
        .query_map([user_id], |row| {
            Ok(Position {
                symbol: row.get(0)?,
                quantity: read_quantity(row, 1)?,
                average_cost: get_decimal_value(row, 2)?,
                current_holding: get_decimal_value(row, 3)?,
                yesterday_holding: get_decimal_value(row, 4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(positions)
}

/// Swap a user's rows for `positions`. Callers own the surrounding transaction.
fn replace_positions(conn: &Connection, user_id: &str, positions: &[Position]) -> Result<()> {
    conn.execute("DELETE FROM positions WHERE user_id = ?1", [user_id])?;
    let mut insert = conn.prepare(
        "INSERT INTO positions (
            user_id, symbol, quantity, average_cost, current_holding, yesterday_holding
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for p in positions {
        let quantity = i64::try_from(p.quantity)
            .map_err(|_| EngineError::invalid(format!("{}: quantity too large", p.symbol)))?;
        insert.execute(params![
            user_id,
            p.symbol,
            quantity,
            p.average_cost.to_string(),
            p.current_holding.to_string(),
            p.yesterday_holding.to_string(),
        ])?;
    }
    Ok(())
}

impl PositionStore for Database {
    fn read_positions(&self, user_id: &str) -> Result<Vec<Position>> {
        let conn = self.conn()?;
        query_positions(&conn, user_id)
    }

    fn write_positions(&self, user_id: &str, positions: &[Position]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        replace_positions(&tx, user_id, positions)?;
        tx.commit()?;
        debug!("Stored {} positions for {}", positions.len(), user_id);
        Ok(())
    }

    /// Read, merge and write under one IMMEDIATE transaction so a rollover
    /// commit cannot land between the read and the write.
    fn refresh_positions(&self, user_id: &str, updates: &[PositionUpdate]) -> Result<Vec<Position>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let merged = merge_positions(query_positions(&tx, user_id)?, updates)?;
        replace_positions(&tx, user_id, &merged)?;
        tx.commit()?;
        debug!("Refreshed {} positions for {}", merged.len(), user_id);
        Ok(merged)
    }
}

impl JobRunStore for Database {
    fn read_job_record(&self, user_id: &str, job_name: &str) -> Result<Option<JobRunRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT job_name, user_id, last_run_ms FROM job_runs
                 WHERE user_id = ?1 AND job_name = ?2",
                params![user_id, job_name],
                |row| {
                    Ok(JobRunRecord {
                        job_name: row.get(0)?,
                        user_id: row.get(1)?,
                        last_run: millis_to_utc(row.get(2)?)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn write_job_record(&self, record: &JobRunRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO job_runs (user_id, job_name, last_run_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT (user_id, job_name) DO UPDATE SET last_run_ms = excluded.last_run_ms",
            params![
                record.user_id,
                record.job_name,
                record.last_run.timestamp_millis()
            ],
        )?;
        Ok(())
    }
}

impl RolloverStore for Database {
    /// Single SQLite transaction: compare-and-swap the job record, then
    /// advance every baseline. Either both land or neither does.
    fn commit_rollover(
        &self,
        user_id: &str,
        job_name: &str,
        expected_last_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<RolloverCommit> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let swapped = match expected_last_run {
            None => tx.execute(
                "INSERT INTO job_runs (user_id, job_name, last_run_ms) VALUES (?1, ?2, ?3)
                 ON CONFLICT (user_id, job_name) DO NOTHING",
                params![user_id, job_name, now.timestamp_millis()],
            )?,
            Some(prev) => tx.execute(
                "UPDATE job_runs SET last_run_ms = ?3
                 WHERE user_id = ?1 AND job_name = ?2 AND last_run_ms = ?4",
                params![
                    user_id,
                    job_name,
                    now.timestamp_millis(),
                    prev.timestamp_millis()
                ],
            )?,
        };

        if swapped == 0 {
            // Dropping the transaction rolls it back.
            return Ok(RolloverCommit::Superseded);
        }

        let positions = tx.execute(
            "UPDATE positions
             SET yesterday_holding = current_holding, updated_at = datetime('now')
             WHERE user_id = ?1",
            [user_id],
        )?;

        tx.commit()?;
        Ok(RolloverCommit::Applied { positions })
    }
}

impl DailyValuationStore for Database {
    fn append_daily_point(&self, user_id: &str, date: NaiveDate, value: Decimal) -> Result<bool> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO daily_valuations (user_id, valuation_date, total_valuation)
             VALUES (?1, ?2, ?3)",
            params![user_id, date, value.to_string()],
        )?;
        Ok(inserted > 0)
    }

    fn list_daily_points(
        &self,
        user_id: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<DailyValuationPoint>> {
        let conn = self.conn()?;
        let mut sql = String::from(
            "SELECT valuation_date, total_valuation FROM daily_valuations WHERE user_id = ?",
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(user_id.to_string())];

        if let Some(f) = from {
            sql.push_str(" AND valuation_date >= ?");
            params.push(Box::new(f));
        }
        if let Some(t) = to {
            sql.push_str(" AND valuation_date <= ?");
            params.push(Box::new(t));
        }
        sql.push_str(" ORDER BY valuation_date ASC");

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let points = stmt
            .query_map(param_refs.as_slice(), |row| {
                Ok(DailyValuationPoint {
                    date: row.get(0)?,
                    total_valuation: get_decimal_value(row, 1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(points)
    }
}

/// Helper to read Decimal from SQLite (handles INTEGER, REAL and TEXT)
pub fn get_decimal_value(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Decimal> {
    use rusqlite::types::ValueRef;

    match row.get_ref(idx)? {
        ValueRef::Text(bytes) => {
            let s = std::str::from_utf8(bytes)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))?;
            Decimal::from_str(s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
            })
        }
        ValueRef::Integer(i) => Ok(Decimal::from(i)),
        ValueRef::Real(f) => Decimal::try_from(f).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Real, Box::new(e))
        }),
        _ => Err(rusqlite::Error::InvalidColumnType(
            idx,
            "decimal".to_string(),
            rusqlite::types::Type::Null,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_init_database() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        init_database(Some(db_path.clone())).unwrap();

        let conn = Connection::open(&db_path).unwrap();
        let table_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table'",
                [],
                |row| row.get(0),
            )
            .unwrap();

        assert!(table_count >= 4);
    }

    #[test]
    fn test_ledger_round_trip_keeps_order_and_decimals() {
        let db = Database::open_in_memory().unwrap();
        let later = Transaction::new("u1", "AAA", Side::Sell, 5, dec!(12.345), ts(4, 10)).unwrap();
        let earlier = Transaction::new("u1", "AAA", Side::Buy, 10, dec!(10.01), ts(3, 10)).unwrap();
        db.append_transaction(&later).unwrap();
        db.append_transaction(&earlier).unwrap();
        db.append_transaction(
            &Transaction::new("u2", "BBB", Side::Buy, 1, dec!(1), ts(3, 9)).unwrap(),
        )
        .unwrap();

        let txs = db.read_transactions("u1").unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].side, Side::Buy);
        assert_eq!(txs[0].price, dec!(10.01));
        assert_eq!(txs[1].price, dec!(12.345));
        assert_eq!(txs[1].timestamp, ts(4, 10));

        assert_eq!(db.list_users().unwrap(), vec!["u1", "u2"]);
    }

    #[test]
    fn test_write_positions_replaces_previous_set() {
        let db = Database::open_in_memory().unwrap();
        let a = Position::new("AAA", 10, dec!(10)).unwrap();
        let b = Position::new("BBB", 5, dec!(20)).unwrap();
        db.write_positions("u1", &[a.clone(), b]).unwrap();
        db.write_positions("u1", &[a.clone()]).unwrap();

        let stored = db.read_positions("u1").unwrap();
        assert_eq!(stored, vec![a]);
    }

    #[test]
    fn test_refresh_positions_keeps_committed_baseline() {
        let db = Database::open_in_memory().unwrap();
        let mut pos = Position::new("AAA", 10, dec!(100)).unwrap();
        pos.current_holding = dec!(1500);
        db.write_positions("u1", &[pos]).unwrap();
        db.commit_rollover("u1", "daily-rollover", None, ts(3, 0)).unwrap();

        let refreshed = db
            .refresh_positions(
                "u1",
                &[PositionUpdate {
                    symbol: "AAA".to_string(),
                    quantity: 10,
                    average_cost: dec!(100),
                    price: Some(dec!(160)),
                }],
            )
            .unwrap();

        assert_eq!(refreshed[0].yesterday_holding, dec!(1500));
        assert_eq!(refreshed[0].current_holding, dec!(1600));
        assert_eq!(db.read_positions("u1").unwrap(), refreshed);
    }

    #[test]
    fn test_commit_rollover_is_compare_and_swap() {
        let db = Database::open_in_memory().unwrap();
        let mut pos = Position::new("AAA", 10, dec!(10)).unwrap();
        pos.current_holding = dec!(180);
        db.write_positions("u1", &[pos]).unwrap();

        let first = db.commit_rollover("u1", "daily-rollover", None, ts(3, 0)).unwrap();
        assert_eq!(first, RolloverCommit::Applied { positions: 1 });
        assert_eq!(db.read_positions("u1").unwrap()[0].yesterday_holding, dec!(180));

        // Stale expectation: another instance already committed.
        let stale = db.commit_rollover("u1", "daily-rollover", None, ts(3, 1)).unwrap();
        assert_eq!(stale, RolloverCommit::Superseded);

        let record = db.read_job_record("u1", "daily-rollover").unwrap().unwrap();
        assert_eq!(record.last_run, ts(3, 0));

        let next = db
            .commit_rollover("u1", "daily-rollover", Some(ts(3, 0)), ts(4, 0))
            .unwrap();
        assert_eq!(next, RolloverCommit::Applied { positions: 1 });
    }

    #[test]
    fn test_daily_points_are_unique_per_day() {
        let db = Database::open_in_memory().unwrap();
        let d1 = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();

        assert!(db.append_daily_point("u1", d1, dec!(100.50)).unwrap());
        assert!(!db.append_daily_point("u1", d1, dec!(200)).unwrap());
        assert!(db.append_daily_point("u1", d2, dec!(101)).unwrap());
        assert!(db.append_daily_point("u2", d1, dec!(5)).unwrap());

        let all = db.list_daily_points("u1", None, None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].total_valuation, dec!(100.50));

        let tail = db.list_daily_points("u1", Some(d2), None).unwrap();
        assert_eq!(tail, vec![DailyValuationPoint { date: d2, total_valuation: dec!(101) }]);
    }
}
