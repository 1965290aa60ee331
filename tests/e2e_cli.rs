
use assert_cmd::prelude::*;
use cli_helpers::{add_transaction, base_cmd, list_transactions_json, run_cmd, run_cmd_json};
use predicates::prelude::*;
use tempfile::TempDir;

fn setup_temp_home() -> TempDir {
    TempDir::new().expect("failed to create temp home")
}

#[test]
fn init_creates_database_under_home() {
    let home = setup_temp_home();
    let db_path = sqlite_helpers::db_path(&home);
    assert!(!db_path.exists(), "db should start absent");

    base_cmd(&home)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Database ready"))
        .stdout(predicate::str::contains("\u{001b}[").not());

    assert!(db_path.exists());
}

#[test]
fn report_on_empty_ledger_is_friendly() {
    let home = setup_temp_home();

    base_cmd(&home)
        .arg("report")
        .assert()
        .success()
        .stdout(predicate::str::contains("No transactions found"))
        .stdout(predicate::str::contains("\u{001b}[").not());
}

#[test]
fn transactions_add_then_list() {
    let home = setup_temp_home();
    add_transaction(&home, "alice", "aapl", "buy", "10", "150.50", "2025-01-06").unwrap();
    add_transaction(&home, "alice", "AAPL", "sell", "4", "160", "2025-01-08").unwrap();
    add_transaction(&home, "bob", "MSFT", "buy", "1", "400", "2025-01-07").unwrap();

    let rows = list_transactions_json(&home, "alice").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["symbol"], "AAPL");
    assert_eq!(rows[0]["side"], "Buy");
    assert_eq!(rows[0]["quantity"], 10);
    assert_eq!(rows[1]["side"], "Sell");

    let output = run_cmd(&home, &["--user", "alice", "transactions", "list"]).unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("AAPL"));
    assert!(stdout.contains("$1,505.00"));
    assert!(!stdout.contains("MSFT"));
}

#[test]
fn invalid_transaction_input_fails() {
    let home = setup_temp_home();

    base_cmd(&home)
        .args(["transactions", "add", "AAPL", "buy", "0", "10"])
        .assert()
        .failure();

    base_cmd(&home)
        .args(["transactions", "add", "AAPL", "buy", "1", "ten"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid price"));

    base_cmd(&home)
        .args(["transactions", "add", "AAPL", "buy", "1", "10", "--date", "06/01/2025"])
        .assert()
        .failure();
}

#[test]
fn rollover_runs_once_and_records_history() {
    let home = setup_temp_home();
    add_transaction(&home, "alice", "AAPL", "buy", "10", "150", "2025-01-06").unwrap();

    let first = run_cmd_json(&home, &["--user", "alice", "rollover"]).unwrap();
    assert_eq!(first[0]["userId"], "alice");
    assert_eq!(first[0]["committed"], true);

    let second = run_cmd_json(&home, &["--user", "alice", "rollover"]).unwrap();
    assert_eq!(second[0]["committed"], false);

    let conn = sqlite_helpers::open_conn(&home).unwrap();
    let jobs = sqlite_helpers::list_job_runs(&conn).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].0, "alice");
    assert_eq!(jobs[0].1, "daily-rollover");
    assert_eq!(sqlite_helpers::count_daily_points(&conn, "alice").unwrap(), 1);

    let history = run_cmd_json(&home, &["--user", "alice", "history"]).unwrap();
    assert_eq!(history.as_array().map(|a| a.len()), Some(1));

    base_cmd(&home)
        .args(["--user", "alice", "history"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Valuation"));
}

#[test]
fn history_is_empty_before_any_rollover() {
    let home = setup_temp_home();

    base_cmd(&home)
        .args(["--user", "carol", "history"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No valuation history yet"));
}

#[test]
fn malformed_config_is_reported() {
    let home = setup_temp_home();
    let config_dir = home.path().join(".folio");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.toml"),
        "[pricing]\nmax_concurrent_lookups = 0\n",
    )
    .unwrap();
    add_transaction(&home, "alice", "AAPL", "buy", "1", "1", "2025-01-06").unwrap();

    base_cmd(&home)
        .args(["--user", "alice", "rollover"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration"));
}
