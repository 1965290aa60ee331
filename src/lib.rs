//! Folio - equity portfolio valuation and analytics engine
//!
//! This library rebuilds positions from an append-only transaction ledger,
//! values them against live quotes, keeps a once-per-day "yesterday"
//! baseline through an idempotent rollover job, and assembles gain/loss,
//! allocation and risk analytics into a structured report.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod positions;
pub mod pricing;
pub mod reports;
pub mod scheduler;
pub mod utils;

pub use engine::{BackfillSummary, PortfolioEngine};
pub use error::{EngineError, Result};
