//! Error handling for the valuation engine
//!
//! Library code returns [`EngineError`] so callers can tell a bad ledger
//! from a storage failure. The binary layers `anyhow` on top for context
//! chaining.

use rust_decimal::Decimal;
use thiserror::Error;

/// Core error types for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("insufficient holding for {symbol}: selling {requested} but only {available} held")]
    InsufficientHolding {
        symbol: String,
        requested: u64,
        available: u64,
    },

    #[error("market data unavailable for {symbol}: {reason}")]
    SymbolDataUnavailable { symbol: String, reason: String },

    #[error("invalid portfolio: {0}")]
    InvalidPortfolioFormat(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn unavailable(symbol: &str, reason: impl Into<String>) -> Self {
        EngineError::SymbolDataUnavailable {
            symbol: symbol.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        EngineError::InvalidPortfolioFormat(msg.into())
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Persistence(err.to_string())
    }
}

impl From<rust_decimal::Error> for EngineError {
    fn from(err: rust_decimal::Error) -> Self {
        EngineError::Persistence(format!("decimal conversion: {}", err))
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Reject negative prices at construction time.
pub(crate) fn ensure_non_negative(what: &str, value: Decimal) -> Result<()> {
    if value < Decimal::ZERO {
        return Err(EngineError::invalid(format!(
            "{} must not be negative (got {})",
            what, value
        )));
    }
    Ok(())
}
