use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{ensure_non_negative, EngineError, Result};

/// Largest quantity a single transaction or position may carry
pub const MAX_QUANTITY: u64 = 1_000_000_000_000;

/// Largest per-share price a transaction may carry (1e12)
pub const MAX_PRICE: Decimal = Decimal::from_parts(0xD4A5_1000, 0xE8, 0, false, 0);

fn check_bounds(symbol: &str, quantity: u64, price: Decimal) -> Result<()> {
    if quantity == 0 {
        return Err(EngineError::invalid(format!(
            "{}: quantity must be a positive integer",
            symbol
        )));
    }
    if quantity > MAX_QUANTITY {
        return Err(EngineError::invalid(format!(
            "{}: quantity {} exceeds the maximum of {}",
            symbol, quantity, MAX_QUANTITY
        )));
    }
    ensure_non_negative("price", price)?;
    if price > MAX_PRICE {
        return Err(EngineError::invalid(format!(
            "{}: price {} exceeds the maximum of {}",
            symbol, price, MAX_PRICE
        )));
    }
    Ok(())
}

/// Transaction side (buy or sell)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl FromStr for Side {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" | "B" => Ok(Side::Buy),
            "SELL" | "S" => Ok(Side::Sell),
            other => Err(EngineError::invalid(format!(
                "unknown transaction side '{}'",
                other
            ))),
        }
    }
}

/// Ledger entry (buy or sell of a symbol). Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: Option<i64>,
    pub user_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: u64,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        user_id: &str,
        symbol: &str,
        side: Side,
        quantity: u64,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        let symbol = symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(EngineError::invalid("transaction symbol is empty"));
        }
        if user_id.trim().is_empty() {
            return Err(EngineError::invalid("transaction user is empty"));
        }
        check_bounds(&symbol, quantity, price)?;

        Ok(Self {
            id: None,
            user_id: user_id.trim().to_string(),
            symbol,
            side,
            quantity,
            price,
            timestamp,
        })
    }

    /// Re-check invariants on a record that did not come through `new`
    /// (e.g. read back from storage).
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(EngineError::invalid("transaction symbol is empty"));
        }
        check_bounds(&self.symbol, self.quantity, self.price)
    }

    pub fn total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

/// Current holding of one symbol for one user.
///
/// `quantity`/`average_cost` come from ledger reconstruction;
/// `yesterday_holding` is only advanced by the daily rollover.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub quantity: u64,
    pub average_cost: Decimal,
    pub current_holding: Decimal,
    pub yesterday_holding: Decimal,
}

impl Position {
    pub fn new(symbol: &str, quantity: u64, average_cost: Decimal) -> Result<Self> {
        ensure_non_negative("average cost", average_cost)?;
        let cost = average_cost
            .checked_mul(Decimal::from(quantity))
            .ok_or_else(|| EngineError::invalid(format!("{}: position value overflows", symbol)))?;
        Ok(Self {
            symbol: symbol.to_ascii_uppercase(),
            quantity,
            average_cost,
            current_holding: cost,
            yesterday_holding: cost,
        })
    }

    pub fn invested(&self) -> Decimal {
        self.average_cost * Decimal::from(self.quantity)
    }

    /// Unit price implied by the stored prior-day baseline.
    pub fn yesterday_price(&self) -> Option<Decimal> {
        if self.quantity == 0 {
            return None;
        }
        Some(self.yesterday_holding / Decimal::from(self.quantity))
    }

    /// Unit price implied by the last refreshed holding value.
    pub fn current_price(&self) -> Option<Decimal> {
        if self.quantity == 0 {
            return None;
        }
        Some(self.current_holding / Decimal::from(self.quantity))
    }

    /// Apply a freshly reconstructed quantity/cost while keeping the stored
    /// per-unit baselines, so today's gain stays `qty * (price - prior price)`.
    pub fn rebase(&self, quantity: u64, average_cost: Decimal) -> Result<Self> {
        let qty = Decimal::from(quantity);
        let yesterday_price = self.yesterday_price().unwrap_or(average_cost);
        let current_price = self.current_price().unwrap_or(average_cost);
        let overflow = || EngineError::invalid(format!("{}: position value overflows", self.symbol));
        Ok(Self {
            symbol: self.symbol.clone(),
            quantity,
            average_cost,
            current_holding: qty.checked_mul(current_price).ok_or_else(overflow)?,
            yesterday_holding: qty.checked_mul(yesterday_price).ok_or_else(overflow)?,
        })
    }

    /// Revalue at `price`. Fails instead of overflowing on absurd prices.
    pub fn with_price(&self, price: Decimal) -> Result<Self> {
        let current_holding = price
            .checked_mul(Decimal::from(self.quantity))
            .ok_or_else(|| {
                EngineError::unavailable(&self.symbol, format!("price {} is out of range", price))
            })?;
        Ok(Self {
            current_holding,
            ..self.clone()
        })
    }
}

/// Freshly reconstructed holding for one symbol, with its latest price when
/// the lookup succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionUpdate {
    pub symbol: String,
    pub quantity: u64,
    pub average_cost: Decimal,
    pub price: Option<Decimal>,
}

impl PositionUpdate {
    /// Merge into the stored row, if any. The stored per-unit baselines are
    /// kept; a symbol seen for the first time starts from its average cost.
    pub fn apply(&self, stored: Option<&Position>) -> Result<Position> {
        let base = match stored {
            Some(old) => old.rebase(self.quantity, self.average_cost)?,
            None => Position::new(&self.symbol, self.quantity, self.average_cost)?,
        };
        match self.price {
            Some(price) => base.with_price(price),
            None => Ok(base),
        }
    }
}

/// Apply `updates` to a user's stored rows. Symbols missing from `updates`
/// are dropped.
pub fn merge_positions(stored: Vec<Position>, updates: &[PositionUpdate]) -> Result<Vec<Position>> {
    let stored: std::collections::BTreeMap<String, Position> =
        stored.into_iter().map(|p| (p.symbol.clone(), p)).collect();
    updates
        .iter()
        .map(|u| u.apply(stored.get(&u.symbol)))
        .collect()
}

/// One valuation point per (user, day), used for charting
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyValuationPoint {
    pub date: NaiveDate,
    pub total_valuation: Decimal,
}

/// Last successful run of a scheduled job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRunRecord {
    pub job_name: String,
    pub user_id: String,
    pub last_run: DateTime<Utc>,
}
