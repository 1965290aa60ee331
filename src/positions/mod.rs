//! Position reconstruction from the transaction ledger.
//!
//! Folds an ordered list of buys and sells into per-symbol holdings using the
//! average-cost method. Selling more than is held rejects that transaction
//! with [`EngineError::InsufficientHolding`] and leaves the running position
//! untouched.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::db::{Position, Side, Transaction, MAX_QUANTITY};
use crate::error::{EngineError, Result};

/// Realized gain/loss for one sale, measured against the average cost at the
/// time of the sale
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealizedGain {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub quantity: u64,
    pub sale_price: Decimal,
    pub cost_basis: Decimal,
    pub gain: Decimal,
}

/// Running average-cost position for a single symbol
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AverageCostPosition {
    quantity: u64,
    cost_basis: Decimal,
}

impl AverageCostPosition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quantity(&self) -> u64 {
        self.quantity
    }

    /// Average cost per unit
    pub fn cost_basis(&self) -> Decimal {
        self.cost_basis
    }

    /// Add `quantity` units at `price`. A position that would grow past
    /// [`MAX_QUANTITY`] or whose cost no longer fits a `Decimal` is rejected
    /// and left as it was.
    pub fn buy(&mut self, symbol: &str, quantity: u64, price: Decimal) -> Result<()> {
        let overflow = || EngineError::invalid(format!("{}: position size overflows", symbol));

        let new_quantity = self
            .quantity
            .checked_add(quantity)
            .filter(|q| *q <= MAX_QUANTITY)
            .ok_or_else(overflow)?;

        let held = Decimal::from(self.quantity);
        let added = Decimal::from(quantity);
        let total = Decimal::from(new_quantity);
        let cost = self
            .cost_basis
            .checked_mul(held)
            .and_then(|c| price.checked_mul(added).and_then(|p| c.checked_add(p)))
            .ok_or_else(overflow)?;

        if total > Decimal::ZERO {
            self.cost_basis = cost.checked_div(total).ok_or_else(overflow)?;
        }
        self.quantity = new_quantity;
        Ok(())
    }

    /// Remove `quantity` units at `price`; the average cost is unchanged.
    /// Returns the realized gain of the sale.
    pub fn sell(&mut self, symbol: &str, quantity: u64, price: Decimal) -> Result<Decimal> {
        if quantity > self.quantity {
            return Err(EngineError::InsufficientHolding {
                symbol: symbol.to_string(),
                requested: quantity,
                available: self.quantity,
            });
        }

        let gain = price
            .checked_sub(self.cost_basis)
            .and_then(|d| d.checked_mul(Decimal::from(quantity)))
            .ok_or_else(|| EngineError::invalid(format!("{}: realized gain overflows", symbol)))?;
        self.quantity -= quantity;
        Ok(gain)
    }
}

/// Result of folding a ledger
#[derive(Debug, Clone, Default)]
pub struct Reconstruction {
    /// Open positions keyed by symbol; fully sold symbols are dropped.
    pub positions: BTreeMap<String, Position>,
    pub realized: Vec<RealizedGain>,
}

impl Reconstruction {
    pub fn total_realized(&self) -> Decimal {
        self.realized.iter().map(|r| r.gain).sum()
    }

    pub fn into_positions(self) -> Vec<Position> {
        self.positions.into_values().collect()
    }
}

/// Running book of positions, one [`AverageCostPosition`] per symbol
#[derive(Debug, Default)]
pub struct PositionBook {
    book: BTreeMap<String, AverageCostPosition>,
    realized: Vec<RealizedGain>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one transaction. On rejection the book is left as it was.
    pub fn apply(&mut self, tx: &Transaction) -> Result<()> {
        tx.validate()?;

        match tx.side {
            Side::Buy => {
                self.book
                    .entry(tx.symbol.clone())
                    .or_default()
                    .buy(&tx.symbol, tx.quantity, tx.price)?;
            }
            Side::Sell => {
                let position = self.book.get_mut(&tx.symbol).ok_or_else(|| {
                    EngineError::InsufficientHolding {
                        symbol: tx.symbol.clone(),
                        requested: tx.quantity,
                        available: 0,
                    }
                })?;
                let cost_basis = position.cost_basis();
                let gain = position.sell(&tx.symbol, tx.quantity, tx.price)?;
                self.realized.push(RealizedGain {
                    symbol: tx.symbol.clone(),
                    timestamp: tx.timestamp,
                    quantity: tx.quantity,
                    sale_price: tx.price,
                    cost_basis,
                    gain,
                });
            }
        }

        Ok(())
    }

    pub fn position(&self, symbol: &str) -> Option<&AverageCostPosition> {
        self.book.get(symbol)
    }

    pub fn finish(self) -> Result<Reconstruction> {
        let mut positions = BTreeMap::new();
        for (symbol, pos) in self.book {
            if pos.quantity() == 0 {
                continue;
            }
            positions.insert(
                symbol.clone(),
                Position::new(&symbol, pos.quantity(), pos.cost_basis())?,
            );
        }

        Ok(Reconstruction {
            positions,
            realized: self.realized,
        })
    }
}

/// Fold a user's ledger into current positions.
///
/// The input is re-sorted by timestamp (stable, so same-instant entries keep
/// ledger order). An empty ledger is rejected as malformed input.
pub fn reconstruct_positions(transactions: &[Transaction]) -> Result<Reconstruction> {
    if transactions.is_empty() {
        return Err(EngineError::invalid("ledger contains no transactions"));
    }

    let mut ordered: Vec<&Transaction> = transactions.iter().collect();
    ordered.sort_by_key(|t| t.timestamp);

    let mut book = PositionBook::new();
    for tx in ordered {
        book.apply(tx)?;
    }
    book.finish()
}

/// Positions held at the end of `date` (UTC). Returns an empty result when no
/// transaction falls on or before that day.
pub fn reconstruct_positions_as_of(
    transactions: &[Transaction],
    date: NaiveDate,
) -> Result<Reconstruction> {
    let upto: Vec<Transaction> = transactions
        .iter()
        .filter(|t| t.timestamp.date_naive() <= date)
        .cloned()
        .collect();

    if upto.is_empty() {
        return Ok(Reconstruction::default());
    }
    reconstruct_positions(&upto)
}
