use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::db::Position;
use crate::error::Result;
use crate::pricing::Quote;

/// One position valued against its latest quote
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingValuation {
    pub symbol: String,
    pub quantity: u64,
    pub average_cost: Decimal,
    /// Zero when the quote was unavailable
    pub price: Decimal,
    pub value: Decimal,
    pub invested: Decimal,
    pub allocation_percent: Decimal,
    pub profit_loss: Decimal,
    pub gain_percent: Decimal,
    pub today_profit_loss: Decimal,
    pub change_percent: Option<Decimal>,
    pub market_cap: Option<Decimal>,
    pub trailing_pe: Option<Decimal>,
    pub dividend_yield: Option<Decimal>,
    pub yesterday_holding: Decimal,
    pub data_unavailable: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LargestHolding {
    pub symbol: String,
    pub allocation: Decimal,
    pub value: Decimal,
}

/// Portfolio-level figures computed over the priced holdings
#[derive(Debug, Clone, PartialEq)]
pub struct Valuation {
    /// Ordered by symbol
    pub holdings: Vec<HoldingValuation>,
    pub total_value: Decimal,
    pub total_invested: Decimal,
    pub total_profit_loss: Decimal,
    pub total_gain_percent: Decimal,
    pub today_profit_loss: Decimal,
    pub today_gain_percent: Decimal,
    pub weighted_pe: Option<Decimal>,
    pub weighted_div_yield: Option<Decimal>,
    pub largest_holding: Option<LargestHolding>,
    /// Ordered by largest rise first
    pub gainers: Vec<String>,
    /// Ordered by largest drop first
    pub losers: Vec<String>,
}

impl Valuation {
    pub fn unavailable_symbols(&self) -> Vec<String> {
        self.holdings
            .iter()
            .filter(|h| h.data_unavailable)
            .map(|h| h.symbol.clone())
            .collect()
    }

    fn priced(&self) -> impl Iterator<Item = &HoldingValuation> {
        self.holdings.iter().filter(|h| !h.data_unavailable)
    }
}

fn percent_of(part: Decimal, whole: Decimal) -> Decimal {
    if whole.is_zero() {
        Decimal::ZERO
    } else {
        part / whole * Decimal::ONE_HUNDRED
    }
}

/// Value `positions` against `quotes`.
///
/// A symbol whose lookup failed (or that has no entry at all) is kept with
/// a zero price and `data_unavailable = true`; it contributes nothing to the
/// totals, weights or movers.
pub fn value_portfolio(
    positions: &[Position],
    quotes: &BTreeMap<String, Result<Quote>>,
) -> Valuation {
    let mut by_symbol: BTreeMap<&str, &Position> = BTreeMap::new();
    for p in positions {
        by_symbol.insert(p.symbol.as_str(), p);
    }

    let mut holdings: Vec<HoldingValuation> = by_symbol
        .into_values()
        .map(|p| value_holding(p, quotes.get(&p.symbol)))
        .collect();

    let mut total_value = Decimal::ZERO;
    let mut total_invested = Decimal::ZERO;
    let mut today_profit_loss = Decimal::ZERO;
    let mut yesterday_total = Decimal::ZERO;
    for h in holdings.iter().filter(|h| !h.data_unavailable) {
        total_value += h.value;
        total_invested += h.invested;
        today_profit_loss += h.today_profit_loss;
        yesterday_total += h.yesterday_holding;
    }

    for h in holdings.iter_mut().filter(|h| !h.data_unavailable) {
        h.allocation_percent = percent_of(h.value, total_value);
    }

    let total_profit_loss = total_value - total_invested;

    let mut valuation = Valuation {
        holdings,
        total_value,
        total_invested,
        total_profit_loss,
        total_gain_percent: percent_of(total_profit_loss, total_invested),
        today_profit_loss,
        today_gain_percent: percent_of(today_profit_loss, yesterday_total),
        weighted_pe: None,
        weighted_div_yield: None,
        largest_holding: None,
        gainers: Vec::new(),
        losers: Vec::new(),
    };

    valuation.weighted_pe = weighted_metric(&valuation, |h| h.trailing_pe);
    valuation.weighted_div_yield = weighted_metric(&valuation, |h| h.dividend_yield);
    valuation.largest_holding = largest_holding(&valuation);
    let (gainers, losers) = movers(&valuation);
    valuation.gainers = gainers;
    valuation.losers = losers;

    valuation
}

fn value_holding(position: &Position, quote: Option<&Result<Quote>>) -> HoldingValuation {
    let quantity = Decimal::from(position.quantity);
    let invested = position.invested();

    let mut holding = HoldingValuation {
        symbol: position.symbol.clone(),
        quantity: position.quantity,
        average_cost: position.average_cost,
        price: Decimal::ZERO,
        value: Decimal::ZERO,
        invested,
        allocation_percent: Decimal::ZERO,
        profit_loss: Decimal::ZERO,
        gain_percent: Decimal::ZERO,
        today_profit_loss: Decimal::ZERO,
        change_percent: None,
        market_cap: None,
        trailing_pe: None,
        dividend_yield: None,
        yesterday_holding: position.yesterday_holding,
        data_unavailable: true,
        error: None,
    };

    match quote {
        Some(Ok(q)) => {
            let Some(value) = quantity.checked_mul(q.price) else {
                holding.error = Some(format!("price {} is out of range", q.price));
                return holding;
            };
            holding.price = q.price;
            holding.value = value;
            holding.profit_loss = value - invested;
            holding.gain_percent = percent_of(value - invested, invested);
            holding.today_profit_loss = value - position.yesterday_holding;
            holding.change_percent = q.change_percent;
            holding.market_cap = q.market_cap;
            holding.trailing_pe = q.trailing_pe;
            holding.dividend_yield = q.dividend_yield;
            holding.data_unavailable = false;
        }
        Some(Err(e)) => holding.error = Some(e.to_string()),
        None => holding.error = Some("no quote requested".to_string()),
    }

    holding
}

/// Allocation-weighted average of a per-holding metric, renormalized over
/// the holdings that report it. `None` when none do.
fn weighted_metric<F>(valuation: &Valuation, metric: F) -> Option<Decimal>
where
    F: Fn(&HoldingValuation) -> Option<Decimal>,
{
    let (weighted_sum, weight) = valuation
        .priced()
        .filter_map(|h| metric(h).map(|m| (h.allocation_percent * m, h.allocation_percent)))
        .fold((Decimal::ZERO, Decimal::ZERO), |(sum, w), (x, a)| {
            (sum + x, w + a)
        });

    if weight.is_zero() {
        None
    } else {
        Some(weighted_sum / weight)
    }
}

fn largest_holding(valuation: &Valuation) -> Option<LargestHolding> {
    if valuation.total_value <= Decimal::ZERO {
        return None;
    }

    // Holdings are in symbol order, so a strict comparison keeps the
    // lexically first symbol on ties.
    let mut best: Option<&HoldingValuation> = None;
    for h in valuation.priced() {
        if best.map_or(true, |b| h.allocation_percent > b.allocation_percent) {
            best = Some(h);
        }
    }

    best.map(|h| LargestHolding {
        symbol: h.symbol.clone(),
        allocation: h.allocation_percent,
        value: h.value,
    })
}

fn movers(valuation: &Valuation) -> (Vec<String>, Vec<String>) {
    let mut gainers: Vec<(&str, Decimal)> = Vec::new();
    let mut losers: Vec<(&str, Decimal)> = Vec::new();

    for h in valuation.priced() {
        match h.change_percent {
            Some(c) if c > Decimal::ZERO => gainers.push((h.symbol.as_str(), c)),
            Some(c) if c < Decimal::ZERO => losers.push((h.symbol.as_str(), c)),
            _ => {}
        }
    }

    gainers.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    losers.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));

    (
        gainers.into_iter().map(|(s, _)| s.to_string()).collect(),
        losers.into_iter().map(|(s, _)| s.to_string()).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use rust_decimal_macros::dec;

    fn position(symbol: &str, qty: u64, avg: Decimal) -> Position {
        Position::new(symbol, qty, avg).unwrap()
    }

    fn quote(symbol: &str, price: Decimal) -> Quote {
        Quote::new(symbol, price)
    }

    fn quotes(list: Vec<Quote>) -> BTreeMap<String, Result<Quote>> {
        list.into_iter().map(|q| (q.symbol.clone(), Ok(q))).collect()
    }

    #[test]
    fn test_single_holding_totals() {
        let mut q = quote("AAA", dec!(180));
        q.market_cap = Some(dec!(3000000000000));
        let valuation = value_portfolio(&[position("AAA", 20, dec!(150))], &quotes(vec![q]));

        assert_eq!(valuation.total_value, dec!(3600));
        assert_eq!(valuation.total_invested, dec!(3000));
        assert_eq!(valuation.total_profit_loss, dec!(600));
        assert_eq!(valuation.total_gain_percent, dec!(20.0));
        assert_eq!(valuation.holdings[0].allocation_percent, dec!(100));

        let largest = valuation.largest_holding.unwrap();
        assert_eq!(largest.symbol, "AAA");
        assert_eq!(largest.value, dec!(3600));
    }

    #[test]
    fn test_allocations_sum_to_hundred() {
        let positions = vec![
            position("AAA", 3, dec!(1)),
            position("BBB", 7, dec!(1)),
            position("CCC", 11, dec!(1)),
        ];
        let valuation = value_portfolio(
            &positions,
            &quotes(vec![
                quote("AAA", dec!(33.33)),
                quote("BBB", dec!(17.17)),
                quote("CCC", dec!(1.01)),
            ]),
        );

        let sum: Decimal = valuation
            .holdings
            .iter()
            .map(|h| h.allocation_percent)
            .sum();
        assert!((sum - dec!(100)).abs() <= dec!(0.01));
    }

    #[test]
    fn test_unavailable_symbol_is_flagged_and_excluded() {
        let positions = vec![position("AAA", 10, dec!(10)), position("BBB", 5, dec!(20))];
        let mut map = quotes(vec![quote("AAA", dec!(12))]);
        map.insert(
            "BBB".to_string(),
            Err(EngineError::unavailable("BBB", "timed out")),
        );

        let valuation = value_portfolio(&positions, &map);

        assert_eq!(valuation.total_value, dec!(120));
        assert_eq!(valuation.total_invested, dec!(100));
        assert_eq!(valuation.unavailable_symbols(), vec!["BBB"]);

        let bbb = valuation.holdings.iter().find(|h| h.symbol == "BBB").unwrap();
        assert!(bbb.data_unavailable);
        assert_eq!(bbb.price, Decimal::ZERO);
        assert!(bbb.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(valuation.largest_holding.unwrap().symbol, "AAA");
    }

    #[test]
    fn test_out_of_range_price_is_flagged_instead_of_panicking() {
        let positions = vec![
            position("AAA", 1_000_000_000_000, dec!(1)),
            position("BBB", 2, dec!(5)),
        ];
        let valuation = value_portfolio(
            &positions,
            &quotes(vec![quote("AAA", Decimal::MAX), quote("BBB", dec!(6))]),
        );

        assert_eq!(valuation.unavailable_symbols(), vec!["AAA"]);
        assert_eq!(valuation.total_value, dec!(12));
        let aaa = &valuation.holdings[0];
        assert!(aaa.error.as_deref().unwrap().contains("out of range"));
    }

    #[test]
    fn test_weighted_pe_renormalizes_over_known_values() {
        let positions = vec![position("AAA", 1, dec!(1)), position("BBB", 1, dec!(1))];
        let mut a = quote("AAA", dec!(100));
        a.trailing_pe = Some(dec!(20));
        a.dividend_yield = Some(dec!(2));
        let mut b = quote("BBB", dec!(300));
        b.dividend_yield = Some(dec!(4));

        let valuation = value_portfolio(&positions, &quotes(vec![a, b]));
        assert_eq!(valuation.weighted_pe, Some(dec!(20)));
        // 25% at 2% plus 75% at 4%
        assert_eq!(valuation.weighted_div_yield.unwrap().round_dp(6), dec!(3.5));
    }

    #[test]
    fn test_weighted_metrics_absent_without_data() {
        let valuation = value_portfolio(
            &[position("AAA", 1, dec!(1))],
            &quotes(vec![quote("AAA", dec!(5))]),
        );
        assert_eq!(valuation.weighted_pe, None);
        assert_eq!(valuation.weighted_div_yield, None);
    }

    #[test]
    fn test_largest_holding_tie_breaks_by_symbol() {
        let positions = vec![position("ZZZ", 1, dec!(1)), position("MMM", 1, dec!(1))];
        let valuation = value_portfolio(
            &positions,
            &quotes(vec![quote("ZZZ", dec!(50)), quote("MMM", dec!(50))]),
        );
        assert_eq!(valuation.largest_holding.unwrap().symbol, "MMM");
    }

    #[test]
    fn test_gainers_and_losers() {
        let positions = vec![
            position("AAA", 1, dec!(1)),
            position("BBB", 1, dec!(1)),
            position("CCC", 1, dec!(1)),
            position("DDD", 1, dec!(1)),
        ];
        let mut a = quote("AAA", dec!(1));
        a.change_percent = Some(dec!(1.5));
        let mut b = quote("BBB", dec!(1));
        b.change_percent = Some(dec!(-0.5));
        let mut c = quote("CCC", dec!(1));
        c.change_percent = Some(dec!(0));
        let mut d = quote("DDD", dec!(1));
        d.change_percent = Some(dec!(3));

        let valuation = value_portfolio(&positions, &quotes(vec![a, b, c, d]));
        assert_eq!(valuation.gainers, vec!["DDD", "AAA"]);
        assert_eq!(valuation.losers, vec!["BBB"]);
    }

    #[test]
    fn test_today_profit_loss_uses_yesterday_baseline() {
        let mut p = position("AAA", 10, dec!(100));
        p.yesterday_holding = dec!(1100);
        let valuation = value_portfolio(&[p], &quotes(vec![quote("AAA", dec!(121))]));

        assert_eq!(valuation.today_profit_loss, dec!(110));
        assert_eq!(valuation.today_gain_percent, dec!(10));
    }

    #[test]
    fn test_zero_value_portfolio() {
        let valuation = value_portfolio(
            &[position("AAA", 10, dec!(0))],
            &quotes(vec![quote("AAA", dec!(0))]),
        );
        assert_eq!(valuation.total_value, Decimal::ZERO);
        assert_eq!(valuation.total_gain_percent, Decimal::ZERO);
        assert_eq!(valuation.holdings[0].allocation_percent, Decimal::ZERO);
        assert!(valuation.largest_holding.is_none());
    }
}
