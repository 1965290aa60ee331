use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::risk::RiskAssessment;
use super::valuation::{HoldingValuation, LargestHolding, Valuation};

/// Full-precision portfolio report for one user
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioReport {
    pub user_id: String,
    pub generated_at: DateTime<Utc>,
    /// Largest value first, then by symbol
    pub holdings: Vec<HoldingValuation>,
    pub total_value: Decimal,
    pub total_invested: Decimal,
    pub total_profit_loss: Decimal,
    pub total_gain_percent: Decimal,
    pub today_profit_loss: Decimal,
    pub today_gain_percent: Decimal,
    pub largest_holding: Option<LargestHolding>,
    #[serde(rename = "weightedPE")]
    pub weighted_pe: Option<Decimal>,
    pub weighted_div_yield: Option<Decimal>,
    pub gainers: Vec<String>,
    pub losers: Vec<String>,
    pub risk: RiskAssessment,
    pub unavailable_symbols: Vec<String>,
    pub realized_profit_loss: Decimal,
}

/// Flat payload handed to the summarization collaborator.
///
/// Field names are a contract with that consumer; money and percentages are
/// rounded to two decimals.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativePayload {
    pub total_stocks: usize,
    pub total_value: Decimal,
    pub total_invested: Decimal,
    pub total_profit_loss: Decimal,
    pub total_gain_percent: Decimal,
    pub largest_holding: Option<LargestHolding>,
    #[serde(rename = "weightedPE")]
    pub weighted_pe: Option<Decimal>,
    pub weighted_div_yield: Option<Decimal>,
    pub gainers: Vec<String>,
    pub losers: Vec<String>,
    pub today_profit_loss: Decimal,
    pub risk_level: String,
    pub risk_score: u32,
    pub unavailable_symbols: Vec<String>,
}

fn round2(value: Decimal) -> Decimal {
    value.round_dp(2)
}

/// Assemble the report from a valuation and a risk assessment.
pub fn build_report(
    user_id: &str,
    generated_at: DateTime<Utc>,
    valuation: Valuation,
    risk: RiskAssessment,
    realized_profit_loss: Decimal,
) -> PortfolioReport {
    let unavailable_symbols = valuation.unavailable_symbols();

    let mut holdings = valuation.holdings;
    holdings.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.symbol.cmp(&b.symbol)));

    PortfolioReport {
        user_id: user_id.to_string(),
        generated_at,
        holdings,
        total_value: valuation.total_value,
        total_invested: valuation.total_invested,
        total_profit_loss: valuation.total_profit_loss,
        total_gain_percent: valuation.total_gain_percent,
        today_profit_loss: valuation.today_profit_loss,
        today_gain_percent: valuation.today_gain_percent,
        largest_holding: valuation.largest_holding,
        weighted_pe: valuation.weighted_pe,
        weighted_div_yield: valuation.weighted_div_yield,
        gainers: valuation.gainers,
        losers: valuation.losers,
        risk,
        unavailable_symbols,
        realized_profit_loss,
    }
}

impl PortfolioReport {
    pub fn narrative(&self) -> NarrativePayload {
        NarrativePayload {
            total_stocks: self.holdings.len(),
            total_value: round2(self.total_value),
            total_invested: round2(self.total_invested),
            total_profit_loss: round2(self.total_profit_loss),
            total_gain_percent: round2(self.total_gain_percent),
            largest_holding: self.largest_holding.as_ref().map(|h| LargestHolding {
                symbol: h.symbol.clone(),
                allocation: round2(h.allocation),
                value: round2(h.value),
            }),
            weighted_pe: self.weighted_pe.map(round2),
            weighted_div_yield: self.weighted_div_yield.map(round2),
            gainers: self.gainers.clone(),
            losers: self.losers.clone(),
            today_profit_loss: round2(self.today_profit_loss),
            risk_level: self.risk.level.as_str().to_string(),
            risk_score: self.risk.score,
            unavailable_symbols: self.unavailable_symbols.clone(),
        }
    }

    pub fn holding(&self, symbol: &str) -> Option<&HoldingValuation> {
        self.holdings.iter().find(|h| h.symbol == symbol)
    }
}
