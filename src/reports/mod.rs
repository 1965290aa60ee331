// Reports module - valuation, risk classification and the insight report

pub mod insight;
pub mod risk;
pub mod valuation;

pub use insight::{build_report, NarrativePayload, PortfolioReport};
pub use risk::{CapTier, RiskAssessment, RiskClassifier, RiskLevel};
pub use valuation::{value_portfolio, HoldingValuation, LargestHolding, Valuation};
