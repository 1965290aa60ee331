use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::RiskConfig;

/// Market-capitalization tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CapTier {
    Large,
    Mid,
    Small,
}

impl CapTier {
    /// Contribution of one symbol in this tier to the risk score
    pub fn weight(&self) -> u32 {
        match self {
            CapTier::Large => 1,
            CapTier::Mid => 2,
            CapTier::Small => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CapTier::Large => "LARGE",
            CapTier::Mid => "MID",
            CapTier::Small => "SMALL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RiskLevel {
    Aggressive,
    Moderate,
    Conservative,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Aggressive => "Aggressive",
            RiskLevel::Moderate => "Moderate",
            RiskLevel::Conservative => "Conservative",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub score: u32,
    pub large_caps: usize,
    pub mid_caps: usize,
    pub small_caps: usize,
    /// Symbols without a known market cap; they do not affect the score
    pub unknown: usize,
    pub tiers: BTreeMap<String, CapTier>,
}

/// Buckets holdings by market cap and scores the mix.
///
/// Each distinct symbol counts once regardless of its allocation.
#[derive(Debug, Clone, Default)]
pub struct RiskClassifier {
    config: RiskConfig,
}

impl RiskClassifier {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn tier(&self, market_cap: Decimal) -> CapTier {
        if market_cap >= Decimal::from(self.config.large_cap_threshold) {
            CapTier::Large
        } else if market_cap >= Decimal::from(self.config.mid_cap_threshold) {
            CapTier::Mid
        } else {
            CapTier::Small
        }
    }

    pub fn level_for(&self, score: u32) -> RiskLevel {
        if score >= self.config.aggressive_score {
            RiskLevel::Aggressive
        } else if score >= self.config.moderate_score {
            RiskLevel::Moderate
        } else {
            RiskLevel::Conservative
        }
    }

    pub fn classify<'a, I>(&self, holdings: I) -> RiskAssessment
    where
        I: IntoIterator<Item = (&'a str, Option<Decimal>)>,
    {
        let mut caps: BTreeMap<String, Option<Decimal>> = BTreeMap::new();
        for (symbol, cap) in holdings {
            let entry = caps.entry(symbol.to_string()).or_insert(None);
            if cap.is_some() {
                *entry = cap;
            }
        }

        let mut assessment = RiskAssessment {
            level: RiskLevel::Conservative,
            score: 0,
            large_caps: 0,
            mid_caps: 0,
            small_caps: 0,
            unknown: 0,
            tiers: BTreeMap::new(),
        };

        for (symbol, cap) in caps {
            let Some(cap) = cap else {
                assessment.unknown += 1;
                continue;
            };
            let tier = self.tier(cap);
            match tier {
                CapTier::Large => assessment.large_caps += 1,
                CapTier::Mid => assessment.mid_caps += 1,
                CapTier::Small => assessment.small_caps += 1,
            }
            assessment.score += tier.weight();
            assessment.tiers.insert(symbol, tier);
        }

        assessment.level = self.level_for(assessment.score);
        assessment
    }
}
