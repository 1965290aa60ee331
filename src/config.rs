//! Engine configuration (`~/.folio/config.toml`).
//!
//! Every section is optional; a missing file yields the defaults.
//!
//! ```toml
//! [pricing]
//! max_concurrent_lookups = 8
//! lookup_timeout_secs = 10
//! cache_ttl_secs = 300
//!
//! [risk]
//! large_cap_threshold = 200000000000
//! mid_cap_threshold = 50000000000
//! aggressive_score = 15
//! moderate_score = 9
//!
//! [rollover]
//! job_name = "daily-rollover"
//! trigger_hour_utc = 0
//! trigger_minute_utc = 5
//! tolerance_minutes = 5
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pricing: PricingConfig,
    pub risk: RiskConfig,
    pub rollover: RolloverConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Upper bound on in-flight quote lookups per valuation run
    pub max_concurrent_lookups: usize,
    pub lookup_timeout_secs: u64,
    /// 0 disables the quote cache
    pub cache_ttl_secs: u64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_lookups: 8,
            lookup_timeout_secs: 10,
            cache_ttl_secs: 300,
        }
    }
}

impl PricingConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Market-cap tiers and score cut-offs for risk classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub large_cap_threshold: u64,
    pub mid_cap_threshold: u64,
    pub aggressive_score: u32,
    pub moderate_score: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            large_cap_threshold: 200_000_000_000,
            mid_cap_threshold: 50_000_000_000,
            aggressive_score: 15,
            moderate_score: 9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloverConfig {
    pub job_name: String,
    pub trigger_hour_utc: u32,
    pub trigger_minute_utc: u32,
    /// Slack allowed on the 24h spacing to absorb timer jitter
    pub tolerance_minutes: i64,
}

impl Default for RolloverConfig {
    fn default() -> Self {
        Self {
            job_name: "daily-rollover".to_string(),
            trigger_hour_utc: 0,
            trigger_minute_utc: 5,
            tolerance_minutes: 5,
        }
    }
}

impl Config {
    /// Default config location (~/.folio/config.toml), honoring FOLIO_CONFIG
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("FOLIO_CONFIG") {
            return Some(PathBuf::from(path));
        }
        std::env::var("HOME")
            .ok()
            .map(|home| PathBuf::from(home).join(".folio").join("config.toml"))
    }

    /// Load from `path`, or from the default location when `None`.
    /// A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)
            .map_err(|e| EngineError::Config(format!("failed to read {:?}: {}", path, e)))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(raw).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pricing.max_concurrent_lookups == 0 {
            return Err(EngineError::Config(
                "pricing.max_concurrent_lookups must be at least 1".to_string(),
            ));
        }
        if self.pricing.lookup_timeout_secs == 0 {
            return Err(EngineError::Config(
                "pricing.lookup_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.risk.mid_cap_threshold > self.risk.large_cap_threshold {
            return Err(EngineError::Config(
                "risk.mid_cap_threshold must not exceed risk.large_cap_threshold".to_string(),
            ));
        }
        if self.risk.moderate_score > self.risk.aggressive_score {
            return Err(EngineError::Config(
                "risk.moderate_score must not exceed risk.aggressive_score".to_string(),
            ));
        }
        if self.rollover.trigger_hour_utc > 23 || self.rollover.trigger_minute_utc > 59 {
            return Err(EngineError::Config(
                "rollover trigger must be a valid UTC time of day".to_string(),
            ));
        }
        if self.rollover.tolerance_minutes < 0 {
            return Err(EngineError::Config(
                "rollover.tolerance_minutes must not be negative".to_string(),
            ));
        }
        if self.rollover.job_name.trim().is_empty() {
            return Err(EngineError::Config("rollover.job_name is empty".to_string()));
        }
        Ok(())
    }
}
