//! Serializable run configuration, loaded from TOML.
//!
//! A `RunConfig` captures everything needed to reproduce a run: the data
//! window and universe, the engine (cash, broker, algos, risk, seed), the
//! strategy and the analyzer settings. Its `run_id()` is a content hash, so
//! two identical configurations share an id.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use factorlab_core::domain::Timestamp;
use factorlab_core::engine::{
    ConstantStrategy, DataRequest, EngineConfig, FactorRankStrategy, Frequency, OrderIntent, Strategy,
};

use crate::metrics::DEFAULT_PERIODS_PER_YEAR;

/// Content hash of a configuration.
pub type RunId = String;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("cannot read config {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("invalid TOML: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("cannot serialize config: {0}")]
    Serialize(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub data: DataConfig,
    pub engine: EngineConfig,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Simulation window and universe.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataConfig {
    /// Inclusive first date; unbounded when absent.
    #[serde(default)]
    pub start: Option<NaiveDate>,
    /// Inclusive last date; unbounded when absent.
    #[serde(default)]
    pub end: Option<NaiveDate>,
    #[serde(default)]
    pub frequency: Frequency,
    /// Instruments to trade. Every instrument in the data when empty.
    #[serde(default)]
    pub instruments: Vec<String>,
    /// Instrument → industry, for neutralisation.
    #[serde(default)]
    pub industries: BTreeMap<String, String>,
}

/// Strategy definition (serializable enum).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyConfig {
    /// Long the top k and short the bottom k of a factor ranking.
    FactorRank(FactorRankStrategy),
    /// The same intents every tick.
    Constant { intents: Vec<OrderIntent> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: f64,
}

fn default_periods_per_year() -> f64 {
    DEFAULT_PERIODS_PER_YEAR
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            periods_per_year: DEFAULT_PERIODS_PER_YEAR,
        }
    }
}

impl RunConfig {
    pub fn new(engine: EngineConfig, strategy: StrategyConfig) -> Self {
        Self {
            name: None,
            data: DataConfig::default(),
            engine,
            strategy,
            metrics: MetricsConfig::default(),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Checked before any run starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if let (Some(start), Some(end)) = (self.data.start, self.data.end) {
            if start > end {
                return Err(ConfigError::Invalid(format!("start {start} is after end {end}")));
            }
        }
        if self.data.instruments.iter().any(|i| i.trim().is_empty()) {
            return Err(ConfigError::Invalid("instrument names must be non-empty".into()));
        }
        if !(self.metrics.periods_per_year.is_finite() && self.metrics.periods_per_year > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "periods_per_year must be positive, got {}",
                self.metrics.periods_per_year
            )));
        }
        match &self.strategy {
            StrategyConfig::FactorRank(s) => s.validate().map_err(ConfigError::Invalid),
            StrategyConfig::Constant { intents } => {
                match intents.iter().find(|i| !(i.quantity.is_finite() && i.quantity > 0.0)) {
                    Some(bad) => Err(ConfigError::Invalid(format!(
                        "intent for {} has non-positive quantity {}",
                        bad.instrument, bad.quantity
                    ))),
                    None => Ok(()),
                }
            }
        }
    }

    /// BLAKE3 hash of the canonical JSON form.
    pub fn run_id(&self) -> Result<RunId, ConfigError> {
        let json = serde_json::to_vec(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        Ok(blake3::hash(&json).to_hex().to_string())
    }

    /// Data request for this run. `available` is used when no universe is configured.
    pub fn data_request(&self, available: Vec<String>) -> DataRequest {
        let instruments = if self.data.instruments.is_empty() {
            available
        } else {
            self.data.instruments.clone()
        };
        DataRequest {
            instruments,
            start: self.data.start.map(start_of_day),
            end: self.data.end.and_then(end_of_day),
            frequency: self.data.frequency,
        }
    }

    /// Fresh strategy instance. The configured industry map fills in
    /// factor groups the strategy does not set itself.
    pub fn build_strategy(&self) -> Box<dyn Strategy> {
        match &self.strategy {
            StrategyConfig::FactorRank(s) => {
                let mut s = s.clone();
                if s.groups.is_none() && !self.data.industries.is_empty() {
                    s.groups = Some(self.data.industries.clone());
                }
                Box::new(s)
            }
            StrategyConfig::Constant { intents } => Box::new(ConstantStrategy::new(intents.clone())),
        }
    }
}

fn start_of_day(date: NaiveDate) -> Timestamp {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

fn end_of_day(date: NaiveDate) -> Option<Timestamp> {
    date.and_hms_opt(23, 59, 59).map(|dt| dt.and_utc())
}
