use super::EngineError;
use crate::algo::AlgoConfig;
use crate::broker::BrokerConfig;
use crate::risk::RiskConfig;
use serde::{Deserialize, Serialize};

/// What happens to resting orders when the circuit breaker trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpenOrderPolicy {
    /// Resting orders keep matching; only new submissions are suppressed.
    #[default]
    Keep,
    /// Cancel every active order on the trigger tick.
    CancelOnTrigger,
}

/// Configuration for a single engine run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub initial_cash: f64,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub algo: AlgoConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub open_order_policy: OpenOrderPolicy,
    /// Bound on history rows handed to the strategy. Unbounded when absent.
    #[serde(default)]
    pub max_lookback: Option<usize>,
    /// Master seed for every random stream in the run.
    #[serde(default)]
    pub seed: u64,
}

impl EngineConfig {
    pub fn new(initial_cash: f64) -> Self {
        Self {
            initial_cash,
            broker: BrokerConfig::frictionless(),
            algo: AlgoConfig::default(),
            risk: RiskConfig::default(),
            open_order_policy: OpenOrderPolicy::default(),
            max_lookback: None,
            seed: 0,
        }
    }

    pub fn with_broker(mut self, broker: BrokerConfig) -> Self {
        self.broker = broker;
        self
    }

    pub fn with_risk(mut self, risk: RiskConfig) -> Self {
        self.risk = risk;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Checked before a run starts; nothing is mutated on failure.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.initial_cash.is_finite() && self.initial_cash > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "initial_cash must be positive, got {}",
                self.initial_cash
            )));
        }
        if self.max_lookback == Some(0) {
            return Err(EngineError::InvalidConfig("max_lookback must be positive".into()));
        }
        self.broker.validate()?;
        self.algo.validate()?;
        self.risk.validate()?;
        Ok(())
    }
}
