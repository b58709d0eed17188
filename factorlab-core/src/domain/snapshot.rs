use super::bar::Timestamp;
use serde::{Deserialize, Serialize};

/// One position valued at the tick's mark price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionMark {
    pub instrument: String,
    pub quantity: f64,
    pub average_cost: f64,
    pub mark_price: f64,
    pub market_value: f64,
    pub unrealized_pnl: f64,
}

/// Portfolio state at the end of one tick. Appended once per tick, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub tick: usize,
    pub timestamp: Timestamp,
    pub cash: f64,
    pub positions: Vec<PositionMark>,
    pub realized_pnl: f64,
    pub total_equity: f64,
}

impl PortfolioSnapshot {
    pub fn gross_exposure(&self) -> f64 {
        self.positions.iter().map(|p| p.market_value.abs()).sum()
    }

    pub fn net_exposure(&self) -> f64 {
        self.positions.iter().map(|p| p.market_value).sum()
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.positions.iter().map(|p| p.unrealized_pnl).sum()
    }

    pub fn position(&self, instrument: &str) -> Option<&PositionMark> {
        self.positions.iter().find(|p| p.instrument == instrument)
    }

    /// Residual of `cash + Σ market value - total_equity`. Zero up to rounding.
    pub fn identity_residual(&self) -> f64 {
        self.cash + self.net_exposure() - self.total_equity
    }
}
