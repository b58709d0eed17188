//! Liquidity constraints: participation caps and what happens to the remainder.

use serde::{Deserialize, Serialize};

/// What to do with quantity still open when an order's time in force runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemainderPolicy {
    /// The order ends `Expired` with the remainder unfilled.
    #[default]
    Expire,
    /// Market orders fill the remainder at the execution price, ignoring the
    /// participation cap. Limit orders still expire.
    ForceFill,
}

/// Caps fills at a fraction of the bar's traded volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticipationCap {
    max_participation: Option<f64>,
}

impl ParticipationCap {
    pub fn new(max_participation: Option<f64>) -> Result<Self, String> {
        if let Some(cap) = max_participation {
            if !(cap > 0.0 && cap <= 1.0) {
                return Err(format!("max_participation must be in (0, 1], got {cap}"));
            }
        }
        Ok(Self { max_participation })
    }

    /// Most that may fill against `bar_volume`: `floor(volume × cap)`.
    pub fn capacity(&self, bar_volume: f64) -> f64 {
        match self.max_participation {
            Some(cap) => (bar_volume * cap).floor().max(0.0),
            None => f64::INFINITY,
        }
    }

    /// Requested quantity clipped to capacity.
    pub fn limit_fill_qty(&self, requested: f64, bar_volume: f64) -> f64 {
        requested.min(self.capacity(bar_volume)).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_floors_to_whole_shares() {
        let cap = ParticipationCap::new(Some(0.1)).unwrap();
        assert_eq!(cap.limit_fill_qty(500.0, 1234.0), 123.0);
        assert_eq!(cap.limit_fill_qty(50.0, 1234.0), 50.0);
    }

    #[test]
    fn unlimited_passes_everything() {
        let cap = ParticipationCap::new(None).unwrap();
        assert_eq!(cap.limit_fill_qty(1e9, 1.0), 1e9);
    }

    #[test]
    fn out_of_range_cap_is_rejected() {
        assert!(ParticipationCap::new(Some(0.0)).is_err());
        assert!(ParticipationCap::new(Some(1.5)).is_err());
        assert!(ParticipationCap::new(None).is_ok());
    }
}
