use super::{AlgoError, SliceContext, SlicingAlgorithm};

/// Relative volume expected in each slot of the horizon.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeCurve {
    weights: Vec<f64>,
}

impl VolumeCurve {
    pub fn new(weights: Vec<f64>) -> Result<Self, AlgoError> {
        if weights.is_empty() {
            return Err(AlgoError::InvalidSpec {
                algo: "VWAP",
                reason: "volume curve is empty".into(),
            });
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(AlgoError::InvalidSpec {
                algo: "VWAP",
                reason: "volume curve weights must be finite and non-negative".into(),
            });
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(AlgoError::InvalidSpec {
                algo: "VWAP",
                reason: "volume curve sums to zero".into(),
            });
        }
        Ok(Self { weights })
    }

    pub fn flat(horizon: usize) -> Result<Self, AlgoError> {
        Self::new(vec![1.0; horizon])
    }

    /// Average historical volume per slot: observation `i` lands in slot `i % horizon`.
    /// Non-finite observations are skipped.
    pub fn from_history(volumes: &[f64], horizon: usize) -> Result<Self, AlgoError> {
        if horizon == 0 {
            return Err(AlgoError::InvalidSpec {
                algo: "VWAP",
                reason: "horizon must be at least one tick".into(),
            });
        }
        let mut sums = vec![0.0; horizon];
        let mut counts = vec![0usize; horizon];
        for (i, v) in volumes.iter().enumerate() {
            if v.is_finite() && *v >= 0.0 {
                sums[i % horizon] += v;
                counts[i % horizon] += 1;
            }
        }
        let weights = sums
            .iter()
            .zip(&counts)
            .map(|(s, &c)| if c == 0 { 0.0 } else { s / c as f64 })
            .collect();
        Self::new(weights)
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Share of the volume from `slot` onward that falls in `slot`.
    pub fn share_of_rest(&self, slot: usize) -> f64 {
        let rest: f64 = self.weights.iter().skip(slot).sum();
        match self.weights.get(slot) {
            Some(w) if rest > 0.0 => w / rest,
            _ => 0.0,
        }
    }
}

/// Volume-weighted: each slot takes its curve share of the remainder.
#[derive(Debug, Clone, PartialEq)]
pub struct Vwap {
    horizon: usize,
    curve: VolumeCurve,
}

impl Vwap {
    pub fn new(horizon: usize, curve: VolumeCurve) -> Result<Self, AlgoError> {
        if horizon == 0 {
            return Err(AlgoError::InvalidSpec {
                algo: "VWAP",
                reason: "horizon must be at least one tick".into(),
            });
        }
        if curve.len() != horizon {
            return Err(AlgoError::InvalidSpec {
                algo: "VWAP",
                reason: format!("curve has {} slots, horizon is {horizon}", curve.len()),
            });
        }
        Ok(Self { horizon, curve })
    }
}

impl SlicingAlgorithm for Vwap {
    fn name(&self) -> &'static str {
        "VWAP"
    }

    fn horizon(&self) -> usize {
        self.horizon
    }

    fn target(&self, ctx: &SliceContext) -> f64 {
        ctx.remaining * self.curve.share_of_rest(ctx.elapsed)
    }
}
