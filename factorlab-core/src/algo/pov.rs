use super::{AlgoError, SliceContext, SlicingAlgorithm};

/// Percentage of volume: each slice is `rate × tick volume`. No bar, no slice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pov {
    rate: f64,
    max_ticks: usize,
}

impl Pov {
    pub fn new(rate: f64, max_ticks: usize) -> Result<Self, AlgoError> {
        if !(rate > 0.0 && rate <= 1.0) {
            return Err(AlgoError::InvalidSpec {
                algo: "POV",
                reason: format!("rate must be in (0, 1], got {rate}"),
            });
        }
        if max_ticks == 0 {
            return Err(AlgoError::InvalidSpec {
                algo: "POV",
                reason: "max_ticks must be at least one tick".into(),
            });
        }
        Ok(Self { rate, max_ticks })
    }
}

impl SlicingAlgorithm for Pov {
    fn name(&self) -> &'static str {
        "POV"
    }

    fn horizon(&self) -> usize {
        self.max_ticks
    }

    fn target(&self, ctx: &SliceContext) -> f64 {
        match ctx.tick_volume {
            Some(v) if v.is_finite() && v > 0.0 => (self.rate * v).floor(),
            _ => 0.0,
        }
    }

    /// The last slot stays volume-capped; the expiry policy handles the rest.
    fn sweeps_on_last_slot(&self) -> bool {
        false
    }
}
