use super::{AlgoError, SliceContext, SlicingAlgorithm};

/// Time-weighted: the remainder spread evenly over the slots left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Twap {
    horizon: usize,
}

impl Twap {
    pub fn new(horizon: usize) -> Result<Self, AlgoError> {
        if horizon == 0 {
            return Err(AlgoError::InvalidSpec {
                algo: "TWAP",
                reason: "horizon must be at least one tick".into(),
            });
        }
        Ok(Self { horizon })
    }
}

impl SlicingAlgorithm for Twap {
    fn name(&self) -> &'static str {
        "TWAP"
    }

    fn horizon(&self) -> usize {
        self.horizon
    }

    fn target(&self, ctx: &SliceContext) -> f64 {
        let slots_left = self.horizon.saturating_sub(ctx.elapsed).max(1);
        ctx.remaining / slots_left as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_split() {
        let twap = Twap::new(4).unwrap();
        let ctx = SliceContext {
            elapsed: 0,
            remaining: 100.0,
            tick_volume: None,
        };
        assert_eq!(twap.target(&ctx), 25.0);
        let ctx = SliceContext {
            elapsed: 2,
            remaining: 60.0,
            tick_volume: Some(1.0),
        };
        assert_eq!(twap.target(&ctx), 30.0);
    }
}
