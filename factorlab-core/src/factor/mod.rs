//! Factor preprocessing and evaluation.
//!
//! Preprocessing runs the cross-sectional cleanup chain (winsorize → neutralize →
//! standardize). The tester scores a factor against forward returns: IC, rank IC,
//! IC decay across horizons, and quantile-bucket returns. Forward returns look
//! ahead by construction, so the tester is an offline research tool and is never
//! called from inside the simulation loop.

pub mod preprocess;
pub mod tester;

pub use preprocess::Preprocessor;
pub use tester::{
    forward_returns, ic_decay, information_coefficient, quantile_returns, DecayPoint,
    FactorReport, FactorTester, IcMethod, IcSummary, QuantileReturns,
};
