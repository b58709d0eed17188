//! FactorLab Core: factor operators, simulated broker, portfolio, execution
//! algorithms, risk engine and the event-driven backtest loop.
//!
//! - Domain types (bars, panels, orders, fills, positions, snapshots)
//! - Factor operator library and the factor preprocessor/tester
//! - Simulated broker with order book, slippage, commission and participation caps
//! - TWAP/VWAP/POV slicing of algo parents
//! - VaR/CVaR, factor exposure, stress tests and the circuit breaker
//! - Tick-by-tick engine with replay determinism from a single master seed
//!
//! The crate does no file I/O.

pub mod algo;
pub mod broker;
pub mod domain;
pub mod engine;
pub mod factor;
pub mod ops;
pub mod portfolio;
pub mod risk;
pub mod rng;
