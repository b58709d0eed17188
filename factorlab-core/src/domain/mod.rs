//! Domain types for FactorLab

pub mod bar;
pub mod fill;
pub mod ids;
pub mod order;
pub mod panel;
pub mod position;
pub mod snapshot;

pub use bar::{Bar, Timestamp, OHLCV_FIELDS};
pub use fill::Fill;
pub use ids::{OrderId, OrderIdGen, RunId};
pub use order::{Order, OrderAuditEntry, OrderSide, OrderStatus, OrderType, TimeInForce};
pub use panel::{defined, Panel, PanelError, PanelSet, Value};
pub use position::Position;
pub use snapshot::{PortfolioSnapshot, PositionMark};
