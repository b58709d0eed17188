//! Factor expressions: a closed, serializable operator tree.
//!
//! Strategies and the factor tester describe factors as data rather than code:
//!
//! ```json
//! {"type": "unary", "op": {"kind": "rank"},
//!  "input": {"type": "unary", "op": {"kind": "returns", "n": 5},
//!            "input": {"type": "field", "name": "close"}}}
//! ```
//!
//! Evaluation walks the tree bottom-up against a [`FactorContext`]. Each node
//! dispatches to one pure operator; there is no runtime lookup by name beyond
//! resolving `Field` against the context's panels.

use super::technical::{self, BollBand, KdjLine, MacdLine};
use super::{cross_section as cs, primitives as p, time_series as ts, OperatorError};
use crate::domain::{defined, Panel, PanelSet, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inputs visible to a factor at evaluation time.
#[derive(Debug, Clone, Copy)]
pub struct FactorContext<'a> {
    pub fields: &'a PanelSet,
    /// instrument → industry, for `industry_neutralize`.
    pub groups: Option<&'a BTreeMap<String, String>>,
}

impl<'a> FactorContext<'a> {
    pub fn new(fields: &'a PanelSet) -> Self {
        Self {
            fields,
            groups: None,
        }
    }

    pub fn with_groups(mut self, groups: &'a BTreeMap<String, String>) -> Self {
        self.groups = Some(groups);
        self
    }
}

/// Single-input operators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnaryOp {
    // L0
    Delay { n: usize },
    Diff { n: usize },
    Std { window: usize },
    Sum { window: usize },
    Hhv { window: usize },
    Llv { window: usize },
    Ma { window: usize },
    Ema { window: usize },
    Sma { n: usize, m: usize },
    Wma { window: usize },
    Slope { window: usize },
    Forecast { window: usize },
    Sign,
    Abs,
    Neg,
    // L1
    TsRank { window: usize },
    TsMin { window: usize },
    TsMax { window: usize },
    TsArgmin { window: usize },
    TsArgmax { window: usize },
    DecayLinear { window: usize },
    Returns { n: usize },
    Count { window: usize },
    Barslast,
    // L2
    Rank,
    Percentile,
    Zscore,
    Scale { a: f64 },
    Winsorize { lower: f64, upper: f64 },
    IndustryNeutralize,
}

impl UnaryOp {
    pub fn apply(
        &self,
        x: &Panel,
        groups: Option<&BTreeMap<String, String>>,
    ) -> Result<Panel, OperatorError> {
        match *self {
            UnaryOp::Delay { n } => x.map_columns(|c| p::delay(c, n)),
            UnaryOp::Diff { n } => x.map_columns(|c| p::diff(c, n)),
            UnaryOp::Std { window } => x.map_columns(|c| p::stddev(c, window)),
            UnaryOp::Sum { window } => x.map_columns(|c| p::sum(c, window)),
            UnaryOp::Hhv { window } => x.map_columns(|c| p::hhv(c, window)),
            UnaryOp::Llv { window } => x.map_columns(|c| p::llv(c, window)),
            UnaryOp::Ma { window } => x.map_columns(|c| p::ma(c, window)),
            UnaryOp::Ema { window } => x.map_columns(|c| p::ema(c, window)),
            UnaryOp::Sma { n, m } => x.map_columns(|c| p::sma(c, n, m)),
            UnaryOp::Wma { window } => x.map_columns(|c| p::wma(c, window)),
            UnaryOp::Slope { window } => x.map_columns(|c| p::slope(c, window)),
            UnaryOp::Forecast { window } => x.map_columns(|c| p::forecast(c, window)),
            UnaryOp::Sign => x.map_columns(|c| Ok(p::sign(c))),
            UnaryOp::Abs => x.map_columns(|c| Ok(p::abs(c))),
            UnaryOp::Neg => Ok(x.map_values(|v| Some(-v))),
            UnaryOp::TsRank { window } => x.map_columns(|c| ts::ts_rank(c, window)),
            UnaryOp::TsMin { window } => x.map_columns(|c| ts::ts_min(c, window)),
            UnaryOp::TsMax { window } => x.map_columns(|c| ts::ts_max(c, window)),
            UnaryOp::TsArgmin { window } => x.map_columns(|c| ts::ts_argmin(c, window)),
            UnaryOp::TsArgmax { window } => x.map_columns(|c| ts::ts_argmax(c, window)),
            UnaryOp::DecayLinear { window } => x.map_columns(|c| ts::decay_linear(c, window)),
            UnaryOp::Returns { n } => x.map_columns(|c| ts::returns(c, n)),
            UnaryOp::Count { window } => x.map_columns(|c| ts::count(c, window)),
            UnaryOp::Barslast => x.map_columns(|c| Ok(ts::barslast(c))),
            UnaryOp::Rank => x.map_rows(|r| Ok(cs::rank(r))),
            UnaryOp::Percentile => x.map_rows(|r| Ok(cs::percentile(r))),
            UnaryOp::Zscore => x.map_rows(|r| Ok(cs::zscore(r))),
            UnaryOp::Scale { a } => x.map_rows(|r| cs::scale(r, a)),
            UnaryOp::Winsorize { lower, upper } => {
                x.map_rows(|r| cs::winsorize(r, lower, upper))
            }
            UnaryOp::IndustryNeutralize => {
                let groups = groups.ok_or(OperatorError::MissingGroups)?;
                let labels: Vec<Option<&str>> = x
                    .instruments()
                    .iter()
                    .map(|i| groups.get(i).map(String::as_str))
                    .collect();
                x.map_rows(|r| cs::industry_neutralize(r, &labels))
            }
        }
    }
}

/// Two-input operators. Both inputs must share an index domain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    /// Division by zero is undefined.
    Div,
    Correlation { window: usize },
    Covariance { window: usize },
    /// Sum of the left input where the right input is non-zero.
    Sumif { window: usize },
    /// Left crosses above right.
    Cross,
}

impl BinaryOp {
    pub fn apply(&self, a: &Panel, b: &Panel) -> Result<Panel, OperatorError> {
        match *self {
            BinaryOp::Add => Ok(a.combine(b, |x, y| defined(x + y))?),
            BinaryOp::Sub => Ok(a.combine(b, |x, y| defined(x - y))?),
            BinaryOp::Mul => Ok(a.combine(b, |x, y| defined(x * y))?),
            BinaryOp::Div => Ok(a.combine(b, |x, y| defined(x / y))?),
            BinaryOp::Correlation { window } => {
                a.zip_columns(b, |x, y| ts::correlation(x, y, window))
            }
            BinaryOp::Covariance { window } => {
                a.zip_columns(b, |x, y| ts::covariance(x, y, window))
            }
            BinaryOp::Sumif { window } => a.zip_columns(b, |x, c| ts::sumif(x, c, window)),
            BinaryOp::Cross => a.zip_columns(b, ts::cross),
        }
    }
}

/// Composite indicators evaluated from the context's OHLC panels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum TechnicalIndicator {
    Rsi {
        period: usize,
    },
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
        line: MacdLine,
    },
    Boll {
        period: usize,
        k: f64,
        band: BollBand,
    },
    Atr {
        period: usize,
    },
    Kdj {
        n: usize,
        m1: usize,
        m2: usize,
        line: KdjLine,
    },
}

impl TechnicalIndicator {
    pub fn evaluate(&self, fields: &PanelSet) -> Result<Panel, OperatorError> {
        let close = fields.field("close")?;
        match *self {
            TechnicalIndicator::Rsi { period } => {
                close.map_columns(|c| technical::rsi(c, period))
            }
            TechnicalIndicator::Macd {
                fast,
                slow,
                signal,
                line,
            } => close.map_columns(|c| {
                let m = technical::macd(c, fast, slow, signal)?;
                Ok(match line {
                    MacdLine::Dif => m.dif,
                    MacdLine::Dea => m.dea,
                    MacdLine::Histogram => m.histogram,
                })
            }),
            TechnicalIndicator::Boll { period, k, band } => close.map_columns(|c| {
                let b = technical::boll(c, period, k)?;
                Ok(match band {
                    BollBand::Mid => b.mid,
                    BollBand::Upper => b.upper,
                    BollBand::Lower => b.lower,
                })
            }),
            TechnicalIndicator::Atr { period } => {
                hlc_columns(fields, |h, l, c| technical::atr(h, l, c, period))
            }
            TechnicalIndicator::Kdj { n, m1, m2, line } => hlc_columns(fields, |h, l, c| {
                let k = technical::kdj(h, l, c, n, m1, m2)?;
                Ok(match line {
                    KdjLine::K => k.k,
                    KdjLine::D => k.d,
                    KdjLine::J => k.j,
                })
            }),
        }
    }
}

fn hlc_columns<F>(fields: &PanelSet, f: F) -> Result<Panel, OperatorError>
where
    F: Fn(&[Value], &[Value], &[Value]) -> Result<Vec<Value>, OperatorError>,
{
    let high = fields.field("high")?;
    let low = fields.field("low")?;
    let close = fields.field("close")?;
    let columns = (0..close.width())
        .map(|i| f(high.column(i), low.column(i), close.column(i)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(close.with_columns(columns))
}

/// A factor definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FactorExpr {
    /// A raw panel from the context, e.g. `close` or a fundamental.
    Field { name: String },
    Constant { value: f64 },
    Unary {
        op: UnaryOp,
        input: Box<FactorExpr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<FactorExpr>,
        right: Box<FactorExpr>,
    },
    Technical { indicator: TechnicalIndicator },
}

impl FactorExpr {
    pub fn field(name: impl Into<String>) -> Self {
        FactorExpr::Field { name: name.into() }
    }

    pub fn constant(value: f64) -> Self {
        FactorExpr::Constant { value }
    }

    pub fn unary(op: UnaryOp, input: FactorExpr) -> Self {
        FactorExpr::Unary {
            op,
            input: Box::new(input),
        }
    }

    pub fn binary(op: BinaryOp, left: FactorExpr, right: FactorExpr) -> Self {
        FactorExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn technical(indicator: TechnicalIndicator) -> Self {
        FactorExpr::Technical { indicator }
    }

    /// Chain another unary operator on top of this expression.
    pub fn then(self, op: UnaryOp) -> Self {
        FactorExpr::unary(op, self)
    }

    pub fn evaluate(&self, ctx: &FactorContext<'_>) -> Result<Panel, OperatorError> {
        match self {
            FactorExpr::Field { name } => Ok(ctx.fields.field(name)?.clone()),
            FactorExpr::Constant { value } => {
                let reference = ctx.fields.field("close")?;
                Ok(Panel::filled(
                    reference.timestamps().to_vec(),
                    reference.instruments().to_vec(),
                    defined(*value),
                ))
            }
            FactorExpr::Unary { op, input } => op.apply(&input.evaluate(ctx)?, ctx.groups),
            FactorExpr::Binary { op, left, right } => {
                op.apply(&left.evaluate(ctx)?, &right.evaluate(ctx)?)
            }
            FactorExpr::Technical { indicator } => indicator.evaluate(ctx.fields),
        }
    }
}
