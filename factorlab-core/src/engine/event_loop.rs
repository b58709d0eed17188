//! Tick-by-tick event loop.
//!
//! Per tick, strictly in timestamp order:
//! 1. Market snapshot: bars visible at the tick, checked for look-ahead
//! 2. Strategy: intents from history before the tick, submitted unless the breaker is engaged
//! 3. Execution algorithms: child slices for active parents
//! 4. Matching: broker fills against the tick's bars, applied to the portfolio
//! 5. Mark-to-market and snapshot
//! 6. Risk evaluation, which may suppress orders or halt the run
//! 7. Records to the sink, then the tick's bars join the history
//!
//! Cancellation is honoured between ticks only.

use super::cancel::CancellationToken;
use super::config::{EngineConfig, OpenOrderPolicy};
use super::provider::{DataRequest, MarketDataProvider};
use super::sink::{RecordSink, SinkError};
use super::state::{BacktestOutcome, HaltReason, RunState};
use super::strategy::{OrderIntent, Strategy, StrategyContext};
use super::EngineError;
use crate::algo::ParentExecution;
use crate::broker::{BrokerError, OrderBook, SimulatedBroker};
use crate::domain::{
    defined, Bar, Fill, Order, OrderId, OrderType, PanelSet, PortfolioSnapshot, TimeInForce, Timestamp, Value,
};
use crate::portfolio::Portfolio;
use crate::risk::{
    BreakerState, MonitorOutcome, RiskAlert, RiskDirective, RiskMetricRecord, RiskMonitor, MARKET_FACTOR,
};
use crate::rng::{streams, RngHierarchy};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Run one backtest to completion or halt.
///
/// Configuration errors are returned before anything runs. Failures after the
/// run starts end in `RunState::Halted` with everything recorded up to that point.
pub fn run_backtest(
    config: &EngineConfig,
    request: &DataRequest,
    provider: &dyn MarketDataProvider,
    strategy: &mut dyn Strategy,
    sink: &mut dyn RecordSink,
    cancel: &CancellationToken,
) -> Result<BacktestOutcome, EngineError> {
    let engine = BacktestEngine::new(config.clone(), &request.instruments)?;
    Ok(engine.run(request, provider, strategy, sink, cancel))
}

/// Authoritative state of one run: the order book, broker, portfolio and risk monitor.
pub struct BacktestEngine {
    config: EngineConfig,
    instruments: Vec<String>,
    state: RunState,
    book: OrderBook,
    broker: SimulatedBroker,
    portfolio: Portfolio,
    monitor: RiskMonitor,
    executions: BTreeMap<OrderId, ParentExecution>,
    /// Bars strictly before the current tick.
    history: PanelSet,
    prev_closes: BTreeMap<String, f64>,
    audit_cursor: usize,
    snapshots: Vec<PortfolioSnapshot>,
    fills: Vec<Fill>,
    risk_records: Vec<RiskMetricRecord>,
    alerts: Vec<RiskAlert>,
}

impl BacktestEngine {
    pub fn new(config: EngineConfig, instruments: &[String]) -> Result<Self, EngineError> {
        config.validate()?;
        if instruments.is_empty() {
            return Err(EngineError::InvalidConfig("instrument universe is empty".into()));
        }
        let instruments: Vec<String> = instruments
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let rng = RngHierarchy::new(config.seed).rng_for(streams::SLIPPAGE, 0);
        let broker = SimulatedBroker::new(config.broker.clone(), instruments.iter().cloned(), rng)?;
        let portfolio = Portfolio::new(config.initial_cash)?;
        let monitor = RiskMonitor::new(config.risk.clone(), config.initial_cash)?.with_seed(config.seed);

        Ok(Self {
            history: PanelSet::new(instruments.clone()),
            instruments,
            state: RunState::Initialized,
            book: OrderBook::new(),
            broker,
            portfolio,
            monitor,
            executions: BTreeMap::new(),
            prev_closes: BTreeMap::new(),
            audit_cursor: 0,
            snapshots: Vec::new(),
            fills: Vec::new(),
            risk_records: Vec::new(),
            alerts: Vec::new(),
            config,
        })
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Drive the clock. Consumes the engine; state does not outlive the run.
    pub fn run(
        mut self,
        request: &DataRequest,
        provider: &dyn MarketDataProvider,
        strategy: &mut dyn Strategy,
        sink: &mut dyn RecordSink,
        cancel: &CancellationToken,
    ) -> BacktestOutcome {
        self.state = RunState::Running;
        info!(
            strategy = strategy.name(),
            instruments = self.instruments.len(),
            seed = self.config.seed,
            "backtest started"
        );

        match provider.timeline(request) {
            Err(e) => self.halt(HaltReason::Provider(e.to_string())),
            Ok(timeline) if !timeline.windows(2).all(|w| w[0] < w[1]) => {
                self.halt(HaltReason::Provider("timeline is not strictly increasing".into()))
            }
            Ok(timeline) => {
                for (tick, ts) in timeline.into_iter().enumerate() {
                    if cancel.is_cancelled() {
                        self.halt(HaltReason::Cancelled);
                        break;
                    }
                    let halt = match self.step(tick, ts, provider, strategy, sink) {
                        Ok(halt) => halt,
                        Err(e) => Some(HaltReason::Engine(e.to_string())),
                    };
                    if let Some(reason) = halt {
                        self.halt(reason);
                        break;
                    }
                }
            }
        }

        if self.state == RunState::Running {
            self.state = RunState::Completed;
        }
        if let Err(e) = sink.flush() {
            warn!(error = %e, "sink flush failed");
            if self.state == RunState::Completed {
                self.state = RunState::Halted {
                    reason: HaltReason::Sink(e.to_string()),
                };
            }
        }
        info!(
            state = %self.state,
            ticks = self.snapshots.len(),
            fills = self.fills.len(),
            final_equity = self.snapshots.last().map(|s| s.total_equity),
            "backtest finished"
        );
        self.finish()
    }

    fn halt(&mut self, reason: HaltReason) {
        if self.state == RunState::Running {
            warn!(%reason, ticks = self.snapshots.len(), "run halted");
            self.state = RunState::Halted { reason };
        }
    }

    /// One tick. `Ok(Some(_))` stops the clock.
    fn step(
        &mut self,
        tick: usize,
        ts: Timestamp,
        provider: &dyn MarketDataProvider,
        strategy: &mut dyn Strategy,
        sink: &mut dyn RecordSink,
    ) -> Result<Option<HaltReason>, EngineError> {
        // ─── Market snapshot ───
        let bars = match provider.bars_at(&self.instruments, ts) {
            Ok(bars) => bars,
            Err(e) => return Ok(Some(HaltReason::Provider(e.to_string()))),
        };
        if let Some(bar) = bars.values().find(|b| b.timestamp > ts) {
            return Ok(Some(HaltReason::LookAhead {
                instrument: bar.instrument.clone(),
                bar_ts: bar.timestamp,
                tick_ts: ts,
            }));
        }

        // ─── Strategy ───
        let gate_open = self.monitor.allows_new_orders();
        let positions: BTreeMap<String, f64> = self
            .portfolio
            .positions()
            .map(|p| (p.instrument.clone(), p.quantity))
            .collect();
        let pending = self.pending();
        let ctx = StrategyContext {
            tick,
            timestamp: ts,
            history: &self.history,
            positions: &positions,
            pending: &pending,
            cash: self.portfolio.cash(),
            equity: self
                .snapshots
                .last()
                .map_or(self.config.initial_cash, |s| s.total_equity),
            breaker_engaged: !gate_open,
        };
        let intents = strategy.on_tick(&ctx);
        if gate_open {
            for intent in intents {
                self.submit_intent(intent, tick, ts)?;
            }
        } else if !intents.is_empty() {
            debug!(tick, suppressed = intents.len(), "breaker engaged, intents dropped");
        }

        // ─── Execution algorithms ───
        if gate_open {
            self.step_algos(&bars, tick, ts)?;
        }

        // ─── Matching ───
        let fills = self.broker.match_tick(&mut self.book, &bars, tick, ts)?;
        for fill in &fills {
            self.portfolio.apply_fill(fill)?;
            if let Some(exec) = fill.parent_id.and_then(|p| self.executions.get_mut(&p)) {
                exec.on_fill(fill.quantity);
            }
        }
        let book = &self.book;
        self.executions
            .retain(|id, _| book.get_order(*id).is_some_and(Order::is_active));

        // ─── Mark-to-market ───
        let closes: BTreeMap<String, f64> = bars
            .iter()
            .filter(|(_, b)| !b.is_void())
            .map(|(name, b)| (name.clone(), b.close))
            .collect();
        let snapshot = self.portfolio.snapshot(tick, ts, &closes);

        // ─── Risk ───
        let factor_returns = self.factor_returns(&closes);
        let outcome = self.monitor.evaluate(&snapshot, &factor_returns)?;
        let triggered = outcome
            .transition
            .as_ref()
            .is_some_and(|t| matches!(t.to, BreakerState::Triggered { .. }));
        if triggered && self.config.open_order_policy == OpenOrderPolicy::CancelOnTrigger {
            self.cancel_open_orders(tick)?;
        }

        // ─── Records ───
        let sunk = self.emit(sink, &fills, &snapshot, &outcome);
        self.fills.extend(fills);
        self.snapshots.push(snapshot);
        self.risk_records.extend(outcome.record);
        self.alerts.extend(outcome.alerts);
        if let Err(e) = sunk {
            return Ok(Some(HaltReason::Sink(e.to_string())));
        }

        // ─── History ───
        self.history.push_bars(ts, &bars)?;
        if let Some(n) = self.config.max_lookback {
            self.history.truncate_front(n);
        }
        self.prev_closes.extend(closes);

        debug!(tick, %ts, equity = self.portfolio.equity(), active_orders = self.book.active_count(), "tick done");
        Ok(match outcome.directive {
            RiskDirective::Halt(flag) => Some(HaltReason::RiskLimit {
                metric: flag.metric,
                value: flag.value,
                threshold: flag.threshold,
            }),
            RiskDirective::Continue | RiskDirective::SuppressOrders => None,
        })
    }

    fn submit_intent(&mut self, intent: OrderIntent, tick: usize, ts: Timestamp) -> Result<(), EngineError> {
        let id = self.book.next_id();
        let tif = intent
            .time_in_force
            .unwrap_or(self.config.broker.default_time_in_force);
        let order = Order::new(
            id,
            intent.instrument,
            intent.side,
            intent.quantity,
            intent.order_type,
            tif,
            ts,
            tick,
        );

        let OrderType::Algo { spec } = &order.order_type else {
            return match self.broker.submit(&mut self.book, order, tick) {
                Ok(_) | Err(BrokerError::Rejected { .. }) => Ok(()),
                Err(e) => Err(e.into()),
            };
        };
        let verdict = self.broker.validate(&order).and_then(|()| {
            ParentExecution::new(id, order.instrument.clone(), order.side, order.quantity, spec, self.config.algo)
                .map_err(|e| e.to_string())
        });
        match verdict {
            Ok(exec) => {
                debug!(order = %id, algo = exec.algo_name(), instrument = %order.instrument, quantity = order.quantity, "algo parent accepted");
                self.book.insert(order, tick).map_err(BrokerError::from)?;
                self.executions.insert(id, exec);
            }
            Err(reason) => {
                warn!(order = %id, instrument = %order.instrument, %reason, "algo order rejected");
                self.book.reject(order, tick, &reason);
            }
        }
        Ok(())
    }

    /// Emit this tick's child slices. Slices see the tick's traded volume.
    fn step_algos(&mut self, bars: &BTreeMap<String, Bar>, tick: usize, ts: Timestamp) -> Result<(), EngineError> {
        let parent_ids: Vec<OrderId> = self.executions.keys().copied().collect();
        for parent_id in parent_ids {
            let Some(exec) = self.executions.get_mut(&parent_id) else {
                continue;
            };
            if exec.is_finished() {
                continue;
            }
            let volume = bars
                .get(exec.instrument())
                .filter(|b| !b.is_void())
                .map(|b| b.volume);
            let decision = exec.step(volume);
            let (instrument, side) = (exec.instrument().to_string(), exec.side());

            if decision.child_quantity > 0.0 {
                let id = self.book.next_id();
                let child = Order::new(
                    id,
                    instrument,
                    side,
                    decision.child_quantity,
                    OrderType::Market,
                    TimeInForce::Gtc,
                    ts,
                    tick,
                )
                .with_parent(parent_id);
                match self.broker.submit(&mut self.book, child, tick) {
                    Ok(_) | Err(BrokerError::Rejected { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            let parent_active = self.book.get_order(parent_id).is_some_and(Order::is_active);
            if decision.expired_quantity > 0.0 && parent_active {
                self.book
                    .expire(parent_id, tick, "algo horizon elapsed")
                    .map_err(BrokerError::from)?;
                debug!(order = %parent_id, unsliced = decision.expired_quantity, "algo parent expired");
            }
        }
        Ok(())
    }

    /// Cancel every active order. An algo parent takes its live children down
    /// with it before it is cancelled itself.
    fn cancel_open_orders(&mut self, tick: usize) -> Result<(), EngineError> {
        let active: Vec<OrderId> = self
            .book
            .orders()
            .filter(|o| o.is_active())
            .map(|o| o.id)
            .collect();
        for id in active {
            if !self.book.get_order(id).is_some_and(Order::is_active) {
                continue;
            }
            if let Some(exec) = self.executions.get_mut(&id) {
                exec.cancel();
            }
            if self.book.get_order(id).is_some_and(Order::is_algo_parent) {
                for child in self.book.active_children(id) {
                    self.broker
                        .cancel(&mut self.book, child, tick, "algo parent cancelled")?;
                }
            }
            self.broker
                .cancel(&mut self.book, id, tick, "circuit breaker triggered")?;
        }
        Ok(())
    }

    /// Signed unfilled quantity of top-level active orders. Children are already
    /// counted through their parent.
    fn pending(&self) -> BTreeMap<String, f64> {
        let mut pending = BTreeMap::new();
        for order in self
            .book
            .orders()
            .filter(|o| o.is_active() && o.parent_id.is_none())
        {
            *pending.entry(order.instrument.clone()).or_insert(0.0) +=
                order.side.sign() * order.remaining_quantity();
        }
        pending
    }

    /// Close-to-close returns for the configured exposure factors.
    fn factor_returns(&self, closes: &BTreeMap<String, f64>) -> BTreeMap<String, Value> {
        let returns: BTreeMap<&str, f64> = closes
            .iter()
            .filter_map(|(name, close)| {
                let prev = self.prev_closes.get(name).filter(|p| **p > 0.0)?;
                Some((name.as_str(), close / prev - 1.0))
            })
            .collect();
        let market = (!returns.is_empty()).then(|| returns.values().sum::<f64>() / returns.len() as f64);

        self.config
            .risk
            .exposure_factors
            .iter()
            .map(|factor| {
                let r = if factor == MARKET_FACTOR {
                    market
                } else {
                    returns.get(factor.as_str()).copied()
                };
                (factor.clone(), r.and_then(defined))
            })
            .collect()
    }

    fn emit(
        &mut self,
        sink: &mut dyn RecordSink,
        fills: &[Fill],
        snapshot: &PortfolioSnapshot,
        outcome: &MonitorOutcome,
    ) -> Result<(), SinkError> {
        for fill in fills {
            sink.on_fill(fill)?;
        }
        for entry in &self.book.audit_trail()[self.audit_cursor..] {
            sink.on_order_update(entry)?;
        }
        self.audit_cursor = self.book.audit_trail().len();
        sink.on_snapshot(snapshot)?;
        if let Some(record) = &outcome.record {
            sink.on_risk_record(record)?;
        }
        for alert in &outcome.alerts {
            sink.on_alert(alert)?;
        }
        Ok(())
    }

    fn finish(self) -> BacktestOutcome {
        let stress_results = self
            .snapshots
            .last()
            .map(|s| self.monitor.stress(s, None))
            .unwrap_or_default();
        BacktestOutcome {
            state: self.state,
            orders: self.book.orders().cloned().collect(),
            audit: self.book.audit_trail().to_vec(),
            breaker_transitions: self.monitor.breaker().transitions().to_vec(),
            snapshots: self.snapshots,
            fills: self.fills,
            risk_records: self.risk_records,
            alerts: self.alerts,
            stress_results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderSide;
    use crate::engine::provider::InMemoryProvider;
    use crate::engine::sink::{MemorySink, NullSink};
    use crate::engine::strategy::ConstantStrategy;
    use chrono::{Duration, TimeZone, Utc};

    fn provider(closes: &[f64]) -> InMemoryProvider {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        InMemoryProvider::from_bars(closes.iter().enumerate().map(|(i, c)| {
            Bar::new(start + Duration::days(i as i64), "A", *c, *c, *c, *c, 1_000.0)
        }))
        .unwrap()
    }

    fn buy(qty: f64) -> ConstantStrategy {
        ConstantStrategy::new(vec![OrderIntent::market("A", OrderSide::Buy, qty)])
    }

    #[test]
    fn empty_universe_is_a_config_error() {
        assert!(BacktestEngine::new(EngineConfig::new(1_000.0), &[]).is_err());
    }

    #[test]
    fn snapshot_per_tick_and_completed() {
        let p = provider(&[10.0, 11.0, 12.0]);
        let request = DataRequest::new(vec!["A".into()]);
        let outcome = run_backtest(
            &EngineConfig::new(10_000.0),
            &request,
            &p,
            &mut buy(1.0),
            &mut NullSink,
            &CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(outcome.state, RunState::Completed);
        assert_eq!(outcome.snapshots.len(), 3);
        assert_eq!(outcome.fills.len(), 3);
        assert_eq!(outcome.snapshots[2].positions[0].quantity, 3.0);
    }

    #[test]
    fn sink_sees_every_record() {
        let p = provider(&[10.0, 11.0]);
        let request = DataRequest::new(vec!["A".into()]);
        let mut sink = MemorySink::default();
        let outcome = run_backtest(
            &EngineConfig::new(10_000.0),
            &request,
            &p,
            &mut buy(1.0),
            &mut sink,
            &CancellationToken::new(),
        )
        .unwrap();
        assert!(sink.flushed);
        assert_eq!(sink.snapshots, outcome.snapshots);
        assert_eq!(sink.fills, outcome.fills);
        assert_eq!(sink.order_updates, outcome.audit);
        assert_eq!(sink.risk_records.len(), 2);
    }

    #[test]
    fn rejected_intent_does_not_stop_the_run() {
        let p = provider(&[10.0, 11.0]);
        let request = DataRequest::new(vec!["A".into()]);
        let mut strategy = ConstantStrategy::new(vec![OrderIntent::market("ZZZ", OrderSide::Buy, 1.0)]);
        let outcome = run_backtest(
            &EngineConfig::new(10_000.0),
            &request,
            &p,
            &mut strategy,
            &mut NullSink,
            &CancellationToken::new(),
        )
        .unwrap();
        assert!(outcome.is_completed());
        assert!(outcome.fills.is_empty());
        assert_eq!(outcome.orders.len(), 2);
        assert!(outcome.orders.iter().all(|o| o.status.label() == "REJECTED"));
    }

    #[test]
    fn twap_parent_fills_through_children() {
        use crate::algo::AlgoSpec;
        let p = provider(&[10.0, 10.0, 10.0, 10.0]);
        let request = DataRequest::new(vec!["A".into()]);
        let mut once = OnceStrategy(Some(OrderIntent::algo("A", OrderSide::Buy, 90.0, AlgoSpec::Twap { horizon: 3 })));
        let outcome = run_backtest(
            &EngineConfig::new(10_000.0),
            &request,
            &p,
            &mut once,
            &mut NullSink,
            &CancellationToken::new(),
        )
        .unwrap();
        let parent = &outcome.orders[0];
        assert!(parent.is_algo_parent());
        assert_eq!(parent.status.label(), "FILLED");
        let children: Vec<_> = outcome.fills.iter().filter(|f| f.parent_id == Some(parent.id)).collect();
        assert_eq!(children.len(), 3);
        assert!(children.iter().all(|f| f.quantity == 30.0));
    }

    #[test]
    fn breaker_cancels_algo_children_with_their_parent() {
        use crate::algo::AlgoSpec;
        let p = provider(&[10.0, 10.0, 5.0, 5.0]);
        let request = DataRequest::new(vec!["A".into()]);
        let mut config = EngineConfig::new(10_000.0);
        config.broker.max_participation = Some(0.01);
        config.risk.breaker.max_tick_loss = Some(0.001);
        config.open_order_policy = OpenOrderPolicy::CancelOnTrigger;
        let mut once = OnceStrategy(Some(OrderIntent::algo("A", OrderSide::Buy, 300.0, AlgoSpec::Twap { horizon: 3 })));
        let outcome = run_backtest(&config, &request, &p, &mut once, &mut NullSink, &CancellationToken::new()).unwrap();

        let parent = &outcome.orders[0];
        assert_eq!(parent.status.label(), "CANCELLED");
        let children: Vec<_> = outcome.orders.iter().filter(|o| o.parent_id == Some(parent.id)).collect();
        assert!(!children.is_empty());
        assert!(children.iter().all(|o| !o.is_active()));
        let child_cancels = outcome
            .audit
            .iter()
            .filter(|e| e.reason == "algo parent cancelled")
            .count();
        assert!(child_cancels > 0);
        let parent_cancel = outcome
            .audit
            .iter()
            .position(|e| e.order_id == parent.id && e.reason == "circuit breaker triggered");
        let first_child_cancel = outcome.audit.iter().position(|e| e.reason == "algo parent cancelled");
        assert!(first_child_cancel < parent_cancel);
    }

    #[test]
    fn suppressed_ticks_pause_the_algo_schedule() {
        use crate::algo::AlgoSpec;
        let mut closes = vec![10.0];
        closes.extend([5.0; 9]);
        let p = provider(&closes);
        let request = DataRequest::new(vec!["A".into()]);
        let mut config = EngineConfig::new(10_000.0);
        config.risk.breaker.max_tick_loss = Some(0.001);
        config.risk.breaker.cooldown_ticks = 2;
        let mut once = OnceStrategy(Some(OrderIntent::algo("A", OrderSide::Buy, 120.0, AlgoSpec::Twap { horizon: 4 })));
        let outcome = run_backtest(&config, &request, &p, &mut once, &mut NullSink, &CancellationToken::new()).unwrap();

        let parent = &outcome.orders[0];
        assert_eq!(parent.status.label(), "FILLED");
        let ticks: Vec<usize> = outcome
            .fills
            .iter()
            .filter(|f| f.parent_id == Some(parent.id))
            .map(|f| f.tick)
            .collect();
        // triggered on tick 1, blocked through the cooldown, then two more slots
        assert_eq!(ticks, vec![0, 1, 5, 6]);
        assert!(outcome.fills.iter().all(|f| f.quantity == 30.0));
    }

    struct OnceStrategy(Option<OrderIntent>);

    impl Strategy for OnceStrategy {
        fn name(&self) -> &str {
            "once"
        }

        fn on_tick(&mut self, _ctx: &StrategyContext<'_>) -> Vec<OrderIntent> {
            self.0.take().into_iter().collect()
        }
    }
}
