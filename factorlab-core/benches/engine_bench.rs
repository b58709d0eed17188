//! Criterion benchmarks for factorlab hot paths.
//!
//! Benchmarks:
//! 1. Factor evaluation (time-series and cross-sectional operator chains)
//! 2. Factor tester (IC, decay and quantile analysis)
//! 3. Engine event loop (rank strategy with slippage and participation caps)

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;

use factorlab_core::domain::{Bar, PanelSet, Timestamp};
use factorlab_core::engine::{
    run_backtest, CancellationToken, DataRequest, EngineConfig, FactorRankStrategy, InMemoryProvider,
    NullSink,
};
use factorlab_core::factor::FactorTester;
use factorlab_core::ops::{BinaryOp, FactorContext, FactorExpr, TechnicalIndicator, UnaryOp};

// ── Helpers ──────────────────────────────────────────────────────────

fn day(i: usize) -> Timestamp {
    Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap() + Duration::days(i as i64)
}

fn make_bars(instruments: usize, ticks: usize) -> Vec<Bar> {
    (0..instruments)
        .flat_map(|k| {
            (0..ticks).map(move |i| {
                let close = 100.0 + (i as f64 * 0.1 + k as f64 * 0.7).sin() * 10.0 + k as f64;
                Bar::new(
                    day(i),
                    format!("S{k:03}"),
                    close - 0.3,
                    close + 1.5,
                    close - 1.5,
                    close,
                    1_000_000.0 + (i % 500) as f64 * 1_000.0,
                )
            })
        })
        .collect()
}

fn make_panel_set(instruments: usize, ticks: usize) -> PanelSet {
    let mut by_tick: BTreeMap<Timestamp, BTreeMap<String, Bar>> = BTreeMap::new();
    for bar in make_bars(instruments, ticks) {
        by_tick
            .entry(bar.timestamp)
            .or_default()
            .insert(bar.instrument.clone(), bar);
    }
    let names = (0..instruments).map(|k| format!("S{k:03}")).collect();
    PanelSet::from_bars(names, by_tick.iter().map(|(ts, m)| (*ts, m))).unwrap()
}

fn alpha() -> FactorExpr {
    let momentum = FactorExpr::field("close").then(UnaryOp::Returns { n: 20 });
    let vol = FactorExpr::field("close")
        .then(UnaryOp::Returns { n: 1 })
        .then(UnaryOp::Std { window: 20 });
    FactorExpr::binary(BinaryOp::Div, momentum, vol)
        .then(UnaryOp::Winsorize { lower: 0.05, upper: 0.95 })
        .then(UnaryOp::Rank)
}

// ── 1. Factor Evaluation ─────────────────────────────────────────────

fn bench_factor_eval(c: &mut Criterion) {
    let mut group = c.benchmark_group("factor_eval");

    for &ticks in &[252, 1260] {
        let fields = make_panel_set(50, ticks);
        let ctx = FactorContext::new(&fields);

        group.bench_with_input(BenchmarkId::new("risk_adjusted_momentum", ticks), &ticks, |b, _| {
            let expr = alpha();
            b.iter(|| black_box(&expr).evaluate(black_box(&ctx)).unwrap())
        });

        group.bench_with_input(BenchmarkId::new("ts_corr_rank", ticks), &ticks, |b, _| {
            let expr = FactorExpr::binary(
                BinaryOp::Correlation { window: 10 },
                FactorExpr::field("close").then(UnaryOp::TsRank { window: 10 }),
                FactorExpr::field("volume").then(UnaryOp::TsRank { window: 10 }),
            );
            b.iter(|| black_box(&expr).evaluate(black_box(&ctx)).unwrap())
        });

        group.bench_with_input(BenchmarkId::new("rsi_14", ticks), &ticks, |b, _| {
            let expr = FactorExpr::technical(TechnicalIndicator::Rsi { period: 14 });
            b.iter(|| black_box(&expr).evaluate(black_box(&ctx)).unwrap())
        });
    }

    group.finish();
}

// ── 2. Factor Tester ─────────────────────────────────────────────────

fn bench_factor_tester(c: &mut Criterion) {
    let mut group = c.benchmark_group("factor_tester");
    let fields = make_panel_set(50, 504);
    let ctx = FactorContext::new(&fields);
    let tester = FactorTester::default();
    let expr = alpha();

    group.bench_function("50_instruments_504_ticks", |b| {
        b.iter(|| tester.run(black_box(&expr), black_box(&ctx)).unwrap())
    });

    group.finish();
}

// ── 3. Engine Event Loop ─────────────────────────────────────────────

fn bench_event_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_loop");
    group.sample_size(20);

    for &ticks in &[252, 756] {
        let provider = InMemoryProvider::from_bars(make_bars(20, ticks)).unwrap();
        let request = DataRequest::new((0..20).map(|k| format!("S{k:03}")).collect());
        let mut config = EngineConfig::new(1_000_000.0).with_seed(42);
        config.broker.max_participation = Some(0.1);
        config.max_lookback = Some(64);

        group.bench_with_input(BenchmarkId::new("rank_top5_20_instruments", ticks), &ticks, |b, _| {
            b.iter(|| {
                let mut strategy = FactorRankStrategy::new(
                    FactorExpr::field("close").then(UnaryOp::Returns { n: 20 }),
                    5,
                );
                strategy.rebalance_every = 5;
                strategy.min_history = 21;
                run_backtest(
                    black_box(&config),
                    black_box(&request),
                    &provider,
                    &mut strategy,
                    &mut NullSink,
                    &CancellationToken::new(),
                )
                .unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_factor_eval, bench_factor_tester, bench_event_loop);
criterion_main!(benches);
