//! factorlab CLI: backtests, sweeps, synthetic data and factor research.
//!
//! Commands:
//! - `run`: execute one backtest from a TOML config over a CSV data file
//! - `sweep`: run a parameter grid over a FACTOR_RANK config in parallel
//! - `synth`: write a seeded synthetic bar file
//! - `factor-test`: score a factor expression (IC, rank IC, decay, quantiles)
//!
//! Logging goes to stderr and honours `RUST_LOG` (default `info`).

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use factorlab_core::engine::{CancellationToken, DataRequest, MarketDataProvider, NullSink, RecordSink};
use factorlab_core::factor::{FactorReport, FactorTester, IcSummary, Preprocessor};
use factorlab_core::ops::{FactorContext, FactorExpr};
use factorlab_runner::{
    load_panels, ranked_by_sharpe, run_single, run_sweep, synthetic_bars, write_csv, write_report, BacktestResult,
    CsvProvider, JsonlSink, ParamGrid, RunConfig, StrategyConfig,
};

#[derive(Parser)]
#[command(name = "factorlab", about = "factorlab: factor research and event-driven backtesting")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one backtest.
    Run {
        /// Path to a TOML run config.
        #[arg(long)]
        config: PathBuf,

        /// Long-format CSV bar file.
        #[arg(long)]
        data: PathBuf,

        /// Directory for result.json and equity.csv.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Append every engine record to this JSONL file.
        #[arg(long)]
        journal: Option<PathBuf>,
    },
    /// Run a parameter grid in parallel and rank the results by Sharpe ratio.
    Sweep {
        /// Path to a TOML run config with a FACTOR_RANK strategy.
        #[arg(long)]
        config: PathBuf,

        /// Long-format CSV bar file.
        #[arg(long)]
        data: PathBuf,

        /// Values for the number of long names (e.g. 5,10,20).
        #[arg(long, value_delimiter = ',')]
        top_k: Vec<usize>,

        /// Values for the rebalance interval in ticks.
        #[arg(long, value_delimiter = ',')]
        rebalance: Vec<usize>,

        /// Breaker drawdown thresholds; `none` disables the trigger (e.g. none,0.1,0.2).
        #[arg(long, value_delimiter = ',')]
        drawdown: Vec<String>,

        /// Write the ranked table as JSON to this file.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Write seeded synthetic bars as CSV.
    Synth {
        /// Output CSV path.
        #[arg(long)]
        out: PathBuf,

        /// Instrument names (e.g. AAA,BBB,CCC).
        #[arg(long, value_delimiter = ',', required = true)]
        instruments: Vec<String>,

        /// Number of daily bars per instrument.
        #[arg(long, default_value_t = 500)]
        ticks: usize,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// First bar date (YYYY-MM-DD).
        #[arg(long, default_value = "2020-01-01")]
        start: String,
    },
    /// Score a factor expression against forward returns.
    FactorTest {
        /// Long-format CSV bar file.
        #[arg(long)]
        data: PathBuf,

        /// Factor expression as JSON, or `@path` to read it from a file.
        #[arg(long)]
        expr: String,

        /// Optional run config; its data section selects instruments, dates and industries.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Forward return horizon in ticks.
        #[arg(long, default_value_t = 1)]
        horizon: usize,

        /// Number of quantile buckets.
        #[arg(long, default_value_t = 5)]
        buckets: usize,

        /// Cross-sectional z-score before scoring.
        #[arg(long, default_value_t = false)]
        standardize: bool,

        /// Demean within industries (needs a config with [data.industries]).
        #[arg(long, default_value_t = false)]
        neutralize: bool,

        /// Print the full report as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            data,
            output,
            journal,
        } => run_cmd(&config, &data, output.as_deref(), journal.as_deref()),
        Commands::Sweep {
            config,
            data,
            top_k,
            rebalance,
            drawdown,
            output,
        } => sweep_cmd(&config, &data, top_k, rebalance, &drawdown, output.as_deref()),
        Commands::Synth {
            out,
            instruments,
            ticks,
            seed,
            start,
        } => synth_cmd(&out, &instruments, ticks, seed, &start),
        Commands::FactorTest {
            data,
            expr,
            config,
            horizon,
            buckets,
            standardize,
            neutralize,
            json,
        } => {
            let tester = FactorTester {
                horizon,
                buckets,
                preprocessor: Preprocessor {
                    standardize,
                    neutralize,
                    ..Preprocessor::default()
                },
                ..FactorTester::default()
            };
            factor_test_cmd(&data, &expr, config.as_deref(), &tester, json)
        }
    }
}

fn load_data(path: &Path) -> Result<CsvProvider> {
    let provider =
        CsvProvider::from_path(path).with_context(|| format!("loading market data from {}", path.display()))?;
    let dataset = &provider.dataset_hash()[..12];
    info!(
        path = %path.display(),
        instruments = provider.instruments().len(),
        bars = provider.bar_count(),
        dataset,
        "market data loaded"
    );
    Ok(provider)
}

fn load_config(path: &Path) -> Result<RunConfig> {
    RunConfig::load(path).with_context(|| format!("loading run config from {}", path.display()))
}

fn run_cmd(config_path: &Path, data_path: &Path, output: Option<&Path>, journal: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let provider = load_data(data_path)?;

    let mut sink: Box<dyn RecordSink> = match journal {
        Some(path) => Box::new(
            JsonlSink::create(path).with_context(|| format!("opening journal {}", path.display()))?,
        ),
        None => Box::new(NullSink),
    };
    let result = run_single(&config, &provider, sink.as_mut(), &CancellationToken::new())?;

    print_summary(&result);

    if let Some(dir) = output {
        write_report(dir, &result)?;
        println!("Report saved to: {}", dir.display());
    }
    Ok(())
}

fn sweep_cmd(
    config_path: &Path,
    data_path: &Path,
    top_k: Vec<usize>,
    rebalance_every: Vec<usize>,
    drawdown: &[String],
    output: Option<&Path>,
) -> Result<()> {
    let base = load_config(config_path)?;
    let provider = load_data(data_path)?;
    let grid = ParamGrid {
        top_k,
        rebalance_every,
        breaker_drawdown: drawdown
            .iter()
            .map(|s| parse_threshold(s))
            .collect::<Result<_>>()?,
    };
    info!(points = grid.size(), "sweep starting");

    let entries = run_sweep(&base, &grid, &provider, &CancellationToken::new())?;
    for entry in &entries {
        if let Err(e) = &entry.result {
            eprintln!("Run failed for {:?}: {e}", entry.point);
        }
    }

    let ranked = ranked_by_sharpe(&entries);
    println!();
    println!("=== Sweep Results ({} of {} runs) ===", ranked.len(), entries.len());
    println!(
        "{:>4}  {:>6}  {:>9}  {:>9}  {:>8}  {:>9}  {:>8}  run",
        "#", "top_k", "rebalance", "breaker", "sharpe", "return", "max dd"
    );
    for (i, (_, result)) in ranked.iter().enumerate() {
        let StrategyConfig::FactorRank(strategy) = &result.config.strategy else {
            continue;
        };
        let breaker = result
            .config
            .engine
            .risk
            .breaker
            .max_drawdown
            .map_or_else(|| "off".to_string(), |d| format!("{:.1}%", d * 100.0));
        println!(
            "{:>4}  {:>6}  {:>9}  {:>9}  {:>8.3}  {:>8.2}%  {:>7.2}%  {}",
            i + 1,
            strategy.top_k,
            strategy.rebalance_every,
            breaker,
            result.metrics.sharpe,
            result.metrics.total_return * 100.0,
            result.metrics.max_drawdown * 100.0,
            &result.run_id[..12],
        );
    }

    if let Some(path) = output {
        let table: Vec<_> = ranked
            .iter()
            .map(|(point, result)| {
                serde_json::json!({
                    "point": point,
                    "run_id": result.run_id,
                    "state": result.outcome.state.to_string(),
                    "metrics": result.metrics,
                })
            })
            .collect();
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &table)?;
        println!("Sweep table saved to: {}", path.display());
    }
    Ok(())
}

fn parse_threshold(raw: &str) -> Result<Option<f64>> {
    if raw.eq_ignore_ascii_case("none") || raw.eq_ignore_ascii_case("off") {
        return Ok(None);
    }
    let value: f64 = raw
        .parse()
        .with_context(|| format!("invalid drawdown threshold '{raw}'"))?;
    Ok(Some(value))
}

fn synth_cmd(out: &Path, instruments: &[String], ticks: usize, seed: u64, start: &str) -> Result<()> {
    if ticks == 0 {
        bail!("--ticks must be positive");
    }
    let date = NaiveDate::parse_from_str(start, "%Y-%m-%d").with_context(|| format!("invalid --start '{start}'"))?;
    let midnight = date.and_hms_opt(0, 0, 0).context("invalid --start time")?;
    let start = Utc.from_utc_datetime(&midnight);

    let bars = synthetic_bars(instruments, start, ticks, seed);
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(out).with_context(|| format!("creating {}", out.display()))?;
    write_csv(BufWriter::new(file), &bars)?;

    println!("Wrote {} bars for {} instruments to {}", bars.len(), instruments.len(), out.display());
    Ok(())
}

fn factor_test_cmd(
    data_path: &Path,
    expr_arg: &str,
    config_path: Option<&Path>,
    tester: &FactorTester,
    json: bool,
) -> Result<()> {
    let expr_text = match expr_arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading expression from {path}"))?,
        None => expr_arg.to_string(),
    };
    let expr: FactorExpr = serde_json::from_str(&expr_text).context("parsing factor expression")?;

    let provider = load_data(data_path)?;
    let config = config_path.map(load_config).transpose()?;
    let request = match &config {
        Some(c) => c.data_request(provider.universe()),
        None => DataRequest::new(provider.universe()),
    };
    let panels = load_panels(&provider, &request)?;
    let industries: Option<&BTreeMap<String, String>> =
        config.as_ref().map(|c| &c.data.industries).filter(|m| !m.is_empty());
    if tester.preprocessor.neutralize && industries.is_none() {
        bail!("--neutralize needs a config with [data.industries]");
    }

    let mut ctx = FactorContext::new(&panels);
    if let Some(groups) = industries {
        ctx = ctx.with_groups(groups);
    }
    let report = tester.run(&expr, &ctx).context("evaluating factor")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_factor_report(&report, panels.len(), request.instruments.len());
    }
    Ok(())
}

fn print_summary(result: &BacktestResult) {
    let m = &result.metrics;
    println!();
    println!("=== Backtest Result ===");
    if let Some(name) = &result.config.name {
        println!("Name:           {name}");
    }
    println!("Run:            {}", &result.run_id[..12]);
    println!("State:          {}", result.outcome.state);
    println!("Ticks:          {}", m.tick_count);
    println!("Fills:          {}", m.fill_count);
    println!("Orders:         {}", result.outcome.orders.len());
    println!();
    println!("--- Performance ---");
    println!("Total Return:   {:.2}%", m.total_return * 100.0);
    println!("CAGR:           {:.2}%", m.cagr * 100.0);
    println!("Volatility:     {:.2}%", m.volatility * 100.0);
    println!("Sharpe:         {:.3}", m.sharpe);
    println!("Sortino:        {:.3}", m.sortino);
    println!("Calmar:         {:.3}", m.calmar);
    println!("Max Drawdown:   {:.2}% ({} ticks)", m.max_drawdown * 100.0, m.max_drawdown_duration);
    if let Some(cvar) = m.cvar_95 {
        println!("CVaR 95%:       {:.2}%", cvar * 100.0);
    }
    println!("Turnover:       {:.1}x", m.turnover);
    println!("Commission:     {:.2}", m.total_commission);
    println!("Slippage:       {:.2}", m.total_slippage);

    let outcome = &result.outcome;
    if !outcome.breaker_transitions.is_empty() || !outcome.alerts.is_empty() {
        println!();
        println!("--- Risk ---");
        println!("Breaker moves:  {}", outcome.breaker_transitions.len());
        println!("Alerts:         {}", outcome.alerts.len());
    }
    if !outcome.stress_results.is_empty() {
        println!();
        println!("--- Stress (final book) ---");
        for s in &outcome.stress_results {
            println!("{:<16}{:>12.2} ({:+.2}%)", s.scenario, s.pnl, s.pnl_fraction * 100.0);
        }
    }
    println!();
}

fn print_factor_report(report: &FactorReport, ticks: usize, instruments: usize) {
    fn ic_line(label: &str, ic: &IcSummary) {
        println!(
            "{label:<9} mean {:>7.4}  std {:>7.4}  IR {:>6.3}  t {:>6.2}  >0 {:>5.1}%  n {}",
            ic.mean,
            ic.std,
            ic.ir,
            ic.t_stat,
            ic.positive_ratio * 100.0,
            ic.observations
        );
    }

    println!();
    println!("=== Factor Report ({ticks} ticks x {instruments} instruments) ===");
    ic_line("IC", &report.ic);
    ic_line("Rank IC", &report.rank_ic);
    println!();
    println!("--- IC Decay ---");
    for point in &report.decay {
        println!("h={:<4} {:>8.4}  (n {})", point.horizon, point.mean_ic, point.observations);
    }
    println!();
    println!("--- Quantile Returns ---");
    for (i, mean) in report.quantiles.bucket_means.iter().enumerate() {
        match mean {
            Some(v) => println!("Q{:<3} {:>9.4}%", i + 1, v * 100.0),
            None => println!("Q{:<3} {:>9}", i + 1, "n/a"),
        }
    }
    match report.quantiles.long_short {
        Some(v) => println!("L/S  {:>9.4}%", v * 100.0),
        None => println!("L/S  {:>9}", "n/a"),
    }
    println!();
}
