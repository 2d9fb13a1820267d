//! CLI entry point for the wave-backtester simulation core.
//!
//! Subcommands:
//!   - `run`: execute one session against a SQLite database and persist the
//!     trade rows and summary.
//!   - `sweep`: run a parallel parameter sweep over in-memory copies of the
//!     same inputs and print the ranked results.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use wave_core::candle::SIM_TIMEFRAME_MIN;
use wave_core::memory::{MemoryCandleSource, MemoryParamsSource, MemorySignalSource};
use wave_core::session::{run_session, CancelToken, ParamsSource, RunRequest, SignalSource};
use wave_core::sweep::{run_sweep, SweepAxis, SweepSpec};
use wave_data::{load_candles, SqliteResultSink, SqliteStore};

const VERSION: &str = "0.3.0";

#[derive(Parser)]
#[command(
    name = "wave-backtester",
    version = VERSION,
    about = "Wave-based signal replay backtester for crypto futures",
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single session
    Run(RunArgs),
    /// Run a parallel parameter sweep
    Sweep(SweepArgs),
}

#[derive(Parser)]
struct RunArgs {
    /// Path to the SQLite database holding candles, signals, and parameter
    /// history. Results are written back into the same file unless
    /// --results-db is given.
    #[arg(long)]
    db: PathBuf,

    /// Separate SQLite database for trade rows and the session summary.
    #[arg(long)]
    results_db: Option<PathBuf>,

    /// Session identifier. Re-running the same id replaces its stored rows.
    #[arg(long, default_value = "session-1")]
    session_id: String,

    /// Owner recorded with the persisted summary.
    #[arg(long, default_value_t = 1)]
    user_id: i64,

    /// Start of the signal window, ms since epoch (UTC).
    #[arg(long)]
    from_ts: i64,

    /// End of the replay window, ms since epoch (UTC).
    #[arg(long)]
    to_ts: i64,

    /// Parameter override as name=value, e.g. --override leverage=5.
    /// May be repeated; later overrides win.
    #[arg(long = "override", value_name = "NAME=VALUE")]
    overrides: Vec<String>,

    /// Write the JSON summary to this file instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Parser)]
struct SweepArgs {
    /// Path to the SQLite database holding candles, signals, and parameter
    /// history.
    #[arg(long)]
    db: PathBuf,

    /// Session id prefix for the generated combinations.
    #[arg(long, default_value = "sweep")]
    session_id: String,

    /// Start of the signal window, ms since epoch (UTC).
    #[arg(long)]
    from_ts: i64,

    /// End of the replay window, ms since epoch (UTC).
    #[arg(long)]
    to_ts: i64,

    /// Sweep axis as name=v1,v2,v3, e.g. --axis score_week_min=60,70,80.
    /// May be repeated; combinations are the cartesian product.
    #[arg(long = "axis", value_name = "NAME=V1,V2,...")]
    axes: Vec<String>,

    /// Base override applied to every combination, as name=value.
    #[arg(long = "override", value_name = "NAME=VALUE")]
    overrides: Vec<String>,

    /// Print only the best N combinations.
    #[arg(long, default_value_t = 20)]
    top: usize,
}

fn parse_override(raw: &str) -> Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got {raw:?}"))?;
    let value: f64 = value
        .parse()
        .map_err(|e| format!("bad value in {raw:?}: {e}"))?;
    Ok((name.to_string(), value))
}

fn parse_axis(raw: &str) -> Result<SweepAxis, String> {
    let (name, values) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=V1,V2,..., got {raw:?}"))?;
    let values: Result<Vec<f64>, _> = values.split(',').map(str::parse).collect();
    Ok(SweepAxis {
        name: name.to_string(),
        values: values.map_err(|e| format!("bad values in {raw:?}: {e}"))?,
    })
}

fn parse_overrides(raw: &[String]) -> Result<Vec<(String, f64)>, String> {
    raw.iter().map(|s| parse_override(s)).collect()
}

fn cmd_run(args: &RunArgs) -> Result<(), String> {
    let overrides = parse_overrides(&args.overrides)?;
    let results_db = args.results_db.clone().unwrap_or_else(|| args.db.clone());

    let store = SqliteStore::open(&args.db).map_err(|e| format!("open {:?}: {e}", args.db))?;
    let mut sink = SqliteResultSink::open(&results_db)
        .map_err(|e| format!("open {results_db:?}: {e}"))?;

    let request = RunRequest {
        session_id: args.session_id.clone(),
        user_id: args.user_id,
        window_start_ts: args.from_ts,
        window_end_ts: args.to_ts,
        overrides,
    };

    eprintln!(
        "[wave-cli] running session {:?} over {}..{}",
        request.session_id, request.window_start_ts, request.window_end_ts,
    );
    let summary = run_session(
        &request,
        &store,
        &store,
        &store,
        &mut sink,
        &CancelToken::new(),
    )
    .map_err(|e| e.to_string())?;

    let json = serde_json::to_string_pretty(&summary.rounded())
        .map_err(|e| format!("serialize summary: {e}"))?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json).map_err(|e| format!("write {path:?}: {e}"))?;
            eprintln!("[wave-cli] summary written to {path:?}");
        }
        None => println!("{json}"),
    }
    eprintln!(
        "[wave-cli] trades={} realized_pnl={:.2} win_rate={:.1}%",
        summary.total_trades, summary.realized_pnl, summary.win_rate,
    );
    Ok(())
}

fn cmd_sweep(args: &SweepArgs) -> Result<(), String> {
    let overrides = parse_overrides(&args.overrides)?;
    let axes: Result<Vec<SweepAxis>, String> = args.axes.iter().map(|s| parse_axis(s)).collect();
    let spec = SweepSpec { axes: axes? };

    // Load everything into memory once; sweep sessions share the read-only
    // sources across rayon workers.
    let candles = load_candles(&args.db, SIM_TIMEFRAME_MIN)
        .map_err(|e| format!("load candles from {:?}: {e}", args.db))?;
    let store =
        SqliteStore::open_read_only(&args.db).map_err(|e| format!("open {:?}: {e}", args.db))?;
    let signals = store
        .signals(args.from_ts, args.to_ts)
        .map_err(|e| e.to_string())?;
    let candidates = store.candidates().map_err(|e| e.to_string())?;
    eprintln!(
        "[wave-cli] sweeping {} signals across {} axis values",
        signals.len(),
        spec.axes.iter().map(|a| a.values.len()).sum::<usize>(),
    );

    let candle_source = MemoryCandleSource::new(candles);
    let signal_source = MemorySignalSource::new(signals);
    let params_source = MemoryParamsSource::new(candidates);

    let request = RunRequest {
        session_id: args.session_id.clone(),
        user_id: 0,
        window_start_ts: args.from_ts,
        window_end_ts: args.to_ts,
        overrides,
    };

    let results = run_sweep(
        &spec,
        &request,
        &candle_source,
        &signal_source,
        &params_source,
        &CancelToken::new(),
    )
    .map_err(|e| e.to_string())?;

    println!(
        "{:<16} {:>12} {:>9} {:>7}  overrides",
        "config", "pnl_usd", "win_rate", "trades"
    );
    for result in results.iter().take(args.top) {
        let overrides: Vec<String> = result
            .overrides
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        println!(
            "{:<16} {:>12.2} {:>8.1}% {:>7}  {}",
            result.config_id,
            result.summary.realized_pnl,
            result.summary.win_rate,
            result.summary.total_trades,
            overrides.join(" "),
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match &cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::Sweep(args) => cmd_sweep(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("[error] {message}");
            ExitCode::FAILURE
        }
    }
}
