//! Session runner: resolves parameters, gathers inputs, drives the wave
//! scheduler, and hands results to the sink.
//!
//! All collaborator boundaries are traits so tests (and the parameter sweep)
//! can run entirely in memory. Only [`SessionError`] escapes; per-signal
//! problems become counted skips.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::candle::{Candle, CandleData, SIM_TIMEFRAME_MIN};
use crate::error::{DataSourceError, SessionError};
use crate::outcome::TradeOutcome;
use crate::params::{resolve_best_params, ParamsCandidate, SessionConfig, StrategyParams};
use crate::report::{build_summary, SessionSummary};
use crate::scheduler::WaveScheduler;
use crate::signal::{Signal, SkipCounts, SkipReason};

/// Cooperative cancellation flag, checked between waves and between signals
/// within a wave. A cancelled run still settles its open positions so the
/// ledger identity holds.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Ordered, deduplicated candle history for one pair over a time range.
pub trait CandleSource {
    fn candles(
        &self,
        trading_pair_id: i64,
        timeframe_min: u32,
        from_ts: i64,
        to_ts: i64,
    ) -> Result<Vec<Candle>, DataSourceError>;
}

/// Raw signals for the session window, ordered by timestamp.
pub trait SignalSource {
    fn signals(&self, from_ts: i64, to_ts: i64) -> Result<Vec<Signal>, DataSourceError>;
}

/// Historical backtest records used to pick each exchange's parameters.
pub trait ParamsSource {
    fn candidates(&self) -> Result<Vec<ParamsCandidate>, DataSourceError>;
}

/// Destination for trade rows and the session summary. Both operations are
/// idempotent on `session_id`: re-running a session replaces its rows.
pub trait ResultSink {
    fn append_trade(
        &mut self,
        session_id: &str,
        outcome: &TradeOutcome,
    ) -> Result<(), DataSourceError>;

    fn write_summary(
        &mut self,
        session_id: &str,
        user_id: i64,
        params_fingerprint: &str,
        summary: &SessionSummary,
    ) -> Result<(), DataSourceError>;
}

/// One session request.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub session_id: String,
    pub user_id: i64,
    /// Start of the signal window, ms since epoch (UTC).
    pub window_start_ts: i64,
    /// End of the replay window; also the simulation end time.
    pub window_end_ts: i64,
    /// `(name, value)` overrides applied on top of defaults and on top of
    /// every per-exchange parameter set.
    pub overrides: Vec<(String, f64)>,
}

/// Execute one session end to end and return its summary.
pub fn run_session<C, S, P, K>(
    request: &RunRequest,
    candle_source: &C,
    signal_source: &S,
    params_source: &P,
    sink: &mut K,
    cancel: &CancelToken,
) -> Result<SessionSummary, SessionError>
where
    C: CandleSource,
    S: SignalSource,
    P: ParamsSource,
    K: ResultSink,
{
    // Base config: defaults, then caller overrides, then the window end.
    let mut config = SessionConfig::default();
    config.apply_overrides(&request.overrides)?;
    config.params.simulation_end_time = request.window_end_ts;
    config.params.validate()?;

    let params_by_exchange =
        resolve_exchange_params(params_source, &config, &request.overrides)?;

    // Gate the raw window, counting every filtered signal.
    let mut skips = SkipCounts::default();
    let raw = signal_source.signals(request.window_start_ts, request.window_end_ts)?;
    let mut eligible: Vec<Signal> = Vec::with_capacity(raw.len());
    for signal in raw {
        match config.filter.evaluate(&signal) {
            Ok(()) => eligible.push(signal),
            Err(reason) => skips.record(reason),
        }
    }
    eligible.sort_by(|a, b| a.ts.cmp(&b.ts).then(a.signal_id.cmp(&b.signal_id)));

    // Prefetch every pair's history so the wave loop stays in memory. A
    // source error is fatal; a pair with no bars skips its signals.
    let pair_ids: BTreeSet<i64> = eligible.iter().map(|s| s.trading_pair_id).collect();
    let mut histories = CandleData::default();
    let mut missing: BTreeSet<i64> = BTreeSet::new();
    for pair_id in pair_ids {
        let bars = candle_source.candles(
            pair_id,
            SIM_TIMEFRAME_MIN,
            request.window_start_ts,
            request.window_end_ts,
        )?;
        if bars.is_empty() {
            missing.insert(pair_id);
        } else {
            histories.insert(pair_id, bars);
        }
    }
    eligible.retain(|signal| {
        if missing.contains(&signal.trading_pair_id) {
            skips.record(SkipReason::NoHistory);
            false
        } else {
            true
        }
    });

    let result =
        WaveScheduler::new(&histories, &params_by_exchange, &config.params).run(&eligible, cancel);
    skips.merge(&result.skips);

    let summary = build_summary(&result.ledger, &result.outcomes, skips);

    let fingerprint = config.params.fingerprint();
    for outcome in &result.outcomes {
        sink.append_trade(&request.session_id, outcome)?;
    }
    sink.write_summary(&request.session_id, request.user_id, &fingerprint, &summary)?;

    Ok(summary)
}

/// Resolve per-exchange parameter sets and normalize their session-global
/// fields to the base config, so every exchange shares the same window,
/// capital, and wave shape.
fn resolve_exchange_params<P: ParamsSource>(
    params_source: &P,
    config: &SessionConfig,
    overrides: &[(String, f64)],
) -> Result<BTreeMap<i64, StrategyParams>, SessionError> {
    let candidates = params_source.candidates()?;
    let mut resolved = resolve_best_params(&candidates);
    for params in resolved.values_mut() {
        let mut per_exchange = SessionConfig {
            params: params.clone(),
            filter: config.filter.clone(),
        };
        per_exchange.apply_overrides(overrides)?;
        per_exchange.params.initial_capital = config.params.initial_capital;
        per_exchange.params.simulation_end_time = config.params.simulation_end_time;
        per_exchange.params.wave_interval_ms = config.params.wave_interval_ms;
        per_exchange.params.max_trades_per_wave = config.params.max_trades_per_wave;
        per_exchange.params.validate()?;
        *params = per_exchange.params;
    }
    Ok(resolved)
}
