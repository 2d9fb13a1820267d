//! Parallel parameter sweep: a cartesian product of overrides, each
//! combination run as its own independent session via rayon.
//!
//! Sessions share nothing but the read-only sources, so parallelism is safe
//! by construction; each run owns its ledger and open-positions map.

use rayon::prelude::*;

use crate::error::SessionError;
use crate::params::SessionConfig;
use crate::report::SessionSummary;
use crate::session::{run_session, CancelToken, CandleSource, ParamsSource, RunRequest, SignalSource};

/// One axis of the sweep: a parameter name and the values to try.
#[derive(Debug, Clone)]
pub struct SweepAxis {
    pub name: String,
    pub values: Vec<f64>,
}

/// Full sweep specification.
#[derive(Debug, Clone, Default)]
pub struct SweepSpec {
    pub axes: Vec<SweepAxis>,
}

/// Result of one sweep combination, ranked by realized PnL.
#[derive(Debug, Clone)]
pub struct SweepOutcome {
    pub config_id: String,
    pub overrides: Vec<(String, f64)>,
    pub params_fingerprint: String,
    pub summary: SessionSummary,
}

/// Cartesian product of the axes, in axis-major order.
fn generate_combinations(axes: &[SweepAxis]) -> Vec<Vec<(String, f64)>> {
    if axes.is_empty() {
        return vec![vec![]];
    }
    let rest = generate_combinations(&axes[1..]);
    let mut combos = Vec::with_capacity(axes[0].values.len() * rest.len());
    for value in &axes[0].values {
        for combo in &rest {
            let mut next = vec![(axes[0].name.clone(), *value)];
            next.extend(combo.iter().cloned());
            combos.push(next);
        }
    }
    combos
}

/// Run every combination and return results sorted by realized PnL
/// descending, ties broken by config id for a stable ranking.
///
/// Each combination reuses the base request with its overrides appended and a
/// derived session id (`<base>-0001`, `-0002`, ...). The first configuration
/// error or source failure aborts the whole sweep.
pub fn run_sweep<C, S, P>(
    spec: &SweepSpec,
    base_request: &RunRequest,
    candle_source: &C,
    signal_source: &S,
    params_source: &P,
    cancel: &CancelToken,
) -> Result<Vec<SweepOutcome>, SessionError>
where
    C: CandleSource + Sync,
    S: SignalSource + Sync,
    P: ParamsSource + Sync,
{
    let combos = generate_combinations(&spec.axes);

    let mut results: Vec<SweepOutcome> = combos
        .into_par_iter()
        .enumerate()
        .map(|(index, combo)| -> Result<SweepOutcome, SessionError> {
            let mut request = base_request.clone();
            request.session_id = format!("{}-{:04}", base_request.session_id, index + 1);
            request.overrides.extend(combo.iter().cloned());

            // Fingerprint the effective parameters the same way the runner
            // builds them.
            let mut config = SessionConfig::default();
            config.apply_overrides(&request.overrides)?;
            config.params.simulation_end_time = request.window_end_ts;

            let mut sink = crate::memory::MemorySink::new();
            let summary = run_session(
                &request,
                candle_source,
                signal_source,
                params_source,
                &mut sink,
                cancel,
            )?;

            Ok(SweepOutcome {
                config_id: request.session_id,
                overrides: combo,
                params_fingerprint: config.params.fingerprint(),
                summary,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    results.sort_by(|a, b| {
        b.summary
            .realized_pnl
            .total_cmp(&a.summary.realized_pnl)
            .then_with(|| a.config_id.cmp(&b.config_id))
    });
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::Candle;
    use crate::memory::{MemoryCandleSource, MemoryParamsSource, MemorySignalSource};
    use crate::signal::{Direction, Signal};

    const BAR: i64 = 300_000;

    #[test]
    fn combinations_are_a_full_cartesian_product() {
        let combos = generate_combinations(&[
            SweepAxis {
                name: "a".to_string(),
                values: vec![1.0, 2.0],
            },
            SweepAxis {
                name: "b".to_string(),
                values: vec![10.0, 20.0, 30.0],
            },
        ]);
        assert_eq!(combos.len(), 6);
        assert_eq!(combos[0], vec![("a".to_string(), 1.0), ("b".to_string(), 10.0)]);
        assert_eq!(combos[5], vec![("a".to_string(), 2.0), ("b".to_string(), 30.0)]);
    }

    #[test]
    fn empty_spec_runs_the_base_configuration_once() {
        assert_eq!(generate_combinations(&[]).len(), 1);
    }

    #[test]
    fn sweep_ranks_score_thresholds_by_pnl() {
        let end = 48 * 3_600_000;

        // Pair 100 rallies to its take-profit; pair 101 stops out. The strict
        // week-score threshold only admits the winner.
        let mut candles = MemoryCandleSource::default();
        let flat = |ts: i64, p: f64| Candle {
            ts,
            open: p,
            high: p,
            low: p,
            close: p,
            mark_price: None,
            volume: None,
            open_interest: None,
        };
        candles.insert(
            100,
            vec![
                flat(0, 100.0),
                Candle {
                    ts: BAR,
                    open: 100.0,
                    high: 104.5,
                    low: 100.0,
                    close: 104.0,
                    mark_price: None,
                    volume: None,
                    open_interest: None,
                },
            ],
        );
        candles.insert(
            101,
            vec![
                flat(0, 50.0),
                Candle {
                    ts: BAR,
                    open: 50.0,
                    high: 50.0,
                    low: 48.0,
                    close: 48.2,
                    mark_price: None,
                    volume: None,
                    open_interest: None,
                },
            ],
        );

        let signals = MemorySignalSource::new(vec![
            Signal {
                signal_id: 1,
                pair_symbol: "P100".to_string(),
                trading_pair_id: 100,
                exchange_id: 1,
                action: Direction::Long,
                ts: 0,
                score_week: 90.0,
                score_month: 85.0,
                volume_24h_usd: None,
                open_interest_usd: None,
            },
            Signal {
                signal_id: 2,
                pair_symbol: "P101".to_string(),
                trading_pair_id: 101,
                exchange_id: 1,
                action: Direction::Long,
                ts: 0,
                score_week: 60.0,
                score_month: 55.0,
                volume_24h_usd: None,
                open_interest_usd: None,
            },
        ]);

        let request = RunRequest {
            session_id: "sweep-test".to_string(),
            user_id: 1,
            window_start_ts: 0,
            window_end_ts: end,
            overrides: Vec::new(),
        };
        let spec = SweepSpec {
            axes: vec![SweepAxis {
                name: "score_week_min".to_string(),
                values: vec![0.0, 80.0],
            }],
        };

        let results = run_sweep(
            &spec,
            &request,
            &candles,
            &signals,
            &MemoryParamsSource::default(),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(results.len(), 2);
        // The strict threshold keeps only the winning trade and ranks first.
        assert_eq!(results[0].overrides[0].1, 80.0);
        assert_eq!(results[0].summary.total_trades, 1);
        assert_eq!(results[0].summary.skips.filter_score, 1);
        assert!(results[0].summary.realized_pnl > results[1].summary.realized_pnl);
        assert_ne!(results[0].params_fingerprint, "");
    }
}
