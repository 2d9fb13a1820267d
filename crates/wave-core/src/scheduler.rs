//! Wave scheduler: bins signals into 15-minute cohorts and drives the
//! admission / closure / equity cycle against the capital ledger.
//!
//! Each wave runs three steps in order: release positions whose projected
//! close has fallen due, snapshot equity with real mark prices, then admit
//! new signals in score order subject to the per-wave cap and capital. After
//! the last wave the finalizer settles whatever is still open.

use std::collections::BTreeMap;

use crate::accounting::{
    apply_adverse_slippage, cap_exact_exit_price, cap_loss_to_margin, gross_pnl, pnl_pct,
};
use crate::candle::{last_close_at_or_before, CandleData};
use crate::ledger::{CapitalLedger, MarkPrices};
use crate::outcome::{CloseReason, OpenPosition, TradeOutcome};
use crate::params::StrategyParams;
use crate::session::CancelToken;
use crate::signal::{Signal, SkipCounts, SkipReason};

/// Everything the scheduler produced for one session.
#[derive(Debug)]
pub struct SchedulerResult {
    /// Append-only trade ledger in the session's canonical order.
    pub outcomes: Vec<TradeOutcome>,
    pub ledger: CapitalLedger,
    pub skips: SkipCounts,
    /// True when the run was cut short by the cancellation token. Open
    /// positions are still settled so the ledger balances.
    pub cancelled: bool,
}

/// Bucket signals into wave cohorts and order each cohort for admission:
/// `score_week` descending, then `score_month` descending, then `signal_id`
/// ascending.
pub fn group_signals_by_wave(
    signals: &[Signal],
    wave_interval_ms: i64,
) -> BTreeMap<i64, Vec<Signal>> {
    let mut waves: BTreeMap<i64, Vec<Signal>> = BTreeMap::new();
    for signal in signals {
        let wave_time = signal.ts - signal.ts.rem_euclid(wave_interval_ms);
        waves.entry(wave_time).or_default().push(signal.clone());
    }
    for cohort in waves.values_mut() {
        cohort.sort_by(|a, b| {
            b.score_week
                .total_cmp(&a.score_week)
                .then(b.score_month.total_cmp(&a.score_month))
                .then(a.signal_id.cmp(&b.signal_id))
        });
    }
    waves
}

pub struct WaveScheduler<'a> {
    histories: &'a CandleData,
    params_by_exchange: &'a BTreeMap<i64, StrategyParams>,
    base: &'a StrategyParams,
    ledger: CapitalLedger,
    open: BTreeMap<String, OpenPosition>,
    outcomes: Vec<TradeOutcome>,
    skips: SkipCounts,
}

impl<'a> WaveScheduler<'a> {
    /// `params_by_exchange` entries must already carry the session-global
    /// fields (window end, wave interval, capital) from `base`; the runner
    /// normalizes them before handing them over.
    pub fn new(
        histories: &'a CandleData,
        params_by_exchange: &'a BTreeMap<i64, StrategyParams>,
        base: &'a StrategyParams,
    ) -> Self {
        Self {
            histories,
            params_by_exchange,
            base,
            ledger: CapitalLedger::new(base.initial_capital),
            open: BTreeMap::new(),
            outcomes: Vec::new(),
            skips: SkipCounts::default(),
        }
    }

    fn params_for(&self, exchange_id: i64) -> &StrategyParams {
        self.params_by_exchange.get(&exchange_id).unwrap_or(self.base)
    }

    /// Drive all waves to completion and settle the remainder.
    pub fn run(mut self, signals: &[Signal], cancel: &CancelToken) -> SchedulerResult {
        let waves = group_signals_by_wave(signals, self.base.wave_interval_ms);
        let mut cancelled = false;

        for (wave_time, cohort) in &waves {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            self.close_due(*wave_time);
            let marks = MarkPrices::for_positions(self.histories, self.open.values(), *wave_time);
            self.ledger.snapshot_equity(&self.open, &marks);
            if self.admit_wave(*wave_time, cohort, cancel) {
                cancelled = true;
                break;
            }
        }

        self.finalize();

        SchedulerResult {
            outcomes: self.outcomes,
            ledger: self.ledger,
            skips: self.skips,
            cancelled,
        }
    }

    /// Release every open position whose projected close has fallen due.
    /// Period-end projections are left for the finalizer, which applies the
    /// forced-liquidation relabel.
    fn close_due(&mut self, wave_time: i64) {
        let mut due: Vec<(i64, String)> = self
            .open
            .iter()
            .filter(|(_, pos)| {
                pos.projected.close_reason != CloseReason::ForcedPeriodEnd
                    && pos.projected.close_time <= wave_time
            })
            .map(|(pair, pos)| (pos.projected.close_time, pair.clone()))
            .collect();
        due.sort();

        for (_, pair) in due {
            let pos = self.open.remove(&pair).expect("due position present");
            self.settle(pos.margin, pos.projected);
        }
    }

    /// Admit the wave's cohort in score order. Returns true when cancelled
    /// mid-wave.
    fn admit_wave(&mut self, wave_time: i64, cohort: &[Signal], cancel: &CancelToken) -> bool {
        let mut admitted: u32 = 0;

        for (index, signal) in cohort.iter().enumerate() {
            if cancel.is_cancelled() {
                return true;
            }
            if admitted >= self.base.max_trades_per_wave {
                for _ in index..cohort.len() {
                    self.skips.record(SkipReason::WaveCapReached);
                }
                break;
            }
            if self.open.contains_key(&signal.pair_symbol) {
                self.skips.record(SkipReason::DuplicatePair);
                continue;
            }

            let params = self.params_for(signal.exchange_id).clone();
            let margin = params.position_size;
            if self.ledger.try_reserve(margin).is_err() {
                // Capital exhausted for this wave; nothing cheaper follows.
                for _ in index..cohort.len() {
                    self.skips.record(SkipReason::InsufficientCapital);
                }
                break;
            }

            let Some(history) = self.histories.get(&signal.trading_pair_id) else {
                self.ledger.refund(margin);
                self.skips.record(SkipReason::NoHistory);
                continue;
            };

            match crate::simulator::simulate_position(signal, history, &params) {
                None => {
                    self.ledger.refund(margin);
                    self.skips.record(SkipReason::NoEntry);
                }
                Some(outcome) => {
                    let same_wave = outcome.close_reason != CloseReason::ForcedPeriodEnd
                        && outcome.close_time <= wave_time;
                    if same_wave {
                        self.settle(margin, outcome);
                    } else {
                        self.open.insert(
                            signal.pair_symbol.clone(),
                            OpenPosition {
                                margin,
                                effective_notional: params.effective_notional(),
                                floating_floor_fraction: params.forced_close_max_loss_fraction,
                                projected: outcome,
                            },
                        );
                        admitted += 1;
                        self.ledger.observe_open_count(self.open.len());
                    }
                }
            }
        }
        false
    }

    /// Settle everything still open at the end of the window. Triggered
    /// projections that outlived the last wave release as projected;
    /// period-end projections get the forced-liquidation relabel when the
    /// implied loss exceeds the forced-close fraction of margin.
    fn finalize(&mut self) {
        let mut remaining: Vec<(i64, String)> = self
            .open
            .iter()
            .map(|(pair, pos)| (pos.projected.close_time, pair.clone()))
            .collect();
        remaining.sort();

        for (_, pair) in remaining {
            let pos = self.open.remove(&pair).expect("remaining position present");
            let margin = pos.margin;
            if pos.projected.close_reason != CloseReason::ForcedPeriodEnd {
                self.settle(margin, pos.projected);
                continue;
            }
            let outcome = self.force_close(pos);
            self.settle(margin, outcome);
        }
    }

    /// Re-evaluate a period-end projection at the window boundary.
    fn force_close(&self, pos: OpenPosition) -> TradeOutcome {
        let mut outcome = pos.projected;
        let params = self.params_for(outcome.exchange_id);
        let end_ts = self.base.simulation_end_time;

        let last_price = self
            .histories
            .get(&outcome.trading_pair_id)
            .and_then(|history| last_close_at_or_before(history, end_ts))
            .unwrap_or(outcome.close_price);

        let notional = pos.effective_notional;
        let pct = pnl_pct(outcome.direction, outcome.entry_price, last_price);
        let forced_trigger_pct =
            params.forced_close_max_loss_fraction * pos.margin / notional * 100.0;

        let (close_price, reason) = if pct < -forced_trigger_pct {
            let cap_price = cap_exact_exit_price(
                outcome.direction,
                outcome.entry_price,
                notional,
                pos.margin,
                outcome.entry_commission,
                outcome.exit_commission,
            );
            let fill = apply_adverse_slippage(outcome.direction, cap_price, params.slippage_pct);
            (fill, CloseReason::ForcedLiquidation)
        } else {
            (last_price, CloseReason::ForcedPeriodEnd)
        };

        let pct = pnl_pct(outcome.direction, outcome.entry_price, close_price);
        let gross = gross_pnl(notional, pct);
        let net_raw = gross - outcome.entry_commission - outcome.exit_commission;

        outcome.close_time = end_ts;
        outcome.close_price = close_price;
        outcome.close_reason = reason;
        outcome.gross_pnl = gross;
        outcome.net_pnl = cap_loss_to_margin(net_raw, pos.margin, outcome.entry_commission);
        outcome
    }

    fn settle(&mut self, margin: f64, outcome: TradeOutcome) {
        let commissions = outcome.entry_commission + outcome.exit_commission;
        self.ledger.release(margin, outcome.net_pnl, commissions);
        self.outcomes.push(outcome);
    }
}
