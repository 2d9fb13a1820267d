//! Per-position lifecycle simulator.
//!
//! Walks one pair's candle history from the signal's entry bar to the end of
//! the replay window and produces the projected trade outcome under the
//! three-phase timeline:
//!
//! * Phase 1 (first 24h): liquidation, fixed stop-loss, fixed take-profit
//!   (non-trailing variant), and the trailing-stop state machine.
//! * Phase 2 (next 8h): breakeven window, close at entry on the first touch.
//! * Phase 3 (after that): smart-loss decay, close on the first candle at
//!   0.5%/h past the window.
//!
//! Intra-bar policy when one candle implies several exits: liquidation always
//! wins; then LONG checks stop-loss before take-profit while SHORT checks
//! take-profit before stop-loss. An armed trailing stop supersedes the fixed
//! stop-loss for exit decisions.

use crate::accounting::{
    apply_adverse_slippage, cap_exact_exit_price, cap_loss_to_margin, commission, gross_pnl,
    pnl_pct, quantize,
};
use crate::candle::Candle;
use crate::outcome::{CloseReason, TradeOutcome};
use crate::params::StrategyParams;
use crate::signal::{Direction, Signal};

/// Simulate one signal against its pair's candle history.
///
/// `history` must be ascending in `ts`. Returns `None` when no candle exists
/// at or after the signal time within the replay window (a `no_entry` skip
/// upstream). The walk continues past the exit to the window end so the peak
/// snapshot covers the whole period.
pub fn simulate_position(
    signal: &Signal,
    history: &[Candle],
    params: &StrategyParams,
) -> Option<TradeOutcome> {
    let end_ts = params.simulation_end_time;
    let start = history.partition_point(|c| c.ts < signal.ts);
    let entry_bar = history.get(start)?;
    if entry_bar.ts > end_ts {
        return None;
    }

    let direction = signal.action;
    let entry_price = entry_bar.open;
    let notional = params.effective_notional();
    let entry_commission = commission(notional, params.commission_rate);
    let exit_commission = commission(notional, params.commission_rate);

    let sl_price = match direction {
        Direction::Long => entry_price * (1.0 - params.stop_loss_pct / 100.0),
        Direction::Short => entry_price * (1.0 + params.stop_loss_pct / 100.0),
    };
    let tp_price = match direction {
        Direction::Long => entry_price * (1.0 + params.take_profit_pct / 100.0),
        Direction::Short => entry_price * (1.0 - params.take_profit_pct / 100.0),
    };
    let activation_price = match direction {
        Direction::Long => entry_price * (1.0 + params.trailing_activation_pct / 100.0),
        Direction::Short => entry_price * (1.0 - params.trailing_activation_pct / 100.0),
    };

    let phase1_end = signal.ts + params.phase1_ms();
    let breakeven_end = phase1_end + params.breakeven_window_ms();
    let liq_trigger_pct = params.liquidation_trigger_pct();

    let mut peak_favorable = entry_price;
    let mut trail_peak = entry_price;
    let mut trailing_stop: Option<f64> = None;
    let mut armed_at: Option<i64> = None;
    let mut last_close = entry_bar.close;
    let mut exit: Option<(i64, f64, CloseReason)> = None;

    for bar in &history[start..] {
        if bar.ts > end_ts {
            break;
        }
        peak_favorable = match direction {
            Direction::Long => peak_favorable.max(bar.high),
            Direction::Short => peak_favorable.min(bar.low),
        };
        last_close = bar.close;
        if exit.is_some() {
            continue;
        }

        if bar.ts <= phase1_end {
            // Liquidation on the worst intra-bar touch.
            let worst_pct = match direction {
                Direction::Long => (bar.low - entry_price) / entry_price * 100.0,
                Direction::Short => (entry_price - bar.high) / entry_price * 100.0,
            };
            if worst_pct <= liq_trigger_pct {
                let cap_price = cap_exact_exit_price(
                    direction,
                    entry_price,
                    notional,
                    params.position_size,
                    entry_commission,
                    exit_commission,
                );
                let fill = apply_adverse_slippage(direction, cap_price, params.slippage_pct);
                exit = Some((bar.ts, fill, CloseReason::Liquidation));
                continue;
            }

            let armed = trailing_stop.is_some();
            let sl_hit = !armed
                && match direction {
                    Direction::Long => bar.low <= sl_price,
                    Direction::Short => bar.high >= sl_price,
                };
            let tp_hit = !params.use_trailing_stop
                && match direction {
                    Direction::Long => bar.high >= tp_price,
                    Direction::Short => bar.low <= tp_price,
                };
            let first = match direction {
                Direction::Long => {
                    if sl_hit {
                        Some((
                            apply_adverse_slippage(direction, sl_price, params.slippage_pct),
                            CloseReason::StopLoss,
                        ))
                    } else if tp_hit {
                        Some((quantize(tp_price), CloseReason::TakeProfit))
                    } else {
                        None
                    }
                }
                Direction::Short => {
                    if tp_hit {
                        Some((quantize(tp_price), CloseReason::TakeProfit))
                    } else if sl_hit {
                        Some((
                            apply_adverse_slippage(direction, sl_price, params.slippage_pct),
                            CloseReason::StopLoss,
                        ))
                    } else {
                        None
                    }
                }
            };
            if let Some((price, reason)) = first {
                exit = Some((bar.ts, price, reason));
                continue;
            }

            if params.use_trailing_stop {
                trail_peak = match direction {
                    Direction::Long => trail_peak.max(bar.high),
                    Direction::Short => trail_peak.min(bar.low),
                };
                let candidate = match direction {
                    Direction::Long => trail_peak * (1.0 - params.trailing_distance_pct / 100.0),
                    Direction::Short => trail_peak * (1.0 + params.trailing_distance_pct / 100.0),
                };
                match trailing_stop {
                    None => {
                        let reached = match direction {
                            Direction::Long => trail_peak >= activation_price,
                            Direction::Short => trail_peak <= activation_price,
                        };
                        if reached {
                            trailing_stop = Some(quantize(candidate));
                            armed_at = Some(bar.ts);
                        }
                    }
                    Some(level) => {
                        // The stop line only moves in the favorable direction.
                        trailing_stop = Some(match direction {
                            Direction::Long => level.max(quantize(candidate)),
                            Direction::Short => level.min(quantize(candidate)),
                        });
                    }
                }
                if let Some(level) = trailing_stop {
                    // The arming bar itself never triggers.
                    if armed_at != Some(bar.ts) {
                        let hit = match direction {
                            Direction::Long => bar.low <= level,
                            Direction::Short => bar.high >= level,
                        };
                        if hit {
                            let fill = apply_adverse_slippage(direction, level, params.slippage_pct);
                            exit = Some((bar.ts, fill, CloseReason::TrailingStop));
                            continue;
                        }
                    }
                }
            }
        } else if bar.ts <= breakeven_end {
            let touched = match direction {
                Direction::Long => bar.high >= entry_price,
                Direction::Short => bar.low <= entry_price,
            };
            if touched {
                exit = Some((bar.ts, entry_price, CloseReason::Breakeven));
                continue;
            }
        } else {
            // First candle past the breakeven window closes unconditionally.
            let hours = ((bar.ts - breakeven_end + 3_599_999) / 3_600_000).max(1);
            let decay_pct = params.smart_loss_pct_per_hour * hours as f64;
            let price = match direction {
                Direction::Long => entry_price * (1.0 - decay_pct / 100.0),
                Direction::Short => entry_price * (1.0 + decay_pct / 100.0),
            };
            exit = Some((bar.ts, quantize(price), CloseReason::SmartLoss));
            continue;
        }
    }

    // Period-end guard: no trigger fired inside the window. The scheduler's
    // finalizer re-evaluates this close and may relabel it forced_liquidation.
    let (close_time, close_price, close_reason) =
        exit.unwrap_or((end_ts, last_close, CloseReason::ForcedPeriodEnd));

    let pct = pnl_pct(direction, entry_price, close_price);
    let gross = gross_pnl(notional, pct);
    let net_raw = gross - entry_commission - exit_commission;
    let net = cap_loss_to_margin(net_raw, params.position_size, entry_commission);

    let peak_pct = pnl_pct(direction, entry_price, peak_favorable);
    let max_potential =
        (gross_pnl(notional, peak_pct) - entry_commission - exit_commission).max(0.0);

    Some(TradeOutcome {
        signal_id: signal.signal_id,
        pair_symbol: signal.pair_symbol.clone(),
        trading_pair_id: signal.trading_pair_id,
        exchange_id: signal.exchange_id,
        direction,
        entry_time: signal.ts,
        entry_price,
        entry_commission,
        close_time,
        close_price,
        close_reason,
        gross_pnl: gross,
        exit_commission,
        net_pnl: net,
        margin: params.position_size,
        leverage: params.leverage,
        peak_favorable_price: peak_favorable,
        max_potential_net_pnl: max_potential,
    })
}
