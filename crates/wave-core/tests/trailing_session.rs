//! End-to-end runs in trailing-stop mode and through the breakeven /
//! smart-loss phases, driven via `run_session` overrides.

use wave_core::candle::Candle;
use wave_core::memory::{MemoryCandleSource, MemoryParamsSource, MemorySignalSource, MemorySink};
use wave_core::outcome::CloseReason;
use wave_core::session::{run_session, CancelToken, RunRequest};
use wave_core::signal::{Direction, Signal};

const BAR: i64 = 300_000;
const HOUR: i64 = 3_600_000;

fn bar(ts: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
    Candle {
        ts,
        open,
        high,
        low,
        close,
        mark_price: None,
        volume: None,
        open_interest: None,
    }
}

fn signal(id: i64, pair: &str, pair_id: i64, ts: i64) -> Signal {
    Signal {
        signal_id: id,
        pair_symbol: pair.to_string(),
        trading_pair_id: pair_id,
        exchange_id: 1,
        action: Direction::Long,
        ts,
        score_week: 90.0,
        score_month: 85.0,
        volume_24h_usd: None,
        open_interest_usd: None,
    }
}

fn request(session_id: &str, end_ts: i64, overrides: Vec<(String, f64)>) -> RunRequest {
    RunRequest {
        session_id: session_id.to_string(),
        user_id: 1,
        window_start_ts: 0,
        window_end_ts: end_ts,
        overrides,
    }
}

#[test]
fn trailing_session_rides_the_move_and_exits_on_retrace() {
    let end = 24 * HOUR;
    let mut candles = MemoryCandleSource::default();
    let mut bars = vec![
        bar(0, 100.0, 100.5, 100.0, 100.2),
        bar(BAR, 100.2, 101.0, 100.2, 100.9), // arms at 101 (activation 1%)
        bar(2 * BAR, 100.9, 103.0, 100.95, 102.5), // ratchets to 100.94
        bar(3 * BAR, 102.5, 102.5, 100.5, 100.6), // retrace through the stop
    ];
    let mut ts = 4 * BAR;
    while ts <= end {
        bars.push(bar(ts, 100.6, 100.8, 100.4, 100.6));
        ts += BAR;
    }
    candles.insert(100, bars);

    let signals = MemorySignalSource::new(vec![signal(1, "P100", 100, 0)]);
    let mut sink = MemorySink::new();
    let summary = run_session(
        &request(
            "trail",
            end,
            vec![
                ("use_trailing_stop".to_string(), 1.0),
                ("slippage_pct".to_string(), 0.0),
            ],
        ),
        &candles,
        &signals,
        &MemoryParamsSource::default(),
        &mut sink,
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(summary.total_trades, 1);
    let trade = &sink.trades("trail")[0];
    assert_eq!(trade.close_reason, CloseReason::TrailingStop);
    assert!((trade.close_price - 100.94).abs() < 1e-9);
    // +0.94% on $1000 notional minus $1.20 commissions.
    assert!((trade.net_pnl - (9.4 - 1.2)).abs() < 1e-6);
    assert_eq!(summary.wins, 1);
    // The 103 peak was the best the walk offered.
    assert!((trade.peak_favorable_price - 103.0).abs() < 1e-9);
}

#[test]
fn stale_position_decays_through_breakeven_into_smart_loss() {
    let end = 48 * HOUR;
    let mut candles = MemoryCandleSource::default();
    // Entry at 100, then a shallow drift below entry: no stop (-3%), no
    // take-profit, no breakeven touch, until the smart-loss close.
    let mut bars = vec![bar(0, 100.0, 100.0, 99.6, 99.8)];
    let mut ts = BAR;
    while ts <= 33 * HOUR {
        bars.push(bar(ts, 99.2, 99.6, 99.0, 99.4));
        ts += BAR;
    }
    candles.insert(100, bars);

    let signals = MemorySignalSource::new(vec![signal(1, "P100", 100, 0)]);
    let mut sink = MemorySink::new();
    let summary = run_session(
        &request("decay", end, Vec::new()),
        &candles,
        &signals,
        &MemoryParamsSource::default(),
        &mut sink,
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(summary.total_trades, 1);
    let trade = &sink.trades("decay")[0];
    assert_eq!(trade.close_reason, CloseReason::SmartLoss);
    // First bar past the 32h boundary is at 32h05m: one decay hour.
    assert_eq!(trade.close_time, 32 * HOUR + BAR);
    assert!((trade.close_price - 99.5).abs() < 1e-9);
    assert!((trade.net_pnl - (-5.0 - 1.2)).abs() < 1e-6);
    assert_eq!(summary.losses, 1);
    assert_eq!(summary.breakevens, 0);
}
