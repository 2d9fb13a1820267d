//! OHLC candle representation and the per-pair history map.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Simulator timeframe in minutes. All histories fed to the simulator are 5m bars.
pub const SIM_TIMEFRAME_MIN: u32 = 5;

/// One OHLC bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time, ms since epoch (UTC).
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_interest: Option<f64>,
}

impl Candle {
    /// True when `low <= open, close <= high` and all prices are positive.
    pub fn is_well_formed(&self) -> bool {
        self.low > 0.0
            && self.low <= self.high
            && (self.low..=self.high).contains(&self.open)
            && (self.low..=self.high).contains(&self.close)
    }
}

/// Candle histories keyed by trading-pair id, bars ascending in `ts`.
pub type CandleData = FxHashMap<i64, Vec<Candle>>;

/// Check that a history is strictly increasing in `ts` with well-formed bars.
/// Returns the index of the first offending bar, or `None` when clean.
pub fn first_malformed(history: &[Candle]) -> Option<usize> {
    for (i, bar) in history.iter().enumerate() {
        if !bar.is_well_formed() {
            return Some(i);
        }
        if i > 0 && bar.ts <= history[i - 1].ts {
            return Some(i);
        }
    }
    None
}

/// Close of the last candle with `ts <= at`, scanning an ascending history.
pub fn last_close_at_or_before(history: &[Candle], at: i64) -> Option<f64> {
    // partition_point gives the count of bars with ts <= at.
    let n = history.partition_point(|c| c.ts <= at);
    if n == 0 {
        None
    } else {
        Some(history[n - 1].close)
    }
}
