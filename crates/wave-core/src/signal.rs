//! Trading signals, eligibility gates, and per-session skip accounting.
//!
//! The signal source hands the session the raw window; the gates here decide
//! eligibility and every rejection is counted, so the summary can report how
//! many signals each filter removed.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Trade direction. Upstream feeds label these BUY/SELL; they map 1:1 onto
/// LONG/SHORT here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// One scored BUY/SELL recommendation for a trading pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub signal_id: i64,
    pub pair_symbol: String,
    pub trading_pair_id: i64,
    pub exchange_id: i64,
    pub action: Direction,
    /// Signal time, ms since epoch (UTC).
    pub ts: i64,
    pub score_week: f64,
    pub score_month: f64,
    /// 24h quote volume in USD, when the feed provides it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_24h_usd: Option<f64>,
    /// Open interest in USD, when the feed provides it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_interest_usd: Option<f64>,
}

impl Signal {
    /// Hour of day (UTC) derived from the signal timestamp.
    pub fn hour_of_day(&self) -> u8 {
        (self.ts.div_euclid(3_600_000)).rem_euclid(24) as u8
    }
}

/// Minimum-liquidity gate on the signal's 24h volume and open interest.
/// A signal missing either figure fails the gate when it is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiquidityGate {
    pub min_volume_24h_usd: f64,
    pub min_open_interest_usd: f64,
}

/// Full eligibility predicate applied to each raw signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalFilter {
    pub score_week_min: f64,
    pub score_month_min: f64,
    /// Allowed hours of day (UTC). All 24 by default.
    pub allowed_hours: [bool; 24],
    /// Selected exchanges. `None` admits every exchange.
    pub exchanges: Option<BTreeSet<i64>>,
    /// Liquidity gate. `None` disables the check.
    pub liquidity: Option<LiquidityGate>,
}

impl Default for SignalFilter {
    fn default() -> Self {
        Self {
            score_week_min: 0.0,
            score_month_min: 0.0,
            allowed_hours: [true; 24],
            exchanges: None,
            liquidity: None,
        }
    }
}

impl SignalFilter {
    /// Evaluate the predicate. `Err` names the first gate that rejected.
    pub fn evaluate(&self, signal: &Signal) -> Result<(), SkipReason> {
        if signal.score_week < self.score_week_min || signal.score_month < self.score_month_min {
            return Err(SkipReason::FilterScore);
        }
        if !self.allowed_hours[signal.hour_of_day() as usize] {
            return Err(SkipReason::FilterHour);
        }
        if let Some(exchanges) = &self.exchanges {
            if !exchanges.contains(&signal.exchange_id) {
                return Err(SkipReason::FilterExchange);
            }
        }
        if let Some(gate) = &self.liquidity {
            let volume_ok = signal
                .volume_24h_usd
                .is_some_and(|v| v >= gate.min_volume_24h_usd);
            let oi_ok = signal
                .open_interest_usd
                .is_some_and(|v| v >= gate.min_open_interest_usd);
            if !volume_ok || !oi_ok {
                return Err(SkipReason::FilterLiquidity);
            }
        }
        Ok(())
    }
}

/// Why a signal did not become a trade. Not an error; counted per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoEntry,
    NoHistory,
    InsufficientCapital,
    DuplicatePair,
    WaveCapReached,
    FilterScore,
    FilterHour,
    FilterExchange,
    FilterLiquidity,
}

/// Per-session skip counters, one per [`SkipReason`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipCounts {
    pub no_entry: u64,
    pub no_history: u64,
    pub insufficient_capital: u64,
    pub duplicate_pair: u64,
    pub wave_cap_reached: u64,
    pub filter_score: u64,
    pub filter_hour: u64,
    pub filter_exchange: u64,
    pub filter_liquidity: u64,
}

impl SkipCounts {
    pub fn record(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::NoEntry => self.no_entry += 1,
            SkipReason::NoHistory => self.no_history += 1,
            SkipReason::InsufficientCapital => self.insufficient_capital += 1,
            SkipReason::DuplicatePair => self.duplicate_pair += 1,
            SkipReason::WaveCapReached => self.wave_cap_reached += 1,
            SkipReason::FilterScore => self.filter_score += 1,
            SkipReason::FilterHour => self.filter_hour += 1,
            SkipReason::FilterExchange => self.filter_exchange += 1,
            SkipReason::FilterLiquidity => self.filter_liquidity += 1,
        }
    }

    /// Fold another counter set into this one.
    pub fn merge(&mut self, other: &SkipCounts) {
        self.no_entry += other.no_entry;
        self.no_history += other.no_history;
        self.insufficient_capital += other.insufficient_capital;
        self.duplicate_pair += other.duplicate_pair;
        self.wave_cap_reached += other.wave_cap_reached;
        self.filter_score += other.filter_score;
        self.filter_hour += other.filter_hour;
        self.filter_exchange += other.filter_exchange;
        self.filter_liquidity += other.filter_liquidity;
    }

    pub fn total(&self) -> u64 {
        self.no_entry
            + self.no_history
            + self.insufficient_capital
            + self.duplicate_pair
            + self.wave_cap_reached
            + self.filter_score
            + self.filter_hour
            + self.filter_exchange
            + self.filter_liquidity
    }
}
