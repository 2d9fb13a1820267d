//! Strategy parameters, validation, name/value overrides, and per-exchange
//! resolution from backtest history.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ConfigError;
use crate::signal::{LiquidityGate, SignalFilter};

/// Full parameter set for one session.
///
/// Percent fields are expressed in percent points (`stop_loss_pct = 3.0`
/// means 3%); `commission_rate` is a plain rate on notional per side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParams {
    /// Margin reserved per position, USD.
    pub position_size: f64,
    pub leverage: u32,
    pub stop_loss_pct: f64,
    /// Fixed take-profit level. Ignored when `use_trailing_stop` is set.
    pub take_profit_pct: f64,
    pub use_trailing_stop: bool,
    pub trailing_distance_pct: f64,
    pub trailing_activation_pct: f64,
    /// Flat per-side commission on effective notional.
    pub commission_rate: f64,
    /// Adverse execution on stop orders, percent.
    pub slippage_pct: f64,
    /// Fraction of the full margin move that triggers liquidation, in (0, 1].
    pub liquidation_threshold: f64,
    pub max_trades_per_wave: u32,
    pub initial_capital: f64,
    /// End of the replay window, ms since epoch (UTC). Set by the runner.
    pub simulation_end_time: i64,
    pub wave_interval_ms: i64,
    pub phase1_hours: i64,
    pub breakeven_window_hours: i64,
    pub smart_loss_pct_per_hour: f64,
    /// Loss fraction of margin beyond which a period-end close is relabelled
    /// a forced liquidation; also floors floating PnL in equity snapshots.
    pub forced_close_max_loss_fraction: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            position_size: 100.0,
            leverage: 10,
            stop_loss_pct: 3.0,
            take_profit_pct: 4.0,
            use_trailing_stop: false,
            trailing_distance_pct: 2.0,
            trailing_activation_pct: 1.0,
            commission_rate: 0.0006,
            slippage_pct: 0.05,
            liquidation_threshold: 0.9,
            max_trades_per_wave: 5,
            initial_capital: 1_000.0,
            simulation_end_time: 0,
            wave_interval_ms: 15 * 60_000,
            phase1_hours: 24,
            breakeven_window_hours: 8,
            smart_loss_pct_per_hour: 0.5,
            forced_close_max_loss_fraction: 0.95,
        }
    }
}

impl StrategyParams {
    /// Exposure used for PnL percent calculations.
    #[inline]
    pub fn effective_notional(&self) -> f64 {
        self.position_size * self.leverage as f64
    }

    /// Unrealized percent at which the position liquidates (negative).
    #[inline]
    pub fn liquidation_trigger_pct(&self) -> f64 {
        -(100.0 / self.leverage as f64) * self.liquidation_threshold
    }

    #[inline]
    pub fn phase1_ms(&self) -> i64 {
        self.phase1_hours * 3_600_000
    }

    #[inline]
    pub fn breakeven_window_ms(&self) -> i64 {
        self.breakeven_window_hours * 3_600_000
    }

    /// Reject parameter sets the wave loop must never see.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.position_size <= 0.0 {
            return Err(ConfigError::NonPositivePositionSize(self.position_size));
        }
        if self.leverage < 1 {
            return Err(ConfigError::LeverageBelowOne(self.leverage));
        }
        if self.initial_capital <= 0.0 {
            return Err(ConfigError::NonPositiveInitialCapital(self.initial_capital));
        }
        if self.max_trades_per_wave < 1 {
            return Err(ConfigError::WaveCapBelowOne(self.max_trades_per_wave));
        }
        for (field, value) in [
            ("stop_loss_pct", self.stop_loss_pct),
            ("take_profit_pct", self.take_profit_pct),
            ("trailing_distance_pct", self.trailing_distance_pct),
            ("trailing_activation_pct", self.trailing_activation_pct),
            ("commission_rate", self.commission_rate),
            ("slippage_pct", self.slippage_pct),
            ("smart_loss_pct_per_hour", self.smart_loss_pct_per_hour),
        ] {
            if value < 0.0 {
                return Err(ConfigError::NegativePercent { field, value });
            }
        }
        for (field, value) in [
            ("liquidation_threshold", self.liquidation_threshold),
            (
                "forced_close_max_loss_fraction",
                self.forced_close_max_loss_fraction,
            ),
        ] {
            if value <= 0.0 || value > 1.0 {
                return Err(ConfigError::OutOfUnitRange { field, value });
            }
        }
        Ok(())
    }

    /// SHA-256 fingerprint over the canonical JSON encoding, recorded with
    /// persisted summaries so stored results can be traced to a parameter set.
    pub fn fingerprint(&self) -> String {
        // Non-finite floats cannot pass through JSON; fall back to the debug
        // encoding so the fingerprint stays total.
        let encoded =
            serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"));
        let mut hasher = Sha256::new();
        hasher.update(encoded.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Session-level configuration: strategy parameters plus the signal filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub params: StrategyParams,
    pub filter: SignalFilter,
}

impl SessionConfig {
    /// Set a single parameter by name. Booleans take `!= 0.0`; integer fields
    /// are truncated from the f64. Unknown names are a [`ConfigError`].
    pub fn apply_override(&mut self, name: &str, value: f64) -> Result<(), ConfigError> {
        let p = &mut self.params;
        match name {
            "position_size" => p.position_size = value,
            "leverage" => p.leverage = value as u32,
            "stop_loss_pct" => p.stop_loss_pct = value,
            "take_profit_pct" => p.take_profit_pct = value,
            "use_trailing_stop" => p.use_trailing_stop = value != 0.0,
            "trailing_distance_pct" => p.trailing_distance_pct = value,
            "trailing_activation_pct" => p.trailing_activation_pct = value,
            "commission_rate" => p.commission_rate = value,
            "slippage_pct" => p.slippage_pct = value,
            "liquidation_threshold" => p.liquidation_threshold = value,
            "max_trades_per_wave" => p.max_trades_per_wave = value as u32,
            "initial_capital" => p.initial_capital = value,
            "smart_loss_pct_per_hour" => p.smart_loss_pct_per_hour = value,
            "forced_close_max_loss_fraction" => p.forced_close_max_loss_fraction = value,
            "phase1_hours" => p.phase1_hours = value as i64,
            "breakeven_window_hours" => p.breakeven_window_hours = value as i64,
            "score_week_min" => self.filter.score_week_min = value,
            "score_month_min" => self.filter.score_month_min = value,
            "liquidity_min_volume_usd" => {
                self.liquidity_gate().min_volume_24h_usd = value;
            }
            "liquidity_min_open_interest_usd" => {
                self.liquidity_gate().min_open_interest_usd = value;
            }
            other => return Err(ConfigError::UnknownParameter(other.to_string())),
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &[(String, f64)]) -> Result<(), ConfigError> {
        for (name, value) in overrides {
            self.apply_override(name, *value)?;
        }
        Ok(())
    }

    /// Enable the liquidity gate if it is not already on.
    fn liquidity_gate(&mut self) -> &mut LiquidityGate {
        self.filter.liquidity.get_or_insert(LiquidityGate {
            min_volume_24h_usd: 0.0,
            min_open_interest_usd: 0.0,
        })
    }
}

/// One historical backtest record for an exchange, as returned by the params
/// source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamsCandidate {
    pub exchange_id: i64,
    pub params: StrategyParams,
    pub total_pnl_usd: f64,
    pub win_rate: f64,
}

/// Pick the best parameter set per exchange: among candidates whose
/// `total_pnl_usd` is within 15% of that exchange's maximum, the one with the
/// highest `win_rate` wins. Ties resolve to the earliest candidate in input
/// order, which keeps the selection deterministic.
pub fn resolve_best_params(candidates: &[ParamsCandidate]) -> BTreeMap<i64, StrategyParams> {
    let mut by_exchange: BTreeMap<i64, Vec<&ParamsCandidate>> = BTreeMap::new();
    for candidate in candidates {
        by_exchange
            .entry(candidate.exchange_id)
            .or_default()
            .push(candidate);
    }

    let mut resolved = BTreeMap::new();
    for (exchange_id, group) in by_exchange {
        let max_pnl = group
            .iter()
            .map(|c| c.total_pnl_usd)
            .fold(f64::NEG_INFINITY, f64::max);
        // Written as `max - 15% of |max|` so a negative maximum still admits
        // itself rather than excluding every candidate.
        let threshold = max_pnl - 0.15 * max_pnl.abs();
        let best = group
            .iter()
            .filter(|c| c.total_pnl_usd >= threshold)
            .fold(None::<&&ParamsCandidate>, |best, c| match best {
                Some(b) if b.win_rate >= c.win_rate => Some(b),
                _ => Some(c),
            });
        if let Some(best) = best {
            resolved.insert(exchange_id, best.params.clone());
        }
    }
    resolved
}
