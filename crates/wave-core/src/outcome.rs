//! Close reasons, finished trades, and the scheduler's open-position record.

use serde::{Deserialize, Serialize};

use crate::signal::Direction;

/// Why a position closed. Closed sum type so every exit site is forced
/// through the same match arms; no free-form strings on the hot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    Liquidation,
    Breakeven,
    SmartLoss,
    ForcedPeriodEnd,
    ForcedLiquidation,
}

impl CloseReason {
    /// Whether adverse slippage applies to this exit. Take-profit, breakeven,
    /// smart-loss, and plain period-end closes fill at their computed price.
    pub fn has_slippage(self) -> bool {
        matches!(
            self,
            CloseReason::StopLoss
                | CloseReason::Liquidation
                | CloseReason::TrailingStop
                | CloseReason::ForcedLiquidation
        )
    }

    /// The phase of the position timeline this reason can come from.
    pub fn phase(self) -> ClosePhase {
        match self {
            CloseReason::TakeProfit
            | CloseReason::StopLoss
            | CloseReason::TrailingStop
            | CloseReason::Liquidation => ClosePhase::ActiveRisk,
            CloseReason::Breakeven => ClosePhase::BreakevenWindow,
            CloseReason::SmartLoss => ClosePhase::SmartLoss,
            CloseReason::ForcedPeriodEnd | CloseReason::ForcedLiquidation => ClosePhase::PeriodEnd,
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CloseReason::TakeProfit => "take_profit",
            CloseReason::StopLoss => "stop_loss",
            CloseReason::TrailingStop => "trailing_stop",
            CloseReason::Liquidation => "liquidation",
            CloseReason::Breakeven => "breakeven",
            CloseReason::SmartLoss => "smart_loss",
            CloseReason::ForcedPeriodEnd => "forced_period_end",
            CloseReason::ForcedLiquidation => "forced_liquidation",
        };
        write!(f, "{s}")
    }
}

/// Segment of the position timeline a close belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosePhase {
    /// First 24h: TP/SL/trailing/liquidation.
    ActiveRisk,
    /// The 8h window after phase 1.
    BreakevenWindow,
    /// Decay close past the breakeven window.
    SmartLoss,
    /// Finalizer close at the end of the replay window.
    PeriodEnd,
}

/// One finished trade, appended to the session ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub signal_id: i64,
    pub pair_symbol: String,
    pub trading_pair_id: i64,
    pub exchange_id: i64,
    pub direction: Direction,
    /// Signal time, ms. Entry fills at the open of the first bar at or after
    /// this time.
    pub entry_time: i64,
    pub entry_price: f64,
    pub entry_commission: f64,
    pub close_time: i64,
    pub close_price: f64,
    pub close_reason: CloseReason,
    pub gross_pnl: f64,
    pub exit_commission: f64,
    /// Net of both commissions, floored at the isolated-margin cap.
    pub net_pnl: f64,
    /// Margin that was reserved for this trade.
    pub margin: f64,
    pub leverage: u32,
    /// Most favorable price touched across the whole walk to period end.
    pub peak_favorable_price: f64,
    /// Best net PnL the walk offered, floored at zero.
    pub max_potential_net_pnl: f64,
}

impl TradeOutcome {
    pub fn is_win(&self) -> bool {
        self.net_pnl > 0.0
    }
}

/// A position the scheduler is still holding, keyed by pair symbol.
/// The projected outcome was computed at admission time; the scheduler
/// releases it once its close time falls due.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPosition {
    pub margin: f64,
    pub effective_notional: f64,
    /// Floor applied to this position's floating PnL in equity snapshots,
    /// as a fraction of margin.
    pub floating_floor_fraction: f64,
    pub projected: TradeOutcome,
}

impl OpenPosition {
    /// Floating PnL at `mark_price`, floored at the margin reserve fraction.
    pub fn floating_pnl(&self, mark_price: f64) -> f64 {
        let pct = crate::accounting::pnl_pct(
            self.projected.direction,
            self.projected.entry_price,
            mark_price,
        );
        let unrealized = crate::accounting::gross_pnl(self.effective_notional, pct);
        unrealized.max(-self.margin * self.floating_floor_fraction)
    }
}
