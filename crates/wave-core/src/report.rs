//! Session summary statistics built from the final ledger and trade log.

use serde::{Deserialize, Serialize};

use crate::accounting::{round2, round4};
use crate::ledger::CapitalLedger;
use crate::outcome::{CloseReason, TradeOutcome};
use crate::signal::SkipCounts;

/// Final snapshot of one session. Monetary fields are USD, rate fields are
/// percent. [`SessionSummary::rounded`] applies the persistence precision
/// (2 decimals USD, 4 decimals percent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub initial_capital: f64,
    pub final_equity: f64,
    pub available_capital: f64,
    pub realized_pnl: f64,
    pub commission_paid: f64,
    pub min_equity: f64,
    pub max_concurrent_positions: u32,
    pub total_trades: u32,
    /// Trades with positive net PnL.
    pub wins: u32,
    /// Trades with negative net PnL.
    pub losses: u32,
    /// Trades closed by the breakeven-window rule. Commissions usually make
    /// these small net losers, so they also appear in `losses`.
    pub breakevens: u32,
    pub win_rate: f64,
    pub max_drawdown_usd: f64,
    pub max_drawdown_pct: f64,
    pub skips: SkipCounts,
}

/// Aggregate the trade log and ledger into the summary.
pub fn build_summary(
    ledger: &CapitalLedger,
    outcomes: &[TradeOutcome],
    skips: SkipCounts,
) -> SessionSummary {
    let total_trades = outcomes.len() as u32;
    let wins = outcomes.iter().filter(|o| o.is_win()).count() as u32;
    let losses = outcomes.iter().filter(|o| o.net_pnl < 0.0).count() as u32;
    let breakevens = outcomes
        .iter()
        .filter(|o| o.close_reason == CloseReason::Breakeven)
        .count() as u32;
    let win_rate = if total_trades > 0 {
        wins as f64 / total_trades as f64 * 100.0
    } else {
        0.0
    };

    let initial = ledger.initial_capital();
    let max_drawdown_usd = (initial - ledger.min_equity()).max(0.0);
    let max_drawdown_pct = if initial > 0.0 {
        max_drawdown_usd / initial * 100.0
    } else {
        0.0
    };

    SessionSummary {
        initial_capital: initial,
        final_equity: ledger.available_capital(),
        available_capital: ledger.available_capital(),
        realized_pnl: ledger.realized_pnl(),
        commission_paid: ledger.commission_paid(),
        min_equity: ledger.min_equity(),
        max_concurrent_positions: ledger.max_concurrent_positions(),
        total_trades,
        wins,
        losses,
        breakevens,
        win_rate,
        max_drawdown_usd,
        max_drawdown_pct,
        skips,
    }
}

impl SessionSummary {
    /// Copy with persistence precision applied.
    pub fn rounded(&self) -> Self {
        Self {
            initial_capital: round2(self.initial_capital),
            final_equity: round2(self.final_equity),
            available_capital: round2(self.available_capital),
            realized_pnl: round2(self.realized_pnl),
            commission_paid: round2(self.commission_paid),
            min_equity: round2(self.min_equity),
            win_rate: round4(self.win_rate),
            max_drawdown_usd: round2(self.max_drawdown_usd),
            max_drawdown_pct: round4(self.max_drawdown_pct),
            ..self.clone()
        }
    }
}
