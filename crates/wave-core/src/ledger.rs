//! Isolated-margin capital ledger: reservations, releases, and equity
//! snapshots with floating PnL.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::candle::{last_close_at_or_before, CandleData};
use crate::outcome::OpenPosition;

/// Reservation failure: the wave admission loop stops on this.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InsufficientCapital {
    pub needed: f64,
    pub available: f64,
}

impl std::fmt::Display for InsufficientCapital {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "insufficient capital: need {:.2}, have {:.2}",
            self.needed, self.available
        )
    }
}

impl std::error::Error for InsufficientCapital {}

/// Mark prices for the pairs still open at a wave boundary.
///
/// Constructed only from candle histories plus the wave time; there is no
/// empty constructor, so an equity snapshot cannot be taken against nothing.
#[derive(Debug, Clone)]
pub struct MarkPrices {
    at: i64,
    prices: FxHashMap<i64, f64>,
}

impl MarkPrices {
    /// Resolve the last close at or before `at` for every open position's pair.
    pub fn for_positions<'a>(
        histories: &CandleData,
        positions: impl Iterator<Item = &'a OpenPosition>,
        at: i64,
    ) -> Self {
        let mut prices = FxHashMap::default();
        for pos in positions {
            let pair_id = pos.projected.trading_pair_id;
            if let Some(history) = histories.get(&pair_id) {
                if let Some(close) = last_close_at_or_before(history, at) {
                    prices.insert(pair_id, close);
                }
            }
        }
        Self { at, prices }
    }

    pub fn wave_time(&self) -> i64 {
        self.at
    }

    pub fn get(&self, trading_pair_id: i64) -> Option<f64> {
        self.prices.get(&trading_pair_id).copied()
    }
}

/// Session capital state. Counters only move forward; nothing resets
/// mid-session.
#[derive(Debug, Clone)]
pub struct CapitalLedger {
    initial_capital: f64,
    available_capital: f64,
    realized_pnl: f64,
    commission_paid: f64,
    min_equity: f64,
    max_concurrent_positions: u32,
}

impl CapitalLedger {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            initial_capital,
            available_capital: initial_capital,
            realized_pnl: 0.0,
            commission_paid: 0.0,
            min_equity: initial_capital,
            max_concurrent_positions: 0,
        }
    }

    /// Lock `margin` for a new position.
    pub fn try_reserve(&mut self, margin: f64) -> Result<(), InsufficientCapital> {
        if self.available_capital < margin {
            return Err(InsufficientCapital {
                needed: margin,
                available: self.available_capital,
            });
        }
        self.available_capital -= margin;
        Ok(())
    }

    /// Undo a reservation for a signal that produced no trade.
    pub fn refund(&mut self, margin: f64) {
        self.available_capital += margin;
    }

    /// Settle a closed position: return the margin plus its net PnL and
    /// account the commissions that net already includes.
    pub fn release(&mut self, margin: f64, net_pnl: f64, commissions: f64) {
        self.available_capital += margin + net_pnl;
        self.realized_pnl += net_pnl;
        self.commission_paid += commissions;
    }

    /// Equity at a wave boundary: free capital, locked margin, and capped
    /// floating PnL of every open position at its mark price. Positions whose
    /// pair has no candle at or before the wave time contribute margin only.
    /// Updates `min_equity`.
    pub fn snapshot_equity(
        &mut self,
        open_positions: &BTreeMap<String, OpenPosition>,
        marks: &MarkPrices,
    ) -> f64 {
        let mut equity = self.available_capital;
        for pos in open_positions.values() {
            equity += pos.margin;
            if let Some(mark) = marks.get(pos.projected.trading_pair_id) {
                equity += pos.floating_pnl(mark);
            }
        }
        if equity < self.min_equity {
            self.min_equity = equity;
        }
        equity
    }

    pub fn observe_open_count(&mut self, open: usize) {
        self.max_concurrent_positions = self.max_concurrent_positions.max(open as u32);
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    pub fn available_capital(&self) -> f64 {
        self.available_capital
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn commission_paid(&self) -> f64 {
        self.commission_paid
    }

    pub fn min_equity(&self) -> f64 {
        self.min_equity
    }

    pub fn max_concurrent_positions(&self) -> u32 {
        self.max_concurrent_positions
    }
}
