//! Shared accounting primitives: commissions, directional PnL, rounding, and
//! the isolated-margin loss cap.
//!
//! Every exit path in the simulator and the scheduler finalizer funnels
//! through [`cap_loss_to_margin`], which is what keeps the per-trade loss
//! bounded by the reserved margin regardless of how violent the price path is.

use crate::signal::Direction;

/// Precision scale used for deterministic rounding inside the simulator.
pub const ACCOUNTING_QUANTUM: f64 = 1_000_000_000_000.0;

/// Rounding helper shared by all monetary computations.
#[inline]
pub fn quantize(value: f64) -> f64 {
    (value * ACCOUNTING_QUANTUM).round() / ACCOUNTING_QUANTUM
}

/// Two-decimal rounding for persisted USD fields.
#[inline]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Four-decimal rounding for persisted percent fields.
#[inline]
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Flat per-side commission on notional.
#[inline]
pub fn commission(effective_notional: f64, commission_rate: f64) -> f64 {
    quantize(effective_notional * commission_rate)
}

/// Signed percent move from entry to exit in the position's favor.
#[inline]
pub fn pnl_pct(direction: Direction, entry_price: f64, exit_price: f64) -> f64 {
    match direction {
        Direction::Long => (exit_price - entry_price) / entry_price * 100.0,
        Direction::Short => (entry_price - exit_price) / entry_price * 100.0,
    }
}

/// Gross PnL in USD for a percent move on the effective notional.
#[inline]
pub fn gross_pnl(effective_notional: f64, pct: f64) -> f64 {
    quantize(effective_notional * pct / 100.0)
}

/// Cap a net PnL at the isolated-margin floor.
///
/// Under isolated margin the worst case for one position is the reserved
/// margin minus the entry commission that was already charged against it:
/// `net_pnl >= -(position_size - entry_commission)`, always.
#[inline]
pub fn cap_loss_to_margin(net_pnl_raw: f64, position_size: f64, entry_commission: f64) -> f64 {
    let max_loss = -(position_size - entry_commission);
    net_pnl_raw.max(max_loss)
}

/// Exit price at which the capped loss is reached exactly.
///
/// Used by the liquidation and forced-liquidation closes: the position is
/// settled at the price whose net PnL (after both commissions) equals the
/// isolated-margin floor. Adverse slippage applied on top of this price
/// pushes the raw net slightly below the floor and the cap clamps it back,
/// so the reported net is exact while the close price still shows slippage.
pub fn cap_exact_exit_price(
    direction: Direction,
    entry_price: f64,
    effective_notional: f64,
    position_size: f64,
    entry_commission: f64,
    exit_commission: f64,
) -> f64 {
    let max_loss = -(position_size - entry_commission);
    let gross_needed = max_loss + entry_commission + exit_commission;
    let pct = gross_needed / effective_notional * 100.0;
    match direction {
        Direction::Long => quantize(entry_price * (1.0 + pct / 100.0)),
        Direction::Short => quantize(entry_price * (1.0 - pct / 100.0)),
    }
}

/// Worsen an exit price by `slippage_pct` on the adverse side for the
/// position's direction.
#[inline]
pub fn apply_adverse_slippage(direction: Direction, price: f64, slippage_pct: f64) -> f64 {
    match direction {
        Direction::Long => quantize(price * (1.0 - slippage_pct / 100.0)),
        Direction::Short => quantize(price * (1.0 + slippage_pct / 100.0)),
    }
}
