//! Fill pricing for entries, DCA adds and exits.
//!
//! Exits fill at the computed target or stop line rather than the intraday
//! extreme that triggered them.

use std::fmt;

use super::params::{StopPricing, StrategyParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitType {
    Profit,
    Stop,
    /// Forced close on a missing row under the liquidate policy.
    Liquidation,
}

impl fmt::Display for ExitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitType::Profit => write!(f, "PROFIT"),
            ExitType::Stop => write!(f, "STOP"),
            ExitType::Liquidation => write!(f, "LIQUIDATION"),
        }
    }
}

/// Result of a buy: `amount` of cash converted to `shares` at `price`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub amount: f64,
    pub shares: f64,
    pub price: f64,
}

/// Buy `amount` worth of shares at `price`. Fractional shares are allowed.
pub fn buy(amount: f64, price: f64) -> Fill {
    Fill {
        amount,
        shares: amount / price,
        price,
    }
}

/// Clamp a requested purchase to the cash on hand.
pub fn partial_fill(requested: f64, cash: f64) -> f64 {
    requested.min(cash).max(0.0)
}

/// Sell price when the day's high reaches the profit line.
pub fn profit_exit(params: &StrategyParams, avg_price: f64, high: f64) -> Option<f64> {
    let target = params.profit_price(avg_price);
    (high >= target).then_some(target)
}

/// Sell price when the day's low reaches the stop line. The day-close variant
/// falls back to the stop line when the close is missing or not positive.
pub fn stop_exit(params: &StrategyParams, avg_price: f64, low: f64, close: f64) -> Option<f64> {
    let line = params.stop_price(avg_price);
    if low > line {
        return None;
    }
    Some(match params.rules.stop_pricing {
        StopPricing::AtStopLevel => line,
        StopPricing::AtDayClose if close.is_finite() && close > 0.0 => close,
        StopPricing::AtDayClose | StopPricing::AtStopLevel => line,
    })
}

/// Requested DCA amount for a close relative to the running average.
///
/// Full `cycle_unit` at or below the average, the partial fraction inside the
/// threshold band, nothing above it.
pub fn dca_amount(params: &StrategyParams, cycle_unit: f64, close: f64, avg_price: f64) -> Option<f64> {
    if close <= avg_price {
        Some(cycle_unit)
    } else if close <= params.dca_ceiling(avg_price) {
        Some(cycle_unit * params.rules.dca_partial_fraction)
    } else {
        None
    }
}
