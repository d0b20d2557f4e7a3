//! Strategy parameters for one grid cell, plus the rule variants that used to
//! be separate copies of the backtest loop.

use std::fmt;
use std::str::FromStr;

/// Price used when the extended-phase stop fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopPricing {
    /// Sell at `avg_price * (1 + stop_level)`.
    #[default]
    AtStopLevel,
    /// Sell at the day's close once the stop line is touched.
    AtDayClose,
}

/// What to do when the held ticker has no row on a trading day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingRowPolicy {
    /// Skip the day for this tuple: no holding-day increment, no checks.
    #[default]
    Skip,
    /// Close the position at the last known close.
    Liquidate,
}

impl FromStr for StopPricing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stop_level" | "at_stop_level" => Ok(StopPricing::AtStopLevel),
            "day_close" | "at_day_close" | "close" => Ok(StopPricing::AtDayClose),
            other => Err(format!(
                "unknown stop pricing '{other}' (expected stop_level or day_close)"
            )),
        }
    }
}

impl FromStr for MissingRowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(MissingRowPolicy::Skip),
            "liquidate" => Ok(MissingRowPolicy::Liquidate),
            other => Err(format!(
                "unknown missing-row policy '{other}' (expected skip or liquidate)"
            )),
        }
    }
}

impl fmt::Display for StopPricing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopPricing::AtStopLevel => write!(f, "stop_level"),
            StopPricing::AtDayClose => write!(f, "day_close"),
        }
    }
}

impl fmt::Display for MissingRowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingRowPolicy::Skip => write!(f, "skip"),
            MissingRowPolicy::Liquidate => write!(f, "liquidate"),
        }
    }
}

/// Rule variants shared by every tuple of a sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleSet {
    /// DCA adds happen while close <= avg_price * (1 + dca_threshold_pct).
    pub dca_threshold_pct: f64,
    /// Fraction of `cycle_unit` bought when close is above avg_price but
    /// inside the threshold band.
    pub dca_partial_fraction: f64,
    pub stop_pricing: StopPricing,
    pub missing_row: MissingRowPolicy,
}

impl Default for RuleSet {
    fn default() -> Self {
        RuleSet {
            dca_threshold_pct: 0.05,
            dca_partial_fraction: 0.5,
            stop_pricing: StopPricing::AtStopLevel,
            missing_row: MissingRowPolicy::Skip,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyParams {
    pub ev_entry_quantile: f64,
    pub profit_target: f64,
    pub max_holding_days: i64,
    pub stop_level: f64,
    pub rules: RuleSet,
}

impl StrategyParams {
    /// Reasons this tuple cannot be simulated, first failure only.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_holding_days < 1 {
            return Err(format!(
                "max_holding_days must be >= 1, got {}",
                self.max_holding_days
            ));
        }
        if !(self.profit_target.is_finite() && self.profit_target > 0.0) {
            return Err(format!(
                "profit_target must be > 0, got {}",
                self.profit_target
            ));
        }
        if !(0.0..=1.0).contains(&self.ev_entry_quantile) {
            return Err(format!(
                "ev_entry_quantile must be within [0, 1], got {}",
                self.ev_entry_quantile
            ));
        }
        if !self.stop_level.is_finite() {
            return Err(format!("stop_level must be finite, got {}", self.stop_level));
        }
        if !(self.rules.dca_threshold_pct.is_finite() && self.rules.dca_threshold_pct >= 0.0) {
            return Err(format!(
                "dca_threshold_pct must be >= 0, got {}",
                self.rules.dca_threshold_pct
            ));
        }
        let frac = self.rules.dca_partial_fraction;
        if !(frac > 0.0 && frac <= 1.0) {
            return Err(format!(
                "dca_partial_fraction must be within (0, 1], got {frac}"
            ));
        }
        Ok(())
    }

    pub fn profit_price(&self, avg_price: f64) -> f64 {
        avg_price * (1.0 + self.profit_target)
    }

    pub fn stop_price(&self, avg_price: f64) -> f64 {
        avg_price * (1.0 + self.stop_level)
    }

    pub fn dca_ceiling(&self, avg_price: f64) -> f64 {
        avg_price * (1.0 + self.rules.dca_threshold_pct)
    }
}

impl fmt::Display for StrategyParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "q={} pt={} days={} stop={}",
            self.ev_entry_quantile, self.profit_target, self.max_holding_days, self.stop_level
        )
    }
}
