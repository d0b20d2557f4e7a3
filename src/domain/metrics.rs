//! Per-tuple running statistics and the summary row they finalize into.

use chrono::NaiveDate;

use super::execution::ExitType;
use super::params::StrategyParams;
use super::position::CycleRecord;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: f64,
}

/// Outcome statistics for one parameter tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub scenario: String,
    pub param_index: usize,
    pub params: StrategyParams,
    pub ev_cutoff: f64,
    pub total_return: f64,
    pub seed_multiple: f64,
    pub max_drawdown: f64,
    pub success_rate: f64,
    pub cycle_count: usize,
    pub profit_exits: usize,
    pub stop_exits: usize,
    pub liquidation_exits: usize,
    pub idle_days: usize,
    pub skipped_days: usize,
    pub avg_holding_days: f64,
    pub actual_max_holding_days: i64,
    pub max_loss_rate: f64,
    pub final_equity: f64,
    /// A position was still open when the panel ran out.
    pub open_position: bool,
}

#[derive(Debug, Clone)]
pub struct MetricsAccumulator {
    initial_capital: f64,
    max_equity_seen: f64,
    max_drawdown: f64,
    last_equity: f64,
    profit_exits: usize,
    stop_exits: usize,
    liquidation_exits: usize,
    idle_days: usize,
    skipped_days: usize,
    holding_day_sum: i64,
    holding_day_max: i64,
    max_loss_rate: f64,
    equity_curve: Option<Vec<EquityPoint>>,
}

impl MetricsAccumulator {
    pub fn new(initial_capital: f64, record_equity: bool) -> Self {
        MetricsAccumulator {
            initial_capital,
            max_equity_seen: initial_capital,
            max_drawdown: 0.0,
            last_equity: initial_capital,
            profit_exits: 0,
            stop_exits: 0,
            liquidation_exits: 0,
            idle_days: 0,
            skipped_days: 0,
            holding_day_sum: 0,
            holding_day_max: 0,
            max_loss_rate: 0.0,
            equity_curve: record_equity.then(Vec::new),
        }
    }

    /// Sample end-of-day equity.
    pub fn record_day(&mut self, date: NaiveDate, equity: f64) {
        self.last_equity = equity;
        if equity > self.max_equity_seen {
            self.max_equity_seen = equity;
        }
        if self.max_equity_seen > 0.0 {
            let dd = (equity - self.max_equity_seen) / self.max_equity_seen;
            if dd < self.max_drawdown {
                self.max_drawdown = dd;
            }
        }
        if let Some(curve) = self.equity_curve.as_mut() {
            curve.push(EquityPoint { date, equity });
        }
    }

    pub fn record_idle(&mut self) {
        self.idle_days += 1;
    }

    pub fn record_skip(&mut self) {
        self.skipped_days += 1;
    }

    pub fn record_cycle(&mut self, cycle: &CycleRecord) {
        match cycle.exit_type {
            ExitType::Profit => self.profit_exits += 1,
            ExitType::Stop => self.stop_exits += 1,
            ExitType::Liquidation => self.liquidation_exits += 1,
        }
        self.holding_day_sum += cycle.holding_days;
        self.holding_day_max = self.holding_day_max.max(cycle.holding_days);
        if cycle.cycle_return < self.max_loss_rate {
            self.max_loss_rate = cycle.cycle_return;
        }
    }

    pub fn cycle_count(&self) -> usize {
        self.profit_exits + self.stop_exits + self.liquidation_exits
    }

    pub fn max_equity_seen(&self) -> f64 {
        self.max_equity_seen
    }

    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }

    pub fn equity_curve(&self) -> Option<&[EquityPoint]> {
        self.equity_curve.as_deref()
    }

    pub fn take_equity_curve(&mut self) -> Vec<EquityPoint> {
        self.equity_curve.take().unwrap_or_default()
    }

    pub fn finalize(
        &self,
        scenario: &str,
        param_index: usize,
        params: StrategyParams,
        ev_cutoff: f64,
        open_position: bool,
    ) -> SummaryRow {
        let cycles = self.cycle_count();
        let final_equity = self.last_equity;
        let seed_multiple = if self.initial_capital > 0.0 {
            final_equity / self.initial_capital
        } else {
            0.0
        };

        let success_rate = if cycles > 0 {
            self.profit_exits as f64 / cycles as f64
        } else {
            0.0
        };

        let avg_holding_days = if cycles > 0 {
            self.holding_day_sum as f64 / cycles as f64
        } else {
            0.0
        };

        SummaryRow {
            scenario: scenario.to_string(),
            param_index,
            params,
            ev_cutoff,
            total_return: seed_multiple - 1.0,
            seed_multiple,
            max_drawdown: self.max_drawdown,
            success_rate,
            cycle_count: cycles,
            profit_exits: self.profit_exits,
            stop_exits: self.stop_exits,
            liquidation_exits: self.liquidation_exits,
            idle_days: self.idle_days,
            skipped_days: self.skipped_days,
            avg_holding_days,
            actual_max_holding_days: self.holding_day_max,
            max_loss_rate: self.max_loss_rate,
            final_equity,
            open_position,
        }
    }
}

/// Worst peak-to-trough decline of a curve, as a non-positive fraction of
/// the running peak. The peak starts at `initial`.
pub fn drawdown_from_curve(initial: f64, curve: &[EquityPoint]) -> f64 {
    let mut peak = initial;
    let mut max_dd = 0.0_f64;
    for point in curve {
        if point.equity > peak {
            peak = point.equity;
        } else if peak > 0.0 {
            let dd = (point.equity - peak) / peak;
            if dd < max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}
