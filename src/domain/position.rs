//! Per-tuple position state machine: Idle → Holding → Extending → Idle.
//!
//! Within a day the checks run in a fixed order: profit exit, then the
//! extension transition and stop exit, then the DCA add. Reordering them
//! changes results.

use chrono::NaiveDate;

use super::error::EvSweepError;
use super::execution::{self, ExitType};
use super::panel::DayBatch;
use super::params::{MissingRowPolicy, StrategyParams};
use super::price_row::PriceRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Holding,
    Extending,
}

/// An open DCA position. Only exists while the phase is Holding or Extending.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPosition {
    pub ticker: String,
    pub total_shares: f64,
    pub total_invested: f64,
    /// Per-buy allocation fixed at entry: entry cash / max_holding_days.
    pub cycle_unit: f64,
    pub holding_days: i64,
    pub buy_count: u32,
    pub extending: bool,
    pub start_date: NaiveDate,
    pub start_seed: f64,
    pub last_close: f64,
}

impl OpenPosition {
    pub fn avg_price(&self) -> Option<f64> {
        let valid = self.total_shares > 0.0
            && self.total_invested > 0.0
            && self.total_shares.is_finite()
            && self.total_invested.is_finite();
        valid.then(|| self.total_invested / self.total_shares)
    }

    pub fn market_value(&self, price: f64) -> f64 {
        self.total_shares * price
    }
}

/// One closed entry-to-exit cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleRecord {
    pub param_index: usize,
    pub params: StrategyParams,
    pub ticker: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub holding_days: i64,
    pub buy_count: u32,
    pub start_seed: f64,
    pub end_seed: f64,
    pub total_invested: f64,
    pub proceeds: f64,
    pub cycle_return: f64,
    pub exit_type: ExitType,
}

/// What happened to a tuple on one day.
#[derive(Debug, Clone, PartialEq)]
pub enum DayEvent {
    /// Flat with no qualifying candidate (or no cash to deploy).
    Idle,
    Entered { ticker: String, price: f64 },
    Added { amount: f64, price: f64 },
    Held,
    /// Held ticker had no row; the day was skipped for this tuple.
    Skipped,
    Exited(CycleRecord),
}

/// Per-day inputs that do not belong to the state itself.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub param_index: usize,
    pub params: &'a StrategyParams,
    pub cutoff: f64,
}

enum Review {
    Hold,
    Added { amount: f64, price: f64 },
    Exit { price: f64, exit_type: ExitType },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionState {
    pub cash: f64,
    pub bought_today: bool,
    pub open: Option<OpenPosition>,
}

impl PositionState {
    pub fn new(initial_capital: f64) -> Self {
        PositionState {
            cash: initial_capital,
            bought_today: false,
            open: None,
        }
    }

    pub fn phase(&self) -> Phase {
        match &self.open {
            None => Phase::Idle,
            Some(pos) if pos.extending => Phase::Extending,
            Some(_) => Phase::Holding,
        }
    }

    pub fn ticker(&self) -> Option<&str> {
        self.open.as_ref().map(|p| p.ticker.as_str())
    }

    /// Cash plus the open position at its most recent close.
    pub fn equity(&self) -> f64 {
        self.cash
            + self
                .open
                .as_ref()
                .map_or(0.0, |pos| pos.market_value(pos.last_close))
    }

    /// Advance one trading day.
    pub fn advance(
        &mut self,
        ctx: &StepContext<'_>,
        day: &DayBatch<'_>,
    ) -> Result<DayEvent, EvSweepError> {
        self.bought_today = false;

        let Some(pos) = self.open.as_mut() else {
            return Ok(self.try_enter(ctx, day));
        };

        let review = match day.get(&pos.ticker) {
            Some(row) => review_day(ctx, pos, row, day.date(), &mut self.cash, &mut self.bought_today)?,
            None => match ctx.params.rules.missing_row {
                MissingRowPolicy::Skip => return Ok(DayEvent::Skipped),
                MissingRowPolicy::Liquidate => Review::Exit {
                    price: pos.last_close,
                    exit_type: ExitType::Liquidation,
                },
            },
        };

        match review {
            Review::Hold => Ok(DayEvent::Held),
            Review::Added { amount, price } => Ok(DayEvent::Added { amount, price }),
            Review::Exit { price, exit_type } => match self.open.take() {
                Some(pos) => Ok(DayEvent::Exited(self.settle(
                    ctx,
                    pos,
                    day.date(),
                    price,
                    exit_type,
                ))),
                None => Ok(DayEvent::Held),
            },
        }
    }

    fn try_enter(&mut self, ctx: &StepContext<'_>, day: &DayBatch<'_>) -> DayEvent {
        if !(self.cash.is_finite() && self.cash > 0.0) {
            return DayEvent::Idle;
        }
        let Some(row) = day.best_candidate(ctx.cutoff) else {
            return DayEvent::Idle;
        };

        let start_seed = self.cash;
        let cycle_unit = start_seed / ctx.params.max_holding_days as f64;
        let fill = execution::buy(cycle_unit, row.close);

        self.cash -= fill.amount;
        self.bought_today = true;
        self.open = Some(OpenPosition {
            ticker: row.ticker.clone(),
            total_shares: fill.shares,
            total_invested: fill.amount,
            cycle_unit,
            holding_days: 1,
            buy_count: 1,
            extending: false,
            start_date: day.date(),
            start_seed,
            last_close: row.close,
        });

        DayEvent::Entered {
            ticker: row.ticker.clone(),
            price: row.close,
        }
    }

    fn settle(
        &mut self,
        ctx: &StepContext<'_>,
        pos: OpenPosition,
        date: NaiveDate,
        price: f64,
        exit_type: ExitType,
    ) -> CycleRecord {
        let proceeds = pos.market_value(price);
        let cycle_return = (proceeds - pos.total_invested) / pos.total_invested;
        self.cash += proceeds;

        CycleRecord {
            param_index: ctx.param_index,
            params: *ctx.params,
            ticker: pos.ticker,
            start_date: pos.start_date,
            end_date: date,
            holding_days: pos.holding_days,
            buy_count: pos.buy_count,
            start_seed: pos.start_seed,
            end_seed: self.cash,
            total_invested: pos.total_invested,
            proceeds,
            cycle_return,
            exit_type,
        }
    }
}

fn review_day(
    ctx: &StepContext<'_>,
    pos: &mut OpenPosition,
    row: &PriceRow,
    date: NaiveDate,
    cash: &mut f64,
    bought_today: &mut bool,
) -> Result<Review, EvSweepError> {
    let params = ctx.params;
    if row.close.is_finite() && row.close > 0.0 {
        pos.last_close = row.close;
    }
    pos.holding_days += 1;

    let avg_price = pos.avg_price().ok_or_else(|| EvSweepError::DivisionDegeneracy {
        param_index: ctx.param_index,
        ticker: pos.ticker.clone(),
        date,
        shares: pos.total_shares,
        invested: pos.total_invested,
    })?;

    if let Some(price) = execution::profit_exit(params, avg_price, row.high) {
        return Ok(Review::Exit {
            price,
            exit_type: ExitType::Profit,
        });
    }

    if !pos.extending && pos.holding_days >= params.max_holding_days {
        pos.extending = true;
    }

    if pos.extending {
        if let Some(price) = execution::stop_exit(params, avg_price, row.low, row.close) {
            return Ok(Review::Exit {
                price,
                exit_type: ExitType::Stop,
            });
        }
    }

    let budget_left = i64::from(pos.buy_count) < params.max_holding_days;
    let buyable = row.close.is_finite() && row.close > 0.0;
    if *bought_today || !budget_left || !buyable {
        return Ok(Review::Hold);
    }

    let Some(requested) = execution::dca_amount(params, pos.cycle_unit, row.close, avg_price) else {
        return Ok(Review::Hold);
    };
    let amount = execution::partial_fill(requested, *cash);
    if amount <= 0.0 {
        return Ok(Review::Hold);
    }

    let fill = execution::buy(amount, row.close);
    pos.total_shares += fill.shares;
    pos.total_invested += fill.amount;
    pos.buy_count += 1;
    *cash -= fill.amount;
    *bought_today = true;

    Ok(Review::Added {
        amount: fill.amount,
        price: fill.price,
    })
}
