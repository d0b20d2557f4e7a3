//! Simulation driver: replays the panel for every grid tuple.
//!
//! Two execution strategies produce identical results. `LockStep` walks the
//! panel once and fans each day out to every tuple in grid order; `Parallel`
//! gives each tuple its own full replay on a rayon worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, error, info};

use super::error::EvSweepError;
use super::grid::{ParameterGrid, Rejection, ResolvedParams};
use super::metrics::{EquityPoint, MetricsAccumulator, SummaryRow};
use super::panel::{DayBatch, Panel};
use super::params::StrategyParams;
use super::position::{CycleRecord, DayEvent, PositionState, StepContext};

pub const DEFAULT_INITIAL_CAPITAL: f64 = 40_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Execution {
    LockStep,
    #[default]
    Parallel,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub initial_capital: f64,
    pub record_ledger: bool,
    pub record_equity: bool,
    pub execution: Execution,
    pub scenario: String,
    /// Set to stop starting new tuples.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            record_ledger: false,
            record_equity: false,
            execution: Execution::Parallel,
            scenario: "base".to_string(),
            cancel: None,
        }
    }
}

impl EngineOptions {
    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Everything one tuple produced.
#[derive(Debug, Clone)]
pub struct TupleOutcome {
    pub summary: SummaryRow,
    pub cycles: Vec<CycleRecord>,
    pub equity_curve: Vec<EquityPoint>,
}

#[derive(Debug)]
pub struct TupleFailure {
    pub param_index: usize,
    pub params: StrategyParams,
    pub error: EvSweepError,
}

#[derive(Debug, Default)]
pub struct SweepOutcome {
    /// One row per simulated tuple, in grid order.
    pub summaries: Vec<SummaryRow>,
    pub ledger: Vec<CycleRecord>,
    pub rejected: Vec<Rejection>,
    pub failures: Vec<TupleFailure>,
    /// Tuples never run because the cancel flag was raised.
    pub cancelled: Vec<usize>,
}

impl SweepOutcome {
    /// Summaries ordered best Seed_Multiple first; ties keep grid order and
    /// NaN multiples go last.
    pub fn ranked_by_seed_multiple(&self) -> Vec<&SummaryRow> {
        let key = |row: &SummaryRow| {
            if row.seed_multiple.is_nan() {
                f64::NEG_INFINITY
            } else {
                row.seed_multiple
            }
        };
        let mut ranked: Vec<&SummaryRow> = self.summaries.iter().collect();
        ranked.sort_by(|a, b| key(b).total_cmp(&key(a)));
        ranked
    }

    pub fn summary_for(&self, param_index: usize) -> Option<&SummaryRow> {
        self.summaries.iter().find(|s| s.param_index == param_index)
    }

    pub fn cycles_for(&self, param_index: usize) -> impl Iterator<Item = &CycleRecord> + '_ {
        self.ledger
            .iter()
            .filter(move |c| c.param_index == param_index)
    }
}

/// Private state of one tuple across the whole run.
#[derive(Debug)]
pub struct TupleSimulation<'a> {
    resolved: &'a ResolvedParams,
    state: PositionState,
    metrics: MetricsAccumulator,
    cycles: Vec<CycleRecord>,
    record_ledger: bool,
}

impl<'a> TupleSimulation<'a> {
    pub fn new(resolved: &'a ResolvedParams, options: &EngineOptions) -> Self {
        TupleSimulation {
            resolved,
            state: PositionState::new(options.initial_capital),
            metrics: MetricsAccumulator::new(options.initial_capital, options.record_equity),
            cycles: Vec::new(),
            record_ledger: options.record_ledger,
        }
    }

    pub fn param_index(&self) -> usize {
        self.resolved.param_index
    }

    pub fn state(&self) -> &PositionState {
        &self.state
    }

    pub fn step(&mut self, day: &DayBatch<'_>) -> Result<DayEvent, EvSweepError> {
        let ctx = StepContext {
            param_index: self.resolved.param_index,
            params: &self.resolved.params,
            cutoff: self.resolved.cutoff.at(day.index()),
        };
        let event = self.state.advance(&ctx, day)?;

        match &event {
            DayEvent::Idle => self.metrics.record_idle(),
            DayEvent::Skipped => {
                let missing = EvSweepError::MissingRow {
                    ticker: self.state.ticker().unwrap_or_default().to_string(),
                    date: day.date(),
                };
                debug!(param_index = ctx.param_index, %missing, "day skipped");
                self.metrics.record_skip();
            }
            DayEvent::Exited(cycle) => {
                self.metrics.record_cycle(cycle);
                if self.record_ledger {
                    self.cycles.push(cycle.clone());
                }
            }
            DayEvent::Entered { .. } | DayEvent::Added { .. } | DayEvent::Held => {}
        }

        self.metrics.record_day(day.date(), self.state.equity());
        Ok(event)
    }

    pub fn finish(mut self, scenario: &str) -> TupleOutcome {
        let summary = self.metrics.finalize(
            scenario,
            self.resolved.param_index,
            self.resolved.params,
            self.resolved.cutoff.reported(),
            self.state.open.is_some(),
        );
        TupleOutcome {
            summary,
            equity_curve: self.metrics.take_equity_curve(),
            cycles: self.cycles,
        }
    }

    fn fail(self, error: EvSweepError) -> TupleResult {
        error!(param_index = self.resolved.param_index, %error, "tuple aborted");
        TupleResult::Failed(TupleFailure {
            param_index: self.resolved.param_index,
            params: self.resolved.params,
            error,
        })
    }
}

enum TupleResult {
    Done(TupleOutcome),
    Failed(TupleFailure),
    Cancelled(usize),
}

/// Simulate every valid tuple of `grid` over `panel`.
///
/// Tuple-scoped failures are collected in [`SweepOutcome::failures`]; only
/// panel-level problems return `Err`.
pub fn run_sweep(
    panel: &Panel,
    grid: &ParameterGrid,
    options: &EngineOptions,
) -> Result<SweepOutcome, EvSweepError> {
    if panel.is_empty() {
        return Err(EvSweepError::EmptyPanel);
    }

    info!(
        tuples = grid.len(),
        rejected = grid.rejected.len(),
        days = panel.day_count(),
        rows = panel.len(),
        execution = ?options.execution,
        cutoff_mode = %grid.cutoff_mode,
        "starting sweep"
    );

    let results = match options.execution {
        Execution::LockStep => run_lock_step(panel, grid, options),
        Execution::Parallel => grid
            .tuples
            .par_iter()
            .map(|resolved| {
                if options.is_cancelled() {
                    TupleResult::Cancelled(resolved.param_index)
                } else {
                    replay_tuple(panel, resolved, options)
                }
            })
            .collect(),
    };

    let mut outcome = SweepOutcome {
        rejected: grid.rejected.clone(),
        ..SweepOutcome::default()
    };
    for result in results {
        match result {
            TupleResult::Done(done) => {
                outcome.summaries.push(done.summary);
                outcome.ledger.extend(done.cycles);
            }
            TupleResult::Failed(failure) => outcome.failures.push(failure),
            TupleResult::Cancelled(param_index) => outcome.cancelled.push(param_index),
        }
    }

    info!(
        simulated = outcome.summaries.len(),
        failed = outcome.failures.len(),
        cancelled = outcome.cancelled.len(),
        cycles = outcome.ledger.len(),
        "sweep finished"
    );
    Ok(outcome)
}

/// Simulate a single tuple with its ledger and equity curve kept.
pub fn replay(
    panel: &Panel,
    resolved: &ResolvedParams,
    options: &EngineOptions,
) -> Result<TupleOutcome, EvSweepError> {
    if panel.is_empty() {
        return Err(EvSweepError::EmptyPanel);
    }
    let options = EngineOptions {
        record_ledger: true,
        record_equity: true,
        ..options.clone()
    };
    let mut sim = TupleSimulation::new(resolved, &options);
    for day in panel.days() {
        sim.step(&day)?;
    }
    info!(
        param_index = resolved.param_index,
        params = %resolved.params,
        "replay finished"
    );
    Ok(sim.finish(&options.scenario))
}

fn replay_tuple(panel: &Panel, resolved: &ResolvedParams, options: &EngineOptions) -> TupleResult {
    let mut sim = TupleSimulation::new(resolved, options);
    for day in panel.days() {
        if let Err(e) = sim.step(&day) {
            return sim.fail(e);
        }
    }
    TupleResult::Done(sim.finish(&options.scenario))
}

fn run_lock_step(panel: &Panel, grid: &ParameterGrid, options: &EngineOptions) -> Vec<TupleResult> {
    if options.is_cancelled() {
        return grid
            .tuples
            .iter()
            .map(|t| TupleResult::Cancelled(t.param_index))
            .collect();
    }

    let mut running: Vec<Option<TupleSimulation<'_>>> = grid
        .tuples
        .iter()
        .map(|t| Some(TupleSimulation::new(t, options)))
        .collect();
    let mut failed: Vec<Option<TupleResult>> = grid.tuples.iter().map(|_| None).collect();

    for day in panel.days() {
        for (slot, failure) in running.iter_mut().zip(failed.iter_mut()) {
            let Some(sim) = slot.as_mut() else { continue };
            if let Err(e) = sim.step(&day) {
                if let Some(sim) = slot.take() {
                    *failure = Some(sim.fail(e));
                }
            }
        }
    }

    running
        .into_iter()
        .zip(failed)
        .filter_map(|(sim, failure)| match (sim, failure) {
            (Some(sim), _) => Some(TupleResult::Done(sim.finish(&options.scenario))),
            (None, failure) => failure,
        })
        .collect()
}
