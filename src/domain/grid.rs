//! Parameter grid: cross product of option lists with EV cutoffs resolved
//! against the panel.
//!
//! Full-sample cutoffs read the whole EV column, including scores dated after
//! the day being simulated. That keeps cutoffs stable across the run but is a
//! look-ahead; [`CutoffMode::Expanding`] is the leakage-free alternative.

use crate::domain::error::EvSweepError;
use crate::domain::panel::Panel;
use crate::domain::params::{RuleSet, StrategyParams};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CutoffMode {
    /// One cutoff per quantile from every EV score in the panel.
    #[default]
    FullSample,
    /// Per-day cutoff from the scores dated on or before that day.
    Expanding,
}

impl FromStr for CutoffMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full_sample" | "full" => Ok(CutoffMode::FullSample),
            "expanding" => Ok(CutoffMode::Expanding),
            other => Err(format!(
                "unknown cutoff mode '{other}' (expected full_sample or expanding)"
            )),
        }
    }
}

impl fmt::Display for CutoffMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CutoffMode::FullSample => write!(f, "full_sample"),
            CutoffMode::Expanding => write!(f, "expanding"),
        }
    }
}

/// EV threshold a candidate must reach to be entered.
#[derive(Debug, Clone, PartialEq)]
pub enum Cutoff {
    Fixed(f64),
    PerDay(Arc<[f64]>),
}

impl Cutoff {
    pub fn at(&self, day_index: usize) -> f64 {
        match self {
            Cutoff::Fixed(v) => *v,
            Cutoff::PerDay(series) => series.get(day_index).copied().unwrap_or(f64::INFINITY),
        }
    }

    /// Value reported in summaries: the fixed cutoff, or the final day's.
    pub fn reported(&self) -> f64 {
        match self {
            Cutoff::Fixed(v) => *v,
            Cutoff::PerDay(series) => series.last().copied().unwrap_or(f64::INFINITY),
        }
    }
}

/// One simulatable grid cell.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParams {
    pub param_index: usize,
    pub params: StrategyParams,
    pub cutoff: Cutoff,
}

/// A grid cell that failed validation and will not be simulated.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub param_index: usize,
    pub params: StrategyParams,
    pub reason: String,
}

impl Rejection {
    pub fn to_error(&self) -> EvSweepError {
        EvSweepError::InvalidParameter {
            param_index: self.param_index,
            reason: self.reason.clone(),
        }
    }
}

/// Enumerated option lists for the four swept parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpace {
    pub ev_quantiles: Vec<f64>,
    pub profit_targets: Vec<f64>,
    pub max_holding_days: Vec<i64>,
    pub stop_levels: Vec<f64>,
    pub rules: RuleSet,
}

impl Default for ParamSpace {
    fn default() -> Self {
        ParamSpace {
            ev_quantiles: vec![0.65, 0.70, 0.75],
            profit_targets: vec![0.05, 0.10, 0.15],
            max_holding_days: vec![20, 30, 40],
            stop_levels: vec![0.0, -0.05, -0.10],
            rules: RuleSet::default(),
        }
    }
}

impl ParamSpace {
    pub fn len(&self) -> usize {
        self.ev_quantiles.len()
            * self.profit_targets.len()
            * self.max_holding_days.len()
            * self.stop_levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cross product, nested quantile → holding days → stop level → profit target.
    pub fn combinations(&self) -> Vec<StrategyParams> {
        let mut out = Vec::with_capacity(self.len());
        for &q in &self.ev_quantiles {
            for &days in &self.max_holding_days {
                for &stop in &self.stop_levels {
                    for &pt in &self.profit_targets {
                        out.push(StrategyParams {
                            ev_entry_quantile: q,
                            profit_target: pt,
                            max_holding_days: days,
                            stop_level: stop,
                            rules: self.rules,
                        });
                    }
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct ParameterGrid {
    pub tuples: Vec<ResolvedParams>,
    pub rejected: Vec<Rejection>,
    pub cutoff_mode: CutoffMode,
}

impl ParameterGrid {
    pub fn build(space: &ParamSpace, panel: &Panel, mode: CutoffMode) -> Self {
        Self::from_params(space.combinations(), panel, mode)
    }

    /// Validate each tuple and resolve its cutoff. `param_index` is the
    /// position in `params`, rejected tuples included.
    pub fn from_params(params: Vec<StrategyParams>, panel: &Panel, mode: CutoffMode) -> Self {
        let mut tuples = Vec::with_capacity(params.len());
        let mut rejected = Vec::new();
        let mut pending = Vec::with_capacity(params.len());

        for (param_index, p) in params.into_iter().enumerate() {
            match p.validate() {
                Ok(()) => pending.push((param_index, p)),
                Err(reason) => {
                    let rejection = Rejection {
                        param_index,
                        params: p,
                        reason,
                    };
                    warn!(params = %p, error = %rejection.to_error(), "rejecting parameter tuple");
                    rejected.push(rejection);
                }
            }
        }

        let cutoffs = resolve_cutoffs(panel, mode, pending.iter().map(|(_, p)| p.ev_entry_quantile));

        for (param_index, p) in pending {
            let cutoff = cutoffs
                .get(&p.ev_entry_quantile.to_bits())
                .cloned()
                .unwrap_or(Cutoff::Fixed(f64::INFINITY));
            tuples.push(ResolvedParams {
                param_index,
                params: p,
                cutoff,
            });
        }

        ParameterGrid {
            tuples,
            rejected,
            cutoff_mode: mode,
        }
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn get(&self, param_index: usize) -> Option<&ResolvedParams> {
        self.tuples.iter().find(|t| t.param_index == param_index)
    }
}

/// One cutoff per distinct quantile, keyed by the quantile's bit pattern.
fn resolve_cutoffs(
    panel: &Panel,
    mode: CutoffMode,
    quantiles: impl Iterator<Item = f64>,
) -> HashMap<u64, Cutoff> {
    let mut distinct: Vec<f64> = Vec::new();
    for q in quantiles {
        if !distinct.iter().any(|d| d.to_bits() == q.to_bits()) {
            distinct.push(q);
        }
    }

    match mode {
        CutoffMode::FullSample => distinct
            .into_iter()
            .map(|q| {
                let cutoff = panel.ev_quantile(q).unwrap_or_else(|| {
                    warn!(quantile = q, "panel has no finite EV scores; no entries possible");
                    f64::INFINITY
                });
                (q.to_bits(), Cutoff::Fixed(cutoff))
            })
            .collect(),
        CutoffMode::Expanding => {
            let series = panel.expanding_ev_quantiles(&distinct);
            distinct
                .into_iter()
                .zip(series)
                .map(|(q, s)| (q.to_bits(), Cutoff::PerDay(Arc::from(s))))
                .collect()
        }
    }
}
