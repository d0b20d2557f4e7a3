//! Configuration parsing and validation.
//!
//! Every sweep setting is checked here before any data is loaded. Values that
//! are well-formed but make a single tuple unusable (e.g. `max_holding_days = 0`
//! in a list) pass; the grid rejects those tuples individually.

use std::str::FromStr;

use crate::domain::backtest::DEFAULT_INITIAL_CAPITAL;
use crate::domain::error::EvSweepError;
use crate::domain::grid::{CutoffMode, ParamSpace};
use crate::domain::params::{MissingRowPolicy, RuleSet, StopPricing};
use crate::ports::config_port::ConfigPort;

pub fn validate_sweep_config(config: &dyn ConfigPort) -> Result<(), EvSweepError> {
    initial_capital(config)?;
    param_space(config)?;
    cutoff_mode(config)?;
    validate_flag(config, "panel", "sort")?;
    validate_flag(config, "sweep", "parallel")?;
    Ok(())
}

pub fn initial_capital(config: &dyn ConfigPort) -> Result<f64, EvSweepError> {
    let value = parse_value::<f64>(config, "sweep", "initial_capital")?
        .unwrap_or(DEFAULT_INITIAL_CAPITAL);
    if !(value.is_finite() && value > 0.0) {
        return Err(invalid("sweep", "initial_capital", "initial_capital must be positive"));
    }
    Ok(value)
}

/// Option lists from `[sweep]` and rule variants from `[rules]`. Missing
/// keys take the reference grid's values.
pub fn param_space(config: &dyn ConfigPort) -> Result<ParamSpace, EvSweepError> {
    let defaults = ParamSpace::default();
    Ok(ParamSpace {
        ev_quantiles: parse_list(config, "sweep", "ev_quantiles")?
            .unwrap_or(defaults.ev_quantiles),
        profit_targets: parse_list(config, "sweep", "profit_targets")?
            .unwrap_or(defaults.profit_targets),
        max_holding_days: parse_list(config, "sweep", "max_holding_days")?
            .unwrap_or(defaults.max_holding_days),
        stop_levels: parse_list(config, "sweep", "stop_levels")?
            .unwrap_or(defaults.stop_levels),
        rules: rule_set(config)?,
    })
}

pub fn rule_set(config: &dyn ConfigPort) -> Result<RuleSet, EvSweepError> {
    let defaults = RuleSet::default();
    let dca_threshold_pct = parse_value::<f64>(config, "rules", "dca_threshold_pct")?
        .unwrap_or(defaults.dca_threshold_pct);
    if !(dca_threshold_pct.is_finite() && dca_threshold_pct >= 0.0) {
        return Err(invalid(
            "rules",
            "dca_threshold_pct",
            "dca_threshold_pct must be non-negative",
        ));
    }

    let dca_partial_fraction = parse_value::<f64>(config, "rules", "dca_partial_fraction")?
        .unwrap_or(defaults.dca_partial_fraction);
    if !(dca_partial_fraction > 0.0 && dca_partial_fraction <= 1.0) {
        return Err(invalid(
            "rules",
            "dca_partial_fraction",
            "dca_partial_fraction must be within (0, 1]",
        ));
    }

    let stop_pricing = parse_value::<StopPricing>(config, "rules", "stop_pricing")?
        .unwrap_or(defaults.stop_pricing);
    let missing_row = parse_value::<MissingRowPolicy>(config, "rules", "missing_row")?
        .unwrap_or(defaults.missing_row);

    Ok(RuleSet {
        dca_threshold_pct,
        dca_partial_fraction,
        stop_pricing,
        missing_row,
    })
}

pub fn cutoff_mode(config: &dyn ConfigPort) -> Result<CutoffMode, EvSweepError> {
    Ok(parse_value::<CutoffMode>(config, "sweep", "cutoff_mode")?.unwrap_or_default())
}

fn validate_flag(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), EvSweepError> {
    // get_bool falls back silently, so probe with both defaults
    if config.get_string(section, key).is_some()
        && config.get_bool(section, key, true) != config.get_bool(section, key, false)
    {
        return Err(invalid(section, key, "expected true/false"));
    }
    Ok(())
}

fn parse_value<T>(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<T>, EvSweepError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = config.get_string(section, key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .map_err(|e| invalid(section, key, &format!("cannot parse '{raw}': {e}")))
}

fn parse_list<T>(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<Vec<T>>, EvSweepError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(items) = config.get_list(section, key) else {
        return Ok(None);
    };
    if items.is_empty() {
        return Err(invalid(section, key, "list must contain at least one value"));
    }
    items
        .iter()
        .map(|item| {
            item.parse::<T>()
                .map_err(|e| invalid(section, key, &format!("cannot parse '{item}': {e}")))
        })
        .collect::<Result<Vec<T>, _>>()
        .map(Some)
}

fn invalid(section: &str, key: &str, reason: &str) -> EvSweepError {
    EvSweepError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
