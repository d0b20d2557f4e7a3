//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::{CsvPanelSource, CsvResultWriter};
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::backtest::{self as engine, EngineOptions, Execution, SweepOutcome};
use crate::domain::config_validation::{self, validate_sweep_config};
use crate::domain::error::EvSweepError;
use crate::domain::grid::ParameterGrid;
use crate::domain::metrics::SummaryRow;
use crate::domain::panel::Panel;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::PanelSource;
use crate::ports::report_port::ResultSink;

const DEFAULT_SUMMARY_PATH: &str = "summary.csv";
const DEFAULT_CYCLES_PATH: &str = "cycles.csv";
const TOP_N: usize = 10;

#[derive(Parser, Debug)]
#[command(name = "evsweep", about = "Parametric DCA simulator over EV-scored price panels")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Simulate every parameter tuple and write the summary table
    Sweep {
        #[arg(short, long)]
        config: PathBuf,
        /// Panel CSV, overriding [panel] path
        #[arg(long)]
        panel: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Also write every closed cycle to this file
        #[arg(long)]
        ledger: Option<PathBuf>,
        /// Walk the panel once in lock-step instead of one replay per tuple
        #[arg(long)]
        sequential: bool,
    },
    /// Re-run the N-th best tuple and write its cycles
    Replay {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        panel: Option<PathBuf>,
        #[arg(long, default_value_t = 1)]
        rank: usize,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a sweep configuration
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Sweep {
            config,
            panel,
            output,
            ledger,
            sequential,
        } => run_sweep(
            &config,
            panel.as_deref(),
            output.as_deref(),
            ledger.as_deref(),
            sequential,
        ),
        Command::Replay {
            config,
            panel,
            rank,
            output,
        } => run_replay(&config, panel.as_deref(), rank, output.as_deref()),
        Command::Validate { config } => run_validate(&config),
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        let err = EvSweepError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        };
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

/// Engine settings from `[sweep]`.
pub fn build_engine_options(adapter: &dyn ConfigPort) -> Result<EngineOptions, EvSweepError> {
    let execution = if adapter.get_bool("sweep", "parallel", true) {
        Execution::Parallel
    } else {
        Execution::LockStep
    };
    Ok(EngineOptions {
        initial_capital: config_validation::initial_capital(adapter)?,
        scenario: adapter
            .get_string("sweep", "scenario")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "base".to_string()),
        execution,
        ..EngineOptions::default()
    })
}

/// Load the panel named by `override_path` or `[panel] path`.
pub fn load_panel(adapter: &dyn ConfigPort, override_path: Option<&Path>) -> Result<Panel, EvSweepError> {
    let path = match override_path {
        Some(p) => p.to_path_buf(),
        None => adapter
            .get_string("panel", "path")
            .map(PathBuf::from)
            .ok_or_else(|| EvSweepError::ConfigMissing {
                section: "panel".into(),
                key: "path".into(),
            })?,
    };
    let rows = CsvPanelSource::new(path).load_rows()?;
    if adapter.get_bool("panel", "sort", true) {
        Panel::from_unsorted(rows)
    } else {
        Panel::new(rows)
    }
}

/// Validated config, loaded panel and resolved grid.
pub fn prepare(
    adapter: &dyn ConfigPort,
    panel_override: Option<&Path>,
) -> Result<(Panel, ParameterGrid, EngineOptions), EvSweepError> {
    validate_sweep_config(adapter)?;
    let options = build_engine_options(adapter)?;
    let space = config_validation::param_space(adapter)?;
    let mode = config_validation::cutoff_mode(adapter)?;
    let panel = load_panel(adapter, panel_override)?;
    let grid = ParameterGrid::build(&space, &panel, mode);
    Ok((panel, grid, options))
}

fn output_path(cli: Option<&Path>, adapter: &dyn ConfigPort, key: &str) -> Option<PathBuf> {
    cli.map(Path::to_path_buf)
        .or_else(|| adapter.get_string("output", key).map(PathBuf::from))
}

fn run_sweep(
    config_path: &Path,
    panel_override: Option<&Path>,
    output: Option<&Path>,
    ledger: Option<&Path>,
    sequential: bool,
) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let (panel, grid, mut options) = match prepare(&adapter, panel_override) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };
    if sequential {
        options.execution = Execution::LockStep;
    }

    let summary_path = output_path(output, &adapter, "summary_path")
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SUMMARY_PATH));
    let ledger_path = output_path(ledger, &adapter, "ledger_path");
    options.record_ledger = ledger_path.is_some();

    let outcome = match engine::run_sweep(&panel, &grid, &options) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    let mut writer = CsvResultWriter::new(Some(summary_path.clone()), ledger_path.clone());
    let written = writer
        .write_summary(&options.scenario, &outcome.summaries, &outcome.rejected)
        .and_then(|()| writer.write_ledger(&options.scenario, &outcome.ledger));
    if let Err(e) = written {
        eprintln!("error: {e}");
        return (&e).into();
    }

    print_sweep_summary(&panel, &outcome);
    eprintln!("\nSummary written to: {}", summary_path.display());
    if let Some(path) = ledger_path {
        eprintln!("Ledger written to:  {}", path.display());
    }
    ExitCode::SUCCESS
}

fn run_replay(config_path: &Path, panel_override: Option<&Path>, rank: usize, output: Option<&Path>) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let (panel, grid, options) = match prepare(&adapter, panel_override) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    let outcome = match engine::run_sweep(&panel, &grid, &options) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };
    let ranked = outcome.ranked_by_seed_multiple();
    let Some(chosen) = rank.checked_sub(1).and_then(|i| ranked.get(i)) else {
        eprintln!(
            "error: rank {} out of range (1..={} simulated tuples)",
            rank,
            ranked.len()
        );
        return ExitCode::from(4);
    };
    let Some(resolved) = grid.get(chosen.param_index) else {
        eprintln!("error: tuple #{} missing from grid", chosen.param_index);
        return ExitCode::from(5);
    };

    let single = match engine::replay(&panel, resolved, &options) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    let cycles_path = output_path(output, &adapter, "ledger_path")
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CYCLES_PATH));
    let mut writer = CsvResultWriter::new(None, Some(cycles_path.clone()));
    if let Err(e) = writer.write_ledger(&options.scenario, &single.cycles) {
        eprintln!("error: {e}");
        return (&e).into();
    }

    eprintln!("\n=== Rank {} of {} ===", rank, ranked.len());
    print_row(&single.summary);
    eprintln!("Equity points:    {}", single.equity_curve.len());
    eprintln!("\nCycles written to: {}", cycles_path.display());
    ExitCode::SUCCESS
}

fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    if let Err(e) = validate_sweep_config(&adapter) {
        eprintln!("error: {e}");
        return (&e).into();
    }

    let (space, mode, options) = match (
        config_validation::param_space(&adapter),
        config_validation::cutoff_mode(&adapter),
        build_engine_options(&adapter),
    ) {
        (Ok(s), Ok(m), Ok(o)) => (s, m, o),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    eprintln!("\nGrid:");
    eprintln!("  ev_quantiles:     {:?}", space.ev_quantiles);
    eprintln!("  profit_targets:   {:?}", space.profit_targets);
    eprintln!("  max_holding_days: {:?}", space.max_holding_days);
    eprintln!("  stop_levels:      {:?}", space.stop_levels);
    eprintln!("  tuples:           {}", space.len());
    eprintln!("\nRules:");
    eprintln!("  dca_threshold_pct:    {}", space.rules.dca_threshold_pct);
    eprintln!("  dca_partial_fraction: {}", space.rules.dca_partial_fraction);
    eprintln!("  stop_pricing:         {}", space.rules.stop_pricing);
    eprintln!("  missing_row:          {}", space.rules.missing_row);
    eprintln!("\nEngine:");
    eprintln!("  scenario:        {}", options.scenario);
    eprintln!("  initial_capital: {}", options.initial_capital);
    eprintln!("  cutoff_mode:     {}", mode);
    eprintln!("  execution:       {:?}", options.execution);

    let invalid = space
        .combinations()
        .iter()
        .filter(|p| p.validate().is_err())
        .count();
    if invalid > 0 {
        eprintln!("\nwarning: {invalid} tuple(s) will be rejected");
    }

    eprintln!("\nConfiguration is valid");
    ExitCode::SUCCESS
}

fn print_sweep_summary(panel: &Panel, outcome: &SweepOutcome) {
    eprintln!("\n=== Sweep Results ===");
    if let (Some(first), Some(last)) = (panel.first_date(), panel.last_date()) {
        eprintln!("Panel:            {} to {} ({} days, {} tickers)", first, last, panel.day_count(), panel.tickers().len());
    }
    eprintln!("Simulated:        {}", outcome.summaries.len());
    eprintln!("Rejected:         {}", outcome.rejected.len());
    if !outcome.failures.is_empty() {
        eprintln!("Failed:           {}", outcome.failures.len());
        for f in &outcome.failures {
            eprintln!("  #{} ({}): {}", f.param_index, f.params, f.error);
        }
    }

    let ranked = outcome.ranked_by_seed_multiple();
    if ranked.is_empty() {
        return;
    }
    eprintln!("\n=== Top {} by Seed Multiple ===", TOP_N.min(ranked.len()));
    for row in ranked.iter().take(TOP_N) {
        eprintln!(
            "  #{:<4} q={:<5} pt={:<5} days={:<3} stop={:<6} x{:.3}  dd {:.1}%  win {:.1}%  cycles {}",
            row.param_index,
            row.params.ev_entry_quantile,
            row.params.profit_target,
            row.params.max_holding_days,
            row.params.stop_level,
            row.seed_multiple,
            row.max_drawdown * 100.0,
            row.success_rate * 100.0,
            row.cycle_count,
        );
    }
}

fn print_row(row: &SummaryRow) {
    eprintln!("Tuple:            #{} ({})", row.param_index, row.params);
    eprintln!("EV Cutoff:        {:.4}", row.ev_cutoff);
    eprintln!("Total Return:     {:.2}%", row.total_return * 100.0);
    eprintln!("Seed Multiple:    {:.4}", row.seed_multiple);
    eprintln!("Max Drawdown:     {:.1}%", row.max_drawdown * 100.0);
    eprintln!("Success Rate:     {:.1}%", row.success_rate * 100.0);
    eprintln!(
        "Cycles:           {} ({} profit, {} stop)",
        row.cycle_count, row.profit_exits, row.stop_exits
    );
    eprintln!("Idle Days:        {}", row.idle_days);
    eprintln!("Avg Holding:      {:.1} days", row.avg_holding_days);
    eprintln!("Max Loss Rate:    {:.2}%", row.max_loss_rate * 100.0);
    eprintln!("Final Equity:     {:.0}", row.final_equity);
}
