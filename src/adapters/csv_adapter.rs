//! CSV panel reader and result writer.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::domain::error::EvSweepError;
use crate::domain::grid::Rejection;
use crate::domain::metrics::SummaryRow;
use crate::domain::position::CycleRecord;
use crate::domain::price_row::PriceRow;
use crate::ports::data_port::PanelSource;
use crate::ports::report_port::ResultSink;

pub const SUMMARY_HEADER: [&str; 22] = [
    "Scenario",
    "Param_Index",
    "EV_Quantile",
    "EV_Cutoff",
    "Profit_Target",
    "Max_Holding_Days",
    "Stop_Level",
    "Total_Return",
    "Seed_Multiple",
    "Max_Drawdown",
    "Success_Rate",
    "Cycle_Count",
    "Profit_Exits",
    "Stop_Exits",
    "Liquidation_Exits",
    "Idle_Days",
    "Skipped_Days",
    "Avg_Holding_Days",
    "Actual_Max_Holding_Days",
    "Max_Loss_Rate",
    "Final_Equity",
    "Status",
];

pub const LEDGER_HEADER: [&str; 17] = [
    "Scenario",
    "Param_Index",
    "EV_Quantile",
    "Profit_Target",
    "Max_Holding_Days",
    "Stop_Level",
    "Ticker",
    "Start_Date",
    "End_Date",
    "Holding_Days",
    "Buy_Count",
    "Start_Seed",
    "End_Seed",
    "Total_Invested",
    "Proceeds",
    "Cycle_Return",
    "Exit_Type",
];

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Reads a panel from one CSV file with a header row.
///
/// Columns are located by name (case-insensitive): `Date`, `Ticker`, `High`,
/// `Low`, `Close`, `EV`, and optionally `Open`. Extra columns are ignored.
/// Empty numeric cells read as NaN.
pub struct CsvPanelSource {
    path: PathBuf,
}

struct Columns {
    date: usize,
    ticker: usize,
    open: Option<usize>,
    high: usize,
    low: usize,
    close: usize,
    ev: usize,
}

impl Columns {
    fn locate(headers: &csv::StringRecord) -> Result<Self, EvSweepError> {
        let index: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_lowercase(), i))
            .collect();
        let find = |name: &str| {
            index.get(name).copied().ok_or_else(|| EvSweepError::DataRead {
                reason: format!("missing required column '{name}'"),
            })
        };
        Ok(Columns {
            date: find("date")?,
            ticker: find("ticker")?,
            open: index.get("open").copied(),
            high: find("high")?,
            low: find("low")?,
            close: find("close")?,
            ev: find("ev")?,
        })
    }
}

impl CsvPanelSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PanelSource for CsvPanelSource {
    fn load_rows(&self) -> Result<Vec<PriceRow>, EvSweepError> {
        let file = File::open(&self.path).map_err(|e| EvSweepError::DataRead {
            reason: format!("failed to open {}: {}", self.path.display(), e),
        })?;
        let rows = read_rows(file)?;
        info!(path = %self.path.display(), rows = rows.len(), "panel loaded");
        Ok(rows)
    }
}

/// Parse panel rows from any reader holding CSV with a header row.
pub fn read_rows<R: std::io::Read>(reader: R) -> Result<Vec<PriceRow>, EvSweepError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = rdr.headers().map_err(|e| EvSweepError::DataRead {
        reason: format!("CSV header error: {e}"),
    })?;
    let cols = Columns::locate(headers)?;

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for (i, result) in rdr.records().enumerate() {
        // header is line 1
        let line = i + 2;
        let record = result.map_err(|e| EvSweepError::DataRead {
            reason: format!("CSV parse error at line {line}: {e}"),
        })?;

        let ticker = record.get(cols.ticker).unwrap_or_default();
        if ticker.is_empty() {
            skipped += 1;
            continue;
        }

        let date = parse_date(record.get(cols.date).unwrap_or_default()).ok_or_else(|| {
            EvSweepError::DataRead {
                reason: format!(
                    "invalid date '{}' at line {line}",
                    record.get(cols.date).unwrap_or_default()
                ),
            }
        })?;

        let number = |col: usize, name: &str| -> Result<f64, EvSweepError> {
            let raw = record.get(col).unwrap_or_default();
            if raw.is_empty() {
                return Ok(f64::NAN);
            }
            raw.parse::<f64>().map_err(|e| EvSweepError::DataRead {
                reason: format!("invalid {name} value '{raw}' at line {line}: {e}"),
            })
        };

        let close = number(cols.close, "close")?;
        let open = match cols.open {
            Some(col) => number(col, "open")?,
            None => close,
        };
        rows.push(PriceRow {
            date,
            ticker: ticker.to_string(),
            open,
            high: number(cols.high, "high")?,
            low: number(cols.low, "low")?,
            close,
            ev_score: number(cols.ev, "ev")?,
        });
    }

    if skipped > 0 {
        warn!(skipped, "ignored rows without a ticker");
    }
    Ok(rows)
}

/// Accepts `YYYY-MM-DD`, optionally followed by a time after a space or `T`.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let head = raw.split([' ', 'T']).next().unwrap_or(raw);
    NaiveDate::parse_from_str(head, DATE_FORMAT).ok()
}

/// Writes the summary and ledger tables as CSV files. A `None` path skips
/// that table.
pub struct CsvResultWriter {
    summary_path: Option<PathBuf>,
    ledger_path: Option<PathBuf>,
}

impl CsvResultWriter {
    pub fn new(summary_path: Option<PathBuf>, ledger_path: Option<PathBuf>) -> Self {
        Self {
            summary_path,
            ledger_path,
        }
    }
}

impl ResultSink for CsvResultWriter {
    fn write_summary(
        &mut self,
        scenario: &str,
        rows: &[SummaryRow],
        rejected: &[Rejection],
    ) -> Result<(), EvSweepError> {
        let Some(path) = &self.summary_path else {
            debug!("no summary path configured; summary not written");
            return Ok(());
        };
        let file = create(path)?;
        write_summary_to(file, scenario, rows, rejected)?;
        info!(path = %path.display(), rows = rows.len() + rejected.len(), "summary written");
        Ok(())
    }

    fn write_ledger(&mut self, scenario: &str, cycles: &[CycleRecord]) -> Result<(), EvSweepError> {
        let Some(path) = &self.ledger_path else {
            debug!("no ledger path configured; ledger not written");
            return Ok(());
        };
        let file = create(path)?;
        write_ledger_to(file, scenario, cycles)?;
        info!(path = %path.display(), cycles = cycles.len(), "ledger written");
        Ok(())
    }
}

fn create(path: &Path) -> Result<File, EvSweepError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(File::create(path)?)
}

fn csv_error(e: csv::Error) -> EvSweepError {
    match e.into_kind() {
        csv::ErrorKind::Io(io) => EvSweepError::Io(io),
        other => EvSweepError::Io(std::io::Error::other(format!("{other:?}"))),
    }
}

/// Summary table in grid order, simulated and rejected tuples interleaved by
/// `param_index`.
pub fn write_summary_to<W: Write>(
    writer: W,
    scenario: &str,
    rows: &[SummaryRow],
    rejected: &[Rejection],
) -> Result<(), EvSweepError> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(SUMMARY_HEADER).map_err(csv_error)?;

    let mut records: Vec<(usize, Vec<String>)> = rows
        .iter()
        .map(|r| (r.param_index, summary_record(scenario, r)))
        .chain(
            rejected
                .iter()
                .map(|r| (r.param_index, rejected_record(scenario, r))),
        )
        .collect();
    records.sort_by_key(|(idx, _)| *idx);

    for (_, record) in records {
        wtr.write_record(&record).map_err(csv_error)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_ledger_to<W: Write>(
    writer: W,
    scenario: &str,
    cycles: &[CycleRecord],
) -> Result<(), EvSweepError> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(LEDGER_HEADER).map_err(csv_error)?;
    for c in cycles {
        let p = &c.params;
        wtr.write_record([
            scenario.to_string(),
            c.param_index.to_string(),
            p.ev_entry_quantile.to_string(),
            p.profit_target.to_string(),
            p.max_holding_days.to_string(),
            p.stop_level.to_string(),
            c.ticker.clone(),
            c.start_date.format(DATE_FORMAT).to_string(),
            c.end_date.format(DATE_FORMAT).to_string(),
            c.holding_days.to_string(),
            c.buy_count.to_string(),
            c.start_seed.to_string(),
            c.end_seed.to_string(),
            c.total_invested.to_string(),
            c.proceeds.to_string(),
            c.cycle_return.to_string(),
            c.exit_type.to_string(),
        ])
        .map_err(csv_error)?;
    }
    wtr.flush()?;
    Ok(())
}

fn summary_record(scenario: &str, r: &SummaryRow) -> Vec<String> {
    let p = &r.params;
    let status = if r.open_position {
        "ok (position open at end)"
    } else {
        "ok"
    };
    vec![
        scenario.to_string(),
        r.param_index.to_string(),
        p.ev_entry_quantile.to_string(),
        r.ev_cutoff.to_string(),
        p.profit_target.to_string(),
        p.max_holding_days.to_string(),
        p.stop_level.to_string(),
        r.total_return.to_string(),
        r.seed_multiple.to_string(),
        r.max_drawdown.to_string(),
        r.success_rate.to_string(),
        r.cycle_count.to_string(),
        r.profit_exits.to_string(),
        r.stop_exits.to_string(),
        r.liquidation_exits.to_string(),
        r.idle_days.to_string(),
        r.skipped_days.to_string(),
        r.avg_holding_days.to_string(),
        r.actual_max_holding_days.to_string(),
        r.max_loss_rate.to_string(),
        r.final_equity.to_string(),
        status.to_string(),
    ]
}

fn rejected_record(scenario: &str, r: &Rejection) -> Vec<String> {
    let p = &r.params;
    let mut record = vec![String::new(); SUMMARY_HEADER.len()];
    record[0] = scenario.to_string();
    record[1] = r.param_index.to_string();
    record[2] = p.ev_entry_quantile.to_string();
    record[4] = p.profit_target.to_string();
    record[5] = p.max_holding_days.to_string();
    record[6] = p.stop_level.to_string();
    record[SUMMARY_HEADER.len() - 1] = format!("invalid: {}", r.reason);
    record
}
