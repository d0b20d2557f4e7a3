#![allow(dead_code)]

use chrono::NaiveDate;
use evsweep::domain::error::EvSweepError;
use evsweep::domain::grid::{CutoffMode, ParameterGrid, ResolvedParams};
use evsweep::domain::panel::Panel;
use evsweep::domain::params::{RuleSet, StrategyParams};
pub use evsweep::domain::price_row::PriceRow;
use evsweep::ports::data_port::PanelSource;

/// In-memory panel source.
pub struct MockPanelSource {
    pub rows: Vec<PriceRow>,
    pub error: Option<String>,
}

impl MockPanelSource {
    pub fn new(rows: Vec<PriceRow>) -> Self {
        Self { rows, error: None }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            rows: Vec::new(),
            error: Some(reason.to_string()),
        }
    }
}

impl PanelSource for MockPanelSource {
    fn load_rows(&self) -> Result<Vec<PriceRow>, EvSweepError> {
        match &self.error {
            Some(reason) => Err(EvSweepError::DataRead {
                reason: reason.clone(),
            }),
            None => Ok(self.rows.clone()),
        }
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn day(n: usize) -> NaiveDate {
    date(2024, 1, 1) + chrono::Duration::days(n as i64)
}

pub fn make_row(ticker: &str, n: usize, high: f64, low: f64, close: f64, ev: f64) -> PriceRow {
    PriceRow {
        date: day(n),
        ticker: ticker.to_string(),
        open: close,
        high,
        low,
        close,
        ev_score: ev,
    }
}

/// Row whose high, low and close are all `price`.
pub fn flat_row(ticker: &str, n: usize, price: f64, ev: f64) -> PriceRow {
    make_row(ticker, n, price, price, price, ev)
}

/// `days` consecutive flat rows for one ticker.
pub fn flat_series(ticker: &str, days: usize, price: f64, ev: f64) -> Vec<PriceRow> {
    (0..days).map(|n| flat_row(ticker, n, price, ev)).collect()
}

pub fn make_params(q: f64, pt: f64, days: i64, stop: f64) -> StrategyParams {
    StrategyParams {
        ev_entry_quantile: q,
        profit_target: pt,
        max_holding_days: days,
        stop_level: stop,
        rules: RuleSet::default(),
    }
}

pub fn single_tuple_grid(panel: &Panel, params: StrategyParams) -> ParameterGrid {
    ParameterGrid::from_params(vec![params], panel, CutoffMode::FullSample)
}

pub fn resolved(panel: &Panel, params: StrategyParams) -> ResolvedParams {
    single_tuple_grid(panel, params).tuples.remove(0)
}

/// Two tickers with oscillating prices and scores; enough to exercise every
/// transition over a few hundred days.
pub fn synthetic_panel(days: usize) -> Panel {
    let mut rows = Vec::with_capacity(days * 3);
    for n in 0..days {
        let t = n as f64;
        let a = 100.0 + 12.0 * (t / 9.0).sin() + 0.02 * t;
        let b = 40.0 + 6.0 * (t / 4.0).cos() - 0.01 * t;
        let c = 250.0 * (1.0 + 0.15 * (t / 23.0).sin());
        rows.push(make_row("AAA", n, a * 1.03, a * 0.96, a, 0.5 + 0.45 * (t / 5.0).sin()));
        rows.push(make_row("BBB", n, b * 1.05, b * 0.94, b, 0.5 + 0.45 * (t / 3.0).cos()));
        if n % 7 != 3 {
            rows.push(make_row("CCC", n, c * 1.02, c * 0.97, c, 0.5 + 0.45 * (t / 11.0).sin()));
        }
    }
    Panel::from_unsorted(rows).unwrap()
}
