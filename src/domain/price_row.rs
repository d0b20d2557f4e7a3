//! One instrument-day of price data with its pre-computed EV score.

use chrono::NaiveDate;

#[derive(Debug, Clone, PartialEq)]
pub struct PriceRow {
    pub date: NaiveDate,
    pub ticker: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub ev_score: f64,
}

impl PriceRow {
    /// True when the row may be selected for a new entry at `cutoff`.
    ///
    /// NaN scores never qualify, and a row without a usable close cannot be bought.
    pub fn qualifies(&self, cutoff: f64) -> bool {
        self.ev_score.is_finite()
            && self.ev_score >= cutoff
            && self.close.is_finite()
            && self.close > 0.0
    }
}
