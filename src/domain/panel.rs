//! Panel store: time-ordered price+EV rows with day-batched iteration.

use crate::domain::error::EvSweepError;
use crate::domain::price_row::PriceRow;
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone)]
struct DaySlot {
    date: NaiveDate,
    start: usize,
    end: usize,
    by_ticker: HashMap<String, usize>,
}

/// Immutable snapshot of the whole price panel. Shared read-only by every
/// parameter tuple, including across rayon workers.
#[derive(Debug, Clone)]
pub struct Panel {
    rows: Vec<PriceRow>,
    days: Vec<DaySlot>,
}

/// All rows sharing one date.
#[derive(Debug, Clone, Copy)]
pub struct DayBatch<'a> {
    index: usize,
    date: NaiveDate,
    rows: &'a [PriceRow],
    by_ticker: &'a HashMap<String, usize>,
}

impl Panel {
    /// Build a panel from rows already sorted ascending by date.
    ///
    /// Fails with [`EvSweepError::DataOrder`] when a date goes backwards or a
    /// ticker appears twice on the same date.
    pub fn new(rows: Vec<PriceRow>) -> Result<Self, EvSweepError> {
        let mut days: Vec<DaySlot> = Vec::new();

        for (i, row) in rows.iter().enumerate() {
            match days.last_mut() {
                Some(day) if day.date == row.date => {
                    if day.by_ticker.insert(row.ticker.clone(), i - day.start).is_some() {
                        return Err(EvSweepError::DataOrder {
                            row: i,
                            reason: format!("duplicate row for {} on {}", row.ticker, row.date),
                        });
                    }
                    day.end = i + 1;
                }
                Some(day) if day.date > row.date => {
                    return Err(EvSweepError::DataOrder {
                        row: i,
                        reason: format!("date {} follows {}", row.date, day.date),
                    });
                }
                _ => {
                    let mut by_ticker = HashMap::new();
                    by_ticker.insert(row.ticker.clone(), 0);
                    days.push(DaySlot {
                        date: row.date,
                        start: i,
                        end: i + 1,
                        by_ticker,
                    });
                }
            }
        }

        Ok(Panel { rows, days })
    }

    /// Sort by (date, ticker) first, then build. Stable, so equal keys keep input order
    /// and still trip the duplicate check.
    pub fn from_unsorted(mut rows: Vec<PriceRow>) -> Result<Self, EvSweepError> {
        rows.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.ticker.cmp(&b.ticker)));
        Self::new(rows)
    }

    pub fn days(&self) -> impl Iterator<Item = DayBatch<'_>> + '_ {
        self.days.iter().enumerate().map(move |(index, slot)| DayBatch {
            index,
            date: slot.date,
            rows: &self.rows[slot.start..slot.end],
            by_ticker: &slot.by_ticker,
        })
    }

    pub fn day_count(&self) -> usize {
        self.days.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[PriceRow] {
        &self.rows
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.days.first().map(|d| d.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.days.last().map(|d| d.date)
    }

    pub fn tickers(&self) -> Vec<String> {
        let unique: BTreeSet<&str> = self.rows.iter().map(|r| r.ticker.as_str()).collect();
        unique.into_iter().map(str::to_string).collect()
    }

    /// Quantile of every finite EV score in the panel (linear interpolation,
    /// the pandas default). `None` when no row has a finite score.
    pub fn ev_quantile(&self, q: f64) -> Option<f64> {
        let mut scores: Vec<f64> = self
            .rows
            .iter()
            .map(|r| r.ev_score)
            .filter(|v| v.is_finite())
            .collect();
        scores.sort_by(f64::total_cmp);
        quantile_linear(&scores, q)
    }

    /// Per-day quantiles using only the scores dated on or before each day.
    ///
    /// Returns one vector per requested quantile, each with `day_count()`
    /// entries. Days before the first finite score get `f64::INFINITY`, which
    /// no row can reach. Scores are ranked once and counted in a Fenwick tree,
    /// so the pass is O(rows log rows).
    pub fn expanding_ev_quantiles(&self, quantiles: &[f64]) -> Vec<Vec<f64>> {
        let mut order: Vec<usize> = (0..self.rows.len())
            .filter(|&i| self.rows[i].ev_score.is_finite())
            .collect();
        order.sort_by(|&a, &b| self.rows[a].ev_score.total_cmp(&self.rows[b].ev_score));

        let mut rank: Vec<Option<usize>> = vec![None; self.rows.len()];
        for (r, &i) in order.iter().enumerate() {
            rank[i] = Some(r);
        }
        let sorted: Vec<f64> = order.iter().map(|&i| self.rows[i].ev_score).collect();

        let mut seen = RankCounter::new(sorted.len());
        let mut out: Vec<Vec<f64>> = quantiles
            .iter()
            .map(|_| Vec::with_capacity(self.days.len()))
            .collect();

        for slot in &self.days {
            for r in rank[slot.start..slot.end].iter().flatten() {
                seen.insert(*r);
            }
            for (series, &q) in out.iter_mut().zip(quantiles) {
                series.push(seen.quantile(&sorted, q).unwrap_or(f64::INFINITY));
            }
        }

        out
    }
}

/// Fenwick tree counting which ranks of a pre-sorted score list have been seen.
struct RankCounter {
    tree: Vec<usize>,
    count: usize,
}

impl RankCounter {
    fn new(len: usize) -> Self {
        RankCounter {
            tree: vec![0; len + 1],
            count: 0,
        }
    }

    fn insert(&mut self, rank: usize) {
        let mut i = rank + 1;
        while i < self.tree.len() {
            self.tree[i] += 1;
            i += i & i.wrapping_neg();
        }
        self.count += 1;
    }

    /// Rank of the `k`-th smallest seen score, zero-based. Requires `k < count`.
    fn kth(&self, k: usize) -> usize {
        let n = self.tree.len() - 1;
        let mut pos = 0;
        let mut remaining = k + 1;
        let mut step = 1usize << (usize::BITS - 1 - n.leading_zeros());
        while step > 0 {
            let next = pos + step;
            if next <= n && self.tree[next] < remaining {
                pos = next;
                remaining -= self.tree[next];
            }
            step >>= 1;
        }
        pos
    }

    /// Same interpolation as [`quantile_linear`] over the seen scores.
    fn quantile(&self, sorted: &[f64], q: f64) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let q = q.clamp(0.0, 1.0);
        let pos = q * (self.count - 1) as f64;
        let lo = pos.floor() as usize;
        let hi = pos.ceil() as usize;
        let frac = pos - lo as f64;
        let low = sorted[self.kth(lo)];
        let high = sorted[self.kth(hi)];
        Some(low + (high - low) * frac)
    }
}

impl<'a> DayBatch<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn rows(&self) -> &'a [PriceRow] {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, ticker: &str) -> Option<&'a PriceRow> {
        self.by_ticker.get(ticker).map(|&i| &self.rows[i])
    }

    /// Highest-EV row that qualifies at `cutoff`. Ties keep the first row in
    /// the batch's order.
    pub fn best_candidate(&self, cutoff: f64) -> Option<&'a PriceRow> {
        let mut best: Option<&'a PriceRow> = None;
        for row in self.rows.iter().filter(|r| r.qualifies(cutoff)) {
            match best {
                Some(b) if row.ev_score <= b.ev_score => {}
                _ => best = Some(row),
            }
        }
        best
    }
}

/// Linear-interpolated quantile of an ascending slice.
pub fn quantile_linear(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}
