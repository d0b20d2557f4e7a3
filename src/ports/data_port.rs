//! Panel data access port trait.

use crate::domain::error::EvSweepError;
use crate::domain::price_row::PriceRow;

/// Source of EV-scored price rows.
pub trait PanelSource {
    /// All rows, in whatever order the source stores them.
    fn load_rows(&self) -> Result<Vec<PriceRow>, EvSweepError>;
}
