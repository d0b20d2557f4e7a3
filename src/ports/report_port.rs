//! Result export port trait.

use crate::domain::error::EvSweepError;
use crate::domain::grid::Rejection;
use crate::domain::metrics::SummaryRow;
use crate::domain::position::CycleRecord;

/// Port for writing sweep results.
pub trait ResultSink {
    /// One row per simulated tuple followed by one row per rejected tuple.
    fn write_summary(
        &mut self,
        scenario: &str,
        rows: &[SummaryRow],
        rejected: &[Rejection],
    ) -> Result<(), EvSweepError>;

    fn write_ledger(&mut self, scenario: &str, cycles: &[CycleRecord]) -> Result<(), EvSweepError>;
}
