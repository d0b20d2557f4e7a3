//! Domain error types.

use chrono::NaiveDate;

/// Top-level error type for evsweep.
#[derive(Debug, thiserror::Error)]
pub enum EvSweepError {
    #[error("panel out of order at row {row}: {reason}")]
    DataOrder { row: usize, reason: String },

    #[error("invalid parameter tuple #{param_index}: {reason}")]
    InvalidParameter { param_index: usize, reason: String },

    /// Soft error: the held ticker has no row on this date.
    #[error("no row for held ticker {ticker} on {date}")]
    MissingRow { ticker: String, date: NaiveDate },

    #[error(
        "position for tuple #{param_index} in {ticker} is open with shares={shares} invested={invested} on {date}"
    )]
    DivisionDegeneracy {
        param_index: usize,
        ticker: String,
        date: NaiveDate,
        shares: f64,
        invested: f64,
    },

    #[error("panel contains no rows")]
    EmptyPanel,

    #[error("failed to read panel data: {reason}")]
    DataRead { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&EvSweepError> for std::process::ExitCode {
    fn from(err: &EvSweepError) -> Self {
        let code: u8 = match err {
            EvSweepError::Io(_) => 1,
            EvSweepError::ConfigParse { .. }
            | EvSweepError::ConfigMissing { .. }
            | EvSweepError::ConfigInvalid { .. } => 2,
            EvSweepError::DataOrder { .. }
            | EvSweepError::DataRead { .. }
            | EvSweepError::EmptyPanel
            | EvSweepError::MissingRow { .. } => 3,
            EvSweepError::InvalidParameter { .. } => 4,
            EvSweepError::DivisionDegeneracy { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
