//! Core domain types and simulation logic.

pub mod price_row;
pub mod panel;
pub mod params;
pub mod grid;
pub mod execution;
pub mod position;
pub mod metrics;
pub mod backtest;
pub mod config_validation;
pub mod error;
