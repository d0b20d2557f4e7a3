//! Port traits separating the engine from data, config and result I/O.

pub mod config_port;
pub mod data_port;
pub mod report_port;
