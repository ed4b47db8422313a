//! Audit harness around `dirtree-core`: YAML configuration, candidate names,
//! ballot files, reports and structured logging.

pub mod ballots;
pub mod config;
pub mod logging;
pub mod report;
pub mod runner;
