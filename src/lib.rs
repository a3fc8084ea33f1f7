//! Experiment data evaluation: turns the metrics of stream processing
//! scaling experiments into per-run and per-group summaries, exported
//! as delimited files and rendered as plots.
//!
//! Pipeline: load (files, metrics database, mock) -> unified table
//! per run -> run summary per parallelism level -> group summary
//! across runs or configurations.

pub mod config;
pub mod config_file;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod export;
pub mod get_terminal_width;
pub mod load;
pub mod metrics;
pub mod plot;
pub mod process;
pub mod stats;
pub mod table;
pub mod utillib;
