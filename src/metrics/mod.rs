//! Raw time series from the metrics database and their conversion
//! into the per-run unified table.

pub mod catalog;
pub mod processor;
pub mod sample;
