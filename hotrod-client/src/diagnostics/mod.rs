//! Diagnostics and monitoring utilities.

mod statistics;

pub use statistics::{ClientStatistics, StatisticsSnapshot};
