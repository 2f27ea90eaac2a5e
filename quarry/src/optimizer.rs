//! Cost and selectivity estimation.

mod histogram;
mod stats;

pub use histogram::{IntHistogram, StringHistogram};
pub use stats::{StatsRegistry, TableStats, IO_COST_PER_PAGE, NUM_HIST_BINS};
