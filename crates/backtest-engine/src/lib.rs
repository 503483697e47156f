pub mod models;
pub mod reconstructor;
pub mod report;
pub mod simulator;

#[cfg(test)]
mod tests;

pub use models::{BacktestReport, StrategyResult, Trade};
pub use reconstructor::reconstruct_trades;
pub use report::{build_report, latest_report, summarize_table, write_report};
pub use simulator::{simulate, DEFAULT_THRESHOLDS};
