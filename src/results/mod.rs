//! Results aggregation and export
//!
//! Folds item reports into the session report, builds the retry failure
//! analysis, and writes both to disk.

mod aggregator;
mod export;
mod retry_report;

pub use aggregator::{ItemSummary, MarkerStats, NodeInfo, ReportAggregator, SessionReport, TimingStats};
pub use export::{generate_run_id, write_csv, write_json};
pub use retry_report::{
    FailureRecord, RetryHistoryEntry, RetryMetadata, RetryReport, RetryStatistics, TeardownFailure,
};
