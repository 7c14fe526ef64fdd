//! Data models for test orchestration
//!
//! Test items, markers, and the outcome types produced by execution.

mod item;
mod marker;
mod outcome;

pub use item::{TestItem, TestItemBuilder};
pub use marker::{Marker, MarkerKind, MarkerScope, ScopedMarker};
pub use outcome::{
    ExecutionOutcome, ExitStatus, FailureKind, ItemReport, Outcome, Phase, PhaseFailure,
    PhaseResult, SummaryCounts,
};
