//! Outcome models
//!
//! Defines per-phase failures, per-attempt outcomes and per-item reports.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::item::TestItem;

/// Terminal classification of one attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
    Error,
}

impl Outcome {
    pub fn symbol(&self) -> &'static str {
        match self {
            Outcome::Passed => "✓",
            Outcome::Failed => "✗",
            Outcome::Skipped => "○",
            Outcome::Error => "!",
        }
    }

    /// Failed or error
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed | Outcome::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Passed => "passed",
            Outcome::Failed => "failed",
            Outcome::Skipped => "skipped",
            Outcome::Error => "error",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Passed => write!(f, "PASSED"),
            Outcome::Failed => write!(f, "FAILED"),
            Outcome::Skipped => write!(f, "SKIPPED"),
            Outcome::Error => write!(f, "ERROR"),
        }
    }
}

/// Execution phase of a test item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Setup,
    Call,
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Setup => "setup",
            Phase::Call => "call",
            Phase::Teardown => "teardown",
        };
        f.write_str(name)
    }
}

/// Why a phase did not succeed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The call contract was violated
    Assertion,
    /// Acquiring or releasing a resource failed
    Resource,
    /// The body decided the item does not apply
    Skip,
}

/// Failure reported by a test body phase
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl PhaseFailure {
    pub fn assertion(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Assertion,
            message: message.into(),
        }
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Resource,
            message: message.into(),
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Skip,
            message: reason.into(),
        }
    }
}

impl fmt::Display for PhaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Assertion => write!(f, "AssertionFailure: {}", self.message),
            FailureKind::Resource => write!(f, "ResourceError: {}", self.message),
            FailureKind::Skip => write!(f, "Skipped: {}", self.message),
        }
    }
}

/// Result of running one phase of a test body
pub type PhaseResult = Result<(), PhaseFailure>;

/// Outcome of a single attempt; frozen once created
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub item_id: String,
    /// 0 for the first try, N for the Nth retry
    pub attempt: u32,
    pub outcome: Outcome,
    /// Phase that decided the outcome
    pub phase: Phase,
    pub message: Option<String>,
    /// Teardown failure, recorded next to the call outcome
    pub teardown_error: Option<String>,
    pub duration_seconds: f64,
    pub started_at: DateTime<Utc>,
    /// Data attached by `MakeReport` hooks
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (attempt {}) [{:.3}s]",
            self.outcome.symbol(),
            self.item_id,
            self.attempt,
            self.duration_seconds
        )?;
        if let Some(msg) = &self.message {
            write!(f, " - {msg}")?;
        }
        if let Some(err) = &self.teardown_error {
            write!(f, " (teardown: {err})")?;
        }
        Ok(())
    }
}

/// Final report for one test item
#[derive(Clone, Debug)]
pub struct ItemReport {
    pub item: Arc<TestItem>,
    pub status: Outcome,
    /// Full attempt history, in order
    pub attempts: Vec<ExecutionOutcome>,
    /// Passed on a retry after failing at least once
    pub flaky_confirmed: bool,
    /// Whether the retry path was taken for this item
    pub retry_enabled: bool,
    pub skip_reason: Option<String>,
}

impl ItemReport {
    /// Report for an item excluded before execution
    pub fn skipped(item: Arc<TestItem>, reason: impl Into<String>) -> Self {
        Self {
            item,
            status: Outcome::Skipped,
            attempts: Vec::new(),
            flaky_confirmed: false,
            retry_enabled: false,
            skip_reason: Some(reason.into()),
        }
    }

    pub fn id(&self) -> &str {
        self.item.id()
    }

    pub fn last_attempt(&self) -> Option<&ExecutionOutcome> {
        self.attempts.last()
    }

    /// Sum of attempt durations in seconds
    pub fn duration_seconds(&self) -> f64 {
        self.attempts.iter().map(|a| a.duration_seconds).sum()
    }

    /// Attempt history as a list of outcomes
    pub fn history(&self) -> Vec<Outcome> {
        self.attempts.iter().map(|a| a.outcome).collect()
    }

    /// Attempts whose teardown failed
    pub fn teardown_failures(&self) -> impl Iterator<Item = &ExecutionOutcome> {
        self.attempts.iter().filter(|a| a.teardown_error.is_some())
    }

    /// Most recent teardown failure on any attempt
    pub fn teardown_error(&self) -> Option<&str> {
        self.attempts
            .iter()
            .rev()
            .find_map(|a| a.teardown_error.as_deref())
    }
}

impl fmt::Display for ItemReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.status.symbol(), self.id(), self.status)?;
        if self.attempts.len() > 1 {
            write!(f, " after {} attempts", self.attempts.len())?;
        }
        if self.flaky_confirmed {
            write!(f, " (flaky)")?;
        }
        if let Some(reason) = &self.skip_reason {
            write!(f, " - {reason}")?;
        } else if let Some(msg) = self.last_attempt().and_then(|a| a.message.as_deref()) {
            write!(f, " - {msg}")?;
        }
        if let Some(err) = self.teardown_error() {
            write!(f, " (teardown: {err})")?;
        }
        Ok(())
    }
}

/// Outcome counts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SummaryCounts {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub error: usize,
}

impl SummaryCounts {
    pub fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Passed => self.passed += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Error => self.error += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped + self.error
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.error > 0
    }

    /// Pass rate over executed (non-skipped) items, in percent
    pub fn pass_rate(&self) -> f64 {
        let executed = self.passed + self.failed + self.error;
        if executed == 0 {
            0.0
        } else {
            (self.passed as f64 / executed as f64) * 100.0
        }
    }
}

/// Process exit status of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Ok,
    TestsFailed,
    Interrupted,
    ExtensionError,
    ConfigurationError,
}

impl ExitStatus {
    pub fn code(&self) -> u8 {
        match self {
            ExitStatus::Ok => 0,
            ExitStatus::TestsFailed => 1,
            ExitStatus::Interrupted => 2,
            ExitStatus::ExtensionError => 3,
            ExitStatus::ConfigurationError => 4,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitStatus::Ok)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExitStatus::Ok => "ok",
            ExitStatus::TestsFailed => "tests failed",
            ExitStatus::Interrupted => "interrupted",
            ExitStatus::ExtensionError => "extension error",
            ExitStatus::ConfigurationError => "configuration error",
        };
        write!(f, "{name} ({})", self.code())
    }
}
