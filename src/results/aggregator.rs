//! Report aggregation
//!
//! Folds per-item reports into counts, marker breakdowns and timing
//! statistics, and exports the session report document.

use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::hooks::SessionInfo;
use crate::models::{ItemReport, Outcome, SummaryCounts};

/// Final outcomes of the items carrying one marker
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MarkerStats {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(default)]
    pub error: usize,
}

impl MarkerStats {
    fn add(&mut self, outcome: Outcome) {
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
}

/// Timing over every completed attempt
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TimingStats {
    pub attempts: usize,
    pub mean_seconds: f64,
    pub max_seconds: f64,
}

/// Coordinates of the node that produced a report
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NodeInfo {
    pub index: u32,
    pub total: u32,
}

/// Final result of one item
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ItemSummary {
    pub id: String,
    pub module: String,
    pub status: Outcome,
    pub attempts: usize,
    pub duration_seconds: f64,
    #[serde(default)]
    pub flaky_confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Most recent teardown failure on any attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teardown_error: Option<String>,
    #[serde(default)]
    pub markers: Vec<String>,
}

impl From<&ItemReport> for ItemSummary {
    fn from(report: &ItemReport) -> Self {
        Self {
            id: report.id().to_string(),
            module: report.item.module().to_string(),
            status: report.status,
            attempts: report.attempts.len(),
            duration_seconds: report.duration_seconds(),
            flaky_confirmed: report.flaky_confirmed,
            skip_reason: report.skip_reason.clone(),
            message: report.last_attempt().and_then(|a| a.message.clone()),
            teardown_error: report.teardown_error().map(str::to_string),
            markers: report
                .item
                .marker_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Exported session report
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SessionReport {
    pub summary: SummaryCounts,
    pub marker_stats: BTreeMap<String, MarkerStats>,
    pub flaky_tests: Vec<String>,
    pub duration_seconds: f64,
    /// RFC 3339 generation time
    pub timestamp: String,
    pub session_id: String,
    pub environment: String,
    pub node: NodeInfo,
    pub timing: TimingStats,
    /// Items assigned to other nodes
    #[serde(default)]
    pub deselected: usize,
    /// Items never started because the session was interrupted
    #[serde(default)]
    pub not_run: Vec<String>,
    #[serde(default)]
    pub items: Vec<ItemSummary>,
}

/// Accumulates item reports for one session
#[derive(Debug, Default)]
pub struct ReportAggregator {
    reports: Vec<ItemReport>,
    counts: SummaryCounts,
    marker_stats: BTreeMap<String, MarkerStats>,
    attempts: usize,
    attempt_seconds: f64,
    max_attempt_seconds: f64,
    deselected: usize,
    not_run: Vec<String>,
}

impl ReportAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in the final report of one item
    pub fn record(&mut self, report: ItemReport) {
        self.counts.add(report.status);
        for name in report.item.marker_names() {
            self.marker_stats
                .entry(name.to_string())
                .or_default()
                .add(report.status);
        }
        for attempt in &report.attempts {
            self.attempts += 1;
            self.attempt_seconds += attempt.duration_seconds;
            self.max_attempt_seconds = self.max_attempt_seconds.max(attempt.duration_seconds);
        }
        self.reports.push(report);
    }

    /// Count items filtered out by sharding
    pub fn record_deselected(&mut self, count: usize) {
        self.deselected += count;
    }

    /// Note an item that was never started
    pub fn record_not_run(&mut self, id: impl Into<String>) {
        self.not_run.push(id.into());
    }

    pub fn counts(&self) -> SummaryCounts {
        self.counts
    }

    pub fn marker_stats(&self) -> &BTreeMap<String, MarkerStats> {
        &self.marker_stats
    }

    pub fn reports(&self) -> &[ItemReport] {
        &self.reports
    }

    pub fn deselected(&self) -> usize {
        self.deselected
    }

    pub fn not_run(&self) -> &[String] {
        &self.not_run
    }

    pub fn timing(&self) -> TimingStats {
        let mean_seconds = if self.attempts == 0 {
            0.0
        } else {
            self.attempt_seconds / self.attempts as f64
        };
        TimingStats {
            attempts: self.attempts,
            mean_seconds,
            max_seconds: self.max_attempt_seconds,
        }
    }

    /// Identifiers of items that passed only after a retry
    pub fn flaky_tests(&self) -> Vec<String> {
        self.reports
            .iter()
            .filter(|r| r.flaky_confirmed)
            .map(|r| r.id().to_string())
            .collect()
    }

    /// Items that ended failed or error
    pub fn failures(&self) -> impl Iterator<Item = &ItemReport> {
        self.reports.iter().filter(|r| r.status.is_failure())
    }

    /// Items with a teardown failure on any attempt
    pub fn teardown_failures(&self) -> impl Iterator<Item = &ItemReport> {
        self.reports
            .iter()
            .filter(|r| r.teardown_error().is_some())
    }

    /// Items that went through the retry path
    pub fn retried(&self) -> impl Iterator<Item = &ItemReport> {
        self.reports.iter().filter(|r| r.retry_enabled)
    }

    /// The `n` slowest executed items, slowest first
    pub fn slowest(&self, n: usize) -> Vec<&ItemReport> {
        let mut executed: Vec<&ItemReport> = self
            .reports
            .iter()
            .filter(|r| !r.attempts.is_empty())
            .collect();
        executed.sort_by(|a, b| b.duration_seconds().total_cmp(&a.duration_seconds()));
        executed.truncate(n);
        executed
    }

    /// Total duration per module
    pub fn module_durations(&self) -> BTreeMap<String, f64> {
        let mut durations = BTreeMap::new();
        for report in &self.reports {
            *durations
                .entry(report.item.module().to_string())
                .or_insert(0.0) += report.duration_seconds();
        }
        durations
    }

    /// Total duration per marker
    pub fn marker_durations(&self) -> BTreeMap<String, f64> {
        let mut durations = BTreeMap::new();
        for report in &self.reports {
            for name in report.item.marker_names() {
                *durations.entry(name.to_string()).or_insert(0.0) += report.duration_seconds();
            }
        }
        durations
    }

    /// Build the report document
    pub fn export(&self, session: &SessionInfo, duration_seconds: f64) -> SessionReport {
        SessionReport {
            summary: self.counts,
            marker_stats: self.marker_stats.clone(),
            flaky_tests: self.flaky_tests(),
            duration_seconds,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            session_id: session.session_id.clone(),
            environment: session.environment.clone(),
            node: NodeInfo {
                index: session.node_index,
                total: session.total_nodes,
            },
            timing: self.timing(),
            deselected: self.deselected,
            not_run: self.not_run.clone(),
            items: self.reports.iter().map(ItemSummary::from).collect(),
        }
    }
}
