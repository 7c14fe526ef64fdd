//! Failure analysis report for retried items

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::aggregator::ReportAggregator;
use crate::executor::RetryPolicy;
use crate::models::Outcome;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryMetadata {
    pub timestamp: String,
    pub max_retries: u32,
    /// Base delay in seconds
    pub retry_delay: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryStatistics {
    /// Items that ran at least once
    pub total_tests: usize,
    /// Items that needed more than one attempt
    pub retried_tests: usize,
    /// Retried items that eventually passed
    pub retry_successes: usize,
    /// Retried items that still failed
    pub final_failures: usize,
    /// Percentage of items retried
    pub retry_rate: f64,
    /// Percentage of retried items that eventually passed
    pub success_rate_after_retry: f64,
    /// Attempt count of every retried item
    pub attempts_per_test: BTreeMap<String, usize>,
}

/// Final failure of an item on the retry path
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub nodeid: String,
    pub error: String,
    pub timestamp: String,
    pub markers: Vec<String>,
}

/// One failed attempt or the passing attempt of a retried item
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryHistoryEntry {
    pub nodeid: String,
    /// 1-based attempt number
    pub attempt: u32,
    /// `failed` or `success`
    pub status: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teardown_error: Option<String>,
}

/// Teardown failure of any executed item, retried or not
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TeardownFailure {
    pub nodeid: String,
    /// 1-based attempt number
    pub attempt: u32,
    /// Final status of the item
    pub status: Outcome,
    pub error: String,
    pub timestamp: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryReport {
    pub metadata: RetryMetadata,
    pub statistics: RetryStatistics,
    pub failures: Vec<FailureRecord>,
    pub retry_history: Vec<RetryHistoryEntry>,
    #[serde(default)]
    pub teardown_failures: Vec<TeardownFailure>,
}

fn rfc3339(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

impl RetryReport {
    pub fn build(aggregator: &ReportAggregator, policy: &RetryPolicy) -> Self {
        let mut statistics = RetryStatistics {
            total_tests: 0,
            retried_tests: 0,
            retry_successes: 0,
            final_failures: 0,
            retry_rate: 0.0,
            success_rate_after_retry: 0.0,
            attempts_per_test: BTreeMap::new(),
        };
        let mut failures = Vec::new();
        let mut retry_history = Vec::new();
        let mut teardown_failures = Vec::new();

        for report in aggregator.reports() {
            if report.attempts.is_empty() {
                continue;
            }
            statistics.total_tests += 1;
            for attempt in report.teardown_failures() {
                teardown_failures.push(TeardownFailure {
                    nodeid: report.id().to_string(),
                    attempt: attempt.attempt + 1,
                    status: report.status,
                    error: attempt.teardown_error.clone().unwrap_or_default(),
                    timestamp: rfc3339(&attempt.started_at),
                });
            }
            if !report.retry_enabled {
                continue;
            }

            for attempt in &report.attempts {
                let status = match attempt.outcome {
                    Outcome::Passed => "success",
                    Outcome::Failed | Outcome::Error => "failed",
                    Outcome::Skipped => continue,
                };
                // A first-try pass is not part of the retry history
                if status == "success" && attempt.attempt == 0 {
                    continue;
                }
                retry_history.push(RetryHistoryEntry {
                    nodeid: report.id().to_string(),
                    attempt: attempt.attempt + 1,
                    status: status.to_string(),
                    timestamp: rfc3339(&attempt.started_at),
                    error: attempt.message.clone(),
                    teardown_error: attempt.teardown_error.clone(),
                });
            }

            let retried = report.attempts.len() > 1 || report.status.is_failure();
            if !retried {
                continue;
            }
            statistics.retried_tests += 1;
            statistics
                .attempts_per_test
                .insert(report.id().to_string(), report.attempts.len());

            if report.status == Outcome::Passed {
                statistics.retry_successes += 1;
            } else if report.status.is_failure() {
                statistics.final_failures += 1;
                let last = report.last_attempt();
                failures.push(FailureRecord {
                    nodeid: report.id().to_string(),
                    error: last
                        .and_then(|a| a.message.clone())
                        .unwrap_or_else(|| "Unknown error".to_string()),
                    timestamp: last
                        .map(|a| rfc3339(&a.started_at))
                        .unwrap_or_else(|| rfc3339(&Utc::now())),
                    markers: report
                        .item
                        .marker_names()
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                });
            }
        }

        statistics.retry_rate = percent(statistics.retried_tests, statistics.total_tests);
        statistics.success_rate_after_retry =
            percent(statistics.retry_successes, statistics.retried_tests);

        Self {
            metadata: RetryMetadata {
                timestamp: rfc3339(&Utc::now()),
                max_retries: policy.max_retries,
                retry_delay: policy.retry_delay.as_secs_f64(),
            },
            statistics,
            failures,
            retry_history,
            teardown_failures,
        }
    }

    /// Items that failed at least one attempt
    pub fn unstable_tests(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for entry in &self.retry_history {
            if entry.status == "failed" && !ids.contains(&entry.nodeid.as_str()) {
                ids.push(&entry.nodeid);
            }
        }
        ids
    }
}
