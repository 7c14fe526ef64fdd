//! Output formatters for session results
//!
//! Provides table, JSON, and brief summary output formats.

use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;

use crate::collection::CollectedItem;
use crate::error::OrchestratorError;
use crate::models::{ItemReport, Outcome, TestItem};
use crate::results::{ReportAggregator, SessionReport};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Summary,
}

impl FromStr for OutputFormat {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Ok(OutputFormat::JsonPretty),
            "summary" => Ok(OutputFormat::Summary),
            _ => Err(OrchestratorError::InvalidConfig(format!(
                "unknown output format: {s}"
            ))),
        }
    }
}

impl OutputFormat {
    fn is_json(&self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::JsonPretty)
    }
}

/// Plan entry as printed by `list`
#[derive(Serialize)]
struct PlanEntry<'a> {
    id: &'a str,
    included: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    skip_reason: Option<&'a str>,
    markers: Vec<&'a str>,
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    fn to_json<T: Serialize + ?Sized>(&self, value: &T) -> String {
        if self.format == OutputFormat::JsonPretty {
            serde_json::to_string_pretty(value).unwrap_or_default()
        } else {
            serde_json::to_string(value).unwrap_or_default()
        }
    }

    fn status(&self, outcome: Outcome) -> String {
        let plain = format!("{} {}", outcome.symbol(), outcome);
        if !self.colorize {
            return plain;
        }
        let color = match outcome {
            Outcome::Passed => "32",
            Outcome::Failed | Outcome::Error => "31",
            Outcome::Skipped => "33",
        };
        format!("\x1b[{color}m{plain}\x1b[0m")
    }

    /// Format the final result of one item
    pub fn format_item(&self, report: &ItemReport) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut line = format!(
                    "{:60} {} [{:>8.3}s]",
                    report.id(),
                    self.status(report.status),
                    report.duration_seconds()
                );
                if report.attempts.len() > 1 {
                    line.push_str(&format!(" attempts={}", report.attempts.len()));
                }
                if report.flaky_confirmed {
                    line.push_str(" (flaky)");
                }
                if let Some(reason) = &report.skip_reason {
                    line.push_str(&format!(" - {reason}"));
                }
                if let Some(err) = report.teardown_error() {
                    line.push_str(&format!(" (teardown: {err})"));
                }
                line
            }
            OutputFormat::Json | OutputFormat::JsonPretty => {
                self.to_json(&crate::results::ItemSummary::from(report))
            }
            OutputFormat::Summary => report.to_string(),
        }
    }

    /// Format the end-of-session summary
    pub fn format_session(
        &self,
        report: &SessionReport,
        aggregator: &ReportAggregator,
        extra_lines: &[String],
    ) -> String {
        match self.format {
            OutputFormat::Table => self.format_session_table(report, aggregator, extra_lines),
            OutputFormat::Json | OutputFormat::JsonPretty => self.to_json(report),
            OutputFormat::Summary => {
                let s = &report.summary;
                format!(
                    "{} passed, {} failed, {} skipped, {} error ({:.1}% pass rate) in {:.2}s",
                    s.passed,
                    s.failed,
                    s.skipped,
                    s.error,
                    s.pass_rate(),
                    report.duration_seconds
                )
            }
        }
    }

    fn format_session_table(
        &self,
        report: &SessionReport,
        aggregator: &ReportAggregator,
        extra_lines: &[String],
    ) -> String {
        let mut output = String::new();
        let s = &report.summary;

        output.push_str("\n╔══════════════════════════════════════════════════════════════╗\n");
        output.push_str(&format!(
            "║  Session {:20} env={:10} node {}/{:<4}      ║\n",
            report.session_id, report.environment, report.node.index, report.node.total
        ));
        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");
        output.push_str(&format!(
            "║  Total: {:3} | Pass: {:3} | Fail: {:3} | Skip: {:3} | Error: {:3} ║\n",
            s.total(),
            s.passed,
            s.failed,
            s.skipped,
            s.error
        ));
        output.push_str(&format!(
            "║  Pass Rate: {:5.1}% | Duration: {:8.2}s | Attempts: {:5}   ║\n",
            s.pass_rate(),
            report.duration_seconds,
            report.timing.attempts
        ));
        output.push_str("╚══════════════════════════════════════════════════════════════╝\n");

        if report.deselected > 0 {
            output.push_str(&format!(
                "\n{} items deselected (assigned to other nodes)\n",
                report.deselected
            ));
        }
        if !report.not_run.is_empty() {
            output.push_str(&format!(
                "\n{} items not run (interrupted)\n",
                report.not_run.len()
            ));
        }

        let marker_durations = aggregator.marker_durations();
        if !report.marker_stats.is_empty() {
            output.push_str("\nBy marker:\n");
            for (name, stats) in &report.marker_stats {
                output.push_str(&format!(
                    "  {:20} {:3} passed {:3} failed {:3} skipped {:3} error {:8.2}s\n",
                    name,
                    stats.passed,
                    stats.failed,
                    stats.skipped,
                    stats.error,
                    marker_durations.get(name).copied().unwrap_or(0.0)
                ));
            }
        }

        let module_durations = aggregator.module_durations();
        if !module_durations.is_empty() {
            output.push_str("\nBy module:\n");
            for (module, secs) in &module_durations {
                output.push_str(&format!("  {module:50} {secs:8.2}s\n"));
            }
        }

        let slowest = aggregator.slowest(5);
        if !slowest.is_empty() {
            output.push_str("\nSlowest items:\n");
            for item in slowest {
                output.push_str(&format!(
                    "  {:8.3}s  {}\n",
                    item.duration_seconds(),
                    item.id()
                ));
            }
        }

        if !report.flaky_tests.is_empty() {
            output.push_str("\nFlaky (passed on retry):\n");
            for id in &report.flaky_tests {
                output.push_str(&format!("  - {id}\n"));
            }
        }

        let failures: Vec<&ItemReport> = aggregator.failures().collect();
        if !failures.is_empty() {
            output.push_str("\nFailures:\n");
            for failure in failures {
                let last = failure.last_attempt();
                output.push_str(&format!(
                    "  {} {} (attempt {}): {}\n",
                    self.status(failure.status),
                    failure.id(),
                    last.map(|a| a.attempt).unwrap_or(0),
                    last.and_then(|a| a.message.as_deref())
                        .unwrap_or("no details")
                ));
            }
        }

        let leaks: Vec<&ItemReport> = aggregator.teardown_failures().collect();
        if !leaks.is_empty() {
            output.push_str("\nTeardown failures:\n");
            for report in leaks {
                for attempt in report.teardown_failures() {
                    output.push_str(&format!(
                        "  {} {} (attempt {}): {}\n",
                        self.status(report.status),
                        report.id(),
                        attempt.attempt,
                        attempt.teardown_error.as_deref().unwrap_or("no details")
                    ));
                }
            }
        }

        if !extra_lines.is_empty() {
            output.push('\n');
            for line in extra_lines {
                output.push_str(line);
                output.push('\n');
            }
        }

        output
    }

    /// Format the collected plan without executing it
    pub fn format_plan(&self, plan: &[CollectedItem]) -> String {
        if self.format.is_json() {
            let entries: Vec<PlanEntry<'_>> = plan
                .iter()
                .map(|entry| PlanEntry {
                    id: entry.id(),
                    included: entry.included(),
                    skip_reason: entry.skip_reason(),
                    markers: entry.item().marker_names(),
                })
                .collect();
            return self.to_json(&entries);
        }

        let mut output = String::new();
        for (pos, entry) in plan.iter().enumerate() {
            let markers = entry.item().marker_names().join(",");
            match entry.skip_reason() {
                None => output.push_str(&format!("{:4}. {:60} [{}]\n", pos + 1, entry.id(), markers)),
                Some(reason) => output.push_str(&format!(
                    "{:4}. {:60} [{}] SKIP: {}\n",
                    pos + 1,
                    entry.id(),
                    markers,
                    reason
                )),
            }
        }
        let included = plan.iter().filter(|e| e.included()).count();
        output.push_str(&format!(
            "\n{} items collected, {} included, {} skipped\n",
            plan.len(),
            included,
            plan.len() - included
        ));
        output
    }

    /// Format a per-node assignment
    pub fn format_partition(&self, nodes: &[Vec<Arc<TestItem>>]) -> String {
        if self.format.is_json() {
            let ids: Vec<Vec<&str>> = nodes
                .iter()
                .map(|node| node.iter().map(|item| item.id()).collect())
                .collect();
            return self.to_json(&ids);
        }

        let mut output = String::new();
        for (index, node) in nodes.iter().enumerate() {
            output.push_str(&format!("Node {} ({} items):\n", index, node.len()));
            if self.format == OutputFormat::Summary {
                continue;
            }
            for item in node {
                output.push_str(&format!("  {}\n", item.id()));
            }
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format() {
        assert_eq!("table".parse::<OutputFormat>().ok(), Some(OutputFormat::Table));
        assert_eq!(
            "JSON-PRETTY".parse::<OutputFormat>().ok(),
            Some(OutputFormat::JsonPretty)
        );
        assert!("xml".parse::<OutputFormat>().unwrap_err().is_configuration());
    }

    #[test]
    fn test_format_plan() {
        let mut skipped = CollectedItem::new(Arc::new(TestItem::builder("m::slow").mark("slow").build()));
        skipped.skip("slow tests are skipped in prod").unwrap();
        let plan = vec![
            CollectedItem::new(Arc::new(TestItem::builder("m::fast").mark("unit").build())),
            skipped,
        ];
        let formatter = ResultFormatter::new(OutputFormat::Table).no_color();
        let text = formatter.format_plan(&plan);
        assert!(text.contains("SKIP: slow tests are skipped in prod"));
        assert!(text.contains("2 items collected, 1 included, 1 skipped"));

        let json = ResultFormatter::new(OutputFormat::Json).format_plan(&plan);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[1]["included"], false);
    }

    #[test]
    fn test_format_item_no_color() {
        let report = ItemReport::skipped(Arc::new(TestItem::builder("m::t").build()), "gated");
        let line = ResultFormatter::new(OutputFormat::Table)
            .no_color()
            .format_item(&report);
        assert!(line.contains("○ SKIPPED"));
        assert!(line.ends_with("- gated"));
    }

    #[test]
    fn test_session_lists_teardown_failures() {
        use crate::hooks::SessionInfo;
        use crate::models::{ExecutionOutcome, Phase};

        let item = Arc::new(TestItem::builder("m::leaky").mark("unit").build());
        let report = ItemReport {
            item,
            status: Outcome::Passed,
            attempts: vec![ExecutionOutcome {
                item_id: "m::leaky".to_string(),
                attempt: 0,
                outcome: Outcome::Passed,
                phase: Phase::Call,
                message: None,
                teardown_error: Some("ResourceError: db handle not released".to_string()),
                duration_seconds: 0.2,
                started_at: chrono::Utc::now(),
                extra: Default::default(),
            }],
            flaky_confirmed: false,
            retry_enabled: false,
            skip_reason: None,
        };
        let mut agg = ReportAggregator::new();
        agg.record(report);
        let session = SessionInfo {
            session_id: "s".to_string(),
            environment: "dev".to_string(),
            distributed: false,
            node_index: 0,
            total_nodes: 1,
            shard_method: crate::shard::ShardMethod::Hash,
            vars: Default::default(),
        };
        let exported = agg.export(&session, 0.2);

        let formatter = ResultFormatter::new(OutputFormat::Table).no_color();
        let text = formatter.format_session(&exported, &agg, &[]);
        assert!(text.contains("Teardown failures:"));
        assert!(text.contains("m::leaky (attempt 0): ResourceError: db handle not released"));
        assert!(formatter
            .format_item(&agg.reports()[0])
            .ends_with("(teardown: ResourceError: db handle not released)"));
    }
}
