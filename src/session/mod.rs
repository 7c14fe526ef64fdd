//! Session orchestration
//!
//! Sequences one run: session start, collection, shard filtering,
//! sequential execution, aggregation, summary and session finish.

mod state;

pub use state::SessionState;

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogBuilder, TestCatalog};
use crate::collection::{CollectedItem, CollectionPipeline};
use crate::config::SessionConfig;
use crate::error::Result;
use crate::executor::{BodyProvider, ExecutionProtocol, RetryPolicy};
use crate::hooks::{
    HookRegistry, Plugin, SessionFinish, SessionFinishContext, SessionStart, SessionStartContext,
    TerminalSummary, TerminalSummaryContext,
};
use crate::models::{ExitStatus, SummaryCounts};
use crate::results::{write_csv, write_json, ReportAggregator, RetryReport, SessionReport};

/// Collected plan split by the shard filter
#[derive(Debug, Default)]
pub struct SessionPlan {
    /// Items this node reports on, in execution order
    pub selected: Vec<CollectedItem>,
    /// Items assigned to other nodes
    pub deselected: Vec<CollectedItem>,
}

/// Everything a finished session produced
#[derive(Debug)]
pub struct SessionOutcome {
    pub report: SessionReport,
    pub aggregator: ReportAggregator,
    pub exit_status: ExitStatus,
    /// Lines contributed by `TerminalSummary` callbacks
    pub summary_lines: Vec<String>,
    retry_policy: RetryPolicy,
}

impl SessionOutcome {
    pub fn counts(&self) -> SummaryCounts {
        self.report.summary
    }

    pub fn retry_report(&self) -> RetryReport {
        RetryReport::build(&self.aggregator, &self.retry_policy)
    }

    /// Write every report the configuration enables; returns written paths
    pub fn write_reports(&self, config: &SessionConfig) -> anyhow::Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        if config.export_results {
            write_json(&config.results_path, &self.report)
                .context("Failed to export session results")?;
            written.push(config.results_path.clone());
        }
        if config.generate_retry_report {
            write_json(&config.retry_report_path, &self.retry_report())
                .context("Failed to export retry report")?;
            written.push(config.retry_report_path.clone());
        }
        if let Some(csv_path) = &config.csv_path {
            write_csv(csv_path, &self.aggregator).context("Failed to export attempts")?;
            written.push(csv_path.clone());
        }
        Ok(written)
    }
}

/// Drives one session against a hook registry and a body provider
pub struct SessionOrchestrator {
    config: SessionConfig,
    registry: HookRegistry,
    bodies: Arc<dyn BodyProvider>,
    pipeline: CollectionPipeline,
    cancel: CancellationToken,
}

impl SessionOrchestrator {
    pub fn new(config: SessionConfig, bodies: Arc<dyn BodyProvider>) -> Self {
        Self {
            config,
            registry: HookRegistry::new(),
            bodies,
            pipeline: CollectionPipeline::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Install a plugin; load order fixes equal-priority tie-breaks
    pub fn with_plugin(mut self, plugin: &dyn Plugin) -> Result<Self> {
        self.registry.load_plugin(plugin)?;
        Ok(self)
    }

    pub fn with_plugins<'p, I>(mut self, plugins: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'p dyn Plugin>,
    {
        self.registry.load_plugins(plugins)?;
        Ok(self)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    /// Token that stops the session between items
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Build a catalog inside a started session, letting plugins
    /// parametrize its items with the session's extension data at hand
    pub fn build_catalog(
        &self,
        builder: CatalogBuilder,
        state: &mut SessionState,
    ) -> Result<TestCatalog> {
        let catalog = builder.build_in(&self.registry, Some(&state.info), &mut state.extensions)?;
        state.clock.lap("build");
        Ok(catalog)
    }

    /// Validate the configuration and fire `SessionStart`
    pub fn start(&self) -> Result<SessionState> {
        let mut state = SessionState::new(&self.config)?;
        info!(
            "Starting session {} (env={}, node {}/{})",
            state.session_id(),
            state.info.environment,
            state.info.node_index,
            state.info.total_nodes
        );

        let mut ctx = SessionStartContext {
            session: state.info.clone(),
            extensions: std::mem::take(&mut state.extensions),
        };
        let result = self.registry.invoke::<SessionStart>(&mut ctx);
        state.extensions = ctx.extensions;
        result?;
        Ok(state)
    }

    /// Collect and shard-filter `catalog` without executing anything
    pub fn plan(&self, catalog: &TestCatalog, state: &mut SessionState) -> Result<SessionPlan> {
        let collected =
            self.pipeline
                .collect(catalog, &self.registry, &state.info, &mut state.extensions)?;

        let plan = match &state.shard {
            None => SessionPlan {
                selected: collected,
                deselected: Vec::new(),
            },
            Some(selector) => {
                let (selected, deselected): (Vec<_>, Vec<_>) = collected
                    .into_iter()
                    .partition(|entry| selector.assign(entry.item()));
                info!(
                    "Shard filter: node {}/{} keeps {} items, {} deselected",
                    selector.node_index(),
                    selector.total_nodes(),
                    selected.len(),
                    deselected.len()
                );
                SessionPlan {
                    selected,
                    deselected,
                }
            }
        };
        state.clock.lap("collect");
        Ok(plan)
    }

    /// Start a session, build `builder` through the registry, then run it
    pub async fn run_builder(&self, builder: CatalogBuilder) -> Result<SessionOutcome> {
        let mut state = self.start()?;
        let catalog = self.build_catalog(builder, &mut state)?;
        self.run_with(state, &catalog).await
    }

    /// Start a session and run every selected item of an already built
    /// `catalog`
    pub async fn run(&self, catalog: &TestCatalog) -> Result<SessionOutcome> {
        let state = self.start()?;
        self.run_with(state, catalog).await
    }

    /// Run every selected item of `catalog` in a started session and report.
    ///
    /// A stop signal is honoured between items: the running item always
    /// completes its teardown, the rest are reported as not run.
    pub async fn run_with(
        &self,
        mut state: SessionState,
        catalog: &TestCatalog,
    ) -> Result<SessionOutcome> {
        let plan = self.plan(catalog, &mut state)?;

        let mut aggregator = ReportAggregator::new();
        aggregator.record_deselected(plan.deselected.len());

        let protocol = ExecutionProtocol::new(&self.registry, state.retry_policy.clone())
            .with_cancellation(self.cancel.clone());

        for entry in &plan.selected {
            if self.cancel.is_cancelled() {
                aggregator.record_not_run(entry.id());
                continue;
            }
            let body = self.bodies.body_for(entry.item());
            let report = protocol.run(entry, body).await?;
            info!("  {}", report);
            aggregator.record(report);
        }
        state.clock.lap("execute");

        let counts = aggregator.counts();
        let exit_status = if self.cancel.is_cancelled() {
            warn!(
                "Session {} interrupted, {} items not run",
                state.session_id(),
                aggregator.not_run().len()
            );
            ExitStatus::Interrupted
        } else if counts.has_failures() {
            ExitStatus::TestsFailed
        } else {
            ExitStatus::Ok
        };

        let duration_seconds = state.clock.elapsed_secs();
        let report = aggregator.export(&state.info, duration_seconds);

        let mut summary = TerminalSummaryContext {
            summary: counts,
            exit_status,
            lines: Vec::new(),
        };
        self.registry.invoke::<TerminalSummary>(&mut summary)?;

        let mut finish = SessionFinishContext {
            session: state.info.clone(),
            summary: counts,
            exit_status,
            duration_seconds,
            extensions: std::mem::take(&mut state.extensions),
        };
        let result = self.registry.invoke::<SessionFinish>(&mut finish);
        state.extensions = finish.extensions;
        result?;
        state.clock.lap("report");

        debug!("Session phases: {}", state.clock.format());
        info!(
            "Session {} finished in {:.2}s - {} passed, {} failed, {} skipped, {} error ({})",
            state.session_id(),
            duration_seconds,
            counts.passed,
            counts.failed,
            counts.skipped,
            counts.error,
            exit_status
        );

        Ok(SessionOutcome {
            report,
            aggregator,
            exit_status,
            summary_lines: summary.lines,
            retry_policy: state.retry_policy,
        })
    }
}
