//! End-to-end sessions against in-memory catalogs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use testweave::catalog::TestCatalog;
use testweave::config::SessionConfig;
use testweave::executor::{BodyTable, RunContext, Script, ScriptBook, Step, TestBody};
use testweave::models::{ExitStatus, Marker, Outcome, PhaseFailure, PhaseResult, TestItem};
use testweave::hooks::Plugin;
use testweave::plugins::{builtin_plugins, ParamSpec, ParamTable};
use testweave::SessionOrchestrator;

fn config() -> SessionConfig {
    SessionConfig::default().with_retry_delay_secs(0.0)
}

#[tokio::test]
async fn retry_marker_recovers_on_third_attempt() {
    let catalog = TestCatalog::from_items([TestItem::builder("api::test_eventual")
        .marker(Marker::named("retry").with_kwarg("max_retries", 2))
        .build()])
    .unwrap();

    let mut book = ScriptBook::new();
    book.insert(
        "api::test_eventual",
        Script::passing().with_call([Step::Fail, Step::Fail, Step::Pass]),
    );

    let outcome = SessionOrchestrator::new(config(), Arc::new(book))
        .run(&catalog)
        .await
        .unwrap();

    let report = &outcome.aggregator.reports()[0];
    assert_eq!(
        report.history(),
        vec![Outcome::Failed, Outcome::Failed, Outcome::Passed]
    );
    assert_eq!(report.status, Outcome::Passed);
    assert!(report.flaky_confirmed);
    assert_eq!(outcome.report.flaky_tests, vec!["api::test_eventual"]);
    assert_eq!(outcome.exit_status, ExitStatus::Ok);
}

#[tokio::test]
async fn unmarked_item_runs_once() {
    let catalog = TestCatalog::from_items([TestItem::builder("api::test_broken").build()]).unwrap();
    let mut book = ScriptBook::new();
    book.insert("api::test_broken", Script::passing().with_call([Step::Fail]));

    let outcome = SessionOrchestrator::new(config(), Arc::new(book))
        .run(&catalog)
        .await
        .unwrap();

    let report = &outcome.aggregator.reports()[0];
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.status, Outcome::Failed);
    assert_eq!(outcome.exit_status, ExitStatus::TestsFailed);
}

#[tokio::test]
async fn exhausted_retries_keep_history() {
    let catalog = TestCatalog::from_items([TestItem::builder("api::test_down").mark("flaky").build()])
        .unwrap();
    let mut book = ScriptBook::new();
    book.insert("api::test_down", Script::passing().with_call([Step::Fail]));

    let outcome = SessionOrchestrator::new(config().with_max_retries(2), Arc::new(book))
        .run(&catalog)
        .await
        .unwrap();

    let report = &outcome.aggregator.reports()[0];
    assert_eq!(report.attempts.len(), 3);
    assert_eq!(report.status, Outcome::Failed);
    assert!(!report.flaky_confirmed);

    let retry = outcome.retry_report();
    assert_eq!(retry.statistics.final_failures, 1);
    assert_eq!(retry.retry_history.len(), 3);
}

struct Tracked {
    teardowns: Arc<AtomicUsize>,
}

impl TestBody for Tracked {
    fn call(&self, _ctx: &RunContext) -> PhaseResult {
        Err(PhaseFailure::assertion("expected 200, got 500"))
    }

    fn teardown(&self, _ctx: &RunContext) -> PhaseResult {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn teardown_runs_after_failed_call() {
    let teardowns = Arc::new(AtomicUsize::new(0));
    let bodies = BodyTable::new().with(
        "api::test_status",
        Tracked {
            teardowns: teardowns.clone(),
        },
    );
    let catalog = TestCatalog::from_items([TestItem::builder("api::test_status").build()]).unwrap();

    let outcome = SessionOrchestrator::new(config(), Arc::new(bodies))
        .run(&catalog)
        .await
        .unwrap();

    assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    let report = &outcome.aggregator.reports()[0];
    assert_eq!(report.status, Outcome::Failed);
    assert!(report.attempts[0]
        .message
        .as_deref()
        .unwrap()
        .contains("expected 200"));
}

#[tokio::test]
async fn prod_gating_and_fixtures() {
    let catalog_items = [
        TestItem::builder("unit::test_fast").mark("unit").fixture("env").build(),
        TestItem::builder("e2e::test_checkout").mark("slow").build(),
    ];

    let env_checked = |expected: &'static str| {
        move |ctx: &RunContext| -> PhaseResult {
            match ctx.fixture("env").and_then(|v| v.as_str()) {
                Some(env) if env == expected => Ok(()),
                other => Err(PhaseFailure::assertion(format!("env fixture was {other:?}"))),
            }
        }
    };

    for (environment, skipped) in [("prod", 1), ("dev", 0)] {
        let catalog = TestCatalog::from_items(catalog_items.clone()).unwrap();
        let bodies = BodyTable::new()
            .with("unit::test_fast", env_checked(environment))
            .with_fallback(|_ctx: &RunContext| -> PhaseResult { Ok(()) });
        let plugins = builtin_plugins();
        let orchestrator = SessionOrchestrator::new(
            config().with_environment(environment),
            Arc::new(bodies),
        )
        .with_plugins(plugins.iter().map(|p| &**p as &dyn Plugin))
        .unwrap();

        let outcome = orchestrator.run(&catalog).await.unwrap();
        assert_eq!(outcome.counts().skipped, skipped, "env {environment}");
        assert_eq!(outcome.counts().failed, 0, "env {environment}");
        assert_eq!(outcome.exit_status, ExitStatus::Ok);
    }
}

#[tokio::test]
async fn parametrized_items_run_per_value() {
    let table = ParamTable::new().with(
        "size",
        ParamSpec::new(vec![1.into(), 2.into(), 3.into()]).with_ids(["small", "medium", "large"]),
    );
    let bodies = BodyTable::new().with("unit::test_size", |ctx: &RunContext| -> PhaseResult {
        let size = ctx.require("size")?.as_u64().unwrap_or(0);
        if size < 3 {
            Ok(())
        } else {
            Err(PhaseFailure::assertion(format!("size {size} too large")))
        }
    });

    let orchestrator = SessionOrchestrator::new(config(), Arc::new(bodies))
        .with_plugin(&table)
        .unwrap();
    let outcome = orchestrator
        .run_builder(
            TestCatalog::builder().item(TestItem::builder("unit::test_size").fixture("size").build()),
        )
        .await
        .unwrap();

    assert_eq!(outcome.counts().passed, 2);
    assert_eq!(outcome.counts().failed, 1);
    let failed: Vec<&str> = outcome.aggregator.failures().map(|r| r.id()).collect();
    assert_eq!(failed, vec!["unit::test_size[large]"]);
}

#[tokio::test]
async fn export_counts_match_outcomes() {
    let catalog = TestCatalog::from_items([
        TestItem::builder("m::a").mark("unit").build(),
        TestItem::builder("m::b").mark("unit").build(),
        TestItem::builder("m::c").mark("integration").build(),
        TestItem::builder("m::d").marker(Marker::named("skip").with_kwarg("reason", "wip")).build(),
    ])
    .unwrap();
    let mut book = ScriptBook::new();
    book.insert("m::b", Script::passing().with_call([Step::Fail]));
    book.insert("m::c", Script::passing().with_setup([Step::Error]));

    let outcome = SessionOrchestrator::new(config(), Arc::new(book))
        .run(&catalog)
        .await
        .unwrap();

    let json = serde_json::to_value(&outcome.report).unwrap();
    assert_eq!(json["summary"]["passed"], 1);
    assert_eq!(json["summary"]["failed"], 1);
    assert_eq!(json["summary"]["error"], 1);
    assert_eq!(json["summary"]["skipped"], 1);
    assert_eq!(json["marker_stats"]["unit"]["passed"], 1);
    assert_eq!(json["marker_stats"]["unit"]["failed"], 1);
    assert!(json["timestamp"].is_string());
    assert!(json["duration_seconds"].is_number());
    assert!(json["flaky_tests"].as_array().unwrap().is_empty());
}

struct Leaky;

impl TestBody for Leaky {
    fn call(&self, _ctx: &RunContext) -> PhaseResult {
        Ok(())
    }

    fn teardown(&self, _ctx: &RunContext) -> PhaseResult {
        Err(PhaseFailure::resource("db handle not released"))
    }
}

#[tokio::test]
async fn teardown_error_reaches_every_report() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = config();
    config.export_results = true;
    config.results_path = dir.path().join("results.json");
    config.generate_retry_report = true;
    config.retry_report_path = dir.path().join("retry.json");
    config.csv_path = Some(dir.path().join("attempts.csv"));

    let catalog = TestCatalog::from_items([TestItem::builder("db::test_query").build()]).unwrap();
    let bodies = BodyTable::new().with("db::test_query", Leaky);
    let outcome = SessionOrchestrator::new(config.clone(), Arc::new(bodies))
        .run(&catalog)
        .await
        .unwrap();

    // Teardown errors never change the call outcome
    assert_eq!(outcome.counts().passed, 1);
    assert_eq!(outcome.exit_status, ExitStatus::Ok);
    assert_eq!(outcome.write_reports(&config).unwrap().len(), 3);

    let expected = "ResourceError: db handle not released";
    let results: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&config.results_path).unwrap()).unwrap();
    assert_eq!(results["items"][0]["status"], "passed");
    assert_eq!(results["items"][0]["teardown_error"], expected);

    let retry: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&config.retry_report_path).unwrap()).unwrap();
    assert_eq!(retry["teardown_failures"][0]["nodeid"], "db::test_query");
    assert_eq!(retry["teardown_failures"][0]["error"], expected);

    let csv = std::fs::read_to_string(dir.path().join("attempts.csv")).unwrap();
    assert!(csv.lines().next().unwrap().ends_with(",teardown_error"));
    assert!(csv.contains(expected));
}

#[tokio::test]
async fn oversized_retry_delays_do_not_abort_the_process() {
    let catalog = TestCatalog::from_items([TestItem::builder("api::test_slow_recovery")
        .marker(Marker::named("retry").with_kwarg("delay", 1e30))
        .build()])
    .unwrap();
    let mut book = ScriptBook::new();
    book.insert(
        "api::test_slow_recovery",
        Script::passing().with_call([Step::Fail, Step::Pass]),
    );
    let book = Arc::new(book);

    let err = SessionOrchestrator::new(config().with_retry_delay_secs(1e20), book.clone())
        .run(&catalog)
        .await
        .err()
        .unwrap();
    assert!(err.is_configuration());
    assert_eq!(err.exit_status(), ExitStatus::ConfigurationError);

    // The marker delay cannot be represented, so the session delay applies
    let outcome = SessionOrchestrator::new(config(), book)
        .run(&catalog)
        .await
        .unwrap();
    let report = &outcome.aggregator.reports()[0];
    assert_eq!(report.history(), vec![Outcome::Failed, Outcome::Passed]);
    assert!(report.flaky_confirmed);
}
