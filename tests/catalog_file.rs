//! Catalog files driven through a full session with report export

use std::io::Write;
use std::sync::Arc;

use tempfile::{NamedTempFile, TempDir};
use testweave::catalog::CatalogFile;
use testweave::config::SessionConfig;
use testweave::hooks::Plugin;
use testweave::models::ExitStatus;
use testweave::plugins::builtin_plugins;
use testweave::SessionOrchestrator;

const SUITE: &str = r#"
session_markers: [suite]
modules:
  tests/integration:
    - integration
parameters:
  size:
    values: [1, 2, 3]
    ids: [small, medium, large]
items:
  - id: tests/unit::test_pricing
    markers: [unit]
    fixtures: [size]
  - id: tests/integration::test_order_flow
    markers:
      - name: retry
        kwargs: { max_retries: 2 }
    script:
      call: [fail, pass]
  - id: tests/integration::test_db
    markers: [require_db]
  - id: tests/e2e::test_checkout
    markers: [e2e, slow]
  - id: tests/contract::test_api_shape
    markers:
      - name: env
        args: [staging, prod]
"#;

fn write_suite() -> NamedTempFile {
    let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
    file.write_all(SUITE.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn suite_runs_and_exports_reports() {
    let suite = write_suite();
    let out = TempDir::new().unwrap();
    let catalog_file = CatalogFile::load(suite.path()).unwrap();

    let mut config = SessionConfig::default()
        .with_environment("prod")
        .with_retry_delay_secs(0.0);
    config.export_results = true;
    config.results_path = out.path().join("results/test_results.json");
    config.generate_retry_report = true;
    config.retry_report_path = out.path().join("failure_analysis.json");
    config.csv_path = Some(out.path().join("attempts.csv"));

    let params = catalog_file.param_table();
    let builtins = builtin_plugins();
    let orchestrator = SessionOrchestrator::new(config.clone(), Arc::new(catalog_file.script_book()))
        .with_plugin(&params)
        .unwrap()
        .with_plugins(builtins.iter().map(|p| &**p as &dyn Plugin))
        .unwrap();
    let mut state = orchestrator.start().unwrap();
    let catalog = orchestrator
        .build_catalog(catalog_file.builder(), &mut state)
        .unwrap();
    assert_eq!(catalog.len(), 7);

    let outcome = orchestrator.run_with(state, &catalog).await.unwrap();
    assert_eq!(outcome.exit_status, ExitStatus::Ok);

    let counts = outcome.counts();
    // three size variants, the retried flow, the contract test in prod
    assert_eq!(counts.passed, 5);
    // slow e2e in prod, require_db without DB_AVAILABLE
    assert_eq!(counts.skipped, 2);
    assert_eq!(outcome.report.flaky_tests, vec!["tests/integration::test_order_flow"]);

    // Unit items are ordered before integration and e2e items
    let first = outcome.aggregator.reports()[0].id().to_string();
    assert!(first.starts_with("tests/unit::test_pricing["));

    let written = outcome.write_reports(&config).unwrap();
    assert_eq!(written.len(), 3);

    let results: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&config.results_path).unwrap()).unwrap();
    assert_eq!(results["summary"]["passed"], 5);
    assert_eq!(results["environment"], "prod");
    assert_eq!(results["marker_stats"]["suite"]["skipped"], 2);

    let retry: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&config.retry_report_path).unwrap()).unwrap();
    assert_eq!(retry["statistics"]["retry_successes"], 1);
    assert_eq!(retry["retry_history"][0]["nodeid"], "tests/integration::test_order_flow");

    let mut reader = csv::Reader::from_path(config.csv_path.as_ref().unwrap()).unwrap();
    // 3 variants + 2 flow attempts + contract + 2 skipped rows
    assert_eq!(reader.records().count(), 8);
}

#[tokio::test]
async fn dev_environment_gates_differently() {
    let suite = write_suite();
    let catalog_file = CatalogFile::load(suite.path()).unwrap();
    let config = SessionConfig::default()
        .with_retry_delay_secs(0.0)
        .with_var("DB_AVAILABLE", "1");

    let params = catalog_file.param_table();
    let builtins = builtin_plugins();
    let orchestrator = SessionOrchestrator::new(config, Arc::new(catalog_file.script_book()))
        .with_plugin(&params)
        .unwrap()
        .with_plugins(builtins.iter().map(|p| &**p as &dyn Plugin))
        .unwrap();
    let outcome = orchestrator
        .run_builder(catalog_file.builder())
        .await
        .unwrap();

    // Only the contract test is restricted to staging and prod
    assert_eq!(outcome.counts().skipped, 1);
    let skipped = outcome
        .aggregator
        .reports()
        .iter()
        .find(|r| r.skip_reason.is_some())
        .unwrap();
    assert_eq!(skipped.id(), "tests/contract::test_api_shape");
    assert!(skipped.skip_reason.as_deref().unwrap().contains("staging, prod"));
}
