//! Execution protocol
//!
//! Runs one collected item through setup, call and teardown, repeating the
//! whole cycle when the item's retry plan allows it. Every attempt yields a
//! frozen [`ExecutionOutcome`]; the per-item result is an [`ItemReport`].

use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::body::{RunContext, TestBody};
use super::retry::{sleep_with_cancellation, RetryPlan, RetryPolicy};
use crate::collection::CollectedItem;
use crate::error::Result;
use crate::hooks::{
    FixtureRequest, HookRegistry, MakeReport, ReportContext, ResolveFixture, RuntestContext,
    RuntestSetup, RuntestTeardown,
};
use crate::models::{
    ExecutionOutcome, FailureKind, ItemReport, MarkerKind, Outcome, Phase, PhaseFailure,
    TestItem,
};

/// Lifecycle of one item
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    Running { attempt: u32 },
    Retry { next_attempt: u32 },
    Passed,
    Failed,
    Error,
    Skipped,
}

impl ItemState {
    /// State after attempt `attempt` finished with `outcome`
    pub fn after_attempt(attempt: u32, outcome: Outcome, can_retry: bool) -> Self {
        match outcome {
            Outcome::Passed => ItemState::Passed,
            Outcome::Skipped => ItemState::Skipped,
            Outcome::Failed | Outcome::Error if can_retry => ItemState::Retry {
                next_attempt: attempt + 1,
            },
            Outcome::Failed => ItemState::Failed,
            Outcome::Error => ItemState::Error,
        }
    }

    /// Terminal outcome, if this state is terminal
    pub fn terminal(&self) -> Option<Outcome> {
        match self {
            ItemState::Passed => Some(Outcome::Passed),
            ItemState::Failed => Some(Outcome::Failed),
            ItemState::Error => Some(Outcome::Error),
            ItemState::Skipped => Some(Outcome::Skipped),
            _ => None,
        }
    }

    fn from_outcome(outcome: Outcome) -> Self {
        Self::after_attempt(0, outcome, false)
    }
}

/// Result of the body phases of one attempt
struct PhaseReport {
    outcome: Outcome,
    phase: Phase,
    message: Option<String>,
    teardown_error: Option<String>,
}

impl PhaseReport {
    fn passed() -> Self {
        Self {
            outcome: Outcome::Passed,
            phase: Phase::Call,
            message: None,
            teardown_error: None,
        }
    }

    /// Setup did not succeed; call and teardown do not run
    fn setup_failed(failure: PhaseFailure) -> Self {
        let outcome = match failure.kind {
            FailureKind::Skip => Outcome::Skipped,
            FailureKind::Assertion | FailureKind::Resource => Outcome::Error,
        };
        Self {
            outcome,
            phase: Phase::Setup,
            message: Some(render(&failure)),
            teardown_error: None,
        }
    }
}

fn render(failure: &PhaseFailure) -> String {
    match failure.kind {
        FailureKind::Skip => failure.message.clone(),
        _ => failure.to_string(),
    }
}

/// Runs items one at a time
pub struct ExecutionProtocol<'r> {
    registry: &'r HookRegistry,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl<'r> ExecutionProtocol<'r> {
    pub fn new(registry: &'r HookRegistry, policy: RetryPolicy) -> Self {
        Self {
            registry,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Token whose cancellation interrupts retry waits
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Retry plan for a collected item, honouring markers added during
    /// collection
    pub fn plan_for(&self, entry: &CollectedItem) -> RetryPlan {
        let marked = entry.has_marker(MarkerKind::Retry.name())
            || entry.has_marker(MarkerKind::Flaky.name());
        self.policy
            .plan_with(marked, entry.closest_marker(MarkerKind::Retry.name()))
    }

    /// Run one item to a terminal state.
    ///
    /// Excluded items go straight from pending to skipped. Hook failures
    /// abort the item and propagate; body failures are outcomes.
    pub async fn run(
        &self,
        entry: &CollectedItem,
        body: Option<Arc<dyn TestBody>>,
    ) -> Result<ItemReport> {
        let item = entry.item().clone();
        if let Some(reason) = entry.skip_reason() {
            debug!("{} skipped before execution: {}", item.id(), reason);
            return Ok(ItemReport::skipped(item, reason));
        }

        let plan = self.plan_for(entry);
        let max_attempts = plan.max_attempts();
        let mut attempts: Vec<ExecutionOutcome> = Vec::new();
        let mut state = ItemState::Pending;
        debug!("{} -> {:?}", item.id(), state);
        let mut attempt = 0;

        loop {
            state = ItemState::Running { attempt };
            debug!("{} -> {:?}", item.id(), state);
            info!(
                "Running {} (attempt {}/{})",
                item.id(),
                attempt + 1,
                max_attempts
            );

            let outcome = self.run_attempt(&item, body.as_deref(), attempt)?;
            let status = outcome.outcome;
            attempts.push(outcome);

            state = ItemState::after_attempt(attempt, status, attempt + 1 < max_attempts);
            match state {
                ItemState::Retry { next_attempt } => {
                    let delay = plan.delay_before(next_attempt);
                    warn!(
                        "{} {} on attempt {}, retrying in {:.2}s",
                        item.id(),
                        status.as_str(),
                        attempt,
                        delay.as_secs_f64()
                    );
                    if !sleep_with_cancellation(delay, &self.cancel).await {
                        info!("Retry of {} cancelled during wait", item.id());
                        state = ItemState::from_outcome(status);
                        break;
                    }
                    attempt = next_attempt;
                }
                _ => break,
            }
        }

        let status = state.terminal().unwrap_or(Outcome::Error);
        let flaky_confirmed = status == Outcome::Passed && attempts.len() > 1;
        if flaky_confirmed {
            info!(
                "{} passed on attempt {} (flaky confirmed)",
                item.id(),
                attempts.len() - 1
            );
        } else if status.is_failure() && plan.enabled {
            error!(
                "{} finally {} after {} attempts",
                item.id(),
                status.as_str(),
                attempts.len()
            );
        }

        let skip_reason = match status {
            Outcome::Skipped => attempts.last().and_then(|a| a.message.clone()),
            _ => None,
        };

        Ok(ItemReport {
            item,
            status,
            attempts,
            flaky_confirmed,
            retry_enabled: plan.enabled,
            skip_reason,
        })
    }

    /// One full setup/call/teardown cycle, wrapped by the runtest hooks.
    ///
    /// Teardown hooks run whenever setup hooks ran, including when a setup
    /// hook fails; the first hook error is the one returned.
    pub fn run_attempt(
        &self,
        item: &Arc<TestItem>,
        body: Option<&dyn TestBody>,
        attempt: u32,
    ) -> Result<ExecutionOutcome> {
        let started_at = Utc::now();
        let start = Instant::now();

        let mut hook_ctx = RuntestContext {
            item: item.clone(),
            attempt,
            outcome: None,
        };
        if let Err(err) = self.registry.invoke::<RuntestSetup>(&mut hook_ctx) {
            if let Err(teardown) = self.registry.invoke::<RuntestTeardown>(&mut hook_ctx) {
                warn!(
                    "Teardown hooks for {} failed after setup hook error: {}",
                    item.id(),
                    teardown
                );
            }
            return Err(err);
        }

        let phases = match self.run_phases(item, body, attempt) {
            Ok(phases) => phases,
            Err(err) => {
                if let Err(teardown) = self.registry.invoke::<RuntestTeardown>(&mut hook_ctx) {
                    warn!(
                        "Teardown hooks for {} failed after hook error: {}",
                        item.id(),
                        teardown
                    );
                }
                return Err(err);
            }
        };

        hook_ctx.outcome = Some(phases.outcome);
        self.registry.invoke::<RuntestTeardown>(&mut hook_ctx)?;

        let mut report_ctx = ReportContext {
            item: item.clone(),
            attempt,
            outcome: phases.outcome,
            phase: phases.phase,
            extra: BTreeMap::new(),
        };
        self.registry.invoke::<MakeReport>(&mut report_ctx)?;

        let outcome = ExecutionOutcome {
            item_id: item.id().to_string(),
            attempt,
            outcome: phases.outcome,
            phase: phases.phase,
            message: phases.message,
            teardown_error: phases.teardown_error,
            duration_seconds: start.elapsed().as_secs_f64(),
            started_at,
            extra: report_ctx.extra,
        };
        info!("  {}", outcome);
        Ok(outcome)
    }

    fn run_phases(
        &self,
        item: &Arc<TestItem>,
        body: Option<&dyn TestBody>,
        attempt: u32,
    ) -> Result<PhaseReport> {
        let fixtures = match self.resolve_fixtures(item, attempt)? {
            Ok(fixtures) => fixtures,
            Err(failure) => return Ok(PhaseReport::setup_failed(failure)),
        };
        let Some(body) = body else {
            return Ok(PhaseReport::setup_failed(PhaseFailure::resource(
                "no test body registered",
            )));
        };

        let ctx = RunContext {
            item: item.clone(),
            attempt,
            fixtures,
        };

        if let Err(failure) = body.setup(&ctx) {
            return Ok(PhaseReport::setup_failed(failure));
        }

        let call = body.call(&ctx);
        // Setup succeeded, so teardown runs regardless of the call result
        let teardown = body.teardown(&ctx);

        let mut report = PhaseReport::passed();
        if let Err(failure) = call {
            report.message = Some(render(&failure));
            report.outcome = match failure.kind {
                FailureKind::Skip => Outcome::Skipped,
                FailureKind::Assertion | FailureKind::Resource => Outcome::Failed,
            };
        }
        match teardown {
            Err(failure) if failure.kind != FailureKind::Skip => {
                warn!("Teardown of {} failed: {}", item.id(), failure);
                report.teardown_error = Some(failure.to_string());
            }
            _ => {}
        }
        Ok(report)
    }

    /// Resolve every requested fixture; parameters of a parametrized item
    /// are served directly
    fn resolve_fixtures(
        &self,
        item: &Arc<TestItem>,
        attempt: u32,
    ) -> Result<std::result::Result<BTreeMap<String, Value>, PhaseFailure>> {
        let mut fixtures = BTreeMap::new();
        for name in item.fixtures() {
            if let Some(value) = item.params().get(name) {
                fixtures.insert(name.clone(), value.clone());
                continue;
            }
            let mut request = FixtureRequest {
                name: name.clone(),
                item: item.clone(),
                attempt,
            };
            match self.registry.invoke_first::<ResolveFixture>(&mut request)? {
                Some(value) => {
                    fixtures.insert(name.clone(), value);
                }
                None => {
                    return Ok(Err(PhaseFailure::resource(format!(
                        "fixture '{name}' not found"
                    ))))
                }
            }
        }
        Ok(Ok(fixtures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Script, Step};
    use crate::models::{Marker, PhaseResult};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(max_retries)
            .with_retry_delay(Duration::ZERO)
    }

    fn entry(item: TestItem) -> CollectedItem {
        CollectedItem::new(Arc::new(item))
    }

    fn body(script: Script) -> Option<Arc<dyn TestBody>> {
        Some(Arc::new(script))
    }

    #[derive(Default)]
    struct Tracked {
        setup_ok: bool,
        teardown_ran: AtomicBool,
        calls: AtomicU32,
    }

    impl TestBody for Tracked {
        fn setup(&self, _ctx: &RunContext) -> PhaseResult {
            if self.setup_ok {
                Ok(())
            } else {
                Err(PhaseFailure::resource("database unreachable"))
            }
        }

        fn call(&self, _ctx: &RunContext) -> PhaseResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(PhaseFailure::assertion("expected 2, got 3"))
        }

        fn teardown(&self, _ctx: &RunContext) -> PhaseResult {
            self.teardown_ran.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_retry_until_pass_is_flaky_confirmed() {
        let registry = HookRegistry::new();
        let protocol = ExecutionProtocol::new(&registry, policy(2));
        let item = entry(TestItem::builder("m::t").mark("retry").build());
        let script = Script::passing().with_call([Step::Fail, Step::Fail, Step::Pass]);

        let report = protocol.run(&item, body(script)).await.unwrap();
        assert_eq!(
            report.history(),
            vec![Outcome::Failed, Outcome::Failed, Outcome::Passed]
        );
        assert_eq!(report.status, Outcome::Passed);
        assert!(report.flaky_confirmed);
        assert!(report.retry_enabled);
        let numbers: Vec<u32> = report.attempts.iter().map(|a| a.attempt).collect();
        assert_eq!(numbers, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_unmarked_item_runs_once() {
        let registry = HookRegistry::new();
        let protocol = ExecutionProtocol::new(&registry, policy(5));
        let item = entry(TestItem::builder("m::t").build());
        let script = Script::passing().with_call([Step::Fail]);

        let report = protocol.run(&item, body(script)).await.unwrap();
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(report.status, Outcome::Failed);
        assert!(!report.flaky_confirmed);
    }

    #[tokio::test]
    async fn test_exhausted_retries_keep_history() {
        let registry = HookRegistry::new();
        let protocol = ExecutionProtocol::new(&registry, policy(2));
        let item = entry(TestItem::builder("m::t").mark("flaky").build());
        let script = Script::passing().with_call([Step::Fail]);

        let report = protocol.run(&item, body(script)).await.unwrap();
        assert_eq!(report.attempts.len(), 3);
        assert_eq!(report.status, Outcome::Failed);
        assert!(!report.flaky_confirmed);
    }

    #[tokio::test]
    async fn test_teardown_runs_when_call_fails() {
        let registry = HookRegistry::new();
        let protocol = ExecutionProtocol::new(&registry, policy(0));
        let tracked = Arc::new(Tracked {
            setup_ok: true,
            ..Default::default()
        });
        let item = entry(TestItem::builder("m::t").build());

        let report = protocol
            .run(&item, Some(tracked.clone() as Arc<dyn TestBody>))
            .await
            .unwrap();
        assert!(tracked.teardown_ran.load(Ordering::SeqCst));
        assert_eq!(report.status, Outcome::Failed);
        assert_eq!(report.attempts[0].phase, Phase::Call);
    }

    #[tokio::test]
    async fn test_setup_failure_is_error_without_call() {
        let registry = HookRegistry::new();
        let protocol = ExecutionProtocol::new(&registry, policy(0));
        let tracked = Arc::new(Tracked::default());
        let item = entry(TestItem::builder("m::t").build());

        let report = protocol
            .run(&item, Some(tracked.clone() as Arc<dyn TestBody>))
            .await
            .unwrap();
        assert_eq!(report.status, Outcome::Error);
        assert_eq!(report.attempts[0].phase, Phase::Setup);
        assert_eq!(tracked.calls.load(Ordering::SeqCst), 0);
        assert!(!tracked.teardown_ran.load(Ordering::SeqCst));
        assert!(report.attempts[0]
            .message
            .as_deref()
            .unwrap()
            .starts_with("ResourceError"));
    }

    #[tokio::test]
    async fn test_teardown_failure_does_not_overwrite_pass() {
        let registry = HookRegistry::new();
        let protocol = ExecutionProtocol::new(&registry, policy(0));
        let item = entry(TestItem::builder("m::t").build());
        let script = Script::passing().with_teardown([Step::Error]);

        let report = protocol.run(&item, body(script)).await.unwrap();
        assert_eq!(report.status, Outcome::Passed);
        assert!(report.attempts[0].teardown_error.is_some());
    }

    #[tokio::test]
    async fn test_call_skip_is_not_retried() {
        let registry = HookRegistry::new();
        let protocol = ExecutionProtocol::new(&registry, policy(3));
        let item = entry(TestItem::builder("m::t").mark("retry").build());
        let script = Script::passing().with_call([Step::Skip]);

        let report = protocol.run(&item, body(script)).await.unwrap();
        assert_eq!(report.status, Outcome::Skipped);
        assert_eq!(report.attempts.len(), 1);
        assert!(report.skip_reason.is_some());
    }

    #[tokio::test]
    async fn test_excluded_item_skips_directly() {
        let registry = HookRegistry::new();
        let protocol = ExecutionProtocol::new(&registry, policy(0));
        let mut item = entry(TestItem::builder("m::t").build());
        item.skip("not in prod").unwrap();

        let report = protocol.run(&item, None).await.unwrap();
        assert_eq!(report.status, Outcome::Skipped);
        assert!(report.attempts.is_empty());
        assert_eq!(report.skip_reason.as_deref(), Some("not in prod"));
    }

    #[tokio::test]
    async fn test_missing_body_and_fixture_are_errors() {
        let registry = HookRegistry::new();
        let protocol = ExecutionProtocol::new(&registry, policy(0));

        let report = protocol
            .run(&entry(TestItem::builder("m::nobody").build()), None)
            .await
            .unwrap();
        assert_eq!(report.status, Outcome::Error);

        let item = entry(TestItem::builder("m::t").fixture("db").build());
        let report = protocol
            .run(&item, body(Script::passing()))
            .await
            .unwrap();
        assert_eq!(report.status, Outcome::Error);
        assert!(report.attempts[0]
            .message
            .as_deref()
            .unwrap()
            .contains("'db'"));
    }

    #[tokio::test]
    async fn test_fixtures_resolved_from_hooks_and_params() {
        let mut registry = HookRegistry::new();
        registry
            .register::<ResolveFixture, _>("fixtures", 0, |req: &mut FixtureRequest| {
                Ok((req.name == "db").then(|| Value::from("sqlite://memory")))
            })
            .unwrap();
        let protocol = ExecutionProtocol::new(&registry, policy(0));
        let item = entry(
            TestItem::builder("m::t")
                .fixture("db")
                .fixture("size")
                .param("size", 3)
                .build(),
        );

        let seen = Arc::new(Mutex::new(BTreeMap::new()));
        let sink = seen.clone();
        let body = move |ctx: &RunContext| -> PhaseResult {
            *sink.lock().unwrap() = ctx.fixtures.clone();
            Ok(())
        };

        let report = protocol.run(&item, Some(Arc::new(body))).await.unwrap();
        assert_eq!(report.status, Outcome::Passed);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.get("db"), Some(&Value::from("sqlite://memory")));
        assert_eq!(seen.get("size"), Some(&Value::from(3)));
    }

    #[tokio::test]
    async fn test_setup_hook_failure_still_tears_down() {
        let torn_down = Arc::new(AtomicBool::new(false));
        let flag = torn_down.clone();

        let mut registry = HookRegistry::new();
        registry
            .register_observer::<RuntestSetup, _>("db", 0, |_ctx: &mut RuntestContext| {
                anyhow::bail!("connection refused")
            })
            .unwrap();
        registry
            .register_observer::<RuntestTeardown, _>("db", 0, move |_ctx: &mut RuntestContext| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let protocol = ExecutionProtocol::new(&registry, policy(0));
        let err = protocol
            .run(&entry(TestItem::builder("m::t").build()), body(Script::passing()))
            .await
            .unwrap_err();
        assert!(err.is_extension());
        assert!(torn_down.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_make_report_attaches_extra() {
        let mut registry = HookRegistry::new();
        registry
            .register_observer::<MakeReport, _>("tagger", 0, |ctx: &mut ReportContext| {
                ctx.extra
                    .insert("outcome_seen".to_string(), Value::from(ctx.outcome.as_str()));
                Ok(())
            })
            .unwrap();
        let protocol = ExecutionProtocol::new(&registry, policy(0));
        let report = protocol
            .run(&entry(TestItem::builder("m::t").build()), body(Script::passing()))
            .await
            .unwrap();
        assert_eq!(
            report.attempts[0].extra.get("outcome_seen"),
            Some(&Value::from("passed"))
        );
    }

    #[tokio::test]
    async fn test_cancel_during_retry_wait() {
        let registry = HookRegistry::new();
        let token = CancellationToken::new();
        token.cancel();
        let protocol = ExecutionProtocol::new(
            &registry,
            RetryPolicy::default()
                .with_max_retries(3)
                .with_retry_delay(Duration::from_secs(60)),
        )
        .with_cancellation(token);

        let item = entry(TestItem::builder("m::t").mark("retry").build());
        let script = Script::passing().with_call([Step::Error, Step::Pass]);
        let report = protocol.run(&item, body(script)).await.unwrap();
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(report.status, Outcome::Failed);
    }

    #[tokio::test]
    async fn test_added_marker_enables_retry() {
        let registry = HookRegistry::new();
        let protocol = ExecutionProtocol::new(&registry, policy(1));
        let mut item = entry(TestItem::builder("m::t").build());
        item.add_marker(Marker::named("flaky"));

        let script = Script::passing().with_call([Step::Fail, Step::Pass]);
        let report = protocol.run(&item, body(script)).await.unwrap();
        assert_eq!(report.attempts.len(), 2);
        assert!(report.flaky_confirmed);
    }

    #[test]
    fn test_state_transitions() {
        assert_eq!(
            ItemState::after_attempt(0, Outcome::Failed, true),
            ItemState::Retry { next_attempt: 1 }
        );
        assert_eq!(
            ItemState::after_attempt(2, Outcome::Error, false),
            ItemState::Error
        );
        assert_eq!(
            ItemState::after_attempt(1, Outcome::Passed, true).terminal(),
            Some(Outcome::Passed)
        );
        assert_eq!(ItemState::Pending.terminal(), None);
    }
}
