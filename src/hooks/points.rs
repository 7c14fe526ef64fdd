//! Built-in hook points and their contexts

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::extensions::Extensions;
use super::spec::{HookPolicy, HookSpec};
use crate::collection::CollectedItem;
use crate::models::{ExitStatus, Outcome, Phase, SummaryCounts, TestItem};
use crate::shard::ShardMethod;

/// Session coordinates visible to hooks
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: String,
    pub environment: String,
    pub distributed: bool,
    pub node_index: u32,
    pub total_nodes: u32,
    pub shard_method: ShardMethod,
    pub vars: BTreeMap<String, String>,
}

/// Fired once before collection
pub struct SessionStart;

pub struct SessionStartContext {
    pub session: SessionInfo,
    pub extensions: Extensions,
}

impl HookSpec for SessionStart {
    const NAME: &'static str = "session_start";
    const POLICY: HookPolicy = HookPolicy::CollectAll;
    type Context = SessionStartContext;
    type Answer = ();
}

/// Parametrization requests issued while the catalog is built; each
/// callback may request several arguments at once.
///
/// A session builds its catalog after `SessionStart`, so callbacks see the
/// session and whatever plugins seeded into the extension map. A catalog
/// built outside a session has no session info and empty extensions.
pub struct GenerateTests;

pub struct GenerateTestsContext {
    pub item: Arc<TestItem>,
    pub session: Option<SessionInfo>,
    pub extensions: Extensions,
}

/// One parametrized argument: its values and the ids used in item names
#[derive(Clone, Debug, PartialEq)]
pub struct Parametrization {
    pub argname: String,
    pub values: Vec<Value>,
    pub ids: Vec<String>,
}

impl Parametrization {
    pub fn new(argname: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            argname: argname.into(),
            values,
            ids: Vec::new(),
        }
    }

    pub fn with_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Id of the value at `index`, derived from the value when no id was given
    pub fn id_at(&self, index: usize) -> String {
        match self.ids.get(index) {
            Some(id) => id.clone(),
            None => match &self.values[index] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        }
    }
}

impl HookSpec for GenerateTests {
    const NAME: &'static str = "generate_tests";
    const POLICY: HookPolicy = HookPolicy::CollectAll;
    type Context = GenerateTestsContext;
    type Answer = Vec<Parametrization>;
}

/// Filter, skip or reorder the collected items
pub struct ModifyItems;

pub struct ModifyItemsContext {
    pub session: SessionInfo,
    pub items: Vec<CollectedItem>,
    pub extensions: Extensions,
}

impl HookSpec for ModifyItems {
    const NAME: &'static str = "modify_items";
    const POLICY: HookPolicy = HookPolicy::CollectAll;
    type Context = ModifyItemsContext;
    type Answer = ();
}

/// Provide the value of a fixture requested by an item
pub struct ResolveFixture;

pub struct FixtureRequest {
    pub name: String,
    pub item: Arc<TestItem>,
    pub attempt: u32,
}

impl HookSpec for ResolveFixture {
    const NAME: &'static str = "resolve_fixture";
    const POLICY: HookPolicy = HookPolicy::FirstResult;
    type Context = FixtureRequest;
    type Answer = Value;
}

/// Context for plugin-side setup and teardown around one attempt
pub struct RuntestContext {
    pub item: Arc<TestItem>,
    pub attempt: u32,
    /// Outcome of the attempt, set for teardown once known
    pub outcome: Option<Outcome>,
}

/// Plugin-side setup before the body's setup phase
pub struct RuntestSetup;

impl HookSpec for RuntestSetup {
    const NAME: &'static str = "runtest_setup";
    const POLICY: HookPolicy = HookPolicy::CollectAll;
    type Context = RuntestContext;
    type Answer = ();
}

/// Plugin-side teardown; invoked whenever the setup hooks were invoked
pub struct RuntestTeardown;

impl HookSpec for RuntestTeardown {
    const NAME: &'static str = "runtest_teardown";
    const POLICY: HookPolicy = HookPolicy::CollectAll;
    type Context = RuntestContext;
    type Answer = ();
}

/// Attach data to an attempt before it is frozen
pub struct MakeReport;

pub struct ReportContext {
    pub item: Arc<TestItem>,
    pub attempt: u32,
    pub outcome: Outcome,
    pub phase: Phase,
    pub extra: BTreeMap<String, Value>,
}

impl HookSpec for MakeReport {
    const NAME: &'static str = "make_report";
    const POLICY: HookPolicy = HookPolicy::CollectAll;
    type Context = ReportContext;
    type Answer = ();
}

/// Contribute lines to the human-readable summary
pub struct TerminalSummary;

pub struct TerminalSummaryContext {
    pub summary: SummaryCounts,
    pub exit_status: ExitStatus,
    pub lines: Vec<String>,
}

impl HookSpec for TerminalSummary {
    const NAME: &'static str = "terminal_summary";
    const POLICY: HookPolicy = HookPolicy::CollectAll;
    type Context = TerminalSummaryContext;
    type Answer = ();
}

/// Fired once after every item has been reported
pub struct SessionFinish;

pub struct SessionFinishContext {
    pub session: SessionInfo,
    pub summary: SummaryCounts,
    pub exit_status: ExitStatus,
    pub duration_seconds: f64,
    pub extensions: Extensions,
}

impl HookSpec for SessionFinish {
    const NAME: &'static str = "session_finish";
    const POLICY: HookPolicy = HookPolicy::CollectAll;
    type Context = SessionFinishContext;
    type Answer = ();
}
