//! Scripted bodies
//!
//! Describe phase behaviour per attempt as data, so catalog files can be
//! executed without compiled test code.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::body::{BodyProvider, RunContext, TestBody};
use crate::models::{PhaseFailure, PhaseResult, TestItem};

/// Behaviour of one phase in one attempt
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    #[default]
    Pass,
    /// Assertion failure
    Fail,
    /// Resource error
    Error,
    Skip,
}

/// Per-phase steps; attempt `k` uses entry `min(k, len - 1)`, an empty
/// list always passes
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setup: Vec<Step>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub call: Vec<Step>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teardown: Vec<Step>,
    /// Message attached to scripted failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Script {
    pub fn passing() -> Self {
        Self::default()
    }

    pub fn with_call<I: IntoIterator<Item = Step>>(mut self, steps: I) -> Self {
        self.call = steps.into_iter().collect();
        self
    }

    pub fn with_setup<I: IntoIterator<Item = Step>>(mut self, steps: I) -> Self {
        self.setup = steps.into_iter().collect();
        self
    }

    pub fn with_teardown<I: IntoIterator<Item = Step>>(mut self, steps: I) -> Self {
        self.teardown = steps.into_iter().collect();
        self
    }

    fn step(steps: &[Step], attempt: u32) -> Step {
        let pos = (attempt as usize).min(steps.len().saturating_sub(1));
        steps.get(pos).copied().unwrap_or_default()
    }

    fn run(&self, steps: &[Step], phase: &str, ctx: &RunContext) -> PhaseResult {
        let message = || {
            self.message
                .clone()
                .unwrap_or_else(|| format!("scripted {phase} failure on attempt {}", ctx.attempt))
        };
        match Self::step(steps, ctx.attempt) {
            Step::Pass => Ok(()),
            Step::Fail => Err(PhaseFailure::assertion(message())),
            Step::Error => Err(PhaseFailure::resource(message())),
            Step::Skip => Err(PhaseFailure::skip(
                self.message
                    .clone()
                    .unwrap_or_else(|| format!("scripted skip in {phase}")),
            )),
        }
    }
}

impl TestBody for Script {
    fn setup(&self, ctx: &RunContext) -> PhaseResult {
        self.run(&self.setup, "setup", ctx)
    }

    fn call(&self, ctx: &RunContext) -> PhaseResult {
        self.run(&self.call, "call", ctx)
    }

    fn teardown(&self, ctx: &RunContext) -> PhaseResult {
        self.run(&self.teardown, "teardown", ctx)
    }
}

/// Scripts keyed by item id; items without a script pass
#[derive(Clone, Debug, Default)]
pub struct ScriptBook {
    scripts: HashMap<String, Arc<Script>>,
    default: Arc<Script>,
}

impl ScriptBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, script: Script) {
        self.scripts.insert(id.into(), Arc::new(script));
    }

    pub fn get(&self, id: &str) -> Option<&Script> {
        self.scripts.get(id).map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

impl BodyProvider for ScriptBook {
    fn body_for(&self, item: &TestItem) -> Option<Arc<dyn TestBody>> {
        let script = self
            .scripts
            .get(item.id())
            .or_else(|| self.scripts.get(item.base_id()))
            .unwrap_or(&self.default)
            .clone();
        Some(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FailureKind;
    use std::collections::BTreeMap;

    fn ctx(attempt: u32) -> RunContext {
        RunContext {
            item: Arc::new(TestItem::builder("m::t").build()),
            attempt,
            fixtures: BTreeMap::new(),
        }
    }

    #[test]
    fn test_step_per_attempt() {
        let script = Script::passing().with_call([Step::Fail, Step::Error, Step::Pass]);
        assert_eq!(
            script.call(&ctx(0)).unwrap_err().kind,
            FailureKind::Assertion
        );
        assert_eq!(
            script.call(&ctx(1)).unwrap_err().kind,
            FailureKind::Resource
        );
        assert!(script.call(&ctx(2)).is_ok());
        // Last step repeats
        assert!(script.call(&ctx(7)).is_ok());
        assert!(script.setup(&ctx(0)).is_ok());
    }

    #[test]
    fn test_book_defaults_to_passing() {
        let book = ScriptBook::new();
        let body = book
            .body_for(&TestItem::builder("m::unscripted").build())
            .unwrap();
        assert!(body.call(&ctx(0)).is_ok());
    }

    #[test]
    fn test_parse_steps() {
        let script: Script = serde_yaml::from_str("call: [fail, skip]\nmessage: boom\n").unwrap();
        assert_eq!(script.call, vec![Step::Fail, Step::Skip]);
        let err = script.call(&ctx(1)).unwrap_err();
        assert_eq!(err.kind, FailureKind::Skip);
        assert_eq!(err.message, "boom");
    }
}
