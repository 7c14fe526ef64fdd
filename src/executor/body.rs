//! Test bodies
//!
//! A body implements the three phases of one test. Phases return
//! [`PhaseResult`] values; skips and failures are outcomes, not errors.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::models::{PhaseFailure, PhaseResult, TestItem};

/// Data available to a body during one attempt
#[derive(Clone, Debug)]
pub struct RunContext {
    pub item: Arc<TestItem>,
    pub attempt: u32,
    /// Resolved fixture values, keyed by fixture name
    pub fixtures: BTreeMap<String, Value>,
}

impl RunContext {
    pub fn fixture(&self, name: &str) -> Option<&Value> {
        self.fixtures.get(name)
    }

    /// Fixture value or a resource failure naming the missing fixture
    pub fn require(&self, name: &str) -> Result<&Value, PhaseFailure> {
        self.fixture(name)
            .ok_or_else(|| PhaseFailure::resource(format!("fixture '{name}' not available")))
    }
}

/// Setup, call and teardown of one test
pub trait TestBody: Send + Sync {
    fn setup(&self, _ctx: &RunContext) -> PhaseResult {
        Ok(())
    }

    fn call(&self, ctx: &RunContext) -> PhaseResult;

    fn teardown(&self, _ctx: &RunContext) -> PhaseResult {
        Ok(())
    }
}

impl<F> TestBody for F
where
    F: Fn(&RunContext) -> PhaseResult + Send + Sync,
{
    fn call(&self, ctx: &RunContext) -> PhaseResult {
        self(ctx)
    }
}

/// Source of bodies for collected items
pub trait BodyProvider: Send + Sync {
    fn body_for(&self, item: &TestItem) -> Option<Arc<dyn TestBody>>;
}

/// Bodies registered by item id.
///
/// Lookup tries the exact id, then the id without its parametrization
/// suffix, then the fallback body if one is set.
#[derive(Clone, Default)]
pub struct BodyTable {
    bodies: HashMap<String, Arc<dyn TestBody>>,
    fallback: Option<Arc<dyn TestBody>>,
}

impl BodyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, body: impl TestBody + 'static) {
        self.bodies.insert(id.into(), Arc::new(body));
    }

    pub fn with(mut self, id: impl Into<String>, body: impl TestBody + 'static) -> Self {
        self.insert(id, body);
        self
    }

    pub fn with_fallback(mut self, body: impl TestBody + 'static) -> Self {
        self.fallback = Some(Arc::new(body));
        self
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

impl BodyProvider for BodyTable {
    fn body_for(&self, item: &TestItem) -> Option<Arc<dyn TestBody>> {
        self.bodies
            .get(item.id())
            .or_else(|| self.bodies.get(item.base_id()))
            .or(self.fallback.as_ref())
            .cloned()
    }
}
