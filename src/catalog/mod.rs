//! Test catalog
//!
//! Immutable snapshot of the discovered test items for one run. Building
//! the catalog is its only mutation point; afterwards items are shared as
//! `Arc<TestItem>` and read concurrently by collection, sharding and
//! reporting.

mod file;

pub use file::{CatalogFile, ItemSpec, MarkerSpec};

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{OrchestratorError, Result};
use crate::hooks::{
    Extensions, GenerateTests, GenerateTestsContext, HookRegistry, Parametrization, SessionInfo,
};
use crate::models::{Marker, TestItem};

/// Read-only set of test items in discovery order
#[derive(Clone, Debug, Default)]
pub struct TestCatalog {
    items: Vec<Arc<TestItem>>,
    index: HashMap<String, usize>,
}

impl TestCatalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::new()
    }

    /// Catalog of fully formed items, without marker inheritance or
    /// parametrization
    pub fn from_items<I>(items: I) -> Result<Self>
    where
        I: IntoIterator<Item = TestItem>,
    {
        Self::from_arcs(items.into_iter().map(Arc::new).collect())
    }

    fn from_arcs(items: Vec<Arc<TestItem>>) -> Result<Self> {
        let mut index = HashMap::with_capacity(items.len());
        for (pos, item) in items.iter().enumerate() {
            if index.insert(item.id().to_string(), pos).is_some() {
                return Err(OrchestratorError::DuplicateItem(item.id().to_string()));
            }
        }
        Ok(Self { items, index })
    }

    /// Every item, in discovery order
    pub fn all(&self) -> &[Arc<TestItem>] {
        &self.items
    }

    /// Items carrying the named marker at any scope
    pub fn by_marker(&self, name: &str) -> Vec<Arc<TestItem>> {
        self.items
            .iter()
            .filter(|item| item.has_marker(name))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<TestItem>> {
        self.index.get(id).map(|&pos| &self.items[pos])
    }

    /// Distinct module paths in discovery order
    pub fn modules(&self) -> Vec<&str> {
        let mut modules: Vec<&str> = Vec::new();
        for item in &self.items {
            if !modules.contains(&item.module()) {
                modules.push(item.module());
            }
        }
        modules
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Accumulates discovered items and the markers of their outer scopes
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    session_markers: Vec<Marker>,
    module_markers: BTreeMap<String, Vec<Marker>>,
    items: Vec<TestItem>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marker applied to every item at session scope
    pub fn session_marker(mut self, marker: Marker) -> Self {
        self.session_markers.push(marker);
        self
    }

    /// Marker applied to every item of `module`
    pub fn module_marker(mut self, module: impl Into<String>, marker: Marker) -> Self {
        self.module_markers
            .entry(module.into())
            .or_default()
            .push(marker);
        self
    }

    pub fn item(mut self, item: TestItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn items<I>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = TestItem>,
    {
        self.items.extend(items);
        self
    }

    /// Build without consulting any plugin
    pub fn build(self) -> Result<TestCatalog> {
        self.build_with(&HookRegistry::new())
    }

    /// Build the catalog, expanding items through the `GenerateTests` hook
    pub fn build_with(self, registry: &HookRegistry) -> Result<TestCatalog> {
        self.build_in(registry, None, &mut Extensions::new())
    }

    /// Build inside a started session; `extensions` is lent to every
    /// `GenerateTests` callback and handed back afterwards
    pub fn build_in(
        self,
        registry: &HookRegistry,
        session: Option<&SessionInfo>,
        extensions: &mut Extensions,
    ) -> Result<TestCatalog> {
        let mut items = Vec::with_capacity(self.items.len());

        for item in &self.items {
            let module = self
                .module_markers
                .get(item.module())
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let item = Arc::new(item.with_inherited(module, &self.session_markers));

            let mut ctx = GenerateTestsContext {
                item: item.clone(),
                session: session.cloned(),
                extensions: std::mem::take(extensions),
            };
            let result = registry.invoke::<GenerateTests>(&mut ctx);
            *extensions = ctx.extensions;
            let requests: Vec<Parametrization> = result?.into_iter().flatten().collect();
            if requests.is_empty() {
                items.push(item);
                continue;
            }

            let variants = expand(&item, &requests)?;
            debug!("Parametrized {} into {} items", item.id(), variants.len());
            items.extend(variants);
        }

        let catalog = TestCatalog::from_arcs(items)?;
        info!(
            "Built catalog with {} items across {} modules",
            catalog.len(),
            catalog.modules().len()
        );
        Ok(catalog)
    }
}

/// Cartesian product of every parametrization, ids joined with `-`
fn expand(item: &TestItem, requests: &[Parametrization]) -> Result<Vec<Arc<TestItem>>> {
    let mut combos: Vec<(Vec<String>, BTreeMap<String, Value>)> = vec![(Vec::new(), BTreeMap::new())];

    for request in requests {
        if request.values.is_empty() {
            return Err(OrchestratorError::Catalog(format!(
                "parametrization of '{}' for {} has no values",
                request.argname,
                item.id()
            )));
        }
        if !request.ids.is_empty() && request.ids.len() != request.values.len() {
            return Err(OrchestratorError::Catalog(format!(
                "parametrization of '{}' for {} has {} ids for {} values",
                request.argname,
                item.id(),
                request.ids.len(),
                request.values.len()
            )));
        }

        let mut next = Vec::with_capacity(combos.len() * request.values.len());
        for (ids, params) in &combos {
            for (pos, value) in request.values.iter().enumerate() {
                let mut ids = ids.clone();
                ids.push(request.id_at(pos));
                let mut params = params.clone();
                params.insert(request.argname.clone(), value.clone());
                next.push((ids, params));
            }
        }
        combos = next;
    }

    Ok(combos
        .into_iter()
        .map(|(ids, params)| Arc::new(item.variant(&ids.join("-"), params)))
        .collect())
}
