//! Test item model
//!
//! A `TestItem` is created once by discovery and shared by reference
//! (`Arc<TestItem>`) with every downstream component.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::marker::{Marker, MarkerScope, ScopedMarker};

/// A discovered test item
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TestItem {
    id: String,
    module: String,
    markers: Vec<ScopedMarker>,
    fixtures: Vec<String>,
    params: BTreeMap<String, Value>,
}

impl TestItem {
    /// Start building an item with the given identifier
    pub fn builder(id: impl Into<String>) -> TestItemBuilder {
        TestItemBuilder::new(id)
    }

    /// Globally unique identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identifier without the parametrization suffix (`name[a-b]` -> `name`)
    pub fn base_id(&self) -> &str {
        match self.id.find('[') {
            Some(pos) if self.id.ends_with(']') => &self.id[..pos],
            _ => &self.id,
        }
    }

    /// Owning module path
    pub fn module(&self) -> &str {
        &self.module
    }

    /// All markers, most specific scope first
    pub fn markers(&self) -> &[ScopedMarker] {
        &self.markers
    }

    /// Closest marker with the given name (item > module > session)
    pub fn closest_marker(&self, name: &str) -> Option<&Marker> {
        self.markers
            .iter()
            .find(|m| m.marker.name() == name)
            .map(|m| &m.marker)
    }

    /// All markers with the given name, most specific first
    pub fn iter_markers<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Marker> + 'a {
        self.markers
            .iter()
            .filter(move |m| m.marker.name() == name)
            .map(|m| &m.marker)
    }

    pub fn has_marker(&self, name: &str) -> bool {
        self.closest_marker(name).is_some()
    }

    /// Distinct marker names in precedence order
    pub fn marker_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for scoped in &self.markers {
            let name = scoped.marker.name();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Fixture names requested by the item
    pub fn fixtures(&self) -> &[String] {
        &self.fixtures
    }

    /// Declared parameter values
    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    pub fn is_parametrized(&self) -> bool {
        !self.params.is_empty()
    }

    /// Copy of this item with markers inherited from outer scopes
    pub(crate) fn with_inherited(&self, module: &[Marker], session: &[Marker]) -> TestItem {
        let mut item = self.clone();
        item.markers.extend(module.iter().map(|m| ScopedMarker {
            marker: m.clone(),
            scope: MarkerScope::Module,
        }));
        item.markers.extend(session.iter().map(|m| ScopedMarker {
            marker: m.clone(),
            scope: MarkerScope::Session,
        }));
        item.markers.sort_by(|a, b| b.scope.cmp(&a.scope));
        item
    }

    /// Parametrized variant of this item
    pub(crate) fn variant(&self, suffix: &str, params: BTreeMap<String, Value>) -> TestItem {
        let mut item = self.clone();
        item.id = format!("{}[{}]", self.id, suffix);
        item.params.extend(params);
        item
    }
}

impl fmt::Display for TestItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Builder for [`TestItem`]
#[derive(Debug)]
pub struct TestItemBuilder {
    id: String,
    module: Option<String>,
    markers: Vec<Marker>,
    fixtures: Vec<String>,
    params: BTreeMap<String, Value>,
}

impl TestItemBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            module: None,
            markers: Vec::new(),
            fixtures: Vec::new(),
            params: BTreeMap::new(),
        }
    }

    /// Set the owning module (defaults to the id prefix before `::`)
    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn marker(mut self, marker: Marker) -> Self {
        self.markers.push(marker);
        self
    }

    /// Add a bare marker by name
    pub fn mark(self, name: &str) -> Self {
        self.marker(Marker::named(name))
    }

    pub fn fixture(mut self, name: impl Into<String>) -> Self {
        self.fixtures.push(name.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> TestItem {
        let module = self.module.unwrap_or_else(|| module_of(&self.id).to_string());
        TestItem {
            id: self.id,
            module,
            markers: self
                .markers
                .into_iter()
                .map(|marker| ScopedMarker {
                    marker,
                    scope: MarkerScope::Item,
                })
                .collect(),
            fixtures: self.fixtures,
            params: self.params,
        }
    }
}

/// Module part of a `module::test` identifier
fn module_of(id: &str) -> &str {
    id.split("::").next().unwrap_or(id)
}
