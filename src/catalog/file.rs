//! Catalog files
//!
//! Loads a discovered test suite from a JSON or YAML document so the binary
//! can drive a session without a language binding.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use super::CatalogBuilder;
use crate::executor::{Script, ScriptBook};
use crate::models::{Marker, TestItem};
use crate::plugins::{ParamSpec, ParamTable};

/// A marker written either as a bare name or in full
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MarkerSpec {
    Name(String),
    Full(Marker),
}

impl MarkerSpec {
    pub fn to_marker(&self) -> Marker {
        match self {
            MarkerSpec::Name(name) => Marker::named(name),
            MarkerSpec::Full(marker) => marker.clone(),
        }
    }
}

/// One discovered item
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ItemSpec {
    pub id: String,
    /// Defaults to the id prefix before `::`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default)]
    pub markers: Vec<MarkerSpec>,
    #[serde(default)]
    pub fixtures: Vec<String>,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    /// Scripted phase behaviour per attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<Script>,
}

impl ItemSpec {
    pub fn to_item(&self) -> TestItem {
        let mut builder = TestItem::builder(&self.id);
        if let Some(module) = &self.module {
            builder = builder.module(module);
        }
        for marker in &self.markers {
            builder = builder.marker(marker.to_marker());
        }
        for fixture in &self.fixtures {
            builder = builder.fixture(fixture);
        }
        for (name, value) in &self.params {
            builder = builder.param(name, value.clone());
        }
        builder.build()
    }
}

/// Catalog file structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub session_markers: Vec<MarkerSpec>,

    /// Module path to module-level markers
    #[serde(default)]
    pub modules: BTreeMap<String, Vec<MarkerSpec>>,

    /// Named argument tables for parametrization
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamSpec>,

    #[serde(default)]
    pub items: Vec<ItemSpec>,
}

impl CatalogFile {
    /// Load a catalog from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;

        let catalog: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML catalog: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON catalog: {}", path.display()))?
        };

        catalog.validate()?;
        Ok(catalog)
    }

    /// Reject entries that can never form a valid catalog
    pub fn validate(&self) -> Result<()> {
        for item in &self.items {
            if item.id.trim().is_empty() {
                anyhow::bail!("Catalog item with an empty id");
            }
        }
        for (name, spec) in &self.parameters {
            if spec.values.is_empty() {
                anyhow::bail!("Parameter table '{}' has no values", name);
            }
            if !spec.ids.is_empty() && spec.ids.len() != spec.values.len() {
                anyhow::bail!(
                    "Parameter table '{}' has {} ids for {} values",
                    name,
                    spec.ids.len(),
                    spec.values.len()
                );
            }
        }
        Ok(())
    }

    /// Catalog builder carrying every scope's markers and items
    pub fn builder(&self) -> CatalogBuilder {
        let mut builder = CatalogBuilder::new();
        for marker in &self.session_markers {
            builder = builder.session_marker(marker.to_marker());
        }
        for (module, markers) in &self.modules {
            for marker in markers {
                builder = builder.module_marker(module, marker.to_marker());
            }
        }
        builder.items(self.items.iter().map(ItemSpec::to_item))
    }

    /// Scripts of every item, keyed by base id
    pub fn script_book(&self) -> ScriptBook {
        let mut book = ScriptBook::new();
        for item in &self.items {
            if let Some(script) = &item.script {
                book.insert(&item.id, script.clone());
            }
        }
        book
    }

    pub fn param_table(&self) -> ParamTable {
        ParamTable::from_specs(self.parameters.clone())
    }
}

fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext == "yaml" || ext == "yml")
        .unwrap_or(false)
}
