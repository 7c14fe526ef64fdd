//! Table-driven parametrization
//!
//! Expands every item that requests a fixture named in the table into one
//! variant per value, e.g. `size` into `[small]`, `[medium]` and `[large]`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::hooks::{GenerateTests, GenerateTestsContext, Parametrization, Plugin, PluginRegistrar};

/// Values of one named argument and their ids
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub values: Vec<Value>,
    #[serde(default)]
    pub ids: Vec<String>,
}

impl ParamSpec {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
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
}

/// Answers `GenerateTests` from a fixed table of arguments
#[derive(Clone, Debug, Default)]
pub struct ParamTable {
    specs: Arc<BTreeMap<String, ParamSpec>>,
}

impl ParamTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: BTreeMap<String, ParamSpec>) -> Self {
        Self {
            specs: Arc::new(specs),
        }
    }

    pub fn with(self, argname: impl Into<String>, spec: ParamSpec) -> Self {
        let mut specs = Arc::unwrap_or_clone(self.specs);
        specs.insert(argname.into(), spec);
        Self::from_specs(specs)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Parametrizations for the fixtures `ctx.item` requests but does not
    /// already carry as params
    fn requests(specs: &BTreeMap<String, ParamSpec>, ctx: &GenerateTestsContext) -> Vec<Parametrization> {
        ctx.item
            .fixtures()
            .iter()
            .filter(|name| !ctx.item.params().contains_key(name.as_str()))
            .filter_map(|name| {
                specs.get(name).map(|spec| {
                    Parametrization::new(name.clone(), spec.values.clone())
                        .with_ids(spec.ids.iter().cloned())
                })
            })
            .collect()
    }
}

impl Plugin for ParamTable {
    fn name(&self) -> &str {
        "param_table"
    }

    fn install(&self, registrar: &mut PluginRegistrar<'_>) -> Result<()> {
        if self.specs.is_empty() {
            return Ok(());
        }
        let specs = self.specs.clone();
        registrar.register::<GenerateTests, _>(0, move |ctx: &mut GenerateTestsContext| {
            let requests = ParamTable::requests(&specs, ctx);
            Ok(if requests.is_empty() { None } else { Some(requests) })
        })
    }
}
