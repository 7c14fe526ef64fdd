//! Marker model
//!
//! Markers tag test items for ordering, gating and retry behaviour.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Marker name, with dedicated variants for the built-in tags
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MarkerKind {
    Unit,
    Contract,
    Integration,
    E2e,
    Slow,
    Flaky,
    Retry,
    Skip,
    Custom(String),
}

impl MarkerKind {
    /// Parse a marker name
    pub fn parse(name: &str) -> Self {
        match name {
            "unit" => MarkerKind::Unit,
            "contract" => MarkerKind::Contract,
            "integration" => MarkerKind::Integration,
            "e2e" => MarkerKind::E2e,
            "slow" => MarkerKind::Slow,
            "flaky" => MarkerKind::Flaky,
            "retry" => MarkerKind::Retry,
            "skip" => MarkerKind::Skip,
            other => MarkerKind::Custom(other.to_string()),
        }
    }

    /// Marker name as written by users
    pub fn name(&self) -> &str {
        match self {
            MarkerKind::Unit => "unit",
            MarkerKind::Contract => "contract",
            MarkerKind::Integration => "integration",
            MarkerKind::E2e => "e2e",
            MarkerKind::Slow => "slow",
            MarkerKind::Flaky => "flaky",
            MarkerKind::Retry => "retry",
            MarkerKind::Skip => "skip",
            MarkerKind::Custom(name) => name,
        }
    }

    /// Rank used by the default collection order; unmarked items rank last
    pub fn order_rank(&self) -> Option<u8> {
        match self {
            MarkerKind::Unit => Some(0),
            MarkerKind::Contract => Some(1),
            MarkerKind::Integration => Some(2),
            MarkerKind::E2e => Some(3),
            _ => None,
        }
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, MarkerKind::Custom(_))
    }
}

impl From<String> for MarkerKind {
    fn from(name: String) -> Self {
        MarkerKind::parse(&name)
    }
}

impl From<MarkerKind> for String {
    fn from(kind: MarkerKind) -> Self {
        kind.name().to_string()
    }
}

impl fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A marker with optional positional and keyword arguments
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    #[serde(rename = "name")]
    pub kind: MarkerKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kwargs: BTreeMap<String, Value>,
}

impl Marker {
    pub fn new(kind: MarkerKind) -> Self {
        Self {
            kind,
            args: Vec::new(),
            kwargs: BTreeMap::new(),
        }
    }

    /// Create a marker from its name
    pub fn named(name: &str) -> Self {
        Self::new(MarkerKind::parse(name))
    }

    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        self.kind.name()
    }

    pub fn kwarg(&self, key: &str) -> Option<&Value> {
        self.kwargs.get(key)
    }

    pub fn kwarg_u64(&self, key: &str) -> Option<u64> {
        self.kwarg(key).and_then(Value::as_u64)
    }

    pub fn kwarg_f64(&self, key: &str) -> Option<f64> {
        self.kwarg(key).and_then(Value::as_f64)
    }

    pub fn kwarg_str(&self, key: &str) -> Option<&str> {
        self.kwarg(key).and_then(Value::as_str)
    }

    /// Positional arguments that are strings
    pub fn str_args(&self) -> impl Iterator<Item = &str> {
        self.args.iter().filter_map(Value::as_str)
    }

    /// The `reason` keyword, falling back to the first string argument
    pub fn reason(&self) -> Option<&str> {
        self.kwarg_str("reason").or_else(|| self.str_args().next())
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if self.args.is_empty() && self.kwargs.is_empty() {
            return Ok(());
        }
        let parts: Vec<String> = self
            .args
            .iter()
            .map(|v| v.to_string())
            .chain(self.kwargs.iter().map(|(k, v)| format!("{k}={v}")))
            .collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// Where a marker was declared; later variants take precedence
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerScope {
    Session,
    Module,
    Item,
}

/// A marker together with the scope it was declared in
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScopedMarker {
    pub marker: Marker,
    pub scope: MarkerScope,
}
