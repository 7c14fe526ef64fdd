//! Built-in plugins
//!
//! Gating, fixtures and table-driven parametrization, all installed
//! through the same [`Plugin`](crate::hooks::Plugin) contract as third-party
//! plugins.

mod fixtures;
mod gating;
mod params;

pub use fixtures::BuiltinFixtures;
pub use gating::{EnvMarkerGate, EnvironmentGate, RequiresGate, PROD_ENVIRONMENT};
pub use params::{ParamSpec, ParamTable};

use crate::hooks::Plugin;

/// The default plugin set, in load order
pub fn builtin_plugins() -> Vec<Box<dyn Plugin>> {
    vec![
        Box::new(EnvironmentGate),
        Box::new(EnvMarkerGate),
        Box::new(RequiresGate),
        Box::new(BuiltinFixtures::new()),
    ]
}
