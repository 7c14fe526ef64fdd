//! Plugin contract
//!
//! Plugins register their callbacks through a [`PluginRegistrar`], which
//! stamps every callback with the plugin's name. Plugins are installed in
//! an explicit load order, and that order fixes the tie-break between
//! callbacks of equal priority.

use tracing::info;

use super::registry::HookRegistry;
use super::spec::HookSpec;
use crate::error::Result;

/// An independently loadable extension
pub trait Plugin: Send + Sync {
    /// Identity used to attribute callback failures
    fn name(&self) -> &str;

    /// Register this plugin's callbacks
    fn install(&self, registrar: &mut PluginRegistrar<'_>) -> Result<()>;
}

/// Registration handle bound to one plugin
pub struct PluginRegistrar<'a> {
    registry: &'a mut HookRegistry,
    plugin: String,
}

impl<'a> PluginRegistrar<'a> {
    pub fn new(registry: &'a mut HookRegistry, plugin: impl Into<String>) -> Self {
        Self {
            registry,
            plugin: plugin.into(),
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Register a callback that may answer
    pub fn register<H, F>(&mut self, priority: i32, callback: F) -> Result<()>
    where
        H: HookSpec,
        F: Fn(&mut H::Context) -> anyhow::Result<Option<H::Answer>> + Send + Sync + 'static,
    {
        self.registry.register::<H, F>(&self.plugin, priority, callback)
    }

    /// Register a callback that never answers
    pub fn observe<H, F>(&mut self, priority: i32, callback: F) -> Result<()>
    where
        H: HookSpec,
        F: Fn(&mut H::Context) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.registry
            .register_observer::<H, F>(&self.plugin, priority, callback)
    }
}

impl HookRegistry {
    /// Install one plugin
    pub fn load_plugin(&mut self, plugin: &dyn Plugin) -> Result<()> {
        let name = plugin.name().to_string();
        let mut registrar = PluginRegistrar::new(self, name.clone());
        plugin.install(&mut registrar)?;
        info!("Loaded plugin: {}", name);
        Ok(())
    }

    /// Install plugins in the given order
    pub fn load_plugins<'p, I>(&mut self, plugins: I) -> Result<()>
    where
        I: IntoIterator<Item = &'p dyn Plugin>,
    {
        for plugin in plugins {
            self.load_plugin(plugin)?;
        }
        Ok(())
    }
}
