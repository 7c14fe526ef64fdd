//! Hook registry
//!
//! Stores the callback chain of every extension point, keyed by hook name,
//! and dispatches invocations according to the hook's [`HookPolicy`].

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use tracing::{debug, trace};

use super::spec::{HookFn, HookPolicy, HookSpec};
use crate::error::{OrchestratorError, Result};

/// One registered callback
struct HookImpl<H: HookSpec> {
    plugin: Arc<str>,
    priority: i32,
    seq: u64,
    callback: Arc<HookFn<H>>,
}

impl<H: HookSpec> Clone for HookImpl<H> {
    fn clone(&self) -> Self {
        Self {
            plugin: self.plugin.clone(),
            priority: self.priority,
            seq: self.seq,
            callback: self.callback.clone(),
        }
    }
}

/// Callback chain of one hook, kept sorted by (priority, seq)
struct HookChain<H: HookSpec> {
    impls: Vec<HookImpl<H>>,
}

/// Summary of one registered callback, for listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HookEntry {
    pub hook: &'static str,
    pub plugin: String,
    pub priority: i32,
}

/// Registry of named extension points
#[derive(Default)]
pub struct HookRegistry {
    chains: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
    entries: Vec<HookEntry>,
    next_seq: u64,
    active: Mutex<HashSet<(&'static str, ThreadId)>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for hook `H` on behalf of `plugin`
    pub fn register<H, F>(&mut self, plugin: &str, priority: i32, callback: F) -> Result<()>
    where
        H: HookSpec,
        F: Fn(&mut H::Context) -> anyhow::Result<Option<H::Answer>> + Send + Sync + 'static,
    {
        let seq = self.next_seq;
        self.next_seq += 1;

        let chain = self
            .chains
            .entry(H::NAME)
            .or_insert_with(|| Box::new(HookChain::<H> { impls: Vec::new() }))
            .downcast_mut::<HookChain<H>>()
            .ok_or_else(|| {
                OrchestratorError::InvalidConfig(format!(
                    "hook '{}' is already registered with a different signature",
                    H::NAME
                ))
            })?;

        let callback: Arc<HookFn<H>> = Arc::new(callback);
        let imp = HookImpl {
            plugin: Arc::from(plugin),
            priority,
            seq,
            callback,
        };
        let pos = chain
            .impls
            .partition_point(|existing| (existing.priority, existing.seq) <= (priority, seq));
        chain.impls.insert(pos, imp);

        self.entries.push(HookEntry {
            hook: H::NAME,
            plugin: plugin.to_string(),
            priority,
        });
        debug!(
            "Registered {} callback from plugin '{}' (priority {})",
            H::NAME,
            plugin,
            priority
        );
        Ok(())
    }

    /// Register a callback that only observes or mutates the context
    pub fn register_observer<H, F>(&mut self, plugin: &str, priority: i32, callback: F) -> Result<()>
    where
        H: HookSpec,
        F: Fn(&mut H::Context) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register::<H, _>(plugin, priority, move |ctx| {
            callback(ctx)?;
            Ok(None)
        })
    }

    /// Invoke hook `H`, returning the answers of the callbacks that gave one.
    ///
    /// A failing callback aborts the chain; the error carries the hook name
    /// and the plugin that registered the callback.
    pub fn invoke<H: HookSpec>(&self, ctx: &mut H::Context) -> Result<Vec<H::Answer>> {
        let _guard = ActiveGuard::enter(&self.active, H::NAME)?;

        let impls = self.ordered::<H>();
        trace!("Invoking {} with {} callbacks", H::NAME, impls.len());

        let mut answers = Vec::new();
        for imp in impls {
            match (imp.callback)(ctx) {
                Ok(Some(answer)) => {
                    answers.push(answer);
                    if H::POLICY == HookPolicy::FirstResult {
                        break;
                    }
                }
                Ok(None) => {}
                Err(source) => return Err(wrap_callback_error::<H>(&imp.plugin, source)),
            }
        }
        Ok(answers)
    }

    /// Invoke hook `H` and return its first answer
    pub fn invoke_first<H: HookSpec>(&self, ctx: &mut H::Context) -> Result<Option<H::Answer>> {
        Ok(self.invoke::<H>(ctx)?.into_iter().next())
    }

    /// Number of callbacks registered for hook `H`
    pub fn callback_count<H: HookSpec>(&self) -> usize {
        self.chain::<H>().map(|c| c.impls.len()).unwrap_or(0)
    }

    /// Plugins of hook `H` in invocation order
    pub fn call_order<H: HookSpec>(&self) -> Vec<String> {
        self.ordered::<H>()
            .iter()
            .map(|imp| imp.plugin.to_string())
            .collect()
    }

    /// Every registration, in registration order
    pub fn entries(&self) -> &[HookEntry] {
        &self.entries
    }

    fn chain<H: HookSpec>(&self) -> Option<&HookChain<H>> {
        self.chains
            .get(H::NAME)
            .and_then(|c| c.downcast_ref::<HookChain<H>>())
    }

    fn ordered<H: HookSpec>(&self) -> Vec<HookImpl<H>> {
        let mut impls = self
            .chain::<H>()
            .map(|c| c.impls.clone())
            .unwrap_or_default();
        if H::POLICY == HookPolicy::FirstResult {
            impls.reverse();
        }
        impls
    }
}

/// Configuration errors raised inside a callback (nested reentrance) pass
/// through unchanged; everything else is attributed to the plugin.
fn wrap_callback_error<H: HookSpec>(plugin: &str, source: anyhow::Error) -> OrchestratorError {
    match source.downcast::<OrchestratorError>() {
        Ok(inner) if inner.is_configuration() => inner,
        Ok(inner) => OrchestratorError::Extension {
            hook: H::NAME,
            plugin: plugin.to_string(),
            source: inner.into(),
        },
        Err(source) => OrchestratorError::Extension {
            hook: H::NAME,
            plugin: plugin.to_string(),
            source,
        },
    }
}

/// Marks a hook as in flight on the current thread for the guard's lifetime
struct ActiveGuard<'a> {
    active: &'a Mutex<HashSet<(&'static str, ThreadId)>>,
    key: (&'static str, ThreadId),
}

impl<'a> ActiveGuard<'a> {
    fn enter(
        active: &'a Mutex<HashSet<(&'static str, ThreadId)>>,
        hook: &'static str,
    ) -> Result<Self> {
        let key = (hook, thread::current().id());
        let mut set = active.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(key) {
            return Err(OrchestratorError::ReentrantHook { hook });
        }
        Ok(Self { active, key })
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.active.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{OnceLock, Weak};

    struct Order;
    impl HookSpec for Order {
        const NAME: &'static str = "order";
        const POLICY: HookPolicy = HookPolicy::CollectAll;
        type Context = Vec<&'static str>;
        type Answer = &'static str;
    }

    struct Resolve;
    impl HookSpec for Resolve {
        const NAME: &'static str = "resolve";
        const POLICY: HookPolicy = HookPolicy::FirstResult;
        type Context = Vec<&'static str>;
        type Answer = &'static str;
    }

    fn register_three<H>(registry: &mut HookRegistry)
    where
        H: HookSpec<Context = Vec<&'static str>, Answer = &'static str>,
    {
        for (name, priority) in [("first", 0), ("second", 0), ("high", 1)] {
            registry
                .register::<H, _>(name, priority, move |ctx: &mut Vec<&'static str>| {
                    ctx.push(name);
                    Ok(Some(name))
                })
                .unwrap();
        }
    }

    #[test]
    fn test_collect_all_order() {
        let mut registry = HookRegistry::new();
        register_three::<Order>(&mut registry);

        let mut seen = Vec::new();
        let answers = registry.invoke::<Order>(&mut seen).unwrap();
        assert_eq!(seen, vec!["first", "second", "high"]);
        assert_eq!(answers, vec!["first", "second", "high"]);
    }

    #[test]
    fn test_first_result_order() {
        let mut registry = HookRegistry::new();
        register_three::<Resolve>(&mut registry);
        assert_eq!(
            registry.call_order::<Resolve>(),
            vec!["high", "second", "first"]
        );

        let mut seen = Vec::new();
        let answer = registry.invoke_first::<Resolve>(&mut seen).unwrap();
        assert_eq!(answer, Some("high"));
        assert_eq!(seen, vec!["high"]);
    }

    #[test]
    fn test_first_result_skips_empty_answers() {
        let mut registry = HookRegistry::new();
        registry
            .register::<Resolve, _>("provider", 0, |_ctx: &mut Vec<&'static str>| Ok(Some("db")))
            .unwrap();
        registry
            .register::<Resolve, _>("passthrough", 0, |ctx: &mut Vec<&'static str>| {
                ctx.push("passthrough");
                Ok(None)
            })
            .unwrap();

        let mut seen = Vec::new();
        let answer = registry.invoke_first::<Resolve>(&mut seen).unwrap();
        assert_eq!(answer, Some("db"));
        assert_eq!(seen, vec!["passthrough"]);
    }

    #[test]
    fn test_callback_error_aborts_chain() {
        let mut registry = HookRegistry::new();
        registry
            .register_observer::<Order, _>("ok", 0, |ctx: &mut Vec<&'static str>| {
                ctx.push("ok");
                Ok(())
            })
            .unwrap();
        registry
            .register_observer::<Order, _>("broken", 0, |_ctx: &mut Vec<&'static str>| {
                anyhow::bail!("plugin exploded")
            })
            .unwrap();
        registry
            .register_observer::<Order, _>("never", 0, |ctx: &mut Vec<&'static str>| {
                ctx.push("never");
                Ok(())
            })
            .unwrap();

        let mut seen = Vec::new();
        let err = registry.invoke::<Order>(&mut seen).unwrap_err();
        match err {
            OrchestratorError::Extension { hook, plugin, .. } => {
                assert_eq!(hook, "order");
                assert_eq!(plugin, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(seen, vec!["ok"]);
    }

    #[test]
    fn test_reentrant_invocation_fails() {
        let slot: Arc<OnceLock<Weak<HookRegistry>>> = Arc::new(OnceLock::new());
        let inner = slot.clone();

        let mut registry = HookRegistry::new();
        registry
            .register_observer::<Order, _>("loop", 0, move |ctx: &mut Vec<&'static str>| {
                if let Some(registry) = inner.get().and_then(Weak::upgrade) {
                    registry.invoke::<Order>(ctx)?;
                }
                Ok(())
            })
            .unwrap();

        let registry = Arc::new(registry);
        slot.set(Arc::downgrade(&registry)).unwrap();

        let err = registry.invoke::<Order>(&mut Vec::new()).unwrap_err();
        assert!(matches!(err, OrchestratorError::ReentrantHook { hook: "order" }));
        assert!(err.is_configuration());

        // Guard released after the failed invocation; the outer call enters
        // again and only the nested call is rejected.
        assert!(registry.active.lock().unwrap().is_empty());
        let err = registry.invoke::<Order>(&mut Vec::new()).unwrap_err();
        assert!(matches!(err, OrchestratorError::ReentrantHook { .. }));
    }

    #[test]
    fn test_empty_hook() {
        let registry = HookRegistry::new();
        let answers = registry.invoke::<Order>(&mut Vec::new()).unwrap();
        assert!(answers.is_empty());
        assert_eq!(registry.callback_count::<Order>(), 0);
    }

    #[test]
    fn test_entries_listing() {
        let mut registry = HookRegistry::new();
        register_three::<Order>(&mut registry);
        assert_eq!(registry.entries().len(), 3);
        assert_eq!(registry.entries()[2].plugin, "high");
        assert_eq!(registry.callback_count::<Order>(), 3);
    }
}
