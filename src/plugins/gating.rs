//! Gating plugins
//!
//! Collection-time filters that exclude items the current environment
//! cannot or should not run. Excluded items stay in the plan with a reason.

use tracing::info;

use crate::error::Result;
use crate::hooks::{ModifyItems, ModifyItemsContext, Plugin, PluginRegistrar};
use crate::models::MarkerKind;

/// Environment in which slow and flaky items are not run
pub const PROD_ENVIRONMENT: &str = "prod";

/// Skips `slow` and `flaky` items in production
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvironmentGate;

impl EnvironmentGate {
    fn apply(ctx: &mut ModifyItemsContext) -> anyhow::Result<()> {
        if ctx.session.environment != PROD_ENVIRONMENT {
            return Ok(());
        }
        let mut gated = 0;
        for entry in &mut ctx.items {
            for kind in [MarkerKind::Slow, MarkerKind::Flaky] {
                if entry.included() && entry.has_marker(kind.name()) {
                    entry.skip(format!(
                        "{} tests are not run in the {} environment",
                        kind.name(),
                        PROD_ENVIRONMENT
                    ))?;
                    gated += 1;
                }
            }
        }
        if gated > 0 {
            info!("Environment gate skipped {} items in {}", gated, PROD_ENVIRONMENT);
        }
        Ok(())
    }
}

impl Plugin for EnvironmentGate {
    fn name(&self) -> &str {
        "environment_gate"
    }

    fn install(&self, registrar: &mut PluginRegistrar<'_>) -> Result<()> {
        registrar.observe::<ModifyItems, _>(0, Self::apply)
    }
}

/// Restricts items carrying `env("staging", "prod")` to the listed
/// environments
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvMarkerGate;

impl EnvMarkerGate {
    pub const MARKER: &'static str = "env";

    fn apply(ctx: &mut ModifyItemsContext) -> anyhow::Result<()> {
        let current = ctx.session.environment.clone();
        for entry in &mut ctx.items {
            if !entry.included() {
                continue;
            }
            let allowed: Vec<String> = match entry.closest_marker(Self::MARKER) {
                Some(marker) => marker.str_args().map(str::to_string).collect(),
                None => continue,
            };
            if allowed.is_empty() || allowed.iter().any(|env| *env == current) {
                continue;
            }
            entry.skip(format!(
                "environment {} is not in the allowed list: {}",
                current,
                allowed.join(", ")
            ))?;
        }
        Ok(())
    }
}

impl Plugin for EnvMarkerGate {
    fn name(&self) -> &str {
        "env_marker_gate"
    }

    fn install(&self, registrar: &mut PluginRegistrar<'_>) -> Result<()> {
        registrar.observe::<ModifyItems, _>(0, Self::apply)
    }
}

/// Skips items whose required session variables are unset.
///
/// `require_db` needs `DB_AVAILABLE`; `requires(var=NAME)` needs `NAME`.
/// Session vars are consulted first, then the process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequiresGate;

impl RequiresGate {
    pub const REQUIRE_DB: &'static str = "require_db";
    pub const DB_VAR: &'static str = "DB_AVAILABLE";
    pub const REQUIRES: &'static str = "requires";

    fn is_set(ctx: &ModifyItemsContext, var: &str) -> bool {
        match ctx.session.vars.get(var) {
            Some(value) => !value.is_empty(),
            None => std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false),
        }
    }

    fn apply(ctx: &mut ModifyItemsContext) -> anyhow::Result<()> {
        let db_available = Self::is_set(ctx, Self::DB_VAR);
        let mut missing: Vec<Option<String>> = Vec::with_capacity(ctx.items.len());

        for entry in &ctx.items {
            let mut needed: Vec<&str> = Vec::new();
            if entry.has_marker(Self::REQUIRE_DB) && !db_available {
                needed.push(Self::DB_VAR);
            }
            for marker in entry.item().iter_markers(Self::REQUIRES) {
                if let Some(var) = marker.kwarg_str("var") {
                    if !Self::is_set(ctx, var) {
                        needed.push(var);
                    }
                }
            }
            missing.push(if needed.is_empty() {
                None
            } else {
                Some(needed.join(", "))
            });
        }

        for (entry, needed) in ctx.items.iter_mut().zip(missing) {
            if let Some(vars) = needed {
                entry.skip(format!("required variables not set: {vars}"))?;
            }
        }
        Ok(())
    }
}

impl Plugin for RequiresGate {
    fn name(&self) -> &str {
        "requires_gate"
    }

    fn install(&self, registrar: &mut PluginRegistrar<'_>) -> Result<()> {
        registrar.observe::<ModifyItems, _>(0, Self::apply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TestCatalog;
    use crate::collection::{CollectedItem, CollectionPipeline};
    use crate::hooks::{Extensions, HookRegistry, SessionInfo};
    use crate::models::{Marker, TestItem};
    use crate::shard::ShardMethod;
    use std::collections::BTreeMap;

    fn session(env: &str) -> SessionInfo {
        SessionInfo {
            session_id: "gate".to_string(),
            environment: env.to_string(),
            distributed: false,
            node_index: 0,
            total_nodes: 1,
            shard_method: ShardMethod::Hash,
            vars: BTreeMap::new(),
        }
    }

    fn collect(plugin: &dyn Plugin, session: &SessionInfo, catalog: &TestCatalog) -> Vec<CollectedItem> {
        let mut registry = HookRegistry::new();
        registry.load_plugin(plugin).unwrap();
        CollectionPipeline::new()
            .collect(catalog, &registry, session, &mut Extensions::new())
            .unwrap()
    }

    fn find<'a>(plan: &'a [CollectedItem], id: &str) -> &'a CollectedItem {
        plan.iter().find(|e| e.id() == id).unwrap()
    }

    #[test]
    fn test_prod_skips_slow_dev_includes() {
        let catalog = TestCatalog::from_items([
            TestItem::builder("m::slow").mark("slow").build(),
            TestItem::builder("m::flaky").mark("flaky").build(),
            TestItem::builder("m::fast").build(),
        ])
        .unwrap();

        let prod = collect(&EnvironmentGate, &session("prod"), &catalog);
        let slow = find(&prod, "m::slow");
        assert!(!slow.included());
        assert!(!slow.skip_reason().unwrap().is_empty());
        assert!(!find(&prod, "m::flaky").included());
        assert!(find(&prod, "m::fast").included());

        let dev = collect(&EnvironmentGate, &session("dev"), &catalog);
        assert!(dev.iter().all(|e| e.included()));
    }

    #[test]
    fn test_env_marker_gate() {
        let catalog = TestCatalog::from_items([TestItem::builder("m::staged")
            .marker(Marker::named("env").with_arg("staging").with_arg("prod"))
            .build()])
        .unwrap();

        let dev = collect(&EnvMarkerGate, &session("dev"), &catalog);
        let reason = dev[0].skip_reason().unwrap();
        assert!(reason.contains("staging, prod"));

        let staging = collect(&EnvMarkerGate, &session("staging"), &catalog);
        assert!(staging[0].included());
    }

    #[test]
    fn test_requires_gate() {
        let catalog = TestCatalog::from_items([
            TestItem::builder("m::db").mark("require_db").build(),
            TestItem::builder("m::token")
                .marker(Marker::named("requires").with_kwarg("var", "TESTWEAVE_GATE_TOKEN"))
                .build(),
        ])
        .unwrap();

        let mut with_db = session("dev");
        with_db.vars.insert("DB_AVAILABLE".to_string(), "1".to_string());
        let plan = collect(&RequiresGate, &with_db, &catalog);
        assert!(find(&plan, "m::db").included());
        assert_eq!(
            find(&plan, "m::token").skip_reason(),
            Some("required variables not set: TESTWEAVE_GATE_TOKEN")
        );

        with_db
            .vars
            .insert("TESTWEAVE_GATE_TOKEN".to_string(), "abc".to_string());
        let plan = collect(&RequiresGate, &with_db, &catalog);
        assert!(plan.iter().all(|e| e.included()));
    }
}
