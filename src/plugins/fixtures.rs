//! Built-in fixtures
//!
//! Serves session-level values to any item that requests them by name.

use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::hooks::{
    FixtureRequest, Plugin, PluginRegistrar, ResolveFixture, SessionInfo, SessionStart,
    SessionStartContext,
};

/// Provides `env`, `node_info` and `vars`
#[derive(Clone, Debug, Default)]
pub struct BuiltinFixtures {
    session: Arc<Mutex<Option<SessionInfo>>>,
}

impl BuiltinFixtures {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve(session: &SessionInfo, name: &str) -> Option<Value> {
        match name {
            "env" => Some(Value::from(session.environment.clone())),
            "node_info" => Some(json!({
                "session_id": session.session_id,
                "node_index": session.node_index,
                "total_nodes": session.total_nodes,
                "distributed": session.distributed,
                "shard_method": session.shard_method.name(),
            })),
            "vars" => Some(json!(session.vars)),
            _ => None,
        }
    }
}

impl Plugin for BuiltinFixtures {
    fn name(&self) -> &str {
        "builtin_fixtures"
    }

    fn install(&self, registrar: &mut PluginRegistrar<'_>) -> Result<()> {
        let captured = self.session.clone();
        registrar.observe::<SessionStart, _>(0, move |ctx: &mut SessionStartContext| {
            let mut slot = captured
                .lock()
                .map_err(|_| anyhow::anyhow!("fixture state poisoned"))?;
            *slot = Some(ctx.session.clone());
            Ok(())
        })?;

        let session = self.session.clone();
        // Lowest priority so that plugins overriding a built-in name win
        registrar.register::<ResolveFixture, _>(-100, move |request: &mut FixtureRequest| {
            let slot = session
                .lock()
                .map_err(|_| anyhow::anyhow!("fixture state poisoned"))?;
            Ok(slot
                .as_ref()
                .and_then(|info| BuiltinFixtures::resolve(info, &request.name)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{Extensions, HookRegistry};
    use crate::models::TestItem;
    use crate::shard::ShardMethod;
    use std::collections::BTreeMap;

    fn request(name: &str) -> FixtureRequest {
        FixtureRequest {
            name: name.to_string(),
            item: Arc::new(TestItem::builder("m::t").fixture(name).build()),
            attempt: 0,
        }
    }

    #[test]
    fn test_resolves_after_session_start() {
        let mut registry = HookRegistry::new();
        registry.load_plugin(&BuiltinFixtures::new()).unwrap();

        assert_eq!(registry.invoke_first::<ResolveFixture>(&mut request("env")).unwrap(), None);

        let mut vars = BTreeMap::new();
        vars.insert("region".to_string(), "eu".to_string());
        let mut start = SessionStartContext {
            session: SessionInfo {
                session_id: "s1".to_string(),
                environment: "staging".to_string(),
                distributed: true,
                node_index: 1,
                total_nodes: 3,
                shard_method: ShardMethod::Module,
                vars,
            },
            extensions: Extensions::new(),
        };
        registry.invoke::<SessionStart>(&mut start).unwrap();

        let env = registry.invoke_first::<ResolveFixture>(&mut request("env")).unwrap();
        assert_eq!(env, Some(Value::from("staging")));

        let node = registry
            .invoke_first::<ResolveFixture>(&mut request("node_info"))
            .unwrap()
            .unwrap();
        assert_eq!(node["node_index"], 1);
        assert_eq!(node["shard_method"], "module");

        let vars = registry
            .invoke_first::<ResolveFixture>(&mut request("vars"))
            .unwrap()
            .unwrap();
        assert_eq!(vars["region"], "eu");

        assert_eq!(
            registry.invoke_first::<ResolveFixture>(&mut request("db")).unwrap(),
            None
        );
    }
}
