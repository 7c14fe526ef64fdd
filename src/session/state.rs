//! Per-session state
//!
//! Everything a run needs beyond the registry, passed by reference through
//! the orchestrator. Plugin-private data lives in the typed extension map.

use tracing::debug;

use crate::config::SessionConfig;
use crate::error::Result;
use crate::executor::RetryPolicy;
use crate::hooks::{Extensions, SessionInfo};
use crate::results::generate_run_id;
use crate::shard::ShardSelector;
use crate::utils::SessionClock;

pub struct SessionState {
    pub info: SessionInfo,
    pub retry_policy: RetryPolicy,
    /// `None` outside distributed mode
    pub shard: Option<ShardSelector>,
    pub extensions: Extensions,
    pub clock: SessionClock,
}

impl SessionState {
    /// Validate `config` and start the clock
    pub fn new(config: &SessionConfig) -> Result<Self> {
        Self::with_id(config, generate_run_id())
    }

    pub fn with_id(config: &SessionConfig, session_id: impl Into<String>) -> Result<Self> {
        config.validate()?;
        let shard = config.shard_selector()?;
        let info = SessionInfo {
            session_id: session_id.into(),
            environment: config.environment.clone(),
            distributed: config.distributed,
            node_index: config.node_index,
            total_nodes: config.total_nodes,
            shard_method: config.shard_method,
            vars: config.vars.clone(),
        };
        debug!("Session {} state initialised", info.session_id);

        Ok(Self {
            info,
            retry_policy: config.retry_policy(),
            shard,
            extensions: Extensions::new(),
            clock: SessionClock::start(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.info.session_id
    }
}
