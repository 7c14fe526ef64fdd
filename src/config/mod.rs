//! Configuration module
//!
//! Session settings with layered sources: defaults, a config file,
//! `TESTWEAVE_*` environment variables, then command-line flags.

mod env;
mod file;

pub use env::{print_env_help, EnvBuilder, EnvConfig, EnvGuard};
pub use file::CONFIG_LOCATIONS;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{OrchestratorError, Result};
use crate::executor::{duration_from_secs, Backoff, RetryPolicy};
use crate::shard::{ShardMethod, ShardSelector};

/// Settings of one session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SessionConfig {
    /// Environment name used by gating plugins
    pub environment: String,

    /// Retry budget per retried item
    pub max_retries: u32,

    /// Base pause between attempts, in seconds
    pub retry_delay_secs: f64,

    pub backoff: Backoff,

    /// Retry every item, marked or not
    pub retry_all: bool,

    /// Filter the plan through the shard selector
    pub distributed: bool,
    pub node_index: u32,
    pub total_nodes: u32,
    pub shard_method: ShardMethod,

    pub export_results: bool,
    pub results_path: PathBuf,

    pub generate_retry_report: bool,
    pub retry_report_path: PathBuf,

    /// Per-attempt CSV export, when set
    pub csv_path: Option<PathBuf>,

    /// Free-form key/value pairs visible to plugins
    pub vars: BTreeMap<String, String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            environment: "dev".to_string(),
            max_retries: 3,
            retry_delay_secs: 1.0,
            backoff: Backoff::Fixed,
            retry_all: false,
            distributed: false,
            node_index: 0,
            total_nodes: 1,
            shard_method: ShardMethod::Hash,
            export_results: false,
            results_path: PathBuf::from("test_results.json"),
            generate_retry_report: false,
            retry_report_path: PathBuf::from("failure_analysis.json"),
            csv_path: None,
            vars: BTreeMap::new(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay_secs(mut self, secs: f64) -> Self {
        self.retry_delay_secs = secs;
        self
    }

    /// Enable distributed mode with the given coordinates
    pub fn with_shard(mut self, node_index: u32, total_nodes: u32) -> Self {
        self.distributed = true;
        self.node_index = node_index;
        self.total_nodes = total_nodes;
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Reject settings no session can run with
    pub fn validate(&self) -> Result<()> {
        if self.environment.trim().is_empty() {
            return Err(OrchestratorError::InvalidConfig(
                "environment name must not be empty".to_string(),
            ));
        }
        if duration_from_secs(self.retry_delay_secs).is_none() {
            return Err(OrchestratorError::InvalidConfig(format!(
                "retry delay must be a representable non-negative number of seconds, got {}",
                self.retry_delay_secs
            )));
        }
        if let Backoff::Exponential {
            factor,
            max_delay_secs,
        } = self.backoff
        {
            if !factor.is_finite() || factor < 1.0 {
                return Err(OrchestratorError::InvalidConfig(format!(
                    "backoff factor must be at least 1, got {factor}"
                )));
            }
            if duration_from_secs(max_delay_secs).is_none() {
                return Err(OrchestratorError::InvalidConfig(format!(
                    "backoff max delay must be a representable non-negative number of seconds, got {max_delay_secs}"
                )));
            }
        }
        if self.total_nodes == 0 {
            return Err(OrchestratorError::InvalidShard {
                node_index: self.node_index,
                total_nodes: self.total_nodes,
            });
        }
        if self.distributed && self.node_index >= self.total_nodes {
            return Err(OrchestratorError::InvalidShard {
                node_index: self.node_index,
                total_nodes: self.total_nodes,
            });
        }
        Ok(())
    }

    /// Base retry delay; zero when the configured value is unrepresentable
    pub fn retry_delay(&self) -> Duration {
        duration_from_secs(self.retry_delay_secs).unwrap_or(Duration::ZERO)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_retries(self.max_retries)
            .with_retry_delay(self.retry_delay())
            .with_backoff(self.backoff)
            .with_retry_all(self.retry_all)
    }

    /// Selector for this node, or `None` outside distributed mode
    pub fn shard_selector(&self) -> Result<Option<ShardSelector>> {
        if !self.distributed {
            return Ok(None);
        }
        let selector =
            ShardSelector::new(self.node_index, self.total_nodes)?.with_method(self.shard_method);
        Ok(Some(selector))
    }

    /// Overlay values taken from `TESTWEAVE_*` variables
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(environment) = &env.environment {
            self.environment = environment.clone();
        }
        if let Some(max_retries) = env.max_retries {
            self.max_retries = max_retries;
        }
        if let Some(delay) = env.retry_delay {
            self.retry_delay_secs = delay;
        }
        if let Some(distributed) = env.distributed {
            self.distributed = distributed;
        }
        if let Some(node_index) = env.node_index {
            self.node_index = node_index;
        }
        if let Some(total_nodes) = env.total_nodes {
            self.total_nodes = total_nodes;
        }
    }
}
