//! Environment variable configuration
//!
//! Provides `TESTWEAVE_*` environment variable overrides for configuration.

use std::env;

/// Environment variable prefix
const ENV_PREFIX: &str = "TESTWEAVE";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnvConfig {
    /// Environment name from TESTWEAVE_ENV
    pub environment: Option<String>,
    /// Retry budget from TESTWEAVE_MAX_RETRIES
    pub max_retries: Option<u32>,
    /// Retry delay in seconds from TESTWEAVE_RETRY_DELAY
    pub retry_delay: Option<f64>,
    /// Node index from TESTWEAVE_NODE_INDEX
    pub node_index: Option<u32>,
    /// Node count from TESTWEAVE_TOTAL_NODES
    pub total_nodes: Option<u32>,
    /// Distributed mode from TESTWEAVE_DISTRIBUTED
    pub distributed: Option<bool>,
    /// Config file from TESTWEAVE_CONFIG
    pub config_file: Option<String>,
    /// Verbose from TESTWEAVE_VERBOSE
    pub verbose: Option<bool>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            environment: get_env("ENV"),
            max_retries: get_env_parse("MAX_RETRIES"),
            retry_delay: get_env_parse("RETRY_DELAY"),
            node_index: get_env_parse("NODE_INDEX"),
            total_nodes: get_env_parse("TOTAL_NODES"),
            distributed: get_env_bool("DISTRIBUTED"),
            config_file: get_env("CONFIG"),
            verbose: get_env_bool("VERBOSE"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.environment.is_some()
            || self.max_retries.is_some()
            || self.retry_delay.is_some()
            || self.node_index.is_some()
            || self.total_nodes.is_some()
            || self.distributed.is_some()
            || self.config_file.is_some()
            || self.verbose.is_some()
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_ENV:          {:?}", ENV_PREFIX, self.environment);
        println!("  {}_MAX_RETRIES:  {:?}", ENV_PREFIX, self.max_retries);
        println!("  {}_RETRY_DELAY:  {:?}", ENV_PREFIX, self.retry_delay);
        println!("  {}_NODE_INDEX:   {:?}", ENV_PREFIX, self.node_index);
        println!("  {}_TOTAL_NODES:  {:?}", ENV_PREFIX, self.total_nodes);
        println!("  {}_DISTRIBUTED:  {:?}", ENV_PREFIX, self.distributed);
        println!("  {}_CONFIG:       {:?}", ENV_PREFIX, self.config_file);
        println!("  {}_VERBOSE:      {:?}", ENV_PREFIX, self.verbose);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.trim().parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Builder for setting environment variables (useful for testing)
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

impl EnvBuilder {
    /// Create a new environment builder
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    fn set(mut self, name: &str, value: String) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_{name}"), value));
        self
    }

    /// Set environment name
    pub fn environment(self, env: impl Into<String>) -> Self {
        self.set("ENV", env.into())
    }

    /// Set retry budget
    pub fn max_retries(self, max_retries: u32) -> Self {
        self.set("MAX_RETRIES", max_retries.to_string())
    }

    /// Set retry delay in seconds
    pub fn retry_delay(self, secs: f64) -> Self {
        self.set("RETRY_DELAY", secs.to_string())
    }

    /// Set shard coordinates and enable distributed mode
    pub fn shard(self, node_index: u32, total_nodes: u32) -> Self {
        self.set("NODE_INDEX", node_index.to_string())
            .set("TOTAL_NODES", total_nodes.to_string())
            .set("DISTRIBUTED", "true".to_string())
    }

    /// Set config file path
    pub fn config_file(self, path: impl Into<String>) -> Self {
        self.set("CONFIG", path.into())
    }

    /// Apply environment variables
    pub fn apply(self) {
        for (key, value) in self.vars {
            env::set_var(key, value);
        }
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        self.apply();

        EnvGuard { previous }
    }
}

impl Default for EnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that restores environment variables on drop
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all TESTWEAVE environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_ENV           Environment name (dev, staging, prod)");
    println!("  {ENV_PREFIX}_MAX_RETRIES   Retry budget per retried item");
    println!("  {ENV_PREFIX}_RETRY_DELAY   Pause between attempts in seconds");
    println!("  {ENV_PREFIX}_DISTRIBUTED   Enable shard filtering (true/false)");
    println!("  {ENV_PREFIX}_NODE_INDEX    Index of this node");
    println!("  {ENV_PREFIX}_TOTAL_NODES   Number of nodes");
    println!("  {ENV_PREFIX}_CONFIG        Path to configuration file");
    println!("  {ENV_PREFIX}_VERBOSE       Enable verbose output (true/false)");
    println!("  RUST_LOG               Log filter, overrides --log-level");
    println!();
    println!("Precedence: command-line flag > environment variable > config file > default");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_ENV=prod");
    println!("  export {ENV_PREFIX}_TOTAL_NODES=4 {ENV_PREFIX}_NODE_INDEX=1 {ENV_PREFIX}_DISTRIBUTED=true");
    println!("  testweave run --catalog suite.yaml");
}
