//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

/// Hook-driven test orchestration with retries, sharding and reports
#[derive(Parser, Debug)]
#[command(name = "testweave")]
#[command(version)]
#[command(about = "Collect, shard, run and report a test catalog")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a test catalog
    Run(RunArgs),

    /// Show the collected, ordered plan without executing it
    List(ListArgs),

    /// Show the per-node assignment of a catalog
    Shard(ShardArgs),

    /// Print the JSON schema of the session report
    Schema,

    /// Print environment variable help
    Env {
        /// Also print the values currently set
        #[arg(long)]
        show: bool,
    },

    /// Manage configuration files
    Config(ConfigArgs),
}

/// Session settings shared by `run` and `list`; unset flags fall back to
/// the environment, then the config file
#[derive(ClapArgs, Debug)]
pub struct SessionArgs {
    /// Catalog file (JSON or YAML)
    #[arg(short, long)]
    pub catalog: PathBuf,

    /// Configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Environment name used by gating plugins
    #[arg(long = "env")]
    pub environment: Option<String>,

    /// Retry budget per retried item
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Pause between retry attempts in seconds
    #[arg(long)]
    pub retry_delay: Option<f64>,

    /// Retry every item, marked or not
    #[arg(long)]
    pub retry_all: bool,

    /// Enable shard filtering
    #[arg(long)]
    pub distributed_mode: bool,

    /// Index of this node
    #[arg(long)]
    pub node_index: Option<u32>,

    /// Number of nodes
    #[arg(long)]
    pub total_nodes: Option<u32>,

    /// Shard key (hash, module)
    #[arg(long)]
    pub shard_method: Option<String>,

    /// Session variables visible to plugins
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,

    /// Output format (table, json, json-pretty, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

/// Arguments for the run command
#[derive(ClapArgs, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Write the JSON results report
    #[arg(long)]
    pub export_results: bool,

    /// Results report path
    #[arg(long)]
    pub results_path: Option<PathBuf>,

    /// Write the retry report
    #[arg(long)]
    pub generate_retry_report: bool,

    /// Retry report path
    #[arg(long)]
    pub retry_report_path: Option<PathBuf>,

    /// Write one CSV row per attempt
    #[arg(long)]
    pub csv: Option<PathBuf>,
}

/// Arguments for the list command
#[derive(ClapArgs, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub session: SessionArgs,
}

/// Arguments for the shard command
#[derive(ClapArgs, Debug)]
pub struct ShardArgs {
    /// Catalog file (JSON or YAML)
    #[arg(short, long)]
    pub catalog: PathBuf,

    /// Number of nodes
    #[arg(long, default_value = "2")]
    pub total_nodes: u32,

    /// Shard key (hash, module)
    #[arg(long, default_value = "hash")]
    pub shard_method: String,

    /// Output format (table, json, json-pretty, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

/// Arguments for configuration management
#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Output file path
        #[arg(short, long, default_value = "./testweave.yaml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Validate a configuration file
    Validate {
        /// File to validate (defaults to the discovered one)
        file: Option<PathBuf>,
    },
}

/// Split `KEY=VALUE`
pub fn parse_var(raw: &str) -> Option<(String, String)> {
    let (key, value) = raw.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}
