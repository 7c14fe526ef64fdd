//! Error types for the orchestration engine
//!
//! Skip, assertion and resource failures are not errors: they are outcome
//! values produced by the execution protocol. The variants here abort a run.

use thiserror::Error;

use crate::models::ExitStatus;

/// Errors that abort a session
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// A hook callback itself failed
    #[error("hook '{hook}' failed in plugin '{plugin}': {source}")]
    Extension {
        hook: &'static str,
        plugin: String,
        #[source]
        source: anyhow::Error,
    },

    /// A hook was invoked again from inside one of its own callbacks
    #[error("hook '{hook}' invoked recursively from within its own callback chain")]
    ReentrantHook { hook: &'static str },

    /// Shard coordinates outside of `[0, total_nodes)`
    #[error("invalid shard coordinates: node index {node_index} with {total_nodes} total nodes")]
    InvalidShard { node_index: u32, total_nodes: u32 },

    /// Any other invalid configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Two catalog items share an identifier
    #[error("duplicate test item identifier: {0}")]
    DuplicateItem(String),

    /// Malformed catalog input
    #[error("invalid catalog: {0}")]
    Catalog(String),
}

impl OrchestratorError {
    /// Whether this error belongs to the configuration class
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            OrchestratorError::ReentrantHook { .. }
                | OrchestratorError::InvalidShard { .. }
                | OrchestratorError::InvalidConfig(_)
                | OrchestratorError::DuplicateItem(_)
                | OrchestratorError::Catalog(_)
        )
    }

    /// Whether this error was raised by a plugin callback
    pub fn is_extension(&self) -> bool {
        matches!(self, OrchestratorError::Extension { .. })
    }

    /// Process exit status for a run aborted by this error
    pub fn exit_status(&self) -> ExitStatus {
        if self.is_extension() {
            ExitStatus::ExtensionError
        } else {
            ExitStatus::ConfigurationError
        }
    }
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;
