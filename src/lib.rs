//! testweave - hook-driven test orchestration
//!
//! A session takes a [`TestCatalog`](catalog::TestCatalog) through
//! collection, optional sharding across nodes, sequential execution with
//! bounded retries, and aggregation into reports. Plugins observe and
//! steer every phase through typed hook points.
//!
//! ## Usage
//!
//! ```bash
//! # Run a catalog in the prod environment
//! testweave run --catalog suite.yaml --env prod
//!
//! # Run the second of four shards and export reports
//! testweave run --catalog suite.yaml --distributed-mode --node-index 1 --total-nodes 4 \
//!     --export-results --generate-retry-report
//!
//! # Show the plan without executing it
//! testweave list --catalog suite.yaml --env prod
//! ```

pub mod catalog;
pub mod cli;
pub mod collection;
pub mod config;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod models;
pub mod output;
pub mod plugins;
pub mod results;
pub mod session;
pub mod shard;
pub mod utils;

pub use error::{OrchestratorError, Result};
pub use session::{SessionOrchestrator, SessionOutcome};
