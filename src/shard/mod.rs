//! Shard selection
//!
//! Deterministic, stateless partitioning of the catalog across worker
//! nodes. Every node process must compute the same key hash, so the hash is
//! SHA-256 based and never seeded per process.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::catalog::TestCatalog;
use crate::error::{OrchestratorError, Result};
use crate::models::TestItem;

/// Marker pinning items with the same group name to one node
pub const SHARD_GROUP_MARKER: &str = "shard_group";

/// What an item is sharded by
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ShardMethod {
    /// Item identifier, or its `shard_group` name
    #[default]
    Hash,
    /// Owning module path
    Module,
}

impl FromStr for ShardMethod {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "hash" => Ok(ShardMethod::Hash),
            "module" => Ok(ShardMethod::Module),
            _ => Err(OrchestratorError::InvalidConfig(format!(
                "unknown shard method: {s} (expected hash or module)"
            ))),
        }
    }
}

impl ShardMethod {
    pub fn name(&self) -> &'static str {
        match self {
            ShardMethod::Hash => "hash",
            ShardMethod::Module => "module",
        }
    }
}

impl fmt::Display for ShardMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// First eight bytes of the SHA-256 digest, big-endian
pub fn stable_hash(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Key an item is sharded by under `method`
pub fn shard_key(item: &TestItem, method: ShardMethod) -> &str {
    match method {
        ShardMethod::Hash => item
            .closest_marker(SHARD_GROUP_MARKER)
            .and_then(|m| m.kwarg_str("name").or_else(|| m.str_args().next()))
            .unwrap_or_else(|| item.id()),
        ShardMethod::Module => item.module(),
    }
}

/// Whether `item` belongs to `node_index` out of `total_nodes`, hashing the
/// item identifier
pub fn assign(item: &TestItem, node_index: u32, total_nodes: u32) -> bool {
    total_nodes <= 1 || node_of(item.id(), total_nodes) == node_index
}

fn node_of(key: &str, total_nodes: u32) -> u32 {
    // total_nodes >= 1, so the remainder fits in u32
    (stable_hash(key) % u64::from(total_nodes)) as u32
}

/// Shard coordinates of one node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShardSelector {
    method: ShardMethod,
    node_index: u32,
    total_nodes: u32,
}

impl ShardSelector {
    /// Validated coordinates; `node_index` must lie in `[0, total_nodes)`
    pub fn new(node_index: u32, total_nodes: u32) -> Result<Self> {
        if total_nodes == 0 || node_index >= total_nodes {
            return Err(OrchestratorError::InvalidShard {
                node_index,
                total_nodes,
            });
        }
        Ok(Self {
            method: ShardMethod::Hash,
            node_index,
            total_nodes,
        })
    }

    /// Single-node selector that keeps every item
    pub fn single() -> Self {
        Self {
            method: ShardMethod::Hash,
            node_index: 0,
            total_nodes: 1,
        }
    }

    pub fn with_method(mut self, method: ShardMethod) -> Self {
        self.method = method;
        self
    }

    pub fn method(&self) -> ShardMethod {
        self.method
    }

    pub fn node_index(&self) -> u32 {
        self.node_index
    }

    pub fn total_nodes(&self) -> u32 {
        self.total_nodes
    }

    /// Node an item is assigned to
    pub fn node_for(&self, item: &TestItem) -> u32 {
        if self.total_nodes <= 1 {
            return 0;
        }
        node_of(shard_key(item, self.method), self.total_nodes)
    }

    /// Whether this node runs `item`
    pub fn assign(&self, item: &TestItem) -> bool {
        self.node_for(item) == self.node_index
    }

    /// Items of every node, in catalog order
    pub fn partition(&self, catalog: &TestCatalog) -> Vec<Vec<Arc<TestItem>>> {
        let mut nodes = vec![Vec::new(); self.total_nodes as usize];
        for item in catalog.all() {
            nodes[self.node_for(item) as usize].push(item.clone());
        }
        nodes
    }
}

impl Default for ShardSelector {
    fn default() -> Self {
        Self::single()
    }
}
