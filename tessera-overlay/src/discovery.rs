//! Network discovery collaborator
//!
//! The overlay only consumes what discovery has observed; the routing
//! protocol itself lives elsewhere.

use parking_lot::RwLock;
use std::collections::HashMap;
use tessera_core::error::Result;
use tessera_core::node::{NodeId, NodeRecord};

/// Source of freshly observed node records
#[async_trait::async_trait]
pub trait Discovery: Send + Sync {
    /// Nodes seen on the network, with address and last-seen time filled in
    async fn observed_nodes(&self) -> Result<Vec<NodeRecord>>;
}

/// Discovery backed by a settable in-process list
#[derive(Default)]
pub struct StaticDiscovery {
    nodes: RwLock<HashMap<NodeId, NodeRecord>>,
}

impl StaticDiscovery {
    pub fn new(nodes: impl IntoIterator<Item = NodeRecord>) -> Self {
        let discovery = Self::default();
        discovery.set_nodes(nodes);
        discovery
    }

    /// Replace the observed set
    pub fn set_nodes(&self, nodes: impl IntoIterator<Item = NodeRecord>) {
        let mut map = self.nodes.write();
        map.clear();
        map.extend(nodes.into_iter().map(|n| (n.id, n)));
    }

    /// Add or replace one observation
    pub fn observe(&self, node: NodeRecord) {
        self.nodes.write().insert(node.id, node);
    }

    pub fn forget(&self, id: &NodeId) -> bool {
        self.nodes.write().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

#[async_trait::async_trait]
impl Discovery for StaticDiscovery {
    async fn observed_nodes(&self) -> Result<Vec<NodeRecord>> {
        Ok(self.nodes.read().values().cloned().collect())
    }
}
