use common::Node;
use tracing::info;

use crate::store::{ClusterStore, StoreError};

/// Labels that mark a node as the cluster's control node.
pub const CONTROL_NODE_LABELS: [&str; 2] = [
    "node-role.kubernetes.io/master",
    "node-role.kubernetes.io/control-plane",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Control,
    Worker,
}

#[derive(Debug, thiserror::Error)]
#[error("local node address must not be empty")]
pub struct EmptyAddress;

/// Who "this node" is, as far as the cluster is concerned: the node whose
/// `InternalIP` equals the address handed to us at startup.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    local_address: String,
}

impl NodeIdentity {
    pub fn new(local_address: impl Into<String>) -> Result<Self, EmptyAddress> {
        let local_address = local_address.into();
        if local_address.trim().is_empty() {
            return Err(EmptyAddress);
        }
        Ok(Self { local_address })
    }

    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    pub fn is_local(&self, node: &Node) -> bool {
        node.internal_ips().any(|ip| ip == self.local_address)
    }

    pub fn contains_local(&self, nodes: &[Node]) -> bool {
        nodes.iter().any(|n| self.is_local(n))
    }

    pub fn is_control_node(&self, nodes: &[Node]) -> bool {
        nodes
            .iter()
            .filter(|n| CONTROL_NODE_LABELS.iter().any(|l| n.has_label(l)))
            .any(|n| self.is_local(n))
    }

    /// Startup-time role check. Errors are returned as-is: a process that
    /// cannot tell where it runs must not guess.
    pub async fn resolve_role(&self, store: &dyn ClusterStore) -> Result<NodeRole, StoreError> {
        let nodes = store.list_nodes().await?;
        let role = if self.is_control_node(&nodes) {
            NodeRole::Control
        } else {
            NodeRole::Worker
        };
        info!("node {} resolved as {role:?}", self.local_address);
        Ok(role)
    }
}
