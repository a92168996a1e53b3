pub mod memory;
pub mod xline;

use async_trait::async_trait;
use common::{ClusterRecord, Node, User, WorkloadGroup};

pub use memory::MemoryStore;
pub use xline::XlineStore;

use crate::retry::Conflict;

pub const NODES_PREFIX: &str = "/registry/nodes/";
pub const WORKLOAD_GROUPS_PREFIX: &str = "/registry/workloadgroups/";
pub const CLUSTER_RECORDS_PREFIX: &str = "/registry/clusterrecords/";
pub const USERS_PREFIX: &str = "/registry/users/";

/// Optimistic-concurrency token of a stored object (the xline mod revision).
pub type Revision = i64;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object {0} not found")]
    NotFound(String),
    #[error("object {0} was modified concurrently")]
    Conflict(String),
    #[error(transparent)]
    Xline(#[from] Box<etcd_client::Error>),
    #[error("failed to decode {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error(transparent)]
    Encode(#[from] serde_yaml::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<etcd_client::Error> for StoreError {
    fn from(e: etcd_client::Error) -> Self {
        StoreError::Xline(Box::new(e))
    }
}

impl Conflict for StoreError {
    fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Read and write access to the cluster objects this agent cares about.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError>;

    /// Lists workload groups in every namespace whose labels match `selector`.
    async fn list_workload_groups(
        &self,
        selector: &[(&str, &str)],
    ) -> Result<Vec<WorkloadGroup>, StoreError>;

    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    async fn get_cluster_record(&self, name: &str)
    -> Result<(ClusterRecord, Revision), StoreError>;

    /// Replaces the record only if it is still at `expected`, otherwise
    /// fails with [`StoreError::Conflict`].
    async fn update_cluster_record(
        &self,
        record: &ClusterRecord,
        expected: Revision,
    ) -> Result<Revision, StoreError>;
}

pub fn node_key(name: &str) -> String {
    format!("{NODES_PREFIX}{name}")
}

pub fn workload_group_key(namespace: &str, name: &str) -> String {
    format!("{WORKLOAD_GROUPS_PREFIX}{namespace}/{name}")
}

pub fn cluster_record_key(name: &str) -> String {
    format!("{CLUSTER_RECORDS_PREFIX}{name}")
}

pub fn user_key(name: &str) -> String {
    format!("{USERS_PREFIX}{name}")
}
