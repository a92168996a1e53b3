use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use common::Object;
use tracing::{debug, info, warn};

use crate::identity::NodeIdentity;
use crate::predicate::is_tenant_backend;
use crate::provision::{ProvisionError, Provisioner};
use crate::store::{ClusterStore, StoreError};

/// Label selector for tenant backend workload groups.
pub const TENANT_TIER_SELECTOR: &[(&str, &str)] = &[("tier", "bfl")];
/// Delay before a reconcile that failed on a listing call is tried again.
pub const LISTING_RETRY_DELAY: Duration = Duration::from_secs(10);

/// What a reconcile request is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReconcileKey {
    pub namespace: String,
    pub name: String,
}

impl ReconcileKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// One request per triggering object, keyed by its namespace and name.
    pub fn for_object<O: Object>(obj: &O) -> Self {
        let meta = obj.metadata();
        Self::new(meta.namespace.clone(), meta.name.clone())
    }
}

impl fmt::Display for ReconcileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("failed to list {what}: {source}")]
    Listing {
        what: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("provisioning data directories for {namespace}: {source}")]
    Provision {
        namespace: String,
        #[source]
        source: ProvisionError,
    },
}

impl ReconcileError {
    /// Transient failures carry the delay after which the key should be retried.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ReconcileError::Listing { .. } => Some(LISTING_RETRY_DELAY),
            ReconcileError::Provision { .. } => None,
        }
    }
}

/// Makes sure every tenant backend scheduled anywhere in the cluster has its
/// data directories prepared on this node.
pub struct NodeInitReconciler {
    store: Arc<dyn ClusterStore>,
    identity: NodeIdentity,
    provisioner: Provisioner,
}

impl NodeInitReconciler {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        identity: NodeIdentity,
        provisioner: Provisioner,
    ) -> Self {
        Self {
            store,
            identity,
            provisioner,
        }
    }

    pub async fn reconcile(&self, key: &ReconcileKey) -> Result<(), ReconcileError> {
        info!("received nodeinit request, namespace: {:?}, name: {:?}", key.namespace, key.name);

        let nodes = self
            .store
            .list_nodes()
            .await
            .map_err(|source| ReconcileError::Listing {
                what: "nodes",
                source,
            })?;
        if !self.identity.contains_local(&nodes) {
            warn!("not current node {:?}, ignore", self.identity.local_address());
            return Ok(());
        }
        drop(nodes);

        let groups = self
            .store
            .list_workload_groups(TENANT_TIER_SELECTOR)
            .await
            .map_err(|source| ReconcileError::Listing {
                what: "workload groups",
                source,
            })?;

        for group in groups
            .iter()
            .filter(|g| is_tenant_backend(&g.metadata.namespace, &g.metadata.name))
        {
            let namespace = &group.metadata.namespace;
            debug!("creating {namespace:?} userdata dirs");
            let dirs = self
                .provisioner
                .provision(group)
                .map_err(|source| ReconcileError::Provision {
                    namespace: namespace.clone(),
                    source,
                })?;
            for (path, state) in dirs {
                debug!("{}: {state:?}", path.display());
            }
        }

        Ok(())
    }
}
