use std::sync::Arc;

use async_trait::async_trait;
use common::{ClusterRecord, Node, User, WorkloadGroup};
use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, GetOptions, Txn, TxnOp, WatchOptions,
    WatchStream, Watcher,
};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::warn;

use super::{
    ClusterStore, NODES_PREFIX, Revision, StoreError, USERS_PREFIX, WORKLOAD_GROUPS_PREFIX,
    cluster_record_key,
};
use crate::config::XlineConfig;

/// Objects are kept the same way the rest of rk8s keeps them:
/// k:/registry/nodes/{name} v:yaml of the node
/// k:/registry/workloadgroups/{namespace}/{name} v:yaml of the group
/// k:/registry/clusterrecords/{name} v:yaml of the record
#[derive(Clone)]
pub struct XlineStore {
    client: Arc<RwLock<Client>>,
}

impl XlineStore {
    pub async fn new(config: &XlineConfig) -> Result<Self, StoreError> {
        let opts = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => {
                Some(ConnectOptions::default().with_user(user.clone(), pass.clone()))
            }
            _ => None,
        };
        let client = Client::connect(config.endpoints.clone(), opts).await?;
        Ok(Self {
            client: Arc::new(RwLock::new(client)),
        })
    }

    /// Returns every `(key, value)` under `prefix` and the revision the read was served at.
    pub async fn snapshot_with_rev(
        &self,
        prefix: &str,
    ) -> Result<(Vec<(String, String)>, Revision), StoreError> {
        let mut client = self.client.write().await;
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;
        let rev = resp.header().map(|h| h.revision()).unwrap_or(0);
        let items = resp
            .kvs()
            .iter()
            .map(|kv| {
                (
                    String::from_utf8_lossy(kv.key()).to_string(),
                    String::from_utf8_lossy(kv.value()).to_string(),
                )
            })
            .collect();
        Ok((items, rev))
    }

    /// Prefix watch with previous values, starting at `start_rev`.
    pub async fn watch_prefix(
        &self,
        prefix: &str,
        start_rev: Revision,
    ) -> Result<(Watcher, WatchStream), StoreError> {
        let opts = WatchOptions::new()
            .with_prefix()
            .with_prev_key()
            .with_start_revision(start_rev);
        let mut client = self.client.write().await;
        let (watcher, stream) = client.watch(prefix, Some(opts)).await?;
        Ok((watcher, stream))
    }

    /// Decodes every object under `prefix`. Values that fail to parse are
    /// skipped with a warning, a single bad object must not hide the rest.
    async fn list_objects<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, StoreError> {
        let (items, _) = self.snapshot_with_rev(prefix).await?;
        let mut objects = Vec::with_capacity(items.len());
        for (key, value) in items {
            match serde_yaml::from_str::<T>(&value) {
                Ok(obj) => objects.push(obj),
                Err(e) => warn!("Ignoring undecodable object {key}: {e}"),
            }
        }
        Ok(objects)
    }
}

#[async_trait]
impl ClusterStore for XlineStore {
    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError> {
        self.list_objects(NODES_PREFIX).await
    }

    async fn list_workload_groups(
        &self,
        selector: &[(&str, &str)],
    ) -> Result<Vec<WorkloadGroup>, StoreError> {
        let groups: Vec<WorkloadGroup> = self.list_objects(WORKLOAD_GROUPS_PREFIX).await?;
        Ok(groups
            .into_iter()
            .filter(|g| g.metadata.matches_labels(selector))
            .collect())
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        self.list_objects(USERS_PREFIX).await
    }

    async fn get_cluster_record(
        &self,
        name: &str,
    ) -> Result<(ClusterRecord, Revision), StoreError> {
        let key = cluster_record_key(name);
        let mut client = self.client.write().await;
        let resp = client.get(key.as_str(), None).await?;
        let kv = resp
            .kvs()
            .first()
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        let record = serde_yaml::from_slice(kv.value())
            .map_err(|source| StoreError::Decode { key, source })?;
        Ok((record, kv.mod_revision()))
    }

    async fn update_cluster_record(
        &self,
        record: &ClusterRecord,
        expected: Revision,
    ) -> Result<Revision, StoreError> {
        let key = cluster_record_key(&record.metadata.name);
        let value = serde_yaml::to_string(record)?;

        let cmp = Compare::mod_revision(key.as_str(), CompareOp::Equal, expected);
        let put = TxnOp::put(key.as_str(), value, None);
        let txn = Txn::new().when([cmp]).and_then([put]);

        let mut client = self.client.write().await;
        let resp = client.txn(txn).await?;
        if !resp.succeeded() {
            return Err(StoreError::Conflict(key));
        }
        Ok(resp.header().map(|h| h.revision()).unwrap_or(expected))
    }
}
