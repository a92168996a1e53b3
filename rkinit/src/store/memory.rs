use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use common::{ClusterRecord, Node, User, WorkloadGroup};

use super::{ClusterStore, Revision, StoreError, cluster_record_key};

/// In-process store with the same revision semantics as xline: every write
/// bumps a global revision and the record keeps the revision it was last
/// modified at.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    revision: Revision,
    nodes: BTreeMap<String, Node>,
    groups: BTreeMap<(String, String), WorkloadGroup>,
    users: BTreeMap<String, User>,
    records: HashMap<String, (ClusterRecord, Revision)>,
}

impl Inner {
    fn bump(&mut self) -> Revision {
        self.revision += 1;
        self.revision
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_node(&self, node: Node) -> Revision {
        let mut inner = self.lock();
        inner.nodes.insert(node.metadata.name.clone(), node);
        inner.bump()
    }

    pub fn put_workload_group(&self, group: WorkloadGroup) -> Revision {
        let mut inner = self.lock();
        let key = (
            group.metadata.namespace.clone(),
            group.metadata.name.clone(),
        );
        inner.groups.insert(key, group);
        inner.bump()
    }

    pub fn put_user(&self, user: User) -> Revision {
        let mut inner = self.lock();
        inner.users.insert(user.metadata.name.clone(), user);
        inner.bump()
    }

    /// Unconditional write, bypassing the revision check.
    pub fn put_cluster_record(&self, record: ClusterRecord) -> Revision {
        let mut inner = self.lock();
        let rev = inner.bump();
        inner
            .records
            .insert(record.metadata.name.clone(), (record, rev));
        rev
    }

    pub fn cluster_record(&self, name: &str) -> Option<ClusterRecord> {
        self.lock().records.get(name).map(|(r, _)| r.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-write; the maps are still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn list_nodes(&self) -> Result<Vec<Node>, StoreError> {
        Ok(self.lock().nodes.values().cloned().collect())
    }

    async fn list_workload_groups(
        &self,
        selector: &[(&str, &str)],
    ) -> Result<Vec<WorkloadGroup>, StoreError> {
        Ok(self
            .lock()
            .groups
            .values()
            .filter(|g| g.metadata.matches_labels(selector))
            .cloned()
            .collect())
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.lock().users.values().cloned().collect())
    }

    async fn get_cluster_record(
        &self,
        name: &str,
    ) -> Result<(ClusterRecord, Revision), StoreError> {
        self.lock()
            .records
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(cluster_record_key(name)))
    }

    async fn update_cluster_record(
        &self,
        record: &ClusterRecord,
        expected: Revision,
    ) -> Result<Revision, StoreError> {
        let mut inner = self.lock();
        let name = record.metadata.name.clone();
        match inner.records.get(&name) {
            Some((_, rev)) if *rev == expected => {}
            // xline compares against mod_revision 0 for absent keys.
            None if expected == 0 => {}
            _ => return Err(StoreError::Conflict(cluster_record_key(&name))),
        }
        let rev = inner.bump();
        inner.records.insert(name, (record.clone(), rev));
        Ok(rev)
    }
}
