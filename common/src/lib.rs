use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};

/// Address type reported by the node agent for the node's cluster-internal address.
pub const NODE_INTERNAL_IP: &str = "InternalIP";

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ObjectMeta {
    pub name: String,
    /// Empty for cluster-scoped objects.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
    /// Metadata owned by other writers (uid, timestamps, finalizers, ...),
    /// carried through untouched.
    #[serde(flatten)]
    pub rest: BTreeMap<String, JsonValue>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Returns the annotation value if it is present and not empty.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Every `(key, value)` pair of the selector must be present in the labels.
    pub fn matches_labels(&self, selector: &[(&str, &str)]) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.labels.get(*k).is_some_and(|l| l == v))
    }
}

/// Anything stored under `/registry/<kind>/` that carries object metadata.
pub trait Object {
    fn metadata(&self) -> &ObjectMeta;
}

/// Node spec
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct NodeSpec {
    #[serde(rename = "podCIDR", default)]
    pub pod_cidr: String, // Pod network CIDR assigned to this node
}

/// Node status
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct NodeStatus {
    #[serde(default)]
    pub capacity: HashMap<String, String>,
    #[serde(default)]
    pub allocatable: HashMap<String, String>,
    #[serde(default)]
    pub addresses: Vec<NodeAddress>, // Node IPs, hostnames, etc.
    #[serde(default)]
    pub conditions: Vec<NodeCondition>,
}

/// Node address entry
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NodeAddress {
    #[serde(rename = "type")]
    pub address_type: String, // e.g., "InternalIP", "Hostname"
    pub address: String,
}

/// Node condition entry
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NodeCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String, // "True" | "False" | "Unknown"
    #[serde(rename = "lastHeartbeatTime", default)]
    pub last_heartbeat_time: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Node {
    #[serde(rename = "apiVersion", default = "default_v1")]
    pub api_version: String,
    #[serde(default = "default_node_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: NodeSpec,
    #[serde(default)]
    pub status: NodeStatus,
}

fn default_v1() -> String {
    "v1".to_string()
}

fn default_node_kind() -> String {
    "Node".to_string()
}

impl Node {
    /// Builds a node that reports a single internal address.
    pub fn with_internal_ip(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            api_version: default_v1(),
            kind: default_node_kind(),
            metadata: ObjectMeta::new("", name),
            spec: NodeSpec::default(),
            status: NodeStatus {
                addresses: vec![NodeAddress {
                    address_type: NODE_INTERNAL_IP.to_string(),
                    address: address.into(),
                }],
                ..Default::default()
            },
        }
    }

    pub fn internal_ips(&self) -> impl Iterator<Item = &str> {
        self.status
            .addresses
            .iter()
            .filter(|a| a.address_type == NODE_INTERNAL_IP && !a.address.is_empty())
            .map(|a| a.address.as_str())
    }

    pub fn has_label(&self, key: &str) -> bool {
        self.metadata.labels.contains_key(key)
    }
}

impl Object for Node {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct WorkloadGroupSpec {
    #[serde(default)]
    pub replicas: u32,
    #[serde(rename = "serviceName", default)]
    pub service_name: String,
}

/// A tenant's backend unit, the rk8s counterpart of a stateful set.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WorkloadGroup {
    #[serde(rename = "apiVersion", default = "default_apps_v1")]
    pub api_version: String,
    #[serde(default = "default_workload_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: WorkloadGroupSpec,
}

fn default_apps_v1() -> String {
    "apps/v1".to_string()
}

fn default_workload_kind() -> String {
    "WorkloadGroup".to_string()
}

impl WorkloadGroup {
    pub fn new(metadata: ObjectMeta) -> Self {
        Self {
            api_version: default_apps_v1(),
            kind: default_workload_kind(),
            metadata,
            spec: WorkloadGroupSpec::default(),
        }
    }
}

impl Object for WorkloadGroup {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

/// Cluster-scoped singleton record. Only `metadata` is interpreted; every
/// other top-level field is carried through `rest` untouched so that a
/// read-modify-write never drops data owned by someone else.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ClusterRecord {
    #[serde(rename = "apiVersion", default = "default_sys_version")]
    pub api_version: String,
    #[serde(default = "default_record_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub rest: BTreeMap<String, JsonValue>,
}

fn default_sys_version() -> String {
    "sys.bytetrade.io/v1alpha1".to_string()
}

fn default_record_kind() -> String {
    "Terminus".to_string()
}

impl ClusterRecord {
    pub fn new(metadata: ObjectMeta) -> Self {
        Self {
            api_version: default_sys_version(),
            kind: default_record_kind(),
            metadata,
            rest: BTreeMap::new(),
        }
    }
}

impl Object for ClusterRecord {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct User {
    #[serde(rename = "apiVersion", default = "default_iam_version")]
    pub api_version: String,
    #[serde(default = "default_user_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub rest: BTreeMap<String, JsonValue>,
}

fn default_iam_version() -> String {
    "iam.kubesphere.io/v1alpha2".to_string()
}

fn default_user_kind() -> String {
    "User".to_string()
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            api_version: default_iam_version(),
            kind: default_user_kind(),
            metadata: ObjectMeta::new("", name),
            rest: BTreeMap::new(),
        }
    }
}

impl Object for User {
    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}
