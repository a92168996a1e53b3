use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// `{code, message, data}` wrapper used by both remote services.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxyRequest {
    pub op: String,
    #[serde(rename = "datatype")]
    pub data_type: String,
    pub version: String,
    pub group: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<JsonValue>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub data: String,
}

impl ProxyRequest {
    pub fn get_account() -> Self {
        Self {
            op: "getAccount".to_string(),
            data_type: "account".to_string(),
            version: "v1".to_string(),
            group: "service.settings".to_string(),
            param: None,
            data: "settings-account-space".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountData {
    #[serde(default)]
    pub name: String,
    /// JSON document encoded as a string, see [`AccountValue`].
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountValue {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub userid: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub expired: JsonValue,
}

/// Identity and token of the cluster admin as known to the settings service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminAccount {
    pub userid: String,
    pub token: String,
}

/// Short-lived object storage credentials handed out by the cloud.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CloudCredentialBundle {
    #[serde(default)]
    pub cloud: String, // "AWS"
    #[serde(default)]
    pub bucket: String,
    #[serde(rename = "st", default)]
    pub session_token: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(rename = "sk", default)]
    pub secret_key: String,
    #[serde(rename = "ak", default)]
    pub access_key: String,
    #[serde(default)]
    pub expiration: String, // unix millis as a string
    #[serde(default)]
    pub region: String,
}

// Secrets stay out of logs.
impl std::fmt::Debug for CloudCredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudCredentialBundle")
            .field("cloud", &self.cloud)
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("access_key", &self.access_key)
            .field("expiration", &self.expiration)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Parameters of one STS exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct StsRequest {
    pub cluster_id: String,
    pub access_key: String,
    pub secret_key: String,
    pub session_token: String,
    pub bucket: String,
    pub prefix: String,
    pub duration_secs: u64,
}

impl StsRequest {
    pub fn form(&self) -> [(&'static str, String); 7] {
        [
            ("clusterId", self.cluster_id.clone()),
            ("ak", self.access_key.clone()),
            ("sk", self.secret_key.clone()),
            ("st", self.session_token.clone()),
            ("bucket", self.bucket.clone()),
            ("bucketPrefix", self.prefix.clone()),
            ("durationSeconds", self.duration_secs.to_string()),
        ]
    }
}
