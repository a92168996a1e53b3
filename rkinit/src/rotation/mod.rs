pub mod juicefs;
pub mod schedule;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::ClusterRecord;
use tracing::{error, info};

pub use juicefs::{ConfigureError, JuicefsCli, MetaConfigurator, MetaSecret, SecretError};
pub use schedule::{ScheduleError, default_schedule, parse_schedule, run_schedule};

use crate::cloud::{CloudCredentialBundle, CloudError, StsRequest, TokenExchange};
use crate::config::{ControllerConfig, JuicefsConfig};
use crate::retry::{DEFAULT_RETRY, retry_on_conflict};
use crate::store::{ClusterStore, StoreError};

pub const CLUSTER_ID_LABEL: &str = "bytetrade.io/cluster-id";
pub const ACCESS_KEY_ANNOTATION: &str = "bytetrade.io/s3-ak";
pub const SECRET_KEY_ANNOTATION: &str = "bytetrade.io/s3-sk";
pub const SESSION_TOKEN_ANNOTATION: &str = "bytetrade.io/s3-sts";
/// Bucket value that turns rotation off.
pub const BUCKET_DISABLED: &str = "none";
/// Lifetime requested for every new set of credentials.
pub const ROTATION_VALIDITY: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    BucketUnset,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Skipped(SkipReason),
    Rotated,
}

#[derive(Debug, thiserror::Error)]
pub enum RotationError {
    #[error("cluster record {0} carries no cluster id")]
    MissingClusterId(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("token exchange failed: {0}")]
    Cloud(#[from] CloudError),
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error(transparent)]
    Apply(#[from] ConfigureError),
}

/// Cluster id and the credentials currently stored on the cluster record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredentials {
    pub cluster_id: String,
    pub access_key: String,
    pub secret_key: String,
    pub session_token: String,
}

impl StoredCredentials {
    pub fn from_record(record: &ClusterRecord) -> Option<Self> {
        let meta = &record.metadata;
        let cluster_id = meta
            .labels
            .get(CLUSTER_ID_LABEL)
            .filter(|id| !id.is_empty())?
            .clone();
        let annotation = |key: &str| meta.annotations.get(key).cloned().unwrap_or_default();
        Some(Self {
            cluster_id,
            access_key: annotation(ACCESS_KEY_ANNOTATION),
            secret_key: annotation(SECRET_KEY_ANNOTATION),
            session_token: annotation(SESSION_TOKEN_ANNOTATION),
        })
    }
}

/// Stores `creds` on the record, leaving every other field as found.
pub fn apply_credentials(record: &mut ClusterRecord, creds: &CloudCredentialBundle) {
    let annotations = &mut record.metadata.annotations;
    annotations.insert(ACCESS_KEY_ANNOTATION.to_string(), creds.access_key.clone());
    annotations.insert(SECRET_KEY_ANNOTATION.to_string(), creds.secret_key.clone());
    annotations.insert(
        SESSION_TOKEN_ANNOTATION.to_string(),
        creds.session_token.clone(),
    );
}

/// One credential rotation: exchange the stored credentials for fresh ones,
/// hand them to JuiceFS and, once JuiceFS accepted them, store them back on
/// the cluster record.
pub struct RotationJob {
    store: Arc<dyn ClusterStore>,
    exchange: Arc<dyn TokenExchange>,
    configurator: Arc<dyn MetaConfigurator>,
    bucket: Option<String>,
    secret_path: PathBuf,
    record_name: String,
}

impl RotationJob {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        exchange: Arc<dyn TokenExchange>,
        configurator: Arc<dyn MetaConfigurator>,
    ) -> Self {
        Self {
            store,
            exchange,
            configurator,
            bucket: None,
            secret_path: JuicefsConfig::default().redis_conf,
            record_name: ControllerConfig::default().cluster_record,
        }
    }

    pub fn with_bucket(mut self, bucket: Option<String>) -> Self {
        self.bucket = bucket;
        self
    }

    pub fn with_secret_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.secret_path = path.into();
        self
    }

    pub fn with_record_name(mut self, name: impl Into<String>) -> Self {
        self.record_name = name.into();
        self
    }

    pub async fn tick(&self) -> Result<TickOutcome, RotationError> {
        let bucket = match self.bucket.as_deref().map(str::trim) {
            None | Some("") => {
                error!("bucket is unknown");
                return Ok(TickOutcome::Skipped(SkipReason::BucketUnset));
            }
            Some(BUCKET_DISABLED) => return Ok(TickOutcome::Skipped(SkipReason::Disabled)),
            Some(bucket) => bucket.to_string(),
        };

        let (record, _) = self.store.get_cluster_record(&self.record_name).await?;
        let current = StoredCredentials::from_record(&record)
            .ok_or_else(|| RotationError::MissingClusterId(self.record_name.clone()))?;
        info!("found cluster id {}", current.cluster_id);

        info!("get refreshed session token from cloud");
        let req = StsRequest {
            prefix: current.cluster_id.clone(),
            cluster_id: current.cluster_id,
            access_key: current.access_key,
            secret_key: current.secret_key,
            session_token: current.session_token,
            bucket,
            duration_secs: ROTATION_VALIDITY.as_secs(),
        };
        let creds = self.exchange.exchange(&req).await?;

        let secret = MetaSecret::from_file(&self.secret_path).await?;
        if let Err(e) = self.configurator.configure(&secret, &creds).await {
            error!("refreshing juicefs config failed, cluster record left as is: {e}");
            return Err(e.into());
        }

        info!("juicefs refreshed, updating credentials on cluster record");
        self.store_credentials(&creds).await?;
        Ok(TickOutcome::Rotated)
    }

    async fn store_credentials(&self, creds: &CloudCredentialBundle) -> Result<(), StoreError> {
        let store = &self.store;
        let name = self.record_name.as_str();
        retry_on_conflict(
            DEFAULT_RETRY,
            || store.get_cluster_record(name),
            |record| apply_credentials(record, creds),
            |record, revision| async move {
                store
                    .update_cluster_record(&record, revision)
                    .await
                    .map(|_| ())
            },
        )
        .await
    }
}
