pub mod nonce;
pub mod types;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

pub use types::{
    AccountData, AccountValue, AdminAccount, CloudCredentialBundle, Envelope, ProxyRequest,
    StsRequest,
};

use crate::config::CloudConfig;
use crate::store::{ClusterStore, StoreError};
use nonce::{NONCE_HEADER, NonceError};

/// User annotation naming the user's role in the cluster.
pub const OWNER_ROLE_ANNOTATION: &str = "bytetrade.io/owner-role";
const ADMIN_ROLES: [&str; 2] = ["owner", "admin"];
/// `code` the STS service answers with on success.
const STS_OK: i64 = 200;

#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("unexpected http status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("remote returned code {code}: {message}")]
    Code { code: i64, message: String },
    #[error("response carries no data")]
    EmptyData,
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    Nonce(#[from] NonceError),
    #[error("no random key configured for the settings nonce")]
    MissingKey,
}

/// Turns an admin's stored credentials into fresh short-lived ones.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self, req: &StsRequest) -> Result<CloudCredentialBundle, CloudError>;
}

/// HTTP client for the settings service and the cloud STS endpoint.
/// Single shot: failures are returned to the caller, nothing is retried here.
#[derive(Clone)]
pub struct CloudClient {
    http: Client,
    cfg: CloudConfig,
    random_key: Option<String>,
}

impl CloudClient {
    pub fn new(cfg: CloudConfig, random_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            cfg,
            random_key: random_key.filter(|k| !k.is_empty()),
        }
    }

    /// Asks the admin's settings service for the account the cluster was
    /// registered with.
    pub async fn fetch_account(&self, admin: &str) -> Result<AdminAccount, CloudError> {
        let key = self.random_key.as_deref().ok_or(CloudError::MissingKey)?;
        let nonce = nonce::generate(key.as_bytes(), Utc::now().timestamp())?;
        let url = self.cfg.settings_url(admin);
        debug!("fetching account of {admin} from {url}");

        let resp = self
            .http
            .post(&url)
            .timeout(self.cfg.settings_timeout())
            .header(NONCE_HEADER, nonce)
            .json(&ProxyRequest::get_account())
            .send()
            .await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        parse_account_envelope(status, &body)
    }
}

#[async_trait]
impl TokenExchange for CloudClient {
    async fn exchange(&self, req: &StsRequest) -> Result<CloudCredentialBundle, CloudError> {
        info!(
            "requesting sts token for cluster {}, bucket {}, duration {}s",
            req.cluster_id, req.bucket, req.duration_secs
        );
        let resp = self
            .http
            .post(&self.cfg.sts_url)
            .timeout(self.cfg.sts_timeout())
            .form(&req.form())
            .send()
            .await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        let bundle = parse_sts(status, &body)?;
        debug!("got sts token {bundle:?}");
        Ok(bundle)
    }
}

fn decode_envelope<T: DeserializeOwned>(
    status: StatusCode,
    body: &[u8],
) -> Result<Envelope<T>, CloudError> {
    if status != StatusCode::OK {
        let body = String::from_utf8_lossy(body).into_owned();
        error!("remote answered {status}: {body}");
        return Err(CloudError::Status { status, body });
    }
    Ok(serde_json::from_slice(body)?)
}

/// Settings service answer: `code` must be 0 and `data.value` is itself a
/// JSON document holding the account.
pub fn parse_account_envelope(status: StatusCode, body: &[u8]) -> Result<AdminAccount, CloudError> {
    let envelope: Envelope<AccountData> = decode_envelope(status, body)?;
    if envelope.code != 0 {
        return Err(CloudError::Code {
            code: envelope.code,
            message: envelope.message,
        });
    }
    let data = envelope.data.ok_or(CloudError::EmptyData)?;
    let value: AccountValue = serde_json::from_str(&data.value)?;
    Ok(AdminAccount {
        userid: value.userid,
        token: value.token,
    })
}

/// STS answer: `code` must be 200 and `data` present.
pub fn parse_sts(status: StatusCode, body: &[u8]) -> Result<CloudCredentialBundle, CloudError> {
    let envelope: Envelope<CloudCredentialBundle> = decode_envelope(status, body)?;
    if envelope.code != STS_OK {
        return Err(CloudError::Code {
            code: envelope.code,
            message: envelope.message,
        });
    }
    envelope.data.ok_or(CloudError::EmptyData)
}

/// First user whose owner-role annotation marks it as owner or admin.
pub async fn find_admin_user(store: &dyn ClusterStore) -> Result<Option<String>, StoreError> {
    let users = store.list_users().await?;
    Ok(users
        .into_iter()
        .find(|u| {
            u.metadata
                .annotation(OWNER_ROLE_ANNOTATION)
                .is_some_and(|role| ADMIN_ROLES.contains(&role))
        })
        .map(|u| u.metadata.name))
}
