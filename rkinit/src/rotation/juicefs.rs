use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::cloud::CloudCredentialBundle;
use crate::config::JuicefsConfig;

const BIND_KEY: &str = "bind";
const PASSWORD_KEY: &str = "requirepass";

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("metadata engine config has no `{0}` entry")]
    Missing(&'static str),
}

/// Address and password of the JuiceFS metadata engine.
#[derive(Clone, PartialEq, Eq)]
pub struct MetaSecret {
    pub address: String,
    pub password: String,
}

impl fmt::Debug for MetaSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaSecret")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl MetaSecret {
    pub async fn from_file(path: &Path) -> Result<Self, SecretError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SecretError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&content)
    }

    /// Redis-style config: one `key value` pair per line. The last `bind`
    /// and `requirepass` lines win.
    pub fn parse(content: &str) -> Result<Self, SecretError> {
        let mut address = None;
        let mut password = None;
        for line in content.lines() {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(BIND_KEY), Some(v)) => address = Some(v.to_string()),
                (Some(PASSWORD_KEY), Some(v)) => password = Some(v.to_string()),
                _ => {}
            }
        }
        Ok(Self {
            address: address.ok_or(SecretError::Missing(BIND_KEY))?,
            password: password.ok_or(SecretError::Missing(PASSWORD_KEY))?,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigureError {
    #[error("failed to run {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },
    /// `output` is stdout followed by stderr, not interleaved.
    #[error("juicefs config exited with {status}: {output}")]
    Failed { status: ExitStatus, output: String },
}

/// Points the filesystem client at a new set of object storage credentials.
#[async_trait]
pub trait MetaConfigurator: Send + Sync {
    async fn configure(
        &self,
        secret: &MetaSecret,
        creds: &CloudCredentialBundle,
    ) -> Result<(), ConfigureError>;
}

/// Runs `juicefs config <meta-url> --access-key .. --secret-key .. --session-token ..`.
#[derive(Debug, Clone)]
pub struct JuicefsCli {
    binary: PathBuf,
    port: u16,
    db: u32,
}

impl JuicefsCli {
    pub fn new(cfg: &JuicefsConfig) -> Self {
        Self {
            binary: cfg.binary.clone(),
            port: cfg.redis_port,
            db: cfg.redis_db,
        }
    }

    pub fn redis_url(&self, secret: &MetaSecret) -> String {
        format!(
            "redis://:{}@{}:{}/{}",
            secret.password, secret.address, self.port, self.db
        )
    }

    /// Runs `juicefs config` and returns what it printed, stdout followed by
    /// stderr. A non-zero exit is an error carrying the same text.
    pub async fn run(
        &self,
        secret: &MetaSecret,
        creds: &CloudCredentialBundle,
    ) -> Result<String, ConfigureError> {
        let out = Command::new(&self.binary)
            .arg("config")
            .arg(self.redis_url(secret))
            .args(["--access-key", &creds.access_key])
            .args(["--secret-key", &creds.secret_key])
            .args(["--session-token", &creds.session_token])
            .output()
            .await
            .map_err(|source| ConfigureError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&out.stderr));
        if !out.status.success() {
            return Err(ConfigureError::Failed {
                status: out.status,
                output,
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl MetaConfigurator for JuicefsCli {
    async fn configure(
        &self,
        secret: &MetaSecret,
        creds: &CloudCredentialBundle,
    ) -> Result<(), ConfigureError> {
        info!(
            "refreshing juicefs config on {}:{} with access key {}",
            secret.address, self.port, creds.access_key
        );
        let output = self.run(secret, creds).await?;
        info!("juicefs config output: {}", output.trim_end());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn parses_bind_and_password() {
        let conf = "# redis\nport 6379\nbind 10.0.0.3\nrequirepass s3cr3t\n\nappendonly yes\n";
        let secret = MetaSecret::parse(conf).unwrap();
        assert_eq!(secret.address, "10.0.0.3");
        assert_eq!(secret.password, "s3cr3t");
        assert!(!format!("{secret:?}").contains("s3cr3t"));
    }

    #[test]
    fn missing_keys_are_reported() {
        assert!(matches!(
            MetaSecret::parse("requirepass x\n"),
            Err(SecretError::Missing("bind"))
        ));
        assert!(matches!(
            MetaSecret::parse("bind 1.2.3.4\nrequirepass\n"),
            Err(SecretError::Missing("requirepass"))
        ));
    }

    #[tokio::test]
    async fn unreadable_file() {
        let err = MetaSecret::from_file(Path::new("/nonexistent/redis.conf"))
            .await
            .unwrap_err();
        assert!(matches!(err, SecretError::Read { .. }));
    }

    #[test]
    fn redis_url_uses_port_and_db() {
        let cli = JuicefsCli::new(&JuicefsConfig::default());
        let secret = MetaSecret {
            address: "10.0.0.3".into(),
            password: "pw".into(),
        };
        assert_eq!(cli.redis_url(&secret), "redis://:pw@10.0.0.3:6379/1");
    }

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("juicefs");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn failing_command_returns_combined_output() {
        let tmp = tempfile::tempdir().unwrap();
        let cli = JuicefsCli::new(&JuicefsConfig {
            binary: script(tmp.path(), "echo out; echo err >&2; exit 3"),
            ..Default::default()
        });
        let secret = MetaSecret {
            address: "127.0.0.1".into(),
            password: "pw".into(),
        };
        match cli.configure(&secret, &CloudCredentialBundle::default()).await {
            Err(ConfigureError::Failed { status, output }) => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(output, "out\nerr\n");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn successful_run_returns_stdout_then_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let cli = JuicefsCli::new(&JuicefsConfig {
            binary: script(tmp.path(), "echo warn >&2; echo done"),
            ..Default::default()
        });
        let secret = MetaSecret {
            address: "127.0.0.1".into(),
            password: "pw".into(),
        };
        let output = cli
            .run(&secret, &CloudCredentialBundle::default())
            .await
            .unwrap();
        assert_eq!(output, "done\nwarn\n");
    }

    #[tokio::test]
    async fn passes_credentials_as_arguments() {
        let tmp = tempfile::tempdir().unwrap();
        let args_file = tmp.path().join("args");
        let cli = JuicefsCli::new(&JuicefsConfig {
            binary: script(tmp.path(), &format!("echo \"$@\" > {}", args_file.display())),
            ..Default::default()
        });
        let secret = MetaSecret {
            address: "127.0.0.1".into(),
            password: "pw".into(),
        };
        let creds = CloudCredentialBundle {
            access_key: "AK".into(),
            secret_key: "SK".into(),
            session_token: "ST".into(),
            ..Default::default()
        };
        cli.configure(&secret, &creds).await.unwrap();
        let args = std::fs::read_to_string(args_file).unwrap();
        assert_eq!(
            args.trim(),
            "config redis://:pw@127.0.0.1:6379/1 --access-key AK --secret-key SK --session-token ST"
        );
    }
}
