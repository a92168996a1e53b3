use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    // Xline endpoints
    pub xline_config: XlineConfig,
    pub cloud: CloudConfig,
    pub juicefs: JuicefsConfig,
    pub controller: ControllerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct XlineConfig {
    pub endpoints: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for XlineConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub sts_url: String,
    /// `{admin}` is replaced by the admin user name.
    pub settings_url_template: String,
    pub settings_timeout_secs: u64,
    pub sts_timeout_secs: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            sts_url: "https://cloud-api.bttcdn.com/v1/resource/stsToken/setup".to_string(),
            settings_url_template: "http://settings-service.user-space-{admin}/api/account"
                .to_string(),
            settings_timeout_secs: 2,
            sts_timeout_secs: 15,
        }
    }
}

impl CloudConfig {
    pub fn settings_url(&self, admin: &str) -> String {
        self.settings_url_template.replace("{admin}", admin)
    }

    pub fn settings_timeout(&self) -> Duration {
        Duration::from_secs(self.settings_timeout_secs)
    }

    pub fn sts_timeout(&self) -> Duration {
        Duration::from_secs(self.sts_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JuicefsConfig {
    pub binary: PathBuf,
    /// Redis config of the JuiceFS metadata engine, holds `bind` and `requirepass`.
    pub redis_conf: PathBuf,
    pub redis_port: u16,
    pub redis_db: u32,
}

impl Default for JuicefsConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/usr/local/bin/juicefs"),
            redis_conf: PathBuf::from("/olares/data/redis/etc/redis.conf"),
            redis_port: 6379,
            redis_db: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub workers: usize,
    /// Name of the cluster-scoped record holding the storage credentials.
    pub cluster_record: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            cluster_record: "terminus".to_string(),
        }
    }
}

/// Loads the YAML config at `path`, or the built-in defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let cfg: Config = serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "xline_config:\n  endpoints: [\"http://10.0.0.1:2379\"]\njuicefs:\n  redis_port: 6380\n"
        )
        .unwrap();

        let cfg = load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.xline_config.endpoints, vec!["http://10.0.0.1:2379"]);
        assert_eq!(cfg.juicefs.redis_port, 6380);
        assert_eq!(cfg.juicefs.redis_db, 1);
        assert_eq!(cfg.controller.cluster_record, "terminus");
        assert_eq!(cfg.cloud.settings_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn settings_url_substitutes_admin() {
        let cloud = CloudConfig::default();
        assert_eq!(
            cloud.settings_url("alice"),
            "http://settings-service.user-space-alice/api/account"
        );
    }

    #[test]
    fn no_path_means_defaults() {
        let cfg = load_config(None).unwrap();
        assert_eq!(cfg.controller.workers, 2);
        assert_eq!(cfg.juicefs.binary, PathBuf::from("/usr/local/bin/juicefs"));
    }

    #[test]
    fn unreadable_path_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/rkinit.yaml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }
}
