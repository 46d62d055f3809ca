//! Configuration management.
//!
//! Settings come from a TOML (or JSON) file; every section is optional and
//! falls back to its defaults. `DATABASE_URL` overrides the configured
//! database.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scheduler::{LivenessConfig, SchedulerConfig};
use crate::scrapers::{BrowserEngineConfig, ChallengeConfig};

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "tocwatch.db";

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILENAME: &str = "tocwatch.toml";

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "TOCWATCH_CONFIG";

/// HTTP request settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Politeness delay between requests to the same host.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    /// User agent: unset for the crate's own, "impersonate" for a random
    /// browser UA, anything else is sent as is.
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_request_delay_ms() -> u64 {
    500
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            user_agent: None,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database path or `sqlite:` URL.
    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub liveness: LivenessConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub challenge: ChallengeConfig,

    #[serde(default)]
    pub browser: BrowserEngineConfig,

    /// File this config was loaded from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load the config file named by `path`, `TOCWATCH_CONFIG`, or
    /// `tocwatch.toml` in the working directory, in that order.
    ///
    /// An explicitly named file must exist; a missing default file just
    /// yields the defaults.
    pub async fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        match explicit {
            Some(path) => Self::load_from_path(&path).await,
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_FILENAME);
                if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    Self::load_from_path(&path).await
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Load configuration from a specific file path.
    /// `.json` files are parsed as JSON, everything else as TOML.
    pub async fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

        let mut config: Config = match ext {
            "json" => serde_json::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("Failed to parse JSON config: {}", e))?,
            _ => toml::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("Failed to parse TOML config: {}", e))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Directory holding the config file, used to resolve relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Database URL: `DATABASE_URL`, then the config, then the data directory.
    pub fn database_url(&self) -> String {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                return url;
            }
        }
        self.database_url_without_env()
    }

    fn database_url_without_env(&self) -> String {
        match &self.database {
            Some(db) if db.starts_with("sqlite:") => db.clone(),
            Some(db) => {
                let path = PathBuf::from(db);
                let path = match self.base_dir() {
                    Some(base) if path.is_relative() && !base.as_os_str().is_empty() => {
                        base.join(path)
                    }
                    _ => path,
                };
                format!("sqlite:{}", path.display())
            }
            None => format!(
                "sqlite:{}",
                default_data_dir().join(DEFAULT_DATABASE_FILENAME).display()
            ),
        }
    }
}

/// Default data directory: the platform data dir, else the home dir.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tocwatch")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_load_toml_with_partial_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tocwatch.toml");
        tokio::fs::write(
            &path,
            r#"
database = "data/watch.db"

[scheduler]
max_active = 4

[http]
user_agent = "impersonate"

[challenge]
decode_emails = true
"#,
        )
        .await
        .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        assert_eq!(config.scheduler.max_active, 4);
        assert_eq!(config.scheduler.capacity(), 8);
        assert_eq!(config.scheduler.min_interval_ms, 60_000);
        assert_eq!(config.http.user_agent.as_deref(), Some("impersonate"));
        assert_eq!(config.http.request_delay_ms, 500);
        assert!(config.challenge.decode_emails);
        assert_eq!(config.challenge.challenges_to_solve, 3);
        assert!(config.liveness.enabled);
        assert_eq!(
            config.database_url_without_env(),
            format!("sqlite:{}", dir.path().join("data/watch.db").display())
        );
    }

    #[tokio::test]
    async fn test_load_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tocwatch.json");
        tokio::fs::write(&path, r#"{"liveness": {"enabled": false}}"#)
            .await
            .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        assert!(!config.liveness.enabled);
        assert_eq!(config.http.timeout_secs, 30);
    }

    #[tokio::test]
    async fn test_explicit_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Config::load(Some(&missing)).await.is_err());
    }

    #[test]
    fn test_sqlite_url_kept_as_is() {
        let config = Config {
            database: Some("sqlite:/var/lib/tocwatch.db".to_string()),
            ..Default::default()
        };
        assert_eq!(config.database_url_without_env(), "sqlite:/var/lib/tocwatch.db");

        let config = Config::default();
        assert!(config
            .database_url_without_env()
            .ends_with(DEFAULT_DATABASE_FILENAME));
    }
}
