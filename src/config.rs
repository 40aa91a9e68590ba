//! TOML configuration parsing and validation.
//!
//! ```toml
//! [db]
//! path = "./data/paw.sqlite"
//!
//! [remote]
//! proxy_url = "https://proxy.example.com/forward"
//! proxy_token = "..."
//! credential = "secret_..."          # or PAWTRACK_REMOTE_CREDENTIAL
//!
//! [remote.collections]
//! pets = "remote-database-id"
//!
//! [sync]
//! max_attempts = 5
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use pawtrack_core::models::Collection;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Remote gateway settings. Proxy URL and credential may be absent; every
/// remote call then fails with a configuration error.
#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub proxy_token: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_version_header")]
    pub version_header: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempts per call when the remote answers 429.
    #[serde(default = "default_rate_limit_attempts")]
    pub rate_limit_attempts: u32,
    /// Collection name → remote database id.
    #[serde(default)]
    pub collections: HashMap<String, String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            proxy_url: None,
            proxy_token: None,
            credential: None,
            api_base: default_api_base(),
            version_header: default_version_header(),
            api_version: default_api_version(),
            timeout_secs: default_timeout_secs(),
            rate_limit_attempts: default_rate_limit_attempts(),
            collections: HashMap::new(),
        }
    }
}

impl RemoteConfig {
    pub fn database_id(&self, collection: Collection) -> Option<&str> {
        self.collections.get(collection.as_str()).map(String::as_str)
    }
}

fn default_api_base() -> String {
    "https://api.notion.com/v1".to_string()
}
fn default_version_header() -> String {
    "Notion-Version".to_string()
}
fn default_api_version() -> String {
    "2022-06-28".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_rate_limit_attempts() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Non-rate-limit failures after which an entry is parked as failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_secs: default_interval_secs(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_interval_secs() -> u64 {
    300
}
fn default_debounce_ms() -> u64 {
    1500
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.remote.rate_limit_attempts == 0 {
        anyhow::bail!("remote.rate_limit_attempts must be >= 1");
    }
    if config.remote.timeout_secs == 0 {
        anyhow::bail!("remote.timeout_secs must be > 0");
    }
    if config.sync.max_attempts == 0 {
        anyhow::bail!("sync.max_attempts must be >= 1");
    }
    if config.sync.interval_secs == 0 {
        anyhow::bail!("sync.interval_secs must be > 0");
    }

    for name in config.remote.collections.keys() {
        name.parse::<Collection>()
            .with_context(|| format!("Invalid key in [remote.collections]: '{}'", name))?;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("[db]\npath = \"/tmp/paw.sqlite\"\n").unwrap();
        assert_eq!(config.remote.rate_limit_attempts, 3);
        assert_eq!(config.sync.max_attempts, 5);
        assert!(config.remote.proxy_url.is_none());
        assert_eq!(config.remote.version_header, "Notion-Version");
    }

    #[test]
    fn test_collection_mapping() {
        let config = parse_config(
            r#"
[db]
path = "/tmp/paw.sqlite"

[remote.collections]
pets = "db-pets"
care_items = "db-care"
"#,
        )
        .unwrap();
        assert_eq!(config.remote.database_id(Collection::Pets), Some("db-pets"));
        assert_eq!(config.remote.database_id(Collection::Events), None);
    }

    #[test]
    fn test_rejects_unknown_collection() {
        let err = parse_config(
            "[db]\npath = \"/tmp/x\"\n[remote.collections]\nwidgets = \"db\"\n",
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("widgets"));
    }

    #[test]
    fn test_rejects_zero_attempts() {
        assert!(parse_config("[db]\npath = \"/tmp/x\"\n[sync]\nmax_attempts = 0\n").is_err());
    }
}
