//! Service configuration
//!
//! Resolution order:
//! 1. Explicit path (`--config`)
//! 2. `COSTSYNC_CONFIG` environment variable
//! 3. `<config_dir>/costsync/config.toml`
//! 4. Compiled defaults
//!
//! Individual CLI flags are applied on top by the binary.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const CONFIG_ENV_VAR: &str = "COSTSYNC_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub broker: BrokerConfig,
    pub matching: MatchingConfig,
    pub live: LiveConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8001,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding `qto.db` and `cost.db`
    pub data_dir: PathBuf,
    /// Keep everything in memory (tests, dry runs)
    pub in_memory: bool,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            in_memory: false,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl StoreConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Kafka REST proxy base URL; no URL means the producer stays offline
    pub rest_proxy_url: Option<String>,
    pub topic: String,
    pub batch_size: usize,
    /// Pause between batches only when a delivery spans more batches than this
    pub pause_after_batches: usize,
    pub batch_pause_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            rest_proxy_url: None,
            topic: "cost-data".to_string(),
            batch_size: 100,
            pause_after_batches: 5,
            batch_pause_ms: 100,
        }
    }
}

impl BrokerConfig {
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub cache_ttl_secs: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self { cache_ttl_secs: 300 }
    }
}

impl MatchingConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub heartbeat_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub producer_retry_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            request_timeout_secs: 120,
            producer_retry_secs: 30,
        }
    }
}

impl LiveConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn producer_retry(&self) -> Duration {
        Duration::from_secs(self.producer_retry_secs)
    }
}

impl ServiceConfig {
    /// Parse a config file
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: ServiceConfig =
            toml::from_str(&content).map_err(|source| CoreError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load following the resolution order; a missing default file yields defaults
    pub fn load(explicit: Option<&Path>) -> CoreResult<Self> {
        // Priority 1: explicit path
        if let Some(path) = explicit {
            debug!(path = %path.display(), "Loading config from explicit path");
            return Self::from_file(path);
        }

        // Priority 2: environment variable
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            debug!(path = %path, "Loading config from {}", CONFIG_ENV_VAR);
            return Self::from_file(Path::new(&path));
        }

        // Priority 3: user config directory
        if let Some(path) = default_config_path() {
            if path.exists() {
                debug!(path = %path.display(), "Loading config from user config dir");
                return Self::from_file(&path);
            }
        }

        // Priority 4: compiled defaults
        debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.broker.batch_size == 0 {
            return Err(CoreError::InvalidConfig {
                message: "broker.batch_size must be at least 1".to_string(),
            });
        }
        if self.live.heartbeat_interval_secs == 0 {
            return Err(CoreError::InvalidConfig {
                message: "live.heartbeat_interval_secs must be at least 1".to_string(),
            });
        }
        if self.broker.topic.trim().is_empty() {
            return Err(CoreError::InvalidConfig {
                message: "broker.topic must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// `<config_dir>/costsync/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("costsync").join("config.toml"))
}

/// OS-dependent data directory, falling back to a local folder
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("costsync"))
        .unwrap_or_else(|| PathBuf::from("./costsync_data"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.broker.batch_size, 100);
        assert_eq!(config.broker.pause_after_batches, 5);
        assert_eq!(config.matching.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.live.heartbeat_interval(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nport = 9100\n\n[broker]\nrest_proxy_url = \"http://localhost:8082\"\n"
        )
        .unwrap();

        let config = ServiceConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(
            config.broker.rest_proxy_url.as_deref(),
            Some("http://localhost:8082")
        );
        assert_eq!(config.broker.batch_size, 100);
    }

    #[test]
    fn test_invalid_batch_size_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[broker]\nbatch_size = 0").unwrap();

        let err = ServiceConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig { .. }));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();

        let err = ServiceConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, CoreError::ConfigParse { .. }));
    }
}
