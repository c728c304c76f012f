use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::api::{AccessKey, DEFAULT_BASE_URL};
use crate::models::RouteQuery;

/// Environment variable that overrides `api.access_key`.
pub const ACCESS_KEY_ENV: &str = "AVIATIONSTACK_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub route: RouteConfig,
    pub collection: CollectionConfig,
    pub storage: StorageConfig,
    pub tracker: TrackerConfig,
    pub schedule: ScheduleConfig,
    pub logging: LoggingConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub access_key: String,
    pub base_url: String,
    pub timeout_seconds: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RouteConfig {
    pub origin: String,
    pub destination: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CollectionConfig {
    pub days_to_fetch: u32,
    pub flights_per_day_target: usize,
    /// Extra results requested per date to absorb rejected entries.
    pub fetch_surplus: usize,
    pub pause_between_dates_ms: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct TrackerConfig {
    pub poll_interval_seconds: u64,
    pub lookup_limit: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_hours: u64,
    /// Base delay for linear retry backoff.
    pub backoff_seconds: u64,
    pub max_retries: u32,
    /// `host:port` that must accept a TCP connection before a run starts.
    pub connectivity_probe: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            access_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_seconds: 10,
        }
    }
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            origin: "DEL".to_string(),
            destination: "BOM".to_string(),
        }
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            days_to_fetch: 7,
            flights_per_day_target: 3,
            fetch_surplus: 2,
            pause_between_dates_ms: 1000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("flight_history.db"),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 60,
            lookup_limit: 5,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_hours: 24,
            backoff_seconds: 10,
            max_retries: 5,
            connectivity_probe: "api.aviationstack.com:443".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
        }
    }
}

impl Config {
    /// Loads the TOML config at `path`.
    /// If it doesn't exist, writes the defaults there for the user to edit.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let mut config = match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Config::default();
                match toml::to_string_pretty(&config) {
                    Ok(toml_string) => {
                        if fs::write(path, toml_string).is_err() {
                            warn!("Could not write default {} to disk.", path.display());
                        }
                    }
                    Err(e) => warn!("Could not serialize default config: {e}"),
                }
                info!("Loaded default configuration.");
                config
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        if let Ok(key) = std::env::var(ACCESS_KEY_ENV) {
            config.api.access_key = key;
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.collection.days_to_fetch == 0 {
            return Err(ConfigError::Invalid {
                field: "collection.days_to_fetch",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }

    pub fn access_key(&self) -> Option<AccessKey> {
        AccessKey::parse(&self.api.access_key)
    }

    pub fn route(&self) -> RouteQuery {
        RouteQuery::new(&self.route.origin, &self.route.destination)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_seconds)
    }
}
