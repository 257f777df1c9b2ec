//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: DOCSTORE_, sections separated by `__`)
//! 2. Current working directory: ./config.toml
//! 3. XDG config directory: ~/.config/docstore-repository/{service_name}/config.toml
//! 4. System directory: /etc/docstore-repository/{service_name}/config.toml
//! 5. Default values
//!
//! ```toml
//! [service]
//! name = "orders"
//! log_level = "debug"
//!
//! [database]
//! connection_string = "memory://localhost/?replicaSet=rs0"
//! database_name = "orders"
//!
//! [repository]
//! default_limit = 25
//! sequence_strategy = "transactional"
//! ```
//!
//! The same settings from the environment:
//! `DOCSTORE_DATABASE__DATABASE_NAME=orders`, `DOCSTORE_REPOSITORY__DEFAULT_LIMIT=25`.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::filter::DEFAULT_AVAILABILITY_OFFSET_MINUTES;
use crate::sequence::{SequenceStrategy, DEFAULT_SEQUENCE_COLLECTION};
use crate::types::DEFAULT_NEAR_RADIUS_METERS;

const ENV_PREFIX: &str = "DOCSTORE_";
const XDG_PREFIX: &str = "docstore-repository";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,

    /// Document store connection
    pub database: DatabaseConfig,

    /// Repository behaviour
    #[serde(default)]
    pub repository: RepositoryConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    pub name: String,

    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Document store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection string, e.g. `memory://` or `memory://host/?replicaSet=rs0`
    pub connection_string: String,

    /// Database holding the entity collections
    pub database_name: String,
}

/// Repository configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Page size used when a request does not specify one
    #[serde(default = "default_limit")]
    pub default_limit: i64,

    /// Collection holding sequence counters
    #[serde(default = "default_sequence_collection")]
    pub sequence_collection: String,

    /// How sequence values are generated
    #[serde(default)]
    pub sequence_strategy: SequenceStrategy,

    /// UTC offset, in minutes, used by availability-window filters
    #[serde(default = "default_availability_offset")]
    pub availability_utc_offset_minutes: i32,

    /// Radius applied to proximity searches without an explicit one
    #[serde(default = "default_near_radius")]
    pub default_near_radius_meters: f64,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            sequence_collection: default_sequence_collection(),
            sequence_strategy: SequenceStrategy::default(),
            availability_utc_offset_minutes: default_availability_offset(),
            default_near_radius_meters: default_near_radius(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_limit() -> i64 {
    50
}

fn default_sequence_collection() -> String {
    DEFAULT_SEQUENCE_COLLECTION.to_string()
}

fn default_availability_offset() -> i32 {
    DEFAULT_AVAILABILITY_OFFSET_MINUTES
}

fn default_near_radius() -> f64 {
    DEFAULT_NEAR_RADIUS_METERS
}

impl Config {
    /// Load configuration from all sources
    ///
    /// The service name is inferred from the binary name.
    pub fn load() -> Result<Self> {
        let service_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| XDG_PREFIX.to_string());

        Self::load_for_service(&service_name)
    }

    /// Load configuration for a specific service name
    pub fn load_for_service(service_name: &str) -> Result<Self> {
        let config_paths = Self::find_config_paths(service_name);

        tracing::debug!("Searching for config files in order:");
        for path in &config_paths {
            tracing::debug!("  - {}", path.display());
        }

        let mut defaults = Config::default();
        defaults.service.name = service_name.to_string();
        let mut figment = Figment::new().merge(Serialized::defaults(defaults));

        // Lowest priority first so higher priority files override
        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("Loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// Bypasses the XDG and system directories. Environment variables still
    /// override the file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Config file locations, highest priority first
    fn find_config_paths(service_name: &str) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        let xdg_dirs = xdg::BaseDirectories::with_prefix(XDG_PREFIX);
        let config_file_path = Path::new(service_name).join("config.toml");
        if let Some(path) = xdg_dirs.find_config_file(&config_file_path) {
            paths.push(path);
        }

        paths.push(
            PathBuf::from("/etc")
                .join(XDG_PREFIX)
                .join(service_name)
                .join("config.toml"),
        );

        paths
    }

    /// Rejects settings the repository cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.database.connection_string.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "database.connection_string must not be empty".to_string(),
            ));
        }
        if self.database.database_name.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "database.database_name must not be empty".to_string(),
            ));
        }
        if self.repository.sequence_collection.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "repository.sequence_collection must not be empty".to_string(),
            ));
        }
        if self.repository.default_limit == 0 {
            return Err(Error::InvalidConfig(
                "repository.default_limit must not be zero".to_string(),
            ));
        }
        if !(self.repository.default_near_radius_meters > 0.0) {
            return Err(Error::InvalidConfig(
                "repository.default_near_radius_meters must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: XDG_PREFIX.to_string(),
                log_level: default_log_level(),
            },
            database: DatabaseConfig {
                connection_string: "memory://".to_string(),
                database_name: "docstore".to_string(),
            },
            repository: RepositoryConfig::default(),
        }
    }
}
