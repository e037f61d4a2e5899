//! Configuration loading and config file resolution
//!
//! The engine itself is constructed from already-opened handles; this module
//! only covers the bootstrap TOML the CLI wrapper reads to open them.
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. User config file (`~/.config/cid-minter/config.toml`)
//! 4. System config file (`/etc/cid-minter/config.toml`)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "CID_MINTER_CONFIG";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
pub struct MinterConfig {
    /// Cluster (Zephir) database, opened read-only
    pub cluster_db: PathBuf,

    /// Local minter store (cache table and counter), created if missing
    pub minter_db: PathBuf,

    /// Concordance `primary-lookup` store, opened read-only
    pub primary_lookup_db: PathBuf,

    /// Concordance `cluster-lookup` store, opened read-only
    pub cluster_lookup_db: PathBuf,

    /// Zero-padded width of minted CIDs
    ///
    /// Default: 9. Fixtures and tests use 9 digits; one schema note mentions
    /// 11, so the width stays configurable.
    #[serde(default = "default_cid_width")]
    pub cid_width: usize,

    /// Deadline for each individual store query
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Pool size for each SQLite store
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Records minted in parallel by the batch command
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_cid_width() -> usize {
    9
}

fn default_query_timeout_ms() -> u64 {
    5000
}

fn default_max_connections() -> u32 {
    10
}

fn default_batch_concurrency() -> usize {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

impl MinterConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: MinterConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Read config {} failed: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        // u64 holds 19 digits; 18 keeps every padded counter value parseable
        if !(1..=18).contains(&self.cid_width) {
            return Err(Error::Config(format!(
                "cid_width must be between 1 and 18, got {}",
                self.cid_width
            )));
        }
        if self.query_timeout_ms == 0 {
            return Err(Error::Config("query_timeout_ms must be positive".to_string()));
        }
        if self.max_connections == 0 {
            return Err(Error::Config("max_connections must be positive".to_string()));
        }
        if self.batch_concurrency == 0 {
            return Err(Error::Config("batch_concurrency must be positive".to_string()));
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Resolve the config file path following the priority order above
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Result<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Ok(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    // Priority 3 and 4: user then system config file
    let user_config = dirs::config_dir().map(|d| d.join("cid-minter").join("config.toml"));
    let system_config = PathBuf::from("/etc/cid-minter/config.toml");

    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }
    if system_config.exists() {
        return Ok(system_config);
    }

    Err(Error::Config(format!(
        "No config file found. Pass --config, set {}, or create ~/.config/cid-minter/config.toml",
        CONFIG_ENV_VAR
    )))
}
