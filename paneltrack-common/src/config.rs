//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit TOML config file
pub const CONFIG_PATH_ENV: &str = "PANELTRACK_CONFIG";

/// Environment variable naming the data root folder
pub const ROOT_FOLDER_ENV: &str = "PANELTRACK_ROOT";

/// Logging section of the TOML file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set
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

fn default_log_level() -> String {
    "info".to_string()
}

/// External catalog client settings (`[external]`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExternalConfig {
    /// Base URL of the external catalog API
    pub base_url: String,
    /// Requests allowed per rate-limit window
    pub requests_per_window: u32,
    /// Length of the rate-limit window in seconds
    pub window_secs: u64,
    /// Fraction (0.0-1.0) of each window during which requests are spaced out
    pub burst_guard_fraction: f64,
    /// Minimum gap between requests inside the guarded portion, in milliseconds
    pub min_gap_ms: u64,
    /// Retries on a throttling response before giving up on the call
    pub max_retries: u32,
    /// Initial retry backoff in milliseconds (doubles per attempt)
    pub retry_backoff_ms: u64,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Volumes narrowed by issue number per search
    pub issue_lookup_limit: usize,
    /// Consecutive throttle-exhausted items before a job is failed
    pub max_consecutive_throttle_failures: u32,
    /// Lifetime of a cached search response in seconds
    pub search_cache_ttl_secs: i64,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            base_url: "https://comicvine.gamespot.com/api".to_string(),
            requests_per_window: 200,
            window_secs: 3600,
            burst_guard_fraction: 0.25,
            min_gap_ms: 1000,
            max_retries: 3,
            retry_backoff_ms: 2000,
            request_timeout_secs: 30,
            issue_lookup_limit: 5,
            max_consecutive_throttle_failures: 3,
            search_cache_ttl_secs: 86_400,
        }
    }
}

/// Job settings (`[jobs]`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobsConfig {
    /// Bulk target sets larger than this run as background jobs
    pub async_bulk_threshold: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            async_bulk_threshold: 10,
        }
    }
}

/// Contents of `paneltrack-ingest.toml`
///
/// Every field is optional; a missing file yields `TomlConfig::default()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// Data folder holding `paneltrack.db`
    #[serde(default)]
    pub root_folder: Option<PathBuf>,
    /// Bind address for the HTTP server
    #[serde(default)]
    pub bind_address: Option<String>,
    /// Port for the HTTP server
    #[serde(default)]
    pub port: Option<u16>,
    /// Destination folder for processed comics
    #[serde(default)]
    pub library_root: Option<PathBuf>,
    /// External catalog API key
    #[serde(default)]
    pub comicvine_api_key: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub external: ExternalConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    /// Raw `[scoring]` table, interpreted by the ingest service
    #[serde(default)]
    pub scoring: Option<toml::Table>,
}

/// Locate the TOML config file
///
/// Priority: explicit path, `PANELTRACK_CONFIG`, then
/// `<config_dir>/paneltrack/<file_name>`.
pub fn config_file_path(explicit: Option<&Path>, file_name: &str) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }

    dirs::config_dir().map(|d| d.join("paneltrack").join(file_name))
}

/// Load a TOML config file
///
/// A missing file is not an error: defaults are returned. A file that exists
/// but cannot be parsed is a configuration error.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Root folder resolution, highest priority first:
/// 1. Command-line argument
/// 2. `PANELTRACK_ROOT` environment variable
/// 3. TOML `root_folder`
/// 4. OS-dependent default
pub fn resolve_root_folder(cli_arg: Option<&Path>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("paneltrack"))
        .unwrap_or_else(|| PathBuf::from("./paneltrack_data"))
}
