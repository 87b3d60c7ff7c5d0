//! Configuration resolution for paneltrack-ingest
//!
//! Values that can be changed at runtime (API key, scoring config) resolve
//! Database → ENV → TOML; the rest come from the TOML file alone.

use paneltrack_common::config::{ExternalConfig, JobsConfig, TomlConfig};
use paneltrack_common::{Error, Result};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::models::ScoringConfig;

/// Environment variable holding the external catalog API key
pub const API_KEY_ENV: &str = "PANELTRACK_COMICVINE_API_KEY";

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 5730;

/// Resolved runtime settings of the ingest service
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Destination for moved/linked files
    pub library_root: PathBuf,
    pub external: ExternalConfig,
    pub jobs: JobsConfig,
}

impl IngestConfig {
    /// Settings from the TOML file; the library defaults to `<root>/library`
    pub fn from_toml(toml_config: &TomlConfig, root_folder: &std::path::Path) -> Self {
        Self {
            library_root: toml_config
                .library_root
                .clone()
                .unwrap_or_else(|| root_folder.join("library")),
            external: toml_config.external.clone(),
            jobs: toml_config.jobs.clone(),
        }
    }
}

/// Resolve the external catalog API key
///
/// **Priority:** Database → ENV → TOML. Returns `None` when no source has a
/// usable key; the service then runs with the external catalog disabled.
pub async fn resolve_comicvine_api_key(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
) -> Result<Option<String>> {
    let db_key = crate::db::settings::get_comicvine_api_key(db).await?;
    let env_key = std::env::var(API_KEY_ENV).ok().filter(|k| is_valid_key(k));
    let toml_key = toml_config
        .comicvine_api_key
        .clone()
        .filter(|k| is_valid_key(k));

    let sources: Vec<&str> = [
        db_key.as_ref().map(|_| "database"),
        env_key.as_ref().map(|_| "environment"),
        toml_key.as_ref().map(|_| "TOML"),
    ]
    .into_iter()
    .flatten()
    .collect();

    if sources.len() > 1 {
        warn!(
            "External catalog API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    match sources.first() {
        Some(source) => info!("External catalog API key loaded from {}", source),
        None => warn!(
            "External catalog API key not configured (set {} or comicvine_api_key in the TOML file); \
             external matching is disabled",
            API_KEY_ENV
        ),
    }

    Ok(db_key.or(env_key).or(toml_key))
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Resolve the scoring configuration
///
/// **Priority:** Database → TOML `[scoring]` → defaults. An invalid TOML table
/// is a configuration error; an invalid stored value falls back with a warning
/// so a bad write can still be corrected through the API.
pub async fn resolve_scoring_config(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
) -> Result<ScoringConfig> {
    match crate::db::settings::get_scoring_config(db).await {
        Ok(Some(config)) => match config.validate() {
            Ok(()) => {
                info!("Scoring config loaded from database");
                return Ok(config);
            }
            Err(e) => warn!("Stored scoring config rejected: {}", e),
        },
        Ok(None) => {}
        Err(e) => warn!("Stored scoring config unreadable: {}", e),
    }

    if let Some(table) = &toml_config.scoring {
        let config = ScoringConfig::from_toml_table(table.clone())
            .map_err(|e| Error::Config(format!("Invalid [scoring] section: {}", e)))?;
        info!("Scoring config loaded from TOML");
        return Ok(config);
    }

    Ok(ScoringConfig::default())
}

/// Process-wide, hot-reloadable scoring configuration
///
/// Readers take an `Arc` snapshot; a reload swaps the pointer, so a scoring
/// pass that already holds a snapshot is unaffected.
#[derive(Debug, Clone)]
pub struct ScoringConfigHandle {
    inner: Arc<RwLock<Arc<ScoringConfig>>>,
}

impl ScoringConfigHandle {
    pub fn new(config: ScoringConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub async fn snapshot(&self) -> Arc<ScoringConfig> {
        self.inner.read().await.clone()
    }

    /// Validate, persist, then swap
    pub async fn update(&self, db: &Pool<Sqlite>, config: ScoringConfig) -> Result<()> {
        config.validate().map_err(Error::InvalidInput)?;
        crate::db::settings::set_scoring_config(db, &config).await?;
        *self.inner.write().await = Arc::new(config);
        info!("Scoring config updated");
        Ok(())
    }
}
