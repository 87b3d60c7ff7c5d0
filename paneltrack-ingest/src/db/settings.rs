//! Settings database operations
//!
//! Key-value pairs in the `settings` table. Values are TEXT; typed accessors
//! below parse them.

use paneltrack_common::{Error, Result};
use sqlx::{Pool, Sqlite};

use crate::models::ScoringConfig;

const COMICVINE_API_KEY: &str = "comicvine_api_key";
const SCORING_CONFIG: &str = "scoring_config";

/// External catalog API key stored in the database, if any
pub async fn get_comicvine_api_key(db: &Pool<Sqlite>) -> Result<Option<String>> {
    let key: Option<String> = get_setting(db, COMICVINE_API_KEY).await?;
    Ok(key.filter(|k| !k.trim().is_empty()))
}

pub async fn set_comicvine_api_key(db: &Pool<Sqlite>, key: String) -> Result<()> {
    set_setting(db, COMICVINE_API_KEY, key).await
}

/// Scoring configuration saved through the settings API
///
/// Stored as JSON so partial documents from older versions still load with
/// defaults for new fields.
pub async fn get_scoring_config(db: &Pool<Sqlite>) -> Result<Option<ScoringConfig>> {
    let raw: Option<String> = get_setting(db, SCORING_CONFIG).await?;
    match raw {
        Some(json) => {
            let config: ScoringConfig = serde_json::from_str(&json)
                .map_err(|e| Error::Config(format!("Stored scoring config is invalid: {}", e)))?;
            Ok(Some(config))
        }
        None => Ok(None),
    }
}

pub async fn set_scoring_config(db: &Pool<Sqlite>, config: &ScoringConfig) -> Result<()> {
    let json = serde_json::to_string(config)?;
    set_setting(db, SCORING_CONFIG, json).await
}

async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    row.map(|(value,)| {
        value
            .parse::<T>()
            .map_err(|e| Error::Config(format!("Parse setting {} failed: {}", key, e)))
    })
    .transpose()
}

async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;

    Ok(())
}
