//! Local catalog tables: series (volumes) and issues
//!
//! Series are looked up by normalized name; issues by normalized number
//! within a series, or by the file path they were imported from.

use paneltrack_common::text::normalize_series_name;
use paneltrack_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{LocalIssue, LocalSeries};

/// Fields for a series that does not exist yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSeries {
    pub name: String,
    pub start_year: Option<i32>,
    pub volume_number: Option<i32>,
    pub publisher: Option<String>,
    pub folder_path: Option<String>,
    pub external_id: Option<i64>,
}

/// Series whose normalized name equals `name`'s
///
/// Ordered so the best candidate comes first: matching start year, then
/// matching volume number, then oldest record.
pub async fn find_series_by_name(
    pool: &SqlitePool,
    name: &str,
    year: Option<i32>,
    volume: Option<i32>,
) -> Result<Vec<LocalSeries>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM series
        WHERE normalized_name = ?
        ORDER BY (start_year IS ?) DESC, (volume_number IS ?) DESC, id
        "#,
    )
    .bind(normalize_series_name(name))
    .bind(year)
    .bind(volume)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_series).collect())
}

pub async fn find_series_by_external_id(
    pool: &SqlitePool,
    external_id: i64,
) -> Result<Option<LocalSeries>> {
    let row = sqlx::query("SELECT * FROM series WHERE external_id = ?")
        .bind(external_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.as_ref().map(row_to_series))
}

pub async fn load_series(pool: &SqlitePool, id: i64) -> Result<Option<LocalSeries>> {
    let row = sqlx::query("SELECT * FROM series WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(row.as_ref().map(row_to_series))
}

pub async fn insert_series(pool: &SqlitePool, series: &NewSeries) -> Result<LocalSeries> {
    let row = sqlx::query(
        r#"
        INSERT INTO series (name, normalized_name, start_year, volume_number, publisher, folder_path, external_id)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&series.name)
    .bind(normalize_series_name(&series.name))
    .bind(series.start_year)
    .bind(series.volume_number)
    .bind(&series.publisher)
    .bind(&series.folder_path)
    .bind(series.external_id)
    .fetch_one(pool)
    .await?;

    Ok(row_to_series(&row))
}

/// Issue with an already-normalized `number` in a series
pub async fn find_issue(
    pool: &SqlitePool,
    series_id: i64,
    number: &str,
) -> Result<Option<LocalIssue>> {
    let row = sqlx::query("SELECT * FROM issues WHERE series_id = ? AND number = ?")
        .bind(series_id)
        .bind(number)
        .fetch_optional(pool)
        .await?;

    Ok(row.as_ref().map(row_to_issue))
}

/// Issue imported from `path`
pub async fn find_issue_by_path(pool: &SqlitePool, path: &str) -> Result<Option<LocalIssue>> {
    let row = sqlx::query("SELECT * FROM issues WHERE file_path = ?")
        .bind(path)
        .fetch_optional(pool)
        .await?;

    Ok(row.as_ref().map(row_to_issue))
}

/// Register an issue, or fill in the missing file/external id of an existing
/// one with the same number
pub async fn upsert_issue(
    pool: &SqlitePool,
    series_id: i64,
    number: &str,
    external_id: Option<i64>,
    file_path: Option<&str>,
) -> Result<LocalIssue> {
    let row = sqlx::query(
        r#"
        INSERT INTO issues (series_id, number, external_id, file_path)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (series_id, number) DO UPDATE SET
            external_id = COALESCE(issues.external_id, excluded.external_id),
            file_path = COALESCE(issues.file_path, excluded.file_path)
        RETURNING *
        "#,
    )
    .bind(series_id)
    .bind(number)
    .bind(external_id)
    .bind(file_path)
    .fetch_one(pool)
    .await?;

    Ok(row_to_issue(&row))
}

fn row_to_series(row: &SqliteRow) -> LocalSeries {
    LocalSeries {
        id: row.get("id"),
        name: row.get("name"),
        start_year: row.get("start_year"),
        volume_number: row.get("volume_number"),
        publisher: row.get("publisher"),
        folder_path: row.get("folder_path"),
        external_id: row.get("external_id"),
    }
}

fn row_to_issue(row: &SqliteRow) -> LocalIssue {
    LocalIssue {
        id: row.get("id"),
        series_id: row.get("series_id"),
        number: row.get("number"),
        external_id: row.get("external_id"),
        file_path: row.get("file_path"),
    }
}
