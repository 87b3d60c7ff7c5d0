//! Candidate item database operations

use chrono::Utc;
use paneltrack_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use super::batches::parse_timestamp;
use crate::models::{CandidateItem, ItemCounts, ItemFilter, ItemStatus, MatchPresence};

/// Insert a scanned item, or refresh the scan fields of an existing item with
/// the same `(batch_id, source)`
///
/// Match state, search cache and any status set by review are kept; a pending
/// item takes the status the scan assigned. Returns the stored item's id.
pub async fn upsert_item(pool: &SqlitePool, item: &CandidateItem, position: i64) -> Result<Uuid> {
    let metadata = serde_json::to_string(&item.metadata)?;
    let notes = serde_json::to_string(&item.notes)?;
    let local_match = item.local_match.as_ref().map(serde_json::to_string).transpose()?;
    let external_match = item.external_match.as_ref().map(serde_json::to_string).transpose()?;

    let (id,): (String,) = sqlx::query_as(
        r#"
        INSERT INTO candidate_items (
            id, batch_id, position, source, file_size, extension, series_name,
            metadata, status, local_match, external_match, notes, error,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (batch_id, source) DO UPDATE SET
            position = excluded.position,
            file_size = excluded.file_size,
            extension = excluded.extension,
            series_name = excluded.series_name,
            metadata = excluded.metadata,
            status = CASE WHEN candidate_items.status = 'pending'
                          THEN excluded.status ELSE candidate_items.status END,
            local_match = COALESCE(candidate_items.local_match, excluded.local_match),
            notes = excluded.notes,
            error = excluded.error,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(item.id.to_string())
    .bind(item.batch_id.to_string())
    .bind(position)
    .bind(&item.source)
    .bind(item.file_size)
    .bind(&item.extension)
    .bind(&item.metadata.series_name)
    .bind(metadata)
    .bind(item.status.as_str())
    .bind(local_match)
    .bind(external_match)
    .bind(notes)
    .bind(&item.error)
    .bind(item.created_at.to_rfc3339())
    .bind(Utc::now().to_rfc3339())
    .fetch_one(pool)
    .await?;

    parse_id(&id)
}

/// Write back every mutable field of an item; returns false if it no longer exists
pub async fn save_item(pool: &SqlitePool, item: &CandidateItem) -> Result<bool> {
    let metadata = serde_json::to_string(&item.metadata)?;
    let notes = serde_json::to_string(&item.notes)?;
    let local_match = item.local_match.as_ref().map(serde_json::to_string).transpose()?;
    let external_match = item.external_match.as_ref().map(serde_json::to_string).transpose()?;
    let search_cache = item.search_cache.as_ref().map(serde_json::to_string).transpose()?;

    let result = sqlx::query(
        r#"
        UPDATE candidate_items SET
            series_name = ?, metadata = ?, status = ?, local_match = ?,
            external_match = ?, search_cache = ?, notes = ?, error = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&item.metadata.series_name)
    .bind(metadata)
    .bind(item.status.as_str())
    .bind(local_match)
    .bind(external_match)
    .bind(search_cache)
    .bind(notes)
    .bind(&item.error)
    .bind(Utc::now().to_rfc3339())
    .bind(item.id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Load one item
pub async fn load_item(pool: &SqlitePool, id: Uuid) -> Result<Option<CandidateItem>> {
    let row = sqlx::query("SELECT * FROM candidate_items WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| row_to_item(&r)).transpose()
}

/// Ids of every item in the batch, in discovery order
pub async fn list_item_ids(pool: &SqlitePool, batch_id: Uuid) -> Result<Vec<Uuid>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT id FROM candidate_items WHERE batch_id = ? ORDER BY position, created_at",
    )
    .bind(batch_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(|(id,)| parse_id(id)).collect()
}

/// Items with the given status, in discovery order
pub async fn items_with_status(
    pool: &SqlitePool,
    batch_id: Uuid,
    status: ItemStatus,
) -> Result<Vec<CandidateItem>> {
    let rows = sqlx::query(
        "SELECT * FROM candidate_items WHERE batch_id = ? AND status = ? ORDER BY position, created_at",
    )
    .bind(batch_id.to_string())
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_item).collect()
}

/// Items matching `filter`, in discovery order
pub async fn list_items(
    pool: &SqlitePool,
    batch_id: Uuid,
    filter: &ItemFilter,
) -> Result<Vec<CandidateItem>> {
    let mut query: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT * FROM candidate_items WHERE batch_id = ");
    query.push_bind(batch_id.to_string());

    if !filter.statuses.is_empty() {
        query.push(" AND status IN (");
        let mut separated = query.separated(", ");
        for status in &filter.statuses {
            separated.push_bind(status.as_str());
        }
        separated.push_unseparated(")");
    }

    if !filter.matches.is_empty() {
        query.push(" AND (");
        for (i, presence) in filter.matches.iter().enumerate() {
            if i > 0 {
                query.push(" OR ");
            }
            query.push(match presence {
                MatchPresence::Local => "local_match IS NOT NULL",
                MatchPresence::External => {
                    "(local_match IS NULL AND external_match IS NOT NULL)"
                }
                MatchPresence::None => "(local_match IS NULL AND external_match IS NULL)",
            });
        }
        query.push(")");
    }

    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let needle = search.to_lowercase();
        query.push(" AND (instr(lower(source), ");
        query.push_bind(needle.clone());
        query.push(") > 0 OR instr(lower(COALESCE(series_name, '')), ");
        query.push_bind(needle);
        query.push(") > 0)");
    }

    query.push(" ORDER BY position, created_at");

    let rows = query.build().fetch_all(pool).await?;
    rows.iter().map(row_to_item).collect()
}

/// Counts by status and by match presence for the whole batch
pub async fn item_counts(pool: &SqlitePool, batch_id: Uuid) -> Result<ItemCounts> {
    let rows: Vec<(String, String, i64)> = sqlx::query_as(
        r#"
        SELECT status,
               CASE WHEN local_match IS NOT NULL THEN 'local'
                    WHEN external_match IS NOT NULL THEN 'external'
                    ELSE 'none' END AS presence,
               COUNT(*)
        FROM candidate_items
        WHERE batch_id = ?
        GROUP BY status, presence
        "#,
    )
    .bind(batch_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut counts = ItemCounts::default();
    for (status, presence, count) in rows {
        let status = ItemStatus::parse(&status)
            .ok_or_else(|| Error::Internal(format!("Invalid item status: {}", status)))?;
        let presence = MatchPresence::parse(&presence)
            .ok_or_else(|| Error::Internal(format!("Invalid match presence: {}", presence)))?;
        counts.total += count;
        *counts.by_status.entry(status).or_insert(0) += count;
        *counts.by_match.entry(presence).or_insert(0) += count;
    }

    Ok(counts)
}

fn row_to_item(row: &SqliteRow) -> Result<CandidateItem> {
    let status: String = row.get("status");
    let status = ItemStatus::parse(&status)
        .ok_or_else(|| Error::Internal(format!("Invalid item status: {}", status)))?;

    let metadata: String = row.get("metadata");
    let notes: String = row.get("notes");
    let local_match: Option<String> = row.get("local_match");
    let external_match: Option<String> = row.get("external_match");
    let search_cache: Option<String> = row.get("search_cache");

    Ok(CandidateItem {
        id: parse_id(&row.get::<String, _>("id"))?,
        batch_id: parse_id(&row.get::<String, _>("batch_id"))?,
        source: row.get("source"),
        file_size: row.get("file_size"),
        extension: row.get("extension"),
        metadata: serde_json::from_str(&metadata)?,
        status,
        local_match: local_match.as_deref().map(serde_json::from_str).transpose()?,
        external_match: external_match.as_deref().map(serde_json::from_str).transpose()?,
        search_cache: search_cache.as_deref().map(serde_json::from_str).transpose()?,
        notes: serde_json::from_str(&notes)?,
        error: row.get("error"),
        created_at: parse_timestamp(row.get("created_at"))?,
        updated_at: parse_timestamp(row.get("updated_at"))?,
    })
}

fn parse_id(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Invalid item id {}: {}", value, e)))
}
