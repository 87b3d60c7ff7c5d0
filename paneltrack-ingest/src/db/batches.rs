//! Import batch database operations
//!
//! Counter and status writes are single statements keyed by batch id, so they
//! either land on an existing batch or report that it is gone; they can never
//! interleave with a batch deletion.

use chrono::{DateTime, Utc};
use paneltrack_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{BatchCounters, BatchStatus, ImportBatch};
use crate::utils::retry_on_lock;

/// Maximum time to retry a write on a locked database
const MAX_LOCK_WAIT_MS: u64 = 5000;

/// Insert a new batch
pub async fn insert_batch(pool: &SqlitePool, batch: &ImportBatch) -> Result<()> {
    let scope = serde_json::to_string(&batch.scope)?;
    let transfer_mode = serde_json::to_string(&batch.transfer_mode)?;
    let match_policy = serde_json::to_string(&batch.match_policy)?;

    sqlx::query(
        r#"
        INSERT INTO import_batches (
            id, scope, status, transfer_mode, match_policy,
            scanned, matched, approved, skipped, errors,
            last_error, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(batch.id.to_string())
    .bind(scope)
    .bind(batch.status.as_str())
    .bind(transfer_mode)
    .bind(match_policy)
    .bind(batch.counters.scanned)
    .bind(batch.counters.matched)
    .bind(batch.counters.approved)
    .bind(batch.counters.skipped)
    .bind(batch.counters.errors)
    .bind(&batch.last_error)
    .bind(batch.created_at.to_rfc3339())
    .bind(batch.updated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Load one batch
pub async fn load_batch(pool: &SqlitePool, id: Uuid) -> Result<Option<ImportBatch>> {
    let row = sqlx::query("SELECT * FROM import_batches WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|r| row_to_batch(&r)).transpose()
}

/// All batches, newest first
pub async fn list_batches(pool: &SqlitePool) -> Result<Vec<ImportBatch>> {
    let rows = sqlx::query("SELECT * FROM import_batches ORDER BY created_at DESC")
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_batch).collect()
}

/// Set status and last error; returns false if the batch no longer exists
pub async fn update_status(
    pool: &SqlitePool,
    id: Uuid,
    status: BatchStatus,
    last_error: Option<&str>,
) -> Result<bool> {
    let id_str = id.to_string();
    let updated_at = Utc::now().to_rfc3339();
    let (id_str, updated_at) = (id_str.as_str(), updated_at.as_str());

    retry_on_lock("update_batch_status", MAX_LOCK_WAIT_MS, move || async move {
        let result = sqlx::query(
            "UPDATE import_batches SET status = ?, last_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(last_error)
        .bind(updated_at)
        .bind(id_str)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    })
    .await
}

/// Recompute the aggregate counters from the batch's items
///
/// Returns `None` if the batch no longer exists.
pub async fn recompute_counters(pool: &SqlitePool, id: Uuid) -> Result<Option<BatchCounters>> {
    write_counters(pool, id, None, None).await
}

/// Recompute counters and set the final status in one statement
///
/// Used when a job completes or fails, so the batch never shows a running
/// status after the job record is gone. Returns `None` if the batch no longer
/// exists.
pub async fn finish_batch(
    pool: &SqlitePool,
    id: Uuid,
    status: BatchStatus,
    last_error: Option<&str>,
) -> Result<Option<BatchCounters>> {
    write_counters(pool, id, Some(status), Some(last_error)).await
}

async fn write_counters(
    pool: &SqlitePool,
    id: Uuid,
    status: Option<BatchStatus>,
    last_error: Option<Option<&str>>,
) -> Result<Option<BatchCounters>> {
    let id_str = id.to_string();
    let updated_at = Utc::now().to_rfc3339();
    let status = status.map(|s| s.as_str());
    let set_error = last_error.is_some();
    let last_error = last_error.flatten();
    let (id_str, updated_at) = (id_str.as_str(), updated_at.as_str());

    retry_on_lock("write_batch_counters", MAX_LOCK_WAIT_MS, move || async move {
        let row: Option<(i64, i64, i64, i64, i64)> = sqlx::query_as(
            r#"
            UPDATE import_batches SET
                scanned = (SELECT COUNT(*) FROM candidate_items WHERE batch_id = ?1),
                matched = (SELECT COUNT(*) FROM candidate_items
                           WHERE batch_id = ?1
                             AND (local_match IS NOT NULL OR external_match IS NOT NULL)),
                approved = (SELECT COUNT(*) FROM candidate_items
                            WHERE batch_id = ?1 AND status = 'queued'),
                skipped = (SELECT COUNT(*) FROM candidate_items
                           WHERE batch_id = ?1 AND status = 'skipped'),
                errors = (SELECT COUNT(*) FROM candidate_items
                          WHERE batch_id = ?1 AND error IS NOT NULL),
                status = COALESCE(?2, status),
                last_error = CASE WHEN ?3 THEN ?4 ELSE last_error END,
                updated_at = ?5
            WHERE id = ?1
            RETURNING scanned, matched, approved, skipped, errors
            "#,
        )
        .bind(id_str)
        .bind(status)
        .bind(set_error)
        .bind(last_error)
        .bind(updated_at)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(|(scanned, matched, approved, skipped, errors)| BatchCounters {
            scanned,
            matched,
            approved,
            skipped,
            errors,
        }))
    })
    .await
}

/// Delete a batch and its items; returns false if it did not exist
pub async fn delete_batch(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let id_str = id.to_string();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM candidate_items WHERE batch_id = ?")
        .bind(&id_str)
        .execute(&mut *tx)
        .await?;

    let result = sqlx::query("DELETE FROM import_batches WHERE id = ?")
        .bind(&id_str)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(result.rows_affected() > 0)
}

/// Reset batches left in a running status by a previous process
///
/// Job records live in memory only, so after a restart nothing will ever move
/// these batches forward.
pub async fn cleanup_interrupted_batches(pool: &SqlitePool) -> Result<usize> {
    let result = sqlx::query(
        r#"
        UPDATE import_batches
        SET status = 'ready',
            last_error = 'interrupted by restart',
            updated_at = ?
        WHERE status IN ('scanning', 'matching', 'processing')
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

fn row_to_batch(row: &SqliteRow) -> Result<ImportBatch> {
    let id: String = row.get("id");
    let id = Uuid::parse_str(&id)
        .map_err(|e| Error::Internal(format!("Invalid batch id {}: {}", id, e)))?;

    let scope: String = row.get("scope");
    let transfer_mode: String = row.get("transfer_mode");
    let match_policy: String = row.get("match_policy");
    let status: String = row.get("status");
    let status = BatchStatus::parse(&status)
        .ok_or_else(|| Error::Internal(format!("Invalid batch status: {}", status)))?;

    Ok(ImportBatch {
        id,
        scope: serde_json::from_str(&scope)?,
        status,
        transfer_mode: serde_json::from_str(&transfer_mode)?,
        match_policy: serde_json::from_str(&match_policy)?,
        counters: BatchCounters {
            scanned: row.get("scanned"),
            matched: row.get("matched"),
            approved: row.get("approved"),
            skipped: row.get("skipped"),
            errors: row.get("errors"),
        },
        last_error: row.get("last_error"),
        created_at: parse_timestamp(row.get("created_at"))?,
        updated_at: parse_timestamp(row.get("updated_at"))?,
    })
}

pub(crate) fn parse_timestamp(value: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Invalid timestamp {}: {}", value, e)))
}
