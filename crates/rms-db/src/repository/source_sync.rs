//! # Source Sync Repository
//!
//! Per-source download bookkeeping: the resume cursor the chunk downloader
//! advances, and the stubs the catalog lister creates.
//!
//! ## Page Commit
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    record_page() - one transaction                      │
//! │                                                                         │
//! │  WriteLock.acquire                                                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  BEGIN                                                                 │
//! │    ├── UPSERT vehicles       (page records)                            │
//! │    ├── INSERT seen_ids       (page record ids)                         │
//! │    └── UPDATE source_sync    (total, downloaded, last_offset, completed)│
//! │  COMMIT                                                                │
//! │                                                                         │
//! │  Crash before COMMIT  → nothing changed, next step refetches the page  │
//! │  Crash after COMMIT   → cursor already past the page, no duplicates    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Re-upload Detection
//! A bank re-uploading a file keeps the source name but changes the upload
//! date. [`SourceSyncRepository::upsert_stub`] notices the new date and
//! resets the cursor so the fresh content is downloaded from the start.

use chrono::Utc;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::lock::WriteLock;
use crate::repository::{seen, vehicle};
use rms_core::{SourceSummary, SourceSyncMeta, VehicleRecord};

const SELECT_META: &str = r#"
    SELECT
        source_name, vehicle_type, bank_name, total, declared_total, downloaded,
        completed, last_offset, server_upload_date, local_download_date, updated_at
    FROM source_sync
"#;

/// What [`SourceSyncRepository::upsert_stub`] did to the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubOutcome {
    /// First time this source was seen.
    Inserted,
    /// Descriptive fields refreshed, progress kept.
    Updated,
    /// Upload date changed; progress reset to zero.
    Reset,
}

/// One downloaded page and the cursor state after it.
#[derive(Debug, Clone)]
pub struct PageCommit<'a> {
    pub source_name: &'a str,
    pub records: &'a [VehicleRecord],
    pub total: Option<i64>,
    pub downloaded: i64,
    pub last_offset: i64,
    pub completed: bool,
}

/// Repository for the `source_sync` table.
#[derive(Debug, Clone)]
pub struct SourceSyncRepository {
    pool: SqlitePool,
    lock: WriteLock,
}

impl SourceSyncRepository {
    /// Creates a new SourceSyncRepository.
    pub fn new(pool: SqlitePool, lock: WriteLock) -> Self {
        SourceSyncRepository { pool, lock }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets the metadata row for a source.
    pub async fn get(&self, source_name: &str) -> DbResult<Option<SourceSyncMeta>> {
        fetch_meta(&self.pool, source_name).await
    }

    /// Lists every tracked source, ordered by name.
    pub async fn list_all(&self) -> DbResult<Vec<SourceSyncMeta>> {
        let sql = format!("{SELECT_META} ORDER BY source_name");
        let rows = sqlx::query_as::<_, SourceSyncMeta>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Number of sources not yet marked completed.
    pub async fn count_incomplete(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM source_sync WHERE completed = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Creates or refreshes the row for a listed source.
    ///
    /// ## Behavior
    /// - New source: stub with `downloaded = 0`, `completed = false`
    /// - Known source, same upload date: descriptive fields refreshed,
    ///   cursor kept. A changed listed total replaces `total` and reopens a
    ///   completed source that falls short of it; an unchanged one leaves a
    ///   clamped `total` alone
    /// - Known source, different non-null upload date: cursor reset to zero
    pub async fn upsert_stub(&self, summary: &SourceSummary) -> DbResult<StubOutcome> {
        let _guard = self.lock.acquire("source_sync.upsert_stub").await;
        let mut tx = self.pool.begin().await?;

        let now = Utc::now();
        let existing = fetch_meta(&mut *tx, &summary.source_name).await?;

        let (meta, outcome) = match existing {
            None => (
                SourceSyncMeta {
                    source_name: summary.source_name.clone(),
                    vehicle_type: summary.vehicle_type.clone(),
                    bank_name: summary.bank_name.clone(),
                    total: summary.total,
                    declared_total: summary.total,
                    downloaded: 0,
                    completed: false,
                    last_offset: 0,
                    server_upload_date: summary.server_upload_date.clone(),
                    local_download_date: None,
                    updated_at: now,
                },
                StubOutcome::Inserted,
            ),
            Some(mut meta) => {
                let reuploaded = matches!(
                    (&meta.server_upload_date, &summary.server_upload_date),
                    (Some(old), Some(new)) if old != new
                );

                if !summary.vehicle_type.is_empty() {
                    meta.vehicle_type = summary.vehicle_type.clone();
                }
                if !summary.bank_name.is_empty() {
                    meta.bank_name = summary.bank_name.clone();
                }
                if summary.server_upload_date.is_some() {
                    meta.server_upload_date = summary.server_upload_date.clone();
                }

                let outcome = if reuploaded {
                    info!(source = %meta.source_name, "Source re-uploaded, resetting progress");
                    meta.total = summary.total;
                    meta.declared_total = summary.total;
                    meta.downloaded = 0;
                    meta.last_offset = 0;
                    meta.completed = false;
                    StubOutcome::Reset
                } else {
                    // A clamped total stays until the listed count moves.
                    if summary.total.is_some() && summary.total != meta.declared_total {
                        meta.total = summary.total;
                        meta.declared_total = summary.total;
                        if let Some(total) = meta.total {
                            meta.downloaded = meta.downloaded.min(total);
                            if meta.completed && meta.downloaded < total {
                                debug!(source = %meta.source_name, total, "Source grew, reopening");
                                meta.completed = false;
                            }
                        }
                    }
                    StubOutcome::Updated
                };

                meta.updated_at = now;
                (meta, outcome)
            }
        };

        write_meta(&mut *tx, &meta).await?;
        tx.commit().await?;

        debug!(source = %summary.source_name, ?outcome, "Source stub upserted");
        Ok(outcome)
    }

    /// Commits one downloaded page atomically.
    ///
    /// Upserts the records, marks their ids seen, and advances the cursor.
    /// Nothing is written if the source row does not exist.
    ///
    /// ## Returns
    /// The metadata row as committed.
    pub async fn record_page(&self, page: PageCommit<'_>) -> DbResult<SourceSyncMeta> {
        let _guard = self.lock.acquire("source_sync.record_page").await;
        let mut tx = self.pool.begin().await?;

        let now = Utc::now();
        let updated = sqlx::query(
            r#"
            UPDATE source_sync SET
                total = ?2,
                downloaded = ?3,
                last_offset = ?4,
                completed = ?5,
                local_download_date = ?6,
                updated_at = ?6
            WHERE source_name = ?1
            "#,
        )
        .bind(page.source_name)
        .bind(page.total)
        .bind(page.downloaded)
        .bind(page.last_offset)
        .bind(page.completed)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(DbError::not_found("Source", page.source_name));
        }

        vehicle::upsert_records(&mut *tx, page.records).await?;
        seen::insert_ids(&mut *tx, page.records.iter().map(|r| r.id.as_str())).await?;

        let meta = fetch_meta(&mut *tx, page.source_name)
            .await?
            .ok_or_else(|| DbError::not_found("Source", page.source_name))?;

        tx.commit().await?;

        debug!(
            source = %page.source_name,
            records = page.records.len(),
            downloaded = meta.downloaded,
            completed = meta.completed,
            "Page committed"
        );
        Ok(meta)
    }

    /// Zeroes a source's cursor so it is downloaded again.
    pub async fn reset_progress(&self, source_name: &str) -> DbResult<()> {
        let _guard = self.lock.acquire("source_sync.reset_progress").await;
        let updated = sqlx::query(
            r#"
            UPDATE source_sync
            SET downloaded = 0, last_offset = 0, completed = 0, updated_at = ?2
            WHERE source_name = ?1
            "#,
        )
        .bind(source_name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(DbError::not_found("Source", source_name));
        }
        Ok(())
    }

    /// Deletes metadata rows. Vehicle rows are left for the sweep.
    pub async fn delete_many(&self, source_names: &[String]) -> DbResult<u64> {
        if source_names.is_empty() {
            return Ok(0);
        }

        let _guard = self.lock.acquire("source_sync.delete_many").await;
        let mut tx = self.pool.begin().await?;

        let mut deleted = 0;
        for name in source_names {
            deleted += sqlx::query("DELETE FROM source_sync WHERE source_name = ?1")
                .bind(name)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await?;
        info!(deleted, "Deleted metadata for removed sources");
        Ok(deleted)
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn fetch_meta<'e, E>(executor: E, source_name: &str) -> DbResult<Option<SourceSyncMeta>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let sql = format!("{SELECT_META} WHERE source_name = ?1");
    let meta = sqlx::query_as::<_, SourceSyncMeta>(&sql)
        .bind(source_name)
        .fetch_optional(executor)
        .await?;
    Ok(meta)
}

async fn write_meta(conn: &mut SqliteConnection, meta: &SourceSyncMeta) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO source_sync (
            source_name, vehicle_type, bank_name, total, declared_total, downloaded,
            completed, last_offset, server_upload_date, local_download_date, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        ON CONFLICT(source_name) DO UPDATE SET
            vehicle_type = excluded.vehicle_type,
            bank_name = excluded.bank_name,
            total = excluded.total,
            declared_total = excluded.declared_total,
            downloaded = excluded.downloaded,
            completed = excluded.completed,
            last_offset = excluded.last_offset,
            server_upload_date = excluded.server_upload_date,
            local_download_date = excluded.local_download_date,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&meta.source_name)
    .bind(&meta.vehicle_type)
    .bind(&meta.bank_name)
    .bind(meta.total)
    .bind(meta.declared_total)
    .bind(meta.downloaded)
    .bind(meta.completed)
    .bind(meta.last_offset)
    .bind(&meta.server_upload_date)
    .bind(meta.local_download_date)
    .bind(meta.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}
