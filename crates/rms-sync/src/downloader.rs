//! # Chunk Downloader
//!
//! Pulls one page of a source per call and commits it together with the
//! advanced cursor, so a pass can stop between any two calls.
//!
//! ## One Call
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                download_next(source, limit)                             │
//! │                                                                         │
//! │  meta = source_sync[source]          (missing → UnknownSource)         │
//! │    │                                                                    │
//! │    ├── completed or downloaded ≥ total ──► no-op, has_more = false     │
//! │    ▼                                                                    │
//! │  page = last_offset / limit + 1                                        │
//! │  fetch page (retrying transport)      (failure → meta untouched)       │
//! │  fresh = records of the page past last_offset                          │
//! │    │                                                                    │
//! │    ▼                                                                    │
//! │  normalize records (skip those without identity)                       │
//! │    │                                                                    │
//! │    ▼                                                                    │
//! │  ONE TRANSACTION: upsert vehicles + seen_ids, cursor += fresh          │
//! │    completed when page empty, short, or downloaded ≥ total             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use tracing::{debug, info, warn};

use rms_core::{normalize_record, RawVehicleRecord, SourceContext, SourceSyncMeta, VehicleRecord};
use rms_db::{Database, DbError, PageCommit};

use crate::api::UploadDetails;
use crate::client::CatalogClient;
use crate::error::{SyncError, SyncResult};

/// Result of one [`ChunkDownloader::download_next`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkOutcome {
    /// Records downloaded for the source so far, this call included.
    pub downloaded: i64,
    /// Records stored by this call.
    pub inserted: u64,
    pub has_more: bool,
    pub total: Option<i64>,
}

/// Result of [`ChunkDownloader::seed_seen_ids`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeedOutcome {
    pub ids_added: u64,
    /// The page cap was hit before the source ran out of records.
    pub exhausted: bool,
}

/// Resumable, page-at-a-time downloader for a single source.
#[derive(Debug, Clone)]
pub struct ChunkDownloader {
    client: CatalogClient,
    db: Database,
}

impl ChunkDownloader {
    pub fn new(client: CatalogClient, db: Database) -> Self {
        ChunkDownloader { client, db }
    }

    /// Downloads and commits the next page of `source_name`.
    ///
    /// ## Errors
    /// - [`SyncError::UnknownSource`] if the source has no metadata row
    /// - Transport errors from the fetch; the cursor is left where it was
    pub async fn download_next(&self, source_name: &str, limit: u32) -> SyncResult<ChunkOutcome> {
        let meta = self
            .db
            .source_sync()
            .get(source_name)
            .await?
            .ok_or_else(|| SyncError::UnknownSource(source_name.to_string()))?;

        if meta.is_exhausted() {
            if !meta.completed {
                // Total reached without the flag set; persist it.
                self.commit(PageCommit {
                    source_name,
                    records: &[],
                    total: meta.total,
                    downloaded: meta.downloaded,
                    last_offset: meta.last_offset,
                    completed: true,
                })
                .await?;
            }
            return Ok(ChunkOutcome {
                downloaded: meta.downloaded,
                inserted: 0,
                has_more: false,
                total: meta.total,
            });
        }

        let limit = limit.max(1);
        let page = page_for_offset(meta.last_offset, limit);
        let response = self.client.fetch_records(source_name, page, limit).await?;

        let fetched = response.records.len() as i64;
        let fresh = fresh_records(meta.last_offset, page, limit, fetched);
        let ctx = source_context(&meta, response.upload_details.as_ref());
        let records = normalize_page(response.records, &ctx);

        let mut total = response.total.or(meta.total);
        let mut downloaded = meta.downloaded + fresh;
        let last_offset = meta.last_offset + fresh;
        if let Some(t) = total {
            downloaded = downloaded.min(t);
        }
        let completed = fetched == 0
            || fetched < i64::from(limit)
            || matches!(total, Some(t) if downloaded >= t);
        if completed {
            // Server ran out before its declared total; the short page wins.
            if let Some(t) = total {
                if downloaded < t {
                    debug!(source = %source_name, declared = t, downloaded, "Clamping total");
                    total = Some(downloaded);
                }
            }
        }

        let committed = self
            .commit(PageCommit {
                source_name,
                records: &records,
                total,
                downloaded,
                last_offset,
                completed,
            })
            .await?;

        if committed.completed {
            info!(source = %source_name, downloaded = committed.downloaded, "Source download complete");
        } else {
            debug!(source = %source_name, page, fetched, fresh, downloaded = committed.downloaded, "Page stored");
        }

        Ok(ChunkOutcome {
            downloaded: committed.downloaded,
            inserted: records.len() as u64,
            has_more: !committed.completed,
            total: committed.total,
        })
    }

    /// Walks a completed source's pages only to add their ids to the
    /// seen-set. Nothing else is written.
    pub async fn seed_seen_ids(
        &self,
        source_name: &str,
        limit: u32,
        max_pages: u32,
    ) -> SyncResult<SeedOutcome> {
        let meta = self
            .db
            .source_sync()
            .get(source_name)
            .await?
            .ok_or_else(|| SyncError::UnknownSource(source_name.to_string()))?;
        let ctx = source_context(&meta, None);
        let limit = limit.max(1);

        let mut outcome = SeedOutcome::default();
        for page in 1..=max_pages {
            let response = self.client.fetch_records(source_name, page, limit).await?;
            let fetched = response.records.len();

            let ids: Vec<String> = normalize_page(response.records, &ctx)
                .into_iter()
                .map(|r| r.id)
                .collect();
            outcome.ids_added += self.db.seen_ids().add_many(&ids).await?;

            if fetched < limit as usize {
                debug!(source = %source_name, pages = page, ids = outcome.ids_added, "Seeded seen ids");
                return Ok(outcome);
            }
        }

        warn!(source = %source_name, max_pages, "Seeding stopped at page cap");
        outcome.exhausted = true;
        Ok(outcome)
    }

    async fn commit(&self, page: PageCommit<'_>) -> SyncResult<SourceSyncMeta> {
        let source_name = page.source_name.to_string();
        match self.db.source_sync().record_page(page).await {
            Ok(meta) => Ok(meta),
            Err(DbError::NotFound { .. }) => Err(SyncError::UnknownSource(source_name)),
            Err(err) => Err(err.into()),
        }
    }
}

fn page_for_offset(last_offset: i64, limit: u32) -> u32 {
    let page = last_offset.max(0) / i64::from(limit) + 1;
    u32::try_from(page).unwrap_or(u32::MAX)
}

/// Records of `page` that lie past the cursor.
///
/// A cursor left mid-page by a short final page (25 with limit 10) refetches
/// page 3 from record 20; only 25.. are new.
fn fresh_records(last_offset: i64, page: u32, limit: u32, fetched: i64) -> i64 {
    let page_start = (i64::from(page) - 1) * i64::from(limit);
    let already = (last_offset - page_start).max(0);
    (fetched - already).max(0)
}

fn source_context(meta: &SourceSyncMeta, details: Option<&UploadDetails>) -> SourceContext {
    let mut ctx = SourceContext::new(meta.source_name.clone());

    let vehicle_type = Some(meta.vehicle_type.clone())
        .filter(|t| !t.is_empty())
        .or_else(|| details.and_then(|d| d.vehicle_type.clone()));
    if let Some(t) = vehicle_type {
        ctx = ctx.with_vehicle_type(t);
    }

    let bank_name = Some(meta.bank_name.clone())
        .filter(|b| !b.is_empty())
        .or_else(|| details.and_then(|d| d.bank_name.clone()));
    if let Some(b) = bank_name {
        ctx = ctx.with_bank_name(b);
    }

    ctx
}

/// Normalizes a page, dropping records that have no identity.
pub(crate) fn normalize_page(raw: Vec<RawVehicleRecord>, ctx: &SourceContext) -> Vec<VehicleRecord> {
    raw.into_iter()
        .filter_map(|record| match normalize_record(record, ctx) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(source = %ctx.source_name, error = %err, "Skipping record");
                None
            }
        })
        .collect()
}
