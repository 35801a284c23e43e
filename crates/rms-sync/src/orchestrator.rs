//! # Mirror Engine
//!
//! Top-level sync algorithms built from the lister, the chunk downloader and
//! the local store.
//!
//! ## Smart Sync Pass
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         smart_sync()                                    │
//! │                                                                         │
//! │  1. Reset     seen_ids := ∅                                       0%   │
//! │  2. Diff      list remote sources, compare with source_sync      10%   │
//! │               ├─ new / incomplete          → download queue            │
//! │               ├─ completed, rows < downloaded × demote_ratio           │
//! │               │                            → reset + download queue    │
//! │               ├─ completed, plausible      → seed queue                │
//! │               └─ local only                → removal queue             │
//! │  3. Seed      seen_ids += ids of seed-queue sources              20%   │
//! │  4. Remove    delete source_sync rows of removed sources         30%   │
//! │  5. Download  download_next() until has_more = false       30-90%     │
//! │  6. Sweep     delete vehicles whose id ∉ seen_ids                90%   │
//! │                                                                 100%   │
//! │                                                                         │
//! │  PROTECTION: a source's stored rows are copied into seen_ids when it   │
//! │  resumes mid-way, fails to download, or cannot be fully seeded, so     │
//! │  the sweep never deletes rows only because a source was unreadable.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Full passes share the seen-set, so `smart_sync()` and a mirroring
//! `direct_chunked_sync()` hold the engine's pass lock from reset to sweep.
//! A second caller waits for the running pass to finish.
//!
//! `sync_one_step()` runs a single chunk of the first incomplete source and
//! is what UI-driven "sync a bit" calls use. `direct_chunked_sync()` skips
//! per-source bookkeeping and pages whole categories by skip/limit.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use rms_core::{SourceContext, SourceSyncMeta, VehicleCategory};
use rms_db::Database;

use crate::api::HttpCatalogApi;
use crate::client::CatalogClient;
use crate::config::{MirrorConfig, MirrorSettings};
use crate::credentials::CredentialProvider;
use crate::downloader::{normalize_page, ChunkDownloader, ChunkOutcome};
use crate::error::{SyncError, SyncResult};
use crate::lister::CatalogLister;
use crate::transport::RetryingTransport;

// =============================================================================
// Progress Reporting
// =============================================================================

/// Stage of a sync pass, reported with every progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Listing,
    Diffing,
    Seeding,
    Removing,
    Downloading,
    Sweeping,
    Done,
}

/// Receives human-readable progress from a running pass (implemented by
/// the host UI).
pub trait ProgressReporter: Send + Sync {
    /// Emits a progress event. `percent` is in `0..=100`.
    fn report_progress(&self, phase: SyncPhase, percent: u8, message: &str);

    /// Emits an error event.
    fn report_error(&self, message: &str, retryable: bool);
}

/// No-op reporter for headless runs and tests.
pub struct NoOpReporter;

impl ProgressReporter for NoOpReporter {
    fn report_progress(&self, _phase: SyncPhase, _percent: u8, _message: &str) {}
    fn report_error(&self, _message: &str, _retryable: bool) {}
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of [`MirrorEngine::sync_one_step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// Source the step worked on; `None` when everything is complete.
    pub source_name: Option<String>,
    pub chunk: Option<ChunkOutcome>,
    /// Listed sources still not completed after this step.
    pub remaining_incomplete: usize,
}

/// Counts from one [`MirrorEngine::smart_sync`] pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmartSyncReport {
    pub pass_id: Uuid,
    pub sources_listed: usize,
    /// Queued sources that reached completion this pass.
    pub sources_downloaded: usize,
    pub sources_removed: usize,
    pub sources_demoted: usize,
    pub records_inserted: u64,
    pub records_deleted: u64,
    /// Sources that could not be downloaded or seeded.
    pub failed_sources: Vec<String>,
}

impl SmartSyncReport {
    fn new(pass_id: Uuid) -> Self {
        SmartSyncReport {
            pass_id,
            sources_listed: 0,
            sources_downloaded: 0,
            sources_removed: 0,
            sources_demoted: 0,
            records_inserted: 0,
            records_deleted: 0,
            failed_sources: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed_sources.is_empty()
    }
}

/// Whether a direct sync also removes records the server no longer has.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectMode {
    /// Track seen ids and sweep the rest at the end.
    Mirror,
    /// Upsert only.
    Append,
}

/// Counts from one [`MirrorEngine::direct_chunked_sync`] run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectSyncReport {
    pub mode: DirectMode,
    pub records_upserted: u64,
    pub records_deleted: u64,
    pub failed_categories: Vec<VehicleCategory>,
    pub swept: bool,
}

/// Snapshot of the local mirror for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorStatus {
    pub total_sources: usize,
    pub completed_sources: usize,
    pub local_records: i64,
    pub incomplete_sources: Vec<String>,
    pub last_download: Option<DateTime<Utc>>,
}

// =============================================================================
// Mirror Engine
// =============================================================================

/// Owns everything a sync pass needs. Construct once per app lifetime.
///
/// ## Usage
/// ```rust,ignore
/// let db = Database::new(DbConfig::new(config.database_path()?)).await?;
/// let credentials = Arc::new(StaticCredential::from_env("RMS_API_TOKEN"));
/// let engine = MirrorEngine::from_config(&config, db, credentials)?;
///
/// let report = engine.smart_sync().await?;
/// println!("{} inserted, {} deleted", report.records_inserted, report.records_deleted);
/// ```
pub struct MirrorEngine {
    db: Database,
    client: CatalogClient,
    lister: CatalogLister,
    downloader: ChunkDownloader,
    settings: MirrorSettings,
    reporter: Arc<dyn ProgressReporter>,
    pass_lock: Mutex<()>,
}

impl MirrorEngine {
    pub fn new(db: Database, client: CatalogClient, settings: MirrorSettings) -> Self {
        Self::with_reporter(db, client, settings, Arc::new(NoOpReporter))
    }

    pub fn with_reporter(
        db: Database,
        client: CatalogClient,
        settings: MirrorSettings,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        let lister = CatalogLister::new(
            client.clone(),
            db.clone(),
            settings.listing_page_limit,
            settings.listing_cache_ttl(),
        );
        let downloader = ChunkDownloader::new(client.clone(), db.clone());

        MirrorEngine {
            db,
            client,
            lister,
            downloader,
            settings,
            reporter,
            pass_lock: Mutex::new(()),
        }
    }

    /// Builds an engine talking HTTP to the configured catalog.
    pub fn from_config(
        config: &MirrorConfig,
        db: Database,
        credentials: Arc<dyn CredentialProvider>,
    ) -> SyncResult<Self> {
        config.validate()?;

        let api = HttpCatalogApi::new(config.base_url()?, config.request_timeout())?;
        let transport = RetryingTransport::new(config.rate_limiter(), config.retry_policy());
        let client = CatalogClient::new(Arc::new(api), credentials, transport);

        Ok(Self::new(db, client, config.mirror.clone()))
    }

    pub fn with_progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn lister(&self) -> &CatalogLister {
        &self.lister
    }

    pub fn downloader(&self) -> &ChunkDownloader {
        &self.downloader
    }

    fn progress(&self, phase: SyncPhase, percent: u8, message: &str) {
        debug!(?phase, percent, message, "Sync progress");
        self.reporter.report_progress(phase, percent.min(100), message);
    }

    /// Waits until no other full pass is running.
    async fn begin_pass(&self) -> MutexGuard<'_, ()> {
        if let Ok(guard) = self.pass_lock.try_lock() {
            return guard;
        }
        info!("Another mirror pass is running, waiting for it to finish");
        self.pass_lock.lock().await
    }

    fn fail(&self, err: SyncError) -> SyncError {
        error!(error = %err, "Sync pass aborted");
        let retryable = err.is_retryable() || matches!(err, SyncError::RetriesExhausted { .. });
        self.reporter.report_error(&err.to_string(), retryable);
        err
    }

    // =========================================================================
    // Single Step
    // =========================================================================

    /// Downloads one chunk of the first listed source that is not completed.
    ///
    /// Errors propagate; the step either commits its page or changes nothing.
    pub async fn sync_one_step(&self) -> SyncResult<StepOutcome> {
        let sources = self.lister.list_sources_cached().await?;
        let metas = self.meta_by_name().await?;

        let next = sources
            .iter()
            .map(|s| s.source_name.as_str())
            .find(|name| metas.get(*name).is_some_and(|m| !m.completed));

        let Some(source_name) = next else {
            debug!(sources = sources.len(), "No incomplete sources");
            return Ok(StepOutcome {
                source_name: None,
                chunk: None,
                remaining_incomplete: 0,
            });
        };

        let chunk = self
            .downloader
            .download_next(source_name, self.settings.page_limit)
            .await?;
        self.progress(
            SyncPhase::Downloading,
            step_percent(&chunk),
            &format!("Downloaded {} records from {}", chunk.downloaded, source_name),
        );

        let metas = self.meta_by_name().await?;
        let remaining_incomplete = sources
            .iter()
            .filter(|s| metas.get(&s.source_name).is_some_and(|m| !m.completed))
            .count();

        Ok(StepOutcome {
            source_name: Some(source_name.to_string()),
            chunk: Some(chunk),
            remaining_incomplete,
        })
    }

    async fn meta_by_name(&self) -> SyncResult<HashMap<String, SourceSyncMeta>> {
        Ok(self
            .db
            .source_sync()
            .list_all()
            .await?
            .into_iter()
            .map(|m| (m.source_name.clone(), m))
            .collect())
    }

    // =========================================================================
    // Smart Sync
    // =========================================================================

    /// Runs a full mirror pass, deletions included.
    ///
    /// ## Errors
    /// - [`SyncError::MissingCredential`] when signed out (an empty listing
    ///   would otherwise sweep the whole mirror)
    /// - Listing and storage errors abort the pass before anything is swept
    ///
    /// Per-source download failures do not abort; they are listed in
    /// [`SmartSyncReport::failed_sources`]. Overlapping calls run one after
    /// the other.
    pub async fn smart_sync(&self) -> SyncResult<SmartSyncReport> {
        let _pass = self.begin_pass().await;
        let mut report = SmartSyncReport::new(Uuid::new_v4());
        info!(pass_id = %report.pass_id, "Starting smart sync");

        if self.client.token().await.is_none() {
            return Err(self.fail(SyncError::MissingCredential));
        }

        // 1. Reset
        self.progress(SyncPhase::Listing, 0, "Listing remote sources");
        self.db.seen_ids().clear().await.map_err(|e| self.fail(e.into()))?;

        // 2. Diff
        let sources = self.lister.list_sources().await.map_err(|e| self.fail(e))?;
        report.sources_listed = sources.len();
        self.progress(
            SyncPhase::Diffing,
            10,
            &format!("Comparing {} remote sources", sources.len()),
        );

        let metas = self.meta_by_name().await?;
        let local_counts = self.db.vehicles().counts_by_source().await?;
        let remote: HashSet<&str> = sources.iter().map(|s| s.source_name.as_str()).collect();

        let mut download_queue: Vec<String> = Vec::new();
        let mut seed_queue: Vec<String> = Vec::new();
        for summary in &sources {
            let name = &summary.source_name;
            match metas.get(name) {
                Some(meta) if meta.completed => {
                    let rows = local_counts.get(name).copied().unwrap_or(0);
                    if is_implausible(rows, meta.downloaded, self.settings.demote_ratio) {
                        warn!(
                            source = %name,
                            rows,
                            downloaded = meta.downloaded,
                            "Local rows missing, demoting source"
                        );
                        self.db.source_sync().reset_progress(name).await?;
                        report.sources_demoted += 1;
                        download_queue.push(name.clone());
                    } else {
                        seed_queue.push(name.clone());
                    }
                }
                _ => download_queue.push(name.clone()),
            }
        }

        let mut removed: Vec<String> = metas
            .keys()
            .filter(|name| !remote.contains(name.as_str()))
            .cloned()
            .collect();
        removed.sort();

        info!(
            pass_id = %report.pass_id,
            download = download_queue.len(),
            seed = seed_queue.len(),
            removed = removed.len(),
            demoted = report.sources_demoted,
            "Diff complete"
        );

        // 3. Seed
        self.progress(
            SyncPhase::Seeding,
            20,
            &format!("Checking {} completed sources", seed_queue.len()),
        );
        for name in &seed_queue {
            match self
                .downloader
                .seed_seen_ids(name, self.settings.seed_page_limit, self.settings.seed_max_pages)
                .await
            {
                Ok(outcome) if outcome.exhausted => {
                    self.db.seen_ids().protect_source(name).await?;
                }
                Ok(outcome) => {
                    debug!(source = %name, ids = outcome.ids_added, "Seeded source");
                }
                Err(err) => {
                    warn!(source = %name, error = %err, "Seeding failed, keeping stored rows");
                    self.db.seen_ids().protect_source(name).await?;
                    report.failed_sources.push(name.clone());
                }
            }
        }

        // 4. Remove
        self.progress(
            SyncPhase::Removing,
            30,
            &format!("Removing {} deleted sources", removed.len()),
        );
        report.sources_removed = self.db.source_sync().delete_many(&removed).await? as usize;

        // 5. Download
        let queued = download_queue.len();
        for (index, name) in download_queue.iter().enumerate() {
            self.progress(
                SyncPhase::Downloading,
                download_percent(index, queued),
                &format!("Downloading {} ({}/{})", name, index + 1, queued),
            );

            match self.download_source(name).await {
                Ok(inserted) => {
                    report.records_inserted += inserted;
                    report.sources_downloaded += 1;
                }
                Err(err) => {
                    warn!(source = %name, error = %err, "Source download failed, continuing");
                    self.reporter
                        .report_error(&format!("{name}: {err}"), err.is_retryable());
                    self.db.seen_ids().protect_source(name).await?;
                    report.failed_sources.push(name.clone());
                }
            }
        }

        // 6. Sweep
        self.progress(SyncPhase::Sweeping, 90, "Removing deleted records");
        report.records_deleted = self.db.vehicles().sweep_unseen().await?;

        let summary = format!(
            "Mirror updated: {} inserted, {} deleted, {} failed",
            report.records_inserted,
            report.records_deleted,
            report.failed_sources.len()
        );
        self.progress(SyncPhase::Done, 100, &summary);
        info!(
            pass_id = %report.pass_id,
            listed = report.sources_listed,
            downloaded = report.sources_downloaded,
            removed = report.sources_removed,
            inserted = report.records_inserted,
            deleted = report.records_deleted,
            failed = report.failed_sources.len(),
            "Smart sync complete"
        );

        Ok(report)
    }

    /// Downloads a queued source to completion. Returns records stored.
    async fn download_source(&self, name: &str) -> SyncResult<u64> {
        let resumed = self
            .db
            .source_sync()
            .get(name)
            .await?
            .is_some_and(|m| m.last_offset > 0);
        if resumed {
            // Earlier pages are not fetched again this pass.
            self.db.seen_ids().protect_source(name).await?;
        }

        let mut inserted = 0;
        loop {
            let chunk = self
                .downloader
                .download_next(name, self.settings.page_limit)
                .await?;
            inserted += chunk.inserted;
            if !chunk.has_more {
                return Ok(inserted);
            }
        }
    }

    // =========================================================================
    // Direct Chunked Sync
    // =========================================================================

    /// Pages every category by skip/limit, without per-source cursors.
    ///
    /// In [`DirectMode::Mirror`] the seen-set is rebuilt and swept at the end,
    /// unless a category failed. Mirror runs wait for any other full pass.
    pub async fn direct_chunked_sync(&self, mode: DirectMode) -> SyncResult<DirectSyncReport> {
        let _pass = match mode {
            DirectMode::Mirror => Some(self.begin_pass().await),
            DirectMode::Append => None,
        };
        info!(?mode, "Starting direct chunked sync");
        if self.client.token().await.is_none() {
            return Err(self.fail(SyncError::MissingCredential));
        }

        if mode == DirectMode::Mirror {
            self.db.seen_ids().clear().await?;
        }

        let expected = match self.client.offline_stats().await {
            Ok(stats) => Some(stats.total()).filter(|t| *t > 0),
            Err(err) => {
                warn!(error = %err, "Offline stats unavailable, progress will be coarse");
                None
            }
        };

        let mut report = DirectSyncReport {
            mode,
            records_upserted: 0,
            records_deleted: 0,
            failed_categories: Vec::new(),
            swept: false,
        };
        let limit = self.settings.direct_chunk_limit.max(1);
        let mut fetched_total: u64 = 0;

        for (index, category) in VehicleCategory::ALL.into_iter().enumerate() {
            let ctx = SourceContext::default().with_vehicle_type(category.as_str());
            let mut skip: u64 = 0;

            loop {
                let raw = match self.client.offline_chunk(category, skip, limit).await {
                    Ok(raw) => raw,
                    Err(err) => {
                        warn!(%category, skip, error = %err, "Category chunk failed");
                        self.reporter
                            .report_error(&format!("{category}: {err}"), err.is_retryable());
                        report.failed_categories.push(category);
                        break;
                    }
                };

                let fetched = raw.len();
                let records = normalize_page(raw, &ctx);
                match mode {
                    DirectMode::Mirror => self.db.vehicles().upsert_and_mark_seen(&records).await?,
                    DirectMode::Append => self.db.vehicles().upsert_many(&records).await?,
                };
                report.records_upserted += records.len() as u64;
                skip += fetched as u64;
                fetched_total += fetched as u64;

                let percent = match expected {
                    Some(expected) => (fetched_total * 100 / expected as u64).min(99) as u8,
                    None => ((index * 100) / VehicleCategory::ALL.len()) as u8,
                };
                self.progress(
                    SyncPhase::Downloading,
                    percent,
                    &format!("Fetched {} {} records", skip, category),
                );

                if fetched < limit as usize {
                    break;
                }
            }
        }

        if mode == DirectMode::Mirror {
            if report.failed_categories.is_empty() {
                self.progress(SyncPhase::Sweeping, 99, "Removing deleted records");
                report.records_deleted = self.db.vehicles().sweep_unseen().await?;
                report.swept = true;
            } else {
                warn!(
                    failed = report.failed_categories.len(),
                    "Skipping sweep after failed categories"
                );
            }
        }

        self.progress(
            SyncPhase::Done,
            100,
            &format!("Direct sync stored {} records", report.records_upserted),
        );
        info!(
            ?mode,
            upserted = report.records_upserted,
            deleted = report.records_deleted,
            swept = report.swept,
            "Direct chunked sync complete"
        );
        Ok(report)
    }

    // =========================================================================
    // Status
    // =========================================================================

    pub async fn status(&self) -> SyncResult<MirrorStatus> {
        let metas = self.db.source_sync().list_all().await?;
        let local_records = self.db.vehicles().count().await?;

        Ok(MirrorStatus {
            total_sources: metas.len(),
            completed_sources: metas.iter().filter(|m| m.completed).count(),
            local_records,
            incomplete_sources: metas
                .iter()
                .filter(|m| !m.completed)
                .map(|m| m.source_name.clone())
                .collect(),
            last_download: metas.iter().filter_map(|m| m.local_download_date).max(),
        })
    }
}

impl std::fmt::Debug for MirrorEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorEngine")
            .field("client", &self.client)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn is_implausible(local_rows: i64, downloaded: i64, ratio: f64) -> bool {
    (local_rows as f64) < downloaded as f64 * ratio
}

fn download_percent(index: usize, queued: usize) -> u8 {
    if queued == 0 {
        return 90;
    }
    (30 + index * 60 / queued) as u8
}

fn step_percent(chunk: &ChunkOutcome) -> u8 {
    match chunk.total {
        _ if !chunk.has_more => 100,
        Some(total) if total > 0 => (chunk.downloaded.clamp(0, total) * 100 / total) as u8,
        _ => 0,
    }
}
