//! # Catalog Lister
//!
//! Enumerates the remote sources across the three vehicle categories and
//! records a metadata stub for each one.
//!
//! ## Listing Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    list_sources()                                       │
//! │                                                                         │
//! │  token? ── no ──► [] (signed out is not an error)                      │
//! │    │                                                                    │
//! │    ▼                                                                    │
//! │  for category in [two-wheeler, four-wheeler, commercial]:              │
//! │      page 1..N  ──► normalize (type from category, RFC 3339 date)      │
//! │    │                                                                    │
//! │    ▼                                                                    │
//! │  dedupe by source_name (last wins, first position kept)                │
//! │    │                                                                    │
//! │    ▼                                                                    │
//! │  upsert source_sync stub per source (re-upload → reset)                │
//! │    │                                                                    │
//! │    ▼                                                                    │
//! │  refresh ListingCache[token]                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use rms_core::normalize::{canonical_vehicle_type, normalize_timestamp_value};
use rms_core::{SourceSummary, VehicleCategory};
use rms_db::{Database, StubOutcome};

use crate::api::{count_from_value, RawSourceSummary};
use crate::client::CatalogClient;
use crate::error::SyncResult;

// =============================================================================
// Listing Cache
// =============================================================================

#[derive(Debug, Clone)]
struct CachedListing {
    fetched_at: Instant,
    sources: Vec<SourceSummary>,
}

/// Source listings keyed by the credential they were fetched with.
#[derive(Debug)]
pub struct ListingCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedListing>>,
}

impl ListingCache {
    pub fn new(ttl: Duration) -> Self {
        ListingCache {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    async fn get(&self, credential: &str) -> Option<Vec<SourceSummary>> {
        let entries = self.entries.lock().await;
        entries
            .get(credential)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.sources.clone())
    }

    async fn store(&self, credential: &str, sources: Vec<SourceSummary>) {
        let mut entries = self.entries.lock().await;
        // A new credential means a new session; older listings are stale.
        entries.retain(|key, _| key == credential);
        entries.insert(
            credential.to_string(),
            CachedListing {
                fetched_at: Instant::now(),
                sources,
            },
        );
    }

    async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

// =============================================================================
// Catalog Lister
// =============================================================================

/// Lists remote sources and keeps `source_sync` stubs current.
#[derive(Debug)]
pub struct CatalogLister {
    client: CatalogClient,
    db: Database,
    page_limit: u32,
    cache: ListingCache,
}

impl CatalogLister {
    pub fn new(client: CatalogClient, db: Database, page_limit: u32, cache_ttl: Duration) -> Self {
        CatalogLister {
            client,
            db,
            page_limit: page_limit.max(1),
            cache: ListingCache::new(cache_ttl),
        }
    }

    /// Fetches the full source list from the server.
    ///
    /// ## Returns
    /// Deduplicated sources in order of first appearance. Empty when no
    /// credential is available.
    pub async fn list_sources(&self) -> SyncResult<Vec<SourceSummary>> {
        let Some(token) = self.client.token().await else {
            warn!("No credential available, returning empty source list");
            return Ok(Vec::new());
        };

        let mut sources: Vec<SourceSummary> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for category in VehicleCategory::ALL {
            let mut page = 1;
            loop {
                let listing = self
                    .client
                    .list_sources_page(category, page, self.page_limit)
                    .await?;
                let fetched = listing.sources.len();

                for raw in listing.sources {
                    let Some(summary) = summarize(raw, category) else {
                        warn!(%category, "Skipping listed source without a name");
                        continue;
                    };
                    match positions.get(&summary.source_name) {
                        Some(&index) => sources[index] = summary,
                        None => {
                            positions.insert(summary.source_name.clone(), sources.len());
                            sources.push(summary);
                        }
                    }
                }

                let last_page = match listing.pages {
                    Some(pages) => page >= pages,
                    None => fetched < self.page_limit as usize,
                };
                if fetched == 0 || last_page {
                    break;
                }
                page += 1;
            }
        }

        let mut resets = 0;
        for summary in &sources {
            if self.db.source_sync().upsert_stub(summary).await? == StubOutcome::Reset {
                resets += 1;
            }
        }

        info!(sources = sources.len(), resets, "Listed remote sources");
        self.cache.store(&token, sources.clone()).await;
        Ok(sources)
    }

    /// Like [`list_sources`](Self::list_sources) but reuses a listing
    /// fetched with the same credential within the cache TTL.
    pub async fn list_sources_cached(&self) -> SyncResult<Vec<SourceSummary>> {
        let Some(token) = self.client.token().await else {
            return Ok(Vec::new());
        };

        if let Some(sources) = self.cache.get(&token).await {
            debug!(sources = sources.len(), "Using cached source listing");
            return Ok(sources);
        }

        self.list_sources().await
    }

    /// Drops every cached listing.
    pub async fn invalidate_cache(&self) {
        self.cache.clear().await;
    }
}

/// Normalizes one listed source. `None` when it has no usable name.
fn summarize(raw: RawSourceSummary, category: VehicleCategory) -> Option<SourceSummary> {
    let source_name = raw.source_name?.trim().to_string();
    if source_name.is_empty() {
        return None;
    }

    let vehicle_type = match raw.vehicle_type.as_deref().map(str::trim) {
        Some(t) if !t.is_empty() => canonical_vehicle_type(t),
        _ => category.as_str().to_string(),
    };

    let total = raw.total.as_ref().and_then(count_from_value);

    Some(SourceSummary {
        source_name,
        bank_name: raw.bank_name.unwrap_or_default().trim().to_string(),
        vehicle_type,
        total,
        server_upload_date: raw.server_upload_date.as_ref().and_then(normalize_timestamp_value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{engine_parts, FakeCatalog};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_summarize_normalizes_fields() {
        let raw: RawSourceSummary = serde_json::from_value(json!({
            "fileName": " BankX_2024.csv ",
            "bank": "BankX",
            "count": "150",
            "uploadDate": "2024-03-01 10:00:00"
        }))
        .unwrap();

        let summary = summarize(raw, VehicleCategory::Commercial).unwrap();
        assert_eq!(summary.source_name, "BankX_2024.csv");
        assert_eq!(summary.vehicle_type, "commercial");
        assert_eq!(summary.total, Some(150));
        assert_eq!(summary.server_upload_date.as_deref(), Some("2024-03-01T10:00:00Z"));

        let raw: RawSourceSummary =
            serde_json::from_value(json!({ "sourceName": "a", "vehicleType": "2W" })).unwrap();
        assert_eq!(
            summarize(raw, VehicleCategory::Commercial).unwrap().vehicle_type,
            "two-wheeler"
        );

        assert!(summarize(RawSourceSummary::default(), VehicleCategory::Commercial).is_none());
    }

    #[tokio::test]
    async fn test_lists_all_categories_and_creates_stubs() {
        let fake = Arc::new(FakeCatalog::new());
        fake.add_source("two.csv", VehicleCategory::TwoWheeler, 3);
        fake.add_source("four.csv", VehicleCategory::FourWheeler, 2);
        fake.add_source("cv.csv", VehicleCategory::Commercial, 0);
        let (db, client) = engine_parts(fake.clone(), Some("token")).await;
        let lister = CatalogLister::new(client, db.clone(), 100, Duration::from_secs(60));

        let sources = lister.list_sources().await.unwrap();
        let names: Vec<&str> = sources.iter().map(|s| s.source_name.as_str()).collect();
        assert_eq!(names, vec!["two.csv", "four.csv", "cv.csv"]);

        let meta = db.source_sync().get("four.csv").await.unwrap().unwrap();
        assert_eq!(meta.total, Some(2));
        assert_eq!(meta.vehicle_type, "four-wheeler");
        assert!(!meta.completed);
    }

    #[tokio::test]
    async fn test_pages_through_listing_and_dedupes() {
        let fake = Arc::new(FakeCatalog::new());
        for i in 0..5 {
            fake.add_source(&format!("s{i}.csv"), VehicleCategory::TwoWheeler, 1);
        }
        // Same name listed again under another category: last one wins.
        fake.add_source("s1.csv", VehicleCategory::Commercial, 7);
        let (db, client) = engine_parts(fake.clone(), Some("token")).await;
        let lister = CatalogLister::new(client, db, 2, Duration::from_secs(60));

        let sources = lister.list_sources().await.unwrap();
        assert_eq!(sources.len(), 5);
        assert_eq!(sources[1].source_name, "s1.csv");
        assert_eq!(sources[1].total, Some(7));
        assert_eq!(sources[1].vehicle_type, "commercial");
        assert_eq!(fake.listing_calls(VehicleCategory::TwoWheeler), 3);
    }

    #[tokio::test]
    async fn test_missing_credential_lists_nothing() {
        let fake = Arc::new(FakeCatalog::new());
        fake.add_source("a.csv", VehicleCategory::TwoWheeler, 1);
        let (db, client) = engine_parts(fake.clone(), None).await;
        let lister = CatalogLister::new(client, db.clone(), 100, Duration::from_secs(60));

        assert!(lister.list_sources().await.unwrap().is_empty());
        assert!(lister.list_sources_cached().await.unwrap().is_empty());
        assert!(db.source_sync().list_all().await.unwrap().is_empty());
        assert_eq!(fake.listing_calls(VehicleCategory::TwoWheeler), 0);
    }

    #[tokio::test]
    async fn test_cached_listing_is_reused_until_invalidated() {
        let fake = Arc::new(FakeCatalog::new());
        fake.add_source("a.csv", VehicleCategory::TwoWheeler, 1);
        let (db, client) = engine_parts(fake.clone(), Some("token")).await;
        let lister = CatalogLister::new(client, db, 100, Duration::from_secs(60));

        lister.list_sources_cached().await.unwrap();
        lister.list_sources_cached().await.unwrap();
        assert_eq!(fake.listing_calls(VehicleCategory::TwoWheeler), 1);

        lister.invalidate_cache().await;
        lister.list_sources_cached().await.unwrap();
        assert_eq!(fake.listing_calls(VehicleCategory::TwoWheeler), 2);
    }

    #[tokio::test]
    async fn test_reupload_resets_progress() {
        let fake = Arc::new(FakeCatalog::new());
        fake.add_source("a.csv", VehicleCategory::TwoWheeler, 2);
        fake.set_upload_date("a.csv", "2024-03-01T00:00:00Z");
        let (db, client) = engine_parts(fake.clone(), Some("token")).await;
        let lister = CatalogLister::new(client, db.clone(), 100, Duration::from_secs(60));

        lister.list_sources().await.unwrap();
        db.source_sync().reset_progress("a.csv").await.unwrap();
        let records = vec![];
        db.source_sync()
            .record_page(rms_db::PageCommit {
                source_name: "a.csv",
                records: &records,
                total: Some(2),
                downloaded: 2,
                last_offset: 2,
                completed: true,
            })
            .await
            .unwrap();

        fake.set_upload_date("a.csv", "2024-05-01T00:00:00Z");
        lister.list_sources().await.unwrap();

        let meta = db.source_sync().get("a.csv").await.unwrap().unwrap();
        assert!(!meta.completed);
        assert_eq!(meta.last_offset, 0);
        assert_eq!(meta.server_upload_date.as_deref(), Some("2024-05-01T00:00:00Z"));
    }
}
