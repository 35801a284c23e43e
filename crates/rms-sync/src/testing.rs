//! In-memory catalog for engine tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rms_core::{RawVehicleRecord, SourceSummary, VehicleCategory};
use rms_db::{Database, DbConfig};

use crate::api::{CatalogApi, OfflineStats, RawSourceSummary, RecordPage, SourceListPage};
use crate::client::CatalogClient;
use crate::credentials::{CredentialProvider, StaticCredential};
use crate::error::{SyncError, SyncResult};
use crate::limiter::RateLimiter;
use crate::transport::{RetryPolicy, RetryingTransport};

#[derive(Debug, Clone, Copy)]
pub(crate) enum FailureKind {
    Server,
    Client,
    Timeout,
}

impl FailureKind {
    fn to_error(self) -> SyncError {
        match self {
            FailureKind::Server => SyncError::Server {
                status: 503,
                message: "injected".into(),
            },
            FailureKind::Client => SyncError::Client {
                status: 400,
                message: "injected".into(),
            },
            FailureKind::Timeout => SyncError::Timeout(30),
        }
    }
}

#[derive(Debug, Clone)]
struct FakeSource {
    name: String,
    category: VehicleCategory,
    upload_date: Option<String>,
    /// `None` uses the record count.
    declared_total: Option<Option<i64>>,
    records: Vec<Value>,
}

impl FakeSource {
    fn total(&self) -> Option<i64> {
        self.declared_total
            .unwrap_or(Some(self.records.len() as i64))
    }
}

#[derive(Debug, Default)]
struct State {
    sources: Vec<FakeSource>,
    fetch_failures: HashMap<String, (FailureKind, u32)>,
    listing_failures: Option<(FailureKind, u32)>,
    chunk_failures: HashMap<VehicleCategory, (FailureKind, u32)>,
    listing_calls: HashMap<VehicleCategory, u32>,
    requested_pages: HashMap<String, Vec<u32>>,
    chunk_calls: HashMap<VehicleCategory, u32>,
}

impl State {
    fn source(&self, name: &str) -> Option<&FakeSource> {
        self.sources.iter().rev().find(|s| s.name == name)
    }

    fn source_mut(&mut self, name: &str) -> &mut FakeSource {
        self.sources
            .iter_mut()
            .rev()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("no fake source {name}"))
    }
}

fn take_failure(slot: &mut Option<(FailureKind, u32)>) -> Option<SyncError> {
    match slot {
        Some((kind, remaining)) if *remaining > 0 => {
            *remaining -= 1;
            Some(kind.to_error())
        }
        _ => None,
    }
}

/// Scriptable [`CatalogApi`] backed by generated records.
#[derive(Debug, Default)]
pub(crate) struct FakeCatalog {
    state: Mutex<State>,
}

impl FakeCatalog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Adds a source with `count` generated records, ids `"{name}-{i}"`.
    pub(crate) fn add_source(&self, name: &str, category: VehicleCategory, count: usize) {
        let records = (0..count).map(|i| fake_record(name, i)).collect();
        self.state().sources.push(FakeSource {
            name: name.to_string(),
            category,
            upload_date: None,
            declared_total: None,
            records,
        });
    }

    /// Appends `count` generated records to an existing source.
    pub(crate) fn grow_source(&self, name: &str, count: usize) {
        let mut state = self.state();
        let source = state.source_mut(name);
        let start = source.records.len();
        source
            .records
            .extend((start..start + count).map(|i| fake_record(name, i)));
    }

    pub(crate) fn remove_source(&self, name: &str) {
        self.state().sources.retain(|s| s.name != name);
    }

    pub(crate) fn remove_record(&self, name: &str, id: &str) {
        self.state()
            .source_mut(name)
            .records
            .retain(|r| r["_id"] != id);
    }

    pub(crate) fn push_raw_record(&self, name: &str, record: Value) {
        self.state().source_mut(name).records.push(record);
    }

    pub(crate) fn set_upload_date(&self, name: &str, date: &str) {
        self.state().source_mut(name).upload_date = Some(date.to_string());
    }

    /// Overrides the total reported by listing and record pages.
    pub(crate) fn set_declared_total(&self, name: &str, total: Option<i64>) {
        self.state().source_mut(name).declared_total = Some(total);
    }

    pub(crate) fn fail_next_fetches(&self, name: &str, kind: FailureKind, times: u32) {
        self.state()
            .fetch_failures
            .insert(name.to_string(), (kind, times));
    }

    pub(crate) fn fail_next_listings(&self, kind: FailureKind, times: u32) {
        self.state().listing_failures = Some((kind, times));
    }

    pub(crate) fn fail_next_chunks(&self, category: VehicleCategory, kind: FailureKind, times: u32) {
        self.state().chunk_failures.insert(category, (kind, times));
    }

    pub(crate) fn listing_calls(&self, category: VehicleCategory) -> u32 {
        self.state().listing_calls.get(&category).copied().unwrap_or(0)
    }

    pub(crate) fn record_calls(&self, name: &str) -> usize {
        self.requested_pages(name).len()
    }

    pub(crate) fn requested_pages(&self, name: &str) -> Vec<u32> {
        self.state()
            .requested_pages
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn chunk_calls(&self, category: VehicleCategory) -> u32 {
        self.state().chunk_calls.get(&category).copied().unwrap_or(0)
    }

    /// Listing as the lister would normalize it.
    pub(crate) fn summaries(&self) -> Vec<SourceSummary> {
        self.state()
            .sources
            .iter()
            .map(|s| SourceSummary {
                source_name: s.name.clone(),
                bank_name: "BankA".into(),
                vehicle_type: s.category.as_str().into(),
                total: s.total(),
                server_upload_date: s.upload_date.clone(),
            })
            .collect()
    }

    /// Every record id currently on the fake server.
    pub(crate) fn all_ids(&self) -> Vec<String> {
        let state = self.state();
        let mut ids: Vec<String> = state
            .sources
            .iter()
            .flat_map(|s| s.records.iter())
            .filter_map(|r| r["_id"].as_str().map(str::to_string))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

fn fake_record(source: &str, i: usize) -> Value {
    json!({
        "_id": format!("{source}-{i}"),
        "regNo": format!("MH 12 AB {:04}", i),
        "chassisNo": format!("CH-{source}-{i}"),
        "customerName": format!("Customer {i}"),
    })
}

fn page_slice<T: Clone>(items: &[T], skip: usize, limit: usize) -> Vec<T> {
    items.iter().skip(skip).take(limit).cloned().collect()
}

#[async_trait]
impl CatalogApi for FakeCatalog {
    async fn list_sources(
        &self,
        _token: &str,
        category: VehicleCategory,
        page: u32,
        limit: u32,
    ) -> SyncResult<SourceListPage> {
        let mut state = self.state();
        *state.listing_calls.entry(category).or_default() += 1;
        if let Some(err) = take_failure(&mut state.listing_failures) {
            return Err(err);
        }

        let listed: Vec<RawSourceSummary> = state
            .sources
            .iter()
            .filter(|s| s.category == category)
            .map(|s| RawSourceSummary {
                source_name: Some(s.name.clone()),
                bank_name: Some("BankA".into()),
                vehicle_type: None,
                total: s.total().map(Value::from),
                server_upload_date: s.upload_date.clone().map(Value::from),
            })
            .collect();

        let limit = limit.max(1) as usize;
        let pages = listed.len().div_ceil(limit).max(1) as u32;
        Ok(SourceListPage {
            sources: page_slice(&listed, (page.max(1) as usize - 1) * limit, limit),
            pages: Some(pages),
        })
    }

    async fn fetch_records(
        &self,
        _token: &str,
        source_name: &str,
        page: u32,
        limit: u32,
    ) -> SyncResult<RecordPage> {
        let mut state = self.state();
        state
            .requested_pages
            .entry(source_name.to_string())
            .or_default()
            .push(page);
        let mut slot = state.fetch_failures.remove(source_name);
        let failure = take_failure(&mut slot);
        if let Some(slot) = slot {
            state.fetch_failures.insert(source_name.to_string(), slot);
        }
        if let Some(err) = failure {
            return Err(err);
        }

        let source = state.source(source_name).ok_or_else(|| SyncError::Client {
            status: 404,
            message: format!("source {source_name} not found"),
        })?;
        let limit = limit.max(1) as usize;
        let records = page_slice(&source.records, (page.max(1) as usize - 1) * limit, limit);

        Ok(RecordPage {
            records: records.into_iter().map(RawVehicleRecord::from).collect(),
            total: source.total(),
            pages: Some(source.records.len().div_ceil(limit) as u32),
            upload_details: None,
        })
    }

    async fn offline_stats(&self, _token: &str) -> SyncResult<OfflineStats> {
        let state = self.state();
        let mut counts = HashMap::new();
        for source in &state.sources {
            *counts.entry(source.category.as_str().to_string()).or_insert(0) +=
                source.records.len() as i64;
        }
        Ok(OfflineStats { counts })
    }

    async fn offline_chunk(
        &self,
        _token: &str,
        category: VehicleCategory,
        skip: u64,
        limit: u32,
    ) -> SyncResult<Vec<RawVehicleRecord>> {
        let mut state = self.state();
        *state.chunk_calls.entry(category).or_default() += 1;
        let mut slot = state.chunk_failures.remove(&category);
        let failure = take_failure(&mut slot);
        if let Some(slot) = slot {
            state.chunk_failures.insert(category, slot);
        }
        if let Some(err) = failure {
            return Err(err);
        }

        let records: Vec<Value> = state
            .sources
            .iter()
            .filter(|s| s.category == category)
            .flat_map(|s| {
                s.records.iter().map(move |r| {
                    let mut r = r.clone();
                    r["sourceName"] = Value::from(s.name.clone());
                    r
                })
            })
            .collect();

        Ok(page_slice(&records, skip as usize, limit.max(1) as usize)
            .into_iter()
            .map(RawVehicleRecord::from)
            .collect())
    }
}

/// In-memory store plus a client over `fake` with fast limits.
pub(crate) async fn engine_parts(
    fake: Arc<FakeCatalog>,
    token: Option<&str>,
) -> (Database, CatalogClient) {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let credentials: Arc<dyn CredentialProvider> = Arc::new(match token {
        Some(token) => StaticCredential::new(token),
        None => StaticCredential::empty(),
    });
    let transport = RetryingTransport::new(
        RateLimiter::new(10_000, Duration::from_millis(1)),
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        },
    );
    (db, CatalogClient::new(fake, credentials, transport))
}
