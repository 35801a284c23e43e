//! # Catalog API
//!
//! The remote collaborator the mirror pulls from, behind the [`CatalogApi`]
//! trait, plus its HTTP implementation.
//!
//! ## Endpoints
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Catalog Endpoints (GET, Bearer auth)                 │
//! │                                                                         │
//! │  /sources/{category}?page&limit                                        │
//! │       → { success, data: [source], pagination: { pages } }             │
//! │                                                                         │
//! │  /sources/{sourceName}/records?page&limit                              │
//! │       → { success, data: [record], pagination: { total, pages },       │
//! │           uploadDetails }                                              │
//! │                                                                         │
//! │  /offline-stats                                                        │
//! │       → { success, counts: { category: number } }                      │
//! │                                                                         │
//! │  /offline-chunk?col&skip&limit                                         │
//! │       → { success, data: [record] }                                    │
//! │                                                                         │
//! │  HTTP 5xx / timeout / connect failure → retryable                      │
//! │  HTTP 4xx / success:false / bad JSON  → fatal                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

use rms_core::{RawVehicleRecord, VehicleCategory};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Wire Types
// =============================================================================

/// A source as the listing endpoint reports it, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSourceSummary {
    #[serde(default, alias = "fileName", alias = "name")]
    pub source_name: Option<String>,

    #[serde(default, alias = "bank")]
    pub bank_name: Option<String>,

    #[serde(default)]
    pub vehicle_type: Option<String>,

    /// Record count; a number or a numeric string.
    #[serde(default, alias = "count", alias = "totalRecords")]
    pub total: Option<Value>,

    #[serde(default, alias = "uploadDate", alias = "uploadedAt", alias = "createdAt")]
    pub server_upload_date: Option<Value>,
}

/// Upload metadata attached to a record page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDetails {
    #[serde(default, alias = "bank")]
    pub bank_name: Option<String>,

    #[serde(default)]
    pub vehicle_type: Option<String>,

    #[serde(default, alias = "uploadedAt")]
    pub upload_date: Option<Value>,
}

/// One page of the source listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceListPage {
    pub sources: Vec<RawSourceSummary>,
    pub pages: Option<u32>,
}

/// One page of a source's records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPage {
    pub records: Vec<RawVehicleRecord>,
    pub total: Option<i64>,
    pub pages: Option<u32>,
    pub upload_details: Option<UploadDetails>,
}

/// Per-category record counts, used for progress estimates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OfflineStats {
    pub counts: HashMap<String, i64>,
}

impl OfflineStats {
    /// Sum of all category counts.
    pub fn total(&self) -> i64 {
        self.counts.values().copied().filter(|n| *n > 0).sum()
    }
}

// =============================================================================
// Catalog API Trait
// =============================================================================

/// Remote catalog operations. Implementations perform exactly one request
/// per call; retry and throttling live in the transport above them.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn list_sources(
        &self,
        token: &str,
        category: VehicleCategory,
        page: u32,
        limit: u32,
    ) -> SyncResult<SourceListPage>;

    async fn fetch_records(
        &self,
        token: &str,
        source_name: &str,
        page: u32,
        limit: u32,
    ) -> SyncResult<RecordPage>;

    async fn offline_stats(&self, token: &str) -> SyncResult<OfflineStats>;

    async fn offline_chunk(
        &self,
        token: &str,
        category: VehicleCategory,
        skip: u64,
        limit: u32,
    ) -> SyncResult<Vec<RawVehicleRecord>>;
}

// =============================================================================
// HTTP Implementation
// =============================================================================

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default = "default_success")]
    success: bool,

    #[serde(default)]
    message: Option<String>,

    #[serde(default = "Vec::new")]
    data: Vec<T>,

    #[serde(default)]
    pagination: Option<Pagination>,

    #[serde(default, rename = "uploadDetails")]
    upload_details: Option<UploadDetails>,

    #[serde(default)]
    counts: HashMap<String, i64>,
}

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    #[serde(default)]
    total: Option<Value>,

    #[serde(default, alias = "totalPages")]
    pages: Option<u32>,
}

fn default_success() -> bool {
    true
}

/// Reads a record count sent either as a number or a numeric string.
pub(crate) fn count_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// [`CatalogApi`] over HTTP with reqwest.
///
/// ## Usage
/// ```rust,ignore
/// let api = HttpCatalogApi::new(Url::parse("https://rms.example.com/api")?, Duration::from_secs(30))?;
/// let page = api.list_sources(&token, VehicleCategory::TwoWheeler, 1, 100).await?;
/// ```
#[derive(Debug, Clone)]
pub struct HttpCatalogApi {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpCatalogApi {
    /// Creates a client with a fixed per-request timeout.
    pub fn new(base_url: Url, timeout: Duration) -> SyncResult<Self> {
        if base_url.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl(base_url.to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("rms-mirror/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Internal(format!("HTTP client: {e}")))?;

        Ok(HttpCatalogApi {
            client,
            base_url,
            timeout,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> SyncResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        token: &str,
        url: Url,
        query: &[(&str, String)],
    ) -> SyncResult<Envelope<T>> {
        debug!(url = %url, ?query, "GET");

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !status.is_success() {
            return Err(status_error(status, &body));
        }

        let envelope: Envelope<T> = serde_json::from_slice(&body)?;
        if !envelope.success {
            return Err(SyncError::Client {
                status: status.as_u16(),
                message: envelope
                    .message
                    .unwrap_or_else(|| "request unsuccessful".to_string()),
            });
        }

        Ok(envelope)
    }

    fn map_transport_error(&self, err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::Timeout(self.timeout.as_secs())
        } else if err.is_decode() {
            SyncError::InvalidResponse(err.to_string())
        } else {
            SyncError::Connectivity(err.to_string())
        }
    }
}

fn status_error(status: StatusCode, body: &[u8]) -> SyncError {
    let message = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string());

    if status.is_server_error() {
        SyncError::Server {
            status: status.as_u16(),
            message,
        }
    } else {
        SyncError::Client {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl CatalogApi for HttpCatalogApi {
    async fn list_sources(
        &self,
        token: &str,
        category: VehicleCategory,
        page: u32,
        limit: u32,
    ) -> SyncResult<SourceListPage> {
        let url = self.endpoint(&["sources", category.as_str()])?;
        let envelope: Envelope<RawSourceSummary> = self
            .get(token, url, &[("page", page.to_string()), ("limit", limit.to_string())])
            .await?;

        Ok(SourceListPage {
            sources: envelope.data,
            pages: envelope.pagination.and_then(|p| p.pages),
        })
    }

    async fn fetch_records(
        &self,
        token: &str,
        source_name: &str,
        page: u32,
        limit: u32,
    ) -> SyncResult<RecordPage> {
        let url = self.endpoint(&["sources", source_name, "records"])?;
        let envelope: Envelope<RawVehicleRecord> = self
            .get(token, url, &[("page", page.to_string()), ("limit", limit.to_string())])
            .await?;

        let pagination = envelope.pagination.unwrap_or_default();
        Ok(RecordPage {
            records: envelope.data,
            total: pagination.total.as_ref().and_then(count_from_value),
            pages: pagination.pages,
            upload_details: envelope.upload_details,
        })
    }

    async fn offline_stats(&self, token: &str) -> SyncResult<OfflineStats> {
        let url = self.endpoint(&["offline-stats"])?;
        let envelope: Envelope<Value> = self.get(token, url, &[]).await?;
        Ok(OfflineStats {
            counts: envelope.counts,
        })
    }

    async fn offline_chunk(
        &self,
        token: &str,
        category: VehicleCategory,
        skip: u64,
        limit: u32,
    ) -> SyncResult<Vec<RawVehicleRecord>> {
        let url = self.endpoint(&["offline-chunk"])?;
        let envelope: Envelope<RawVehicleRecord> = self
            .get(
                token,
                url,
                &[
                    ("col", category.as_str().to_string()),
                    ("skip", skip.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        Ok(envelope.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn api(server: &MockServer) -> HttpCatalogApi {
        let base = Url::parse(&format!("{}/api", server.uri())).unwrap();
        HttpCatalogApi::new(base, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_list_sources_sends_bearer_and_parses_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/sources/two-wheeler"))
            .and(query_param("page", "2"))
            .and(query_param("limit", "50"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": [
                    { "fileName": "BankX_2024.csv", "bankName": "BankX", "count": 150,
                      "uploadDate": "2024-03-01T10:00:00Z" }
                ],
                "pagination": { "pages": 3 }
            })))
            .mount(&server)
            .await;

        let page = api(&server)
            .await
            .list_sources("secret", VehicleCategory::TwoWheeler, 2, 50)
            .await
            .unwrap();

        assert_eq!(page.pages, Some(3));
        assert_eq!(page.sources.len(), 1);
        assert_eq!(page.sources[0].source_name.as_deref(), Some("BankX_2024.csv"));
        assert_eq!(page.sources[0].total, Some(json!(150)));
    }

    #[tokio::test]
    async fn test_fetch_records_reads_pagination_and_upload_details() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/sources/BankX_2024.csv/records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": [ { "_id": "a", "regNo": "MH12AB1234" } ],
                "pagination": { "total": 150, "pages": 3 },
                "uploadDetails": { "bankName": "BankX", "vehicleType": "4W" }
            })))
            .mount(&server)
            .await;

        let page = api(&server)
            .await
            .fetch_records("t", "BankX_2024.csv", 1, 50)
            .await
            .unwrap();

        assert_eq!(page.records.len(), 1);
        assert_eq!(page.total, Some(150));
        assert_eq!(
            page.upload_details.and_then(|d| d.bank_name).as_deref(),
            Some("BankX")
        );
    }

    #[tokio::test]
    async fn test_fetch_records_accepts_string_total() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/sources/a.csv/records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": [ { "_id": "a" } ],
                "pagination": { "total": " 150 ", "pages": 3 }
            })))
            .mount(&server)
            .await;

        let page = api(&server).await.fetch_records("t", "a.csv", 1, 50).await.unwrap();

        assert_eq!(page.total, Some(150));
        assert_eq!(page.records.len(), 1);
    }

    #[test]
    fn test_count_from_value() {
        assert_eq!(count_from_value(&json!(12)), Some(12));
        assert_eq!(count_from_value(&json!("12")), Some(12));
        assert_eq!(count_from_value(&json!("many")), None);
        assert_eq!(count_from_value(&json!(null)), None);
    }

    #[tokio::test]
    async fn test_status_classification() {
        let server = MockServer::start().await;
        Mock::given(path("/api/offline-stats"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(path("/api/offline-chunk"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({ "message": "token expired" })),
            )
            .mount(&server)
            .await;

        let api = api(&server).await;

        let err = api.offline_stats("t").await.unwrap_err();
        assert!(matches!(err, SyncError::Server { status: 503, .. }));
        assert!(err.is_retryable());

        let err = api
            .offline_chunk("t", VehicleCategory::Commercial, 0, 10)
            .await
            .unwrap_err();
        match err {
            SyncError::Client { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "token expired");
            }
            other => panic!("expected client error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unsuccessful_body_and_bad_json_are_fatal() {
        let server = MockServer::start().await;
        Mock::given(path("/api/sources/commercial"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "message": "tenant suspended"
            })))
            .mount(&server)
            .await;
        Mock::given(path("/api/offline-stats"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let api = api(&server).await;

        let err = api
            .list_sources("t", VehicleCategory::Commercial, 1, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Client { status: 200, .. }));

        let err = api.offline_stats("t").await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidResponse(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_offline_chunk_query_and_stats_counts() {
        let server = MockServer::start().await;
        Mock::given(path("/api/offline-chunk"))
            .and(query_param("col", "four-wheeler"))
            .and(query_param("skip", "1000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": [ { "_id": "x" }, { "_id": "y" } ]
            })))
            .mount(&server)
            .await;
        Mock::given(path("/api/offline-stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "counts": { "two-wheeler": 10, "four-wheeler": 5 }
            })))
            .mount(&server)
            .await;

        let api = api(&server).await;
        let chunk = api
            .offline_chunk("t", VehicleCategory::FourWheeler, 1000, 500)
            .await
            .unwrap();
        assert_eq!(chunk.len(), 2);

        let stats = api.offline_stats("t").await.unwrap();
        assert_eq!(stats.total(), 15);
    }

    #[tokio::test]
    async fn test_connection_refused_is_connectivity() {
        // Nothing listens on port 9 of localhost in a test environment.
        let api = HttpCatalogApi::new(
            Url::parse("http://127.0.0.1:9/api").unwrap(),
            Duration::from_secs(2),
        )
        .unwrap();

        let err = api.offline_stats("t").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
