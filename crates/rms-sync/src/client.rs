//! # Catalog Client
//!
//! The single handle every remote call goes through: it fetches the bearer
//! token, then runs the [`CatalogApi`] call inside the retrying transport.
//!
//! ```text
//!   lister / downloader / engine
//!              │
//!              ▼
//!   CatalogClient ── token? ──► CredentialProvider
//!              │
//!              ▼
//!   RetryingTransport ──► RateLimiter ──► CatalogApi (HTTP or fake)
//! ```

use std::sync::Arc;

use rms_core::{RawVehicleRecord, VehicleCategory};

use crate::api::{CatalogApi, OfflineStats, RecordPage, SourceListPage};
use crate::credentials::CredentialProvider;
use crate::error::{SyncError, SyncResult};
use crate::transport::RetryingTransport;

/// Credentialed, rate-limited, retrying access to the catalog.
#[derive(Clone)]
pub struct CatalogClient {
    api: Arc<dyn CatalogApi>,
    credentials: Arc<dyn CredentialProvider>,
    transport: RetryingTransport,
}

impl CatalogClient {
    pub fn new(
        api: Arc<dyn CatalogApi>,
        credentials: Arc<dyn CredentialProvider>,
        transport: RetryingTransport,
    ) -> Self {
        CatalogClient {
            api,
            credentials,
            transport,
        }
    }

    /// Current bearer token, if signed in.
    pub async fn token(&self) -> Option<String> {
        self.credentials.bearer_token().await
    }

    async fn require_token(&self) -> SyncResult<String> {
        self.token().await.ok_or(SyncError::MissingCredential)
    }

    pub async fn list_sources_page(
        &self,
        category: VehicleCategory,
        page: u32,
        limit: u32,
    ) -> SyncResult<SourceListPage> {
        let token = self.require_token().await?;
        self.transport
            .execute("list_sources", || {
                self.api.list_sources(&token, category, page, limit)
            })
            .await
    }

    pub async fn fetch_records(
        &self,
        source_name: &str,
        page: u32,
        limit: u32,
    ) -> SyncResult<RecordPage> {
        let token = self.require_token().await?;
        self.transport
            .execute("fetch_records", || {
                self.api.fetch_records(&token, source_name, page, limit)
            })
            .await
    }

    pub async fn offline_stats(&self) -> SyncResult<OfflineStats> {
        let token = self.require_token().await?;
        self.transport
            .execute("offline_stats", || self.api.offline_stats(&token))
            .await
    }

    pub async fn offline_chunk(
        &self,
        category: VehicleCategory,
        skip: u64,
        limit: u32,
    ) -> SyncResult<Vec<RawVehicleRecord>> {
        let token = self.require_token().await?;
        self.transport
            .execute("offline_chunk", || {
                self.api.offline_chunk(&token, category, skip, limit)
            })
            .await
    }
}

impl std::fmt::Debug for CatalogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogClient")
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}
