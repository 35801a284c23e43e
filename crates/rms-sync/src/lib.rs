//! # rms-sync: Offline Mirror Sync Engine
//!
//! This crate keeps a local SQLite copy of the remote vehicle catalog in
//! step with the server so field agents can search it without a network,
//! including records the server has since deleted.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          MirrorEngine                                   │
//! │         sync_one_step() · smart_sync() · direct_chunked_sync()         │
//! │                                                                         │
//! │    ┌────────────────┐          ┌────────────────────┐                  │
//! │    │ CatalogLister  │          │  ChunkDownloader   │                  │
//! │    │ + ListingCache │          │  (resumable pages) │                  │
//! │    └───────┬────────┘          └─────────┬──────────┘                  │
//! │            └──────────────┬──────────────┘                             │
//! │                           ▼                                             │
//! │                   ┌───────────────┐      ┌────────────────────┐        │
//! │                   │ CatalogClient │─────►│ CredentialProvider │        │
//! │                   └───────┬───────┘      └────────────────────┘        │
//! │                           ▼                                             │
//! │                ┌────────────────────┐                                   │
//! │                │ RetryingTransport  │  exponential backoff, jitter      │
//! │                └─────────┬──────────┘                                   │
//! │                          ▼                                              │
//! │                ┌────────────────────┐                                   │
//! │                │    RateLimiter     │  token bucket, FIFO               │
//! │                └─────────┬──────────┘                                   │
//! │                          ▼                                              │
//! │                ┌────────────────────┐                                   │
//! │                │ CatalogApi (HTTP)  │  reqwest, bearer auth             │
//! │                └────────────────────┘                                   │
//! │                                                                         │
//! │  Every page lands in rms-db in one transaction: vehicles upserted,     │
//! │  ids added to seen_ids, source cursor advanced.                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`orchestrator`] - `MirrorEngine` and its sync algorithms
//! - [`lister`] - Remote source listing, dedupe, metadata stubs
//! - [`downloader`] - One-page-per-call resumable source downloads
//! - [`client`] - Credentialed access to the catalog through the transport
//! - [`transport`] - Retry policy and retrying executor
//! - [`limiter`] - Token-bucket rate limiter
//! - [`api`] - `CatalogApi` trait, wire types, HTTP implementation
//! - [`credentials`] - Bearer token providers
//! - [`config`] - `MirrorConfig` (TOML + env overrides)
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rms_db::{Database, DbConfig};
//! use rms_sync::{MirrorConfig, MirrorEngine, StaticCredential};
//!
//! let config = MirrorConfig::load_or_default(None);
//! let db = Database::new(DbConfig::new(config.database_path()?)).await?;
//! let credentials = Arc::new(StaticCredential::from_env("RMS_API_TOKEN"));
//!
//! let engine = MirrorEngine::from_config(&config, db, credentials)?;
//!
//! // Incremental, UI-driven
//! let step = engine.sync_one_step().await?;
//!
//! // Full reconciliation
//! let report = engine.smart_sync().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod api;
pub mod client;
pub mod config;
pub mod credentials;
pub mod downloader;
pub mod error;
pub mod limiter;
pub mod lister;
pub mod orchestrator;
pub mod transport;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use api::{CatalogApi, HttpCatalogApi};
pub use client::CatalogClient;
pub use config::MirrorConfig;
pub use credentials::{CredentialProvider, StaticCredential};
pub use downloader::{ChunkDownloader, ChunkOutcome, SeedOutcome};
pub use error::{SyncError, SyncResult};
pub use limiter::RateLimiter;
pub use lister::CatalogLister;
pub use orchestrator::{
    DirectMode, DirectSyncReport, MirrorEngine, MirrorStatus, NoOpReporter, ProgressReporter,
    SmartSyncReport, StepOutcome, SyncPhase,
};
pub use transport::{RetryPolicy, RetryingTransport};
