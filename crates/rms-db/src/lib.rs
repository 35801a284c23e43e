//! # rms-db: Local Store for the Offline Mirror
//!
//! This crate provides the embedded relational store the sync engine mirrors
//! the remote vehicle catalog into. It uses SQLite with sqlx for async access.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Offline Mirror Data Flow                         │
//! │                                                                         │
//! │  Chunk Downloader / Orchestrator (rms-sync)                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     rms-db (THIS CRATE)                         │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │  │   │
//! │  │   │               │    │ VehicleRepo    │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ SourceSyncRepo │    │ 001_offline_ │  │   │
//! │  │   │ WriteLock     │    │ SeenIdRepo     │    │ mirror.sql   │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (mirror.db)                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`lock`] - Single-writer lock shared by all repositories
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations (vehicles, source_sync, seen_ids)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rms_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/mirror.db")).await?;
//!
//! let hits = db.vehicles().search_by_registration_suffix("1234", 20).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod lock;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use lock::WriteLock;
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::seen::SeenIdRepository;
pub use repository::source_sync::{PageCommit, SourceSyncRepository, StubOutcome};
pub use repository::vehicle::VehicleRepository;
