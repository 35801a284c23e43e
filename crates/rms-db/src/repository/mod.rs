//! # Repository Module
//!
//! Repository implementations for the three mirror tables.
//!
//! ## Table Ownership
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Who Writes What                                      │
//! │                                                                         │
//! │  VehicleRepository      vehicles      upsert, search, sweep            │
//! │  SourceSyncRepository   source_sync   stubs, page commits, resets      │
//! │  SeenIdRepository       seen_ids      clear, add, protect source       │
//! │                                                                         │
//! │  Page commit = vehicles upsert + seen_ids insert + source_sync update  │
//! │                in ONE transaction under the WriteLock.                 │
//! │                                                                         │
//! │  The sync engine never issues SQL itself; every mutation goes          │
//! │  through one of these repositories.                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`VehicleRepository`](vehicle::VehicleRepository) - Mirrored records
//! - [`SourceSyncRepository`](source_sync::SourceSyncRepository) - Per-source cursors
//! - [`SeenIdRepository`](seen::SeenIdRepository) - Deletion reconciliation set

pub mod seen;
pub mod source_sync;
pub mod vehicle;
