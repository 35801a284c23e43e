//! # rms-core: Domain Types for the Offline Mirror
//!
//! This crate holds the pure domain model of the vehicle offline mirror:
//! the mirrored [`VehicleRecord`], the per-source [`SourceSyncMeta`], the
//! vehicle categories the catalog is partitioned into, and the normalization
//! step that turns loosely-shaped server JSON into typed records.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Offline Mirror Layers                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    rms-sync (engine)                            │   │
//! │  │    Lister ──► Downloader ──► Orchestrator                       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ rms-core (THIS CRATE) ★                         │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌─────────────┐  ┌───────────┐                │   │
//! │  │   │   types   │  │  normalize  │  │   error   │                │   │
//! │  │   │ Vehicle   │  │ RawVehicle  │  │ CoreError │                │   │
//! │  │   │ SourceMeta│  │ timestamps  │  │           │                │   │
//! │  │   └───────────┘  └─────────────┘  └───────────┘                │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    rms-db (Local Store)                         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (VehicleRecord, SourceSyncMeta, VehicleCategory)
//! - [`normalize`] - Raw server record → typed record, timestamp parsing
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use rms_core::normalize::{normalize_record, RawVehicleRecord, SourceContext};
//!
//! let raw: RawVehicleRecord = serde_json::from_str(
//!     r#"{"_id": "64f1", "regNo": "MH 12-AB 1234", "chassisNo": "MA3XYZ"}"#,
//! ).unwrap();
//!
//! let record = normalize_record(raw, &SourceContext::default()).unwrap();
//! assert_eq!(record.registration_number, "MH12AB1234");
//! assert_eq!(record.registration_suffix, "1234");
//! assert_eq!(record.chassis_number_lowercase, "ma3xyz");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod normalize;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult};
pub use normalize::{normalize_record, normalize_timestamp, RawVehicleRecord, SourceContext};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Number of trailing registration characters indexed for partial lookup.
///
/// Field agents usually read only the last four digits of a plate, so
/// `registration_suffix` stores exactly that many characters.
pub const REGISTRATION_SUFFIX_LEN: usize = 4;
