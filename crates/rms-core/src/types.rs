//! # Domain Types
//!
//! Core domain types shared by the local store and the sync engine.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  VehicleRecord  │   │ SourceSyncMeta  │   │ SourceSummary   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (stable)    │   │  source_name PK │   │  source_name    │       │
//! │  │  registration_* │   │  total          │   │  bank_name      │       │
//! │  │  chassis_*      │   │  downloaded     │   │  vehicle_type   │       │
//! │  │  loan / bank    │   │  completed      │   │  total          │       │
//! │  │  source_name    │   │  last_offset    │   │  upload date    │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐                                                   │
//! │  │ VehicleCategory │  TwoWheeler · FourWheeler · Commercial            │
//! │  └─────────────────┘                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Existence of a `VehicleRecord` is governed entirely by the sync engine:
//! rows are upserted by id and removed only by the mirror sweep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// =============================================================================
// Vehicle Category
// =============================================================================

/// The three catalog partitions the server lists sources under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VehicleCategory {
    /// Motorcycles and scooters.
    TwoWheeler,
    /// Cars and light passenger vehicles.
    FourWheeler,
    /// Trucks, buses, tractors.
    Commercial,
}

impl VehicleCategory {
    /// All categories, in the order the lister walks them.
    pub const ALL: [VehicleCategory; 3] = [
        VehicleCategory::TwoWheeler,
        VehicleCategory::FourWheeler,
        VehicleCategory::Commercial,
    ];

    /// Path segment / query value used by the catalog API.
    pub const fn as_str(&self) -> &'static str {
        match self {
            VehicleCategory::TwoWheeler => "two-wheeler",
            VehicleCategory::FourWheeler => "four-wheeler",
            VehicleCategory::Commercial => "commercial",
        }
    }
}

impl std::fmt::Display for VehicleCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VehicleCategory {
    type Err = CoreError;

    /// Parses the loose spellings found in uploaded files and API payloads.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();

        match key.as_str() {
            "2w" | "2wheeler" | "twowheeler" | "bike" | "motorcycle" | "scooter" => {
                Ok(VehicleCategory::TwoWheeler)
            }
            "4w" | "4wheeler" | "fourwheeler" | "car" | "lmv" => Ok(VehicleCategory::FourWheeler),
            "cv" | "commercial" | "commercialvehicle" | "hcv" | "truck" => {
                Ok(VehicleCategory::Commercial)
            }
            _ => Err(CoreError::UnknownCategory(s.to_string())),
        }
    }
}

// =============================================================================
// Vehicle Record
// =============================================================================

/// A mirrored vehicle row.
///
/// ## Invariants
/// - Exactly one row per `id`
/// - `registration_suffix` and `chassis_number_lowercase` are always derived
///   from their source fields (see [`crate::normalize`]), never set by hand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct VehicleRecord {
    /// Stable identifier (server id or `REG|chassis` composite).
    pub id: String,

    /// Vehicle type label, e.g. `two-wheeler`.
    pub vehicle_type: String,

    /// Normalized registration (upper-case, no spaces or hyphens).
    pub registration_number: String,

    /// Last four characters of `registration_number`.
    pub registration_suffix: String,

    /// Chassis number as received.
    pub chassis_number: String,

    /// Lower-cased chassis number for case-insensitive search.
    pub chassis_number_lowercase: String,

    pub loan_number: String,

    pub bank_name: String,

    pub make: String,

    pub customer_name: String,

    pub address: String,

    /// Source the row was last written from.
    pub source_name: String,
}

// =============================================================================
// Source Sync Metadata
// =============================================================================

/// Per-source download bookkeeping.
///
/// ## Lifecycle
/// ```text
///   Lister sees source ──► stub row (downloaded=0, completed=false)
///            │
///            ▼
///   Downloader page ──► downloaded += n, last_offset += n
///            │
///            ▼
///   short / empty page or downloaded >= total ──► completed = true
///            │
///            ▼
///   source gone from server ──► row deleted
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SourceSyncMeta {
    pub source_name: String,
    pub vehicle_type: String,
    pub bank_name: String,

    /// Expected record count; `None` until known. Lowered to `downloaded`
    /// when the source ends short of the listed count.
    pub total: Option<i64>,

    /// Count the listing last reported, before any clamping.
    pub declared_total: Option<i64>,

    /// Records persisted locally for this source.
    pub downloaded: i64,

    pub completed: bool,

    /// Resume cursor (records already consumed from the server).
    pub last_offset: i64,

    /// Canonical RFC 3339 upload timestamp reported by the server.
    pub server_upload_date: Option<String>,

    /// When the last page of this source was stored locally.
    pub local_download_date: Option<DateTime<Utc>>,

    pub updated_at: DateTime<Utc>,
}

impl SourceSyncMeta {
    /// True when no further page needs to be fetched.
    ///
    /// Either the source was explicitly marked complete, or the declared
    /// total has already been reached.
    pub fn is_exhausted(&self) -> bool {
        if self.completed {
            return true;
        }
        matches!(self.total, Some(total) if self.downloaded >= total)
    }

    /// Records still missing according to the declared total, if known.
    pub fn remaining(&self) -> Option<i64> {
        self.total.map(|t| (t - self.downloaded).max(0))
    }
}

// =============================================================================
// Source Summary
// =============================================================================

/// A source as reported by the remote listing, after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub source_name: String,
    pub bank_name: String,
    pub vehicle_type: String,
    pub total: Option<i64>,
    pub server_upload_date: Option<String>,
}
