//! # Record Normalization
//!
//! The ingestion boundary between loosely-shaped server JSON and the typed
//! [`VehicleRecord`]. Every alias the server (or an uploaded spreadsheet) has
//! ever used for a field is resolved here, once, before storage or indexing
//! sees the record.
//!
//! ## Normalization Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Raw JSON → VehicleRecord                             │
//! │                                                                         │
//! │  { "regNo": "MH 12-AB 1234", "chassisNo": "MA3XYZ", "bank": "X" }      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  1. Resolve aliases   regNo | registrationNumber | vehicleNo | ...     │
//! │  2. Canonicalize      "MH12AB1234"  (upper-case, no spaces/hyphens)    │
//! │  3. Derive indexes    suffix "1234", chassis_lc "ma3xyz"               │
//! │  4. Derive identity   _id | id | vehicleId | "MH12AB1234|ma3xyz"       │
//! │  5. Fill defaults     vehicle_type / bank from the source context      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  VehicleRecord { id, registration_suffix, chassis_number_lowercase.. } │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};
use crate::types::{VehicleCategory, VehicleRecord};
use crate::REGISTRATION_SUFFIX_LEN;

// =============================================================================
// Field Aliases
// =============================================================================

const ID_KEYS: &[&str] = &["_id", "id", "vehicleId"];
const REGISTRATION_KEYS: &[&str] = &[
    "regNo",
    "registrationNumber",
    "registration_number",
    "vehicleNo",
    "vehicleNumber",
    "rcNo",
];
const CHASSIS_KEYS: &[&str] = &["chassisNo", "chassisNumber", "chassis_number", "chassis"];
const LOAN_KEYS: &[&str] = &["loanNo", "loanNumber", "agreementNo", "agreementNumber"];
const BANK_KEYS: &[&str] = &["bank", "bankName", "financer"];
const MAKE_KEYS: &[&str] = &["make", "model", "makeModel"];
const CUSTOMER_KEYS: &[&str] = &["customerName", "customer", "name"];
const ADDRESS_KEYS: &[&str] = &["address", "customerAddress"];
const TYPE_KEYS: &[&str] = &["vehicleType", "type", "category"];
const SOURCE_KEYS: &[&str] = &["sourceName", "fileName", "source"];

// =============================================================================
// Raw Record
// =============================================================================

/// A vehicle record exactly as the server sent it.
///
/// Kept as a JSON object rather than a serde struct with `alias` attributes:
/// payloads regularly carry two aliases of the same field at once, which a
/// derived struct rejects as a duplicate field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawVehicleRecord(pub Map<String, Value>);

impl RawVehicleRecord {
    /// Returns the first non-empty value among `keys`, rendered as a string.
    fn pick(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .filter_map(|k| self.0.get(*k))
            .filter_map(value_to_string)
            .find(|s| !s.is_empty())
    }

    /// Returns the server-side identifier, if the record carries one.
    pub fn server_id(&self) -> Option<String> {
        self.pick(ID_KEYS)
    }
}

impl From<Value> for RawVehicleRecord {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => RawVehicleRecord(map),
            _ => RawVehicleRecord::default(),
        }
    }
}

/// Context the record was fetched in; supplies defaults for missing fields.
#[derive(Debug, Clone, Default)]
pub struct SourceContext {
    pub source_name: String,
    pub vehicle_type: Option<String>,
    pub bank_name: Option<String>,
}

impl SourceContext {
    pub fn new(source_name: impl Into<String>) -> Self {
        SourceContext {
            source_name: source_name.into(),
            ..Default::default()
        }
    }

    pub fn with_vehicle_type(mut self, vehicle_type: impl Into<String>) -> Self {
        self.vehicle_type = Some(vehicle_type.into());
        self
    }

    pub fn with_bank_name(mut self, bank_name: impl Into<String>) -> Self {
        self.bank_name = Some(bank_name.into());
        self
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Converts a raw server record into a [`VehicleRecord`].
///
/// ## Errors
/// [`CoreError::MissingIdentity`] when the record has no server id and
/// neither a registration nor a chassis number to build one from.
pub fn normalize_record(raw: RawVehicleRecord, ctx: &SourceContext) -> CoreResult<VehicleRecord> {
    let registration_number = raw
        .pick(REGISTRATION_KEYS)
        .map(|r| canonical_registration(&r))
        .unwrap_or_default();
    let chassis_number = raw.pick(CHASSIS_KEYS).unwrap_or_default();
    let chassis_number_lowercase = chassis_number.to_lowercase();

    let id = match raw.server_id() {
        Some(id) => id,
        None if registration_number.is_empty() && chassis_number.is_empty() => {
            return Err(CoreError::MissingIdentity);
        }
        None => format!("{}|{}", registration_number, chassis_number_lowercase),
    };

    let vehicle_type = raw
        .pick(TYPE_KEYS)
        .or_else(|| ctx.vehicle_type.clone())
        .map(|t| canonical_vehicle_type(&t))
        .unwrap_or_default();
    let bank_name = raw
        .pick(BANK_KEYS)
        .or_else(|| ctx.bank_name.clone())
        .unwrap_or_default();
    // Per-source downloads know their source; bulk chunks carry it per record.
    let source_name = if ctx.source_name.is_empty() {
        raw.pick(SOURCE_KEYS).unwrap_or_default()
    } else {
        ctx.source_name.clone()
    };

    Ok(VehicleRecord {
        id,
        vehicle_type,
        registration_suffix: registration_suffix(&registration_number),
        registration_number,
        chassis_number,
        chassis_number_lowercase,
        loan_number: raw.pick(LOAN_KEYS).unwrap_or_default(),
        bank_name,
        make: raw.pick(MAKE_KEYS).unwrap_or_default(),
        customer_name: raw.pick(CUSTOMER_KEYS).unwrap_or_default(),
        address: raw.pick(ADDRESS_KEYS).unwrap_or_default(),
        source_name,
    })
}

/// Maps a known category label (`"4W"`, `"Two Wheeler"`) to its canonical
/// form. Unknown labels are kept as sent.
pub fn canonical_vehicle_type(raw: &str) -> String {
    raw.parse::<VehicleCategory>()
        .map(|c| c.as_str().to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// Upper-cases a registration number and strips separators.
///
/// `"mh 12-ab 1234"` and `"MH12AB1234"` must land on the same row.
pub fn canonical_registration(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '.')
        .flat_map(char::to_uppercase)
        .collect()
}

/// Last [`REGISTRATION_SUFFIX_LEN`] characters of a canonical registration.
pub fn registration_suffix(canonical: &str) -> String {
    let chars: Vec<char> = canonical.chars().collect();
    let start = chars.len().saturating_sub(REGISTRATION_SUFFIX_LEN);
    chars[start..].iter().collect()
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// =============================================================================
// Timestamps
// =============================================================================

/// Normalizes a server timestamp to canonical RFC 3339 UTC (`...Z`).
///
/// ## Accepted Inputs
/// - RFC 3339 / ISO 8601 with offset: `2024-03-01T10:00:00+05:30`
/// - Naive date-time (assumed UTC): `2024-03-01 10:00:00`, `2024-03-01T10:00:00.123`
/// - Date only: `2024-03-01`, `01/03/2024`
/// - Epoch seconds or milliseconds: `1709287200`, `1709287200000`
///
/// Returns `None` for anything else.
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    parse_timestamp(raw).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Like [`normalize_timestamp`] but accepts a JSON value (string or number).
pub fn normalize_timestamp_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => normalize_timestamp(s),
        Value::Number(n) => n
            .as_i64()
            .and_then(from_epoch)
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true)),
        _ => None,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    for fmt in ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
        }
    }

    raw.parse::<i64>().ok().and_then(from_epoch)
}

fn from_epoch(n: i64) -> Option<DateTime<Utc>> {
    // Anything past ~5138 AD in seconds is really milliseconds.
    if n.abs() >= 100_000_000_000 {
        DateTime::from_timestamp_millis(n)
    } else {
        DateTime::from_timestamp(n, 0)
    }
}
