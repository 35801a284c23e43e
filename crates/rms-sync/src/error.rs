//! # Sync Error Types
//!
//! Error types for mirror sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Remote              │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connectivity ↻ │  │  Server (5xx) ↻         │ │
//! │  │  InvalidUrl     │  │  Timeout      ↻ │  │  Client (4xx) ✗         │ │
//! │  │  ConfigLoad/Save│  │  RetriesExhaust │  │  InvalidResponse ✗      │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │    Storage      │  │   Credential    │   ↻ = retried by transport   │
//! │  │                 │  │                 │   ✗ = returned immediately   │
//! │  │  Storage        │  │  Missing ✗      │                              │
//! │  │  UnknownSource  │  │                 │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all mirror failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid mirror configuration.
    #[error("Invalid mirror configuration: {0}")]
    InvalidConfig(String),

    /// Invalid API base URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Network unreachable, connection refused or reset.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Request exceeded its timeout.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Every allowed attempt failed with a retryable error.
    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last_error: Box<SyncError>,
    },

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// Server-side failure (5xx).
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Request rejected (4xx, or `success: false` in the body).
    #[error("Request rejected ({status}): {message}")]
    Client { status: u16, message: String },

    /// Body could not be parsed.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    // =========================================================================
    // Credential Errors
    // =========================================================================
    /// No bearer token available.
    #[error("No credential available. Sign in before syncing.")]
    MissingCredential,

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Local store write or read failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Source has no metadata row (never listed, or removed).
    #[error("Unknown source: {0}")]
    UnknownSource(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<rms_db::DbError> for SyncError {
    fn from(err: rms_db::DbError) -> Self {
        SyncError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::InvalidResponse(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the transport should try the request again.
    ///
    /// ## Retryable Errors
    /// - Connectivity failures
    /// - Timeouts
    /// - Server errors (5xx)
    ///
    /// Everything else (4xx, parse failures, missing credential, storage)
    /// is fatal and surfaces immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Connectivity(_) | SyncError::Timeout(_) | SyncError::Server { .. }
        )
    }

    /// Returns true if the caller must act (sign in again, fix the request)
    /// before retrying makes sense.
    pub fn is_fatal_client(&self) -> bool {
        match self {
            SyncError::Client { .. } | SyncError::MissingCredential => true,
            SyncError::RetriesExhausted { last_error, .. } => last_error.is_fatal_client(),
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}
