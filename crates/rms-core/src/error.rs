//! # Error Types
//!
//! Domain-specific error types for rms-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  rms-core errors (this file)                                           │
//! │  └── CoreError        - Normalization / parsing failures               │
//! │                                                                         │
//! │  rms-db errors (separate crate)                                        │
//! │  └── DbError          - Local store failures                           │
//! │                                                                         │
//! │  rms-sync errors (separate crate)                                      │
//! │  └── SyncError        - Transport, API, storage, config failures       │
//! │                                                                         │
//! │  Flow: CoreError (logged, record skipped) · DbError → SyncError        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Domain errors raised while turning server data into typed values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// A raw record carries neither a server id nor a registration/chassis
    /// pair, so no stable identity can be derived for it.
    ///
    /// ## When This Occurs
    /// - Blank rows in an uploaded spreadsheet
    /// - Server returns a placeholder object
    #[error("Record has no id, registration or chassis number")]
    MissingIdentity,

    /// A vehicle category string did not match any known category.
    #[error("Unknown vehicle category: '{0}'")]
    UnknownCategory(String),
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            CoreError::UnknownCategory("boat".into()).to_string(),
            "Unknown vehicle category: 'boat'"
        );
        assert!(CoreError::MissingIdentity.to_string().contains("no id"));
    }
}
