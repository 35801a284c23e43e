//! # Mirror Configuration
//!
//! Configuration management for the offline mirror engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     RMS_API_BASE_URL=https://api.example.com/api                       │
//! │     RMS_PAGE_LIMIT=500                                                 │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/mirror/mirror.toml (Linux)                               │
//! │     ~/Library/Application Support/com.rms.mirror/mirror.toml (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [api]
//! base_url = "https://api.example.com/api"
//! request_timeout_secs = 30
//!
//! [limiter]
//! capacity = 5
//! refill_interval_ms = 1000
//!
//! [retry]
//! max_retries = 3
//! base_delay_ms = 500
//!
//! [mirror]
//! page_limit = 500
//! demote_ratio = 0.5
//!
//! [database]
//! path = "/data/mirror.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};
use crate::limiter::RateLimiter;
use crate::transport::RetryPolicy;

// =============================================================================
// API Settings
// =============================================================================

/// Remote catalog API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    /// Base URL the endpoint paths are appended to.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout (seconds). Timeouts are retried.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// =============================================================================
// Limiter / Retry Settings
// =============================================================================

/// Token bucket settings for outbound calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterSettings {
    /// Requests allowed per refill interval.
    #[serde(default = "default_capacity")]
    pub capacity: u32,

    /// Refill interval (milliseconds).
    #[serde(default = "default_refill_interval")]
    pub refill_interval_ms: u64,
}

fn default_capacity() -> u32 {
    5
}

fn default_refill_interval() -> u64 {
    1000
}

impl Default for LimiterSettings {
    fn default() -> Self {
        LimiterSettings {
            capacity: default_capacity(),
            refill_interval_ms: default_refill_interval(),
        }
    }
}

/// Retry settings for the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts per request, first one included.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the second attempt (milliseconds); doubles each time.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    500
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
        }
    }
}

// =============================================================================
// Mirror Settings
// =============================================================================

/// Paging and reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorSettings {
    /// Records per chunk-downloader page.
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,

    /// Sources per listing page.
    #[serde(default = "default_listing_page_limit")]
    pub listing_page_limit: u32,

    /// Records per page when seeding the seen-set from a completed source.
    #[serde(default = "default_seed_page_limit")]
    pub seed_page_limit: u32,

    /// Page cap when seeding one source.
    #[serde(default = "default_seed_max_pages")]
    pub seed_max_pages: u32,

    /// Records per chunk in direct chunked sync.
    #[serde(default = "default_direct_chunk_limit")]
    pub direct_chunk_limit: u32,

    /// A completed source is re-downloaded when its local row count falls
    /// below `downloaded * demote_ratio`.
    #[serde(default = "default_demote_ratio")]
    pub demote_ratio: f64,

    /// How long a source listing is reused by incremental steps (seconds).
    #[serde(default = "default_listing_cache_ttl")]
    pub listing_cache_ttl_secs: u64,
}

fn default_page_limit() -> u32 {
    500
}

fn default_listing_page_limit() -> u32 {
    100
}

fn default_seed_page_limit() -> u32 {
    1000
}

fn default_seed_max_pages() -> u32 {
    200
}

fn default_direct_chunk_limit() -> u32 {
    1000
}

fn default_demote_ratio() -> f64 {
    0.5
}

fn default_listing_cache_ttl() -> u64 {
    300
}

impl Default for MirrorSettings {
    fn default() -> Self {
        MirrorSettings {
            page_limit: default_page_limit(),
            listing_page_limit: default_listing_page_limit(),
            seed_page_limit: default_seed_page_limit(),
            seed_max_pages: default_seed_max_pages(),
            direct_chunk_limit: default_direct_chunk_limit(),
            demote_ratio: default_demote_ratio(),
            listing_cache_ttl_secs: default_listing_cache_ttl(),
        }
    }
}

impl MirrorSettings {
    pub fn listing_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.listing_cache_ttl_secs)
    }
}

// =============================================================================
// Database Settings
// =============================================================================

/// Local store location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file path. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Main Mirror Configuration
// =============================================================================

/// Complete mirror configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorConfig {
    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub limiter: LimiterSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub mirror: MirrorSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl MirrorConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (mirror.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading mirror config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load mirror config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Mirror config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        let url = Url::parse(&self.api.base_url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SyncError::InvalidUrl(format!(
                "API base URL must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }

        let positive = [
            ("request_timeout_secs", self.api.request_timeout_secs),
            ("capacity", self.limiter.capacity as u64),
            ("refill_interval_ms", self.limiter.refill_interval_ms),
            ("max_retries", self.retry.max_retries as u64),
            ("page_limit", self.mirror.page_limit as u64),
            ("listing_page_limit", self.mirror.listing_page_limit as u64),
            ("seed_page_limit", self.mirror.seed_page_limit as u64),
            ("seed_max_pages", self.mirror.seed_max_pages as u64),
            ("direct_chunk_limit", self.mirror.direct_chunk_limit as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(SyncError::InvalidConfig(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.mirror.demote_ratio) {
            return Err(SyncError::InvalidConfig(format!(
                "demote_ratio must be between 0 and 1, got: {}",
                self.mirror.demote_ratio
            )));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("RMS_API_BASE_URL") {
            debug!(url = %url, "Overriding API base URL from environment");
            self.api.base_url = url;
        }

        if let Some(path) = var("RMS_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Some(ratio) = var("RMS_DEMOTE_RATIO") {
            match ratio.parse::<f64>() {
                Ok(r) => self.mirror.demote_ratio = r,
                Err(_) => warn!(value = %ratio, "Ignoring unparseable RMS_DEMOTE_RATIO"),
            }
        }

        let numeric: [(&str, &mut u64); 3] = [
            ("RMS_REQUEST_TIMEOUT_SECS", &mut self.api.request_timeout_secs),
            ("RMS_LIMITER_REFILL_MS", &mut self.limiter.refill_interval_ms),
            ("RMS_RETRY_BASE_DELAY_MS", &mut self.retry.base_delay_ms),
        ];
        for (key, slot) in numeric {
            if let Some(value) = var(key) {
                match value.parse() {
                    Ok(v) => *slot = v,
                    Err(_) => warn!(key, value = %value, "Ignoring unparseable override"),
                }
            }
        }

        let counts: [(&str, &mut u32); 3] = [
            ("RMS_LIMITER_CAPACITY", &mut self.limiter.capacity),
            ("RMS_MAX_RETRIES", &mut self.retry.max_retries),
            ("RMS_PAGE_LIMIT", &mut self.mirror.page_limit),
        ];
        for (key, slot) in counts {
            if let Some(value) = var(key) {
                match value.parse() {
                    Ok(v) => *slot = v,
                    Err(_) => warn!(key, value = %value, "Ignoring unparseable override"),
                }
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "rms", "mirror")
            .map(|dirs| dirs.config_dir().join("mirror.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Resolves the database path (configured, else platform data dir).
    pub fn database_path(&self) -> SyncResult<PathBuf> {
        if let Some(path) = &self.database.path {
            return Ok(path.clone());
        }

        directories::ProjectDirs::from("com", "rms", "mirror")
            .map(|dirs| dirs.data_dir().join("mirror.db"))
            .ok_or_else(|| SyncError::InvalidConfig("Could not determine app data directory".into()))
    }

    pub fn base_url(&self) -> SyncResult<Url> {
        Ok(Url::parse(&self.api.base_url)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
        }
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(
            self.limiter.capacity,
            Duration::from_millis(self.limiter.refill_interval_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = MirrorConfig::default();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.api.request_timeout_secs, 30);
        assert_eq!(config.mirror.demote_ratio, 0.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = MirrorConfig::default();

        config.api.base_url = "ws://localhost:8080".into();
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.api.base_url = "not a url".into();
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.api.base_url = "https://api.example.com/api".into();
        config.mirror.page_limit = 0;
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));

        config.mirror.page_limit = 50;
        config.mirror.demote_ratio = 1.5;
        assert!(config.validate().is_err());

        config.mirror.demote_ratio = 0.25;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: MirrorConfig = toml::from_str(
            r#"
            [api]
            base_url = "https://rms.example.com/api"

            [mirror]
            page_limit = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.api.base_url, "https://rms.example.com/api");
        assert_eq!(config.api.request_timeout_secs, 30);
        assert_eq!(config.mirror.page_limit, 50);
        assert_eq!(config.mirror.seed_page_limit, 1000);
        assert_eq!(config.limiter.capacity, 5);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("RMS_API_BASE_URL", "https://override.example.com"),
            ("RMS_PAGE_LIMIT", "250"),
            ("RMS_MAX_RETRIES", "5"),
            ("RMS_LIMITER_REFILL_MS", "200"),
            ("RMS_DEMOTE_RATIO", "oops"),
            ("RMS_DATABASE_PATH", "/tmp/m.db"),
        ]);

        let mut config = MirrorConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.api.base_url, "https://override.example.com");
        assert_eq!(config.mirror.page_limit, 250);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.limiter.refill_interval_ms, 200);
        assert_eq!(config.mirror.demote_ratio, 0.5);
        assert_eq!(config.database_path().unwrap(), PathBuf::from("/tmp/m.db"));
    }

    #[test]
    fn test_toml_serialization() {
        let config = MirrorConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[api]"));
        assert!(toml_str.contains("[mirror]"));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = MirrorConfig::default().retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
    }
}
