//! # Database Pool Management
//!
//! Connection pool creation and configuration for the local mirror.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Database Connection Pool                           │
//! │                                                                         │
//! │  Engine startup                                                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbConfig::new(path) ← Configure pool settings                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(config).await ← Create pool + run migrations            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────┐   ┌───────────────────┐   │
//! │  │            SqlitePool                    │   │    WriteLock      │   │
//! │  │  ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐       │   │  (one per store)  │   │
//! │  │  │Conn1│ │Conn2│ │Conn3│ │Conn4│ ...   │   │                   │   │
//! │  │  └─────┘ └─────┘ └─────┘ └─────┘       │   │  serializes all   │   │
//! │  └─────────────────────────────────────────┘   │  write txns       │   │
//! │                                                └───────────────────┘   │
//! │  Search screens read concurrently; sync writes one transaction at a    │
//! │  time through the shared WriteLock.                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## WAL Mode
//! SQLite WAL (Write-Ahead Logging) mode is enabled so search screens keep
//! reading while a sync pass writes.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::lock::WriteLock;
use crate::migrations;
use crate::repository::seen::SeenIdRepository;
use crate::repository::source_sync::SourceSyncRepository;
use crate::repository::vehicle::VehicleRepository;

const IN_MEMORY_PATH: &str = ":memory:";

// =============================================================================
// Configuration
// =============================================================================

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/path/to/mirror.db")
///     .max_connections(4)
///     .min_connections(1);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 4
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    /// Default: 1
    pub min_connections: u32,

    /// Connection acquire timeout.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection (`None` keeps them open).
    /// Default: 10 minutes
    pub idle_timeout: Option<Duration>,

    /// Whether to run migrations on connect.
    /// Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// Creates a new database configuration with the given path.
    ///
    /// The file is created if it doesn't exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 4,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            run_migrations: true,
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the minimum number of connections.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets whether to run migrations on connect.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// A single connection that is never reaped, so the database lives as
    /// long as the pool does.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(IN_MEMORY_PATH),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: None,
            run_migrations: true,
        }
    }

    /// Returns true if this config points at an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == IN_MEMORY_PATH
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let url = if self.is_in_memory() {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}?mode=rwc", self.database_path.display())
        };

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            // NORMAL: safe from corruption, may lose the last commit on power loss.
            // A lost page commit is simply re-fetched on the next step.
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);

        Ok(options)
    }
}

// =============================================================================
// Database
// =============================================================================

/// Main database handle providing repository access.
///
/// Cloning is cheap; clones share the pool and the [`WriteLock`].
///
/// ## Usage
/// ```rust,ignore
/// let db = Database::new(DbConfig::new("./mirror.db")).await?;
///
/// let meta = db.source_sync().get("BankX_2024.csv").await?;
/// let count = db.vehicles().count().await?;
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    /// The SQLite connection pool.
    pool: SqlitePool,

    /// Serializes all write transactions.
    write_lock: WriteLock,
}

impl Database {
    /// Creates a new database connection pool.
    ///
    /// ## What This Does
    /// 1. Creates the database file if it doesn't exist
    /// 2. Configures WAL mode and NORMAL synchronous
    /// 3. Creates the connection pool
    /// 4. Runs migrations (if enabled)
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Initializing database connection"
        );

        let connect_options = config.connect_options()?;
        debug!("Connection options configured");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(config.idle_timeout)
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Database pool created"
        );

        let db = Database {
            pool,
            write_lock: WriteLock::new(),
        };

        if config.run_migrations {
            db.run_migrations().await?;
        }

        Ok(db)
    }

    /// Runs database migrations.
    pub async fn run_migrations(&self) -> DbResult<()> {
        info!("Running database migrations");
        migrations::run_migrations(&self.pool).await?;
        info!("Migrations complete");
        Ok(())
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns the shared write lock.
    pub fn write_lock(&self) -> &WriteLock {
        &self.write_lock
    }

    /// Returns the vehicle repository.
    pub fn vehicles(&self) -> VehicleRepository {
        VehicleRepository::new(self.pool.clone(), self.write_lock.clone())
    }

    /// Returns the per-source sync metadata repository.
    pub fn source_sync(&self) -> SourceSyncRepository {
        SourceSyncRepository::new(self.pool.clone(), self.write_lock.clone())
    }

    /// Returns the seen-id repository.
    pub fn seen_ids(&self) -> SeenIdRepository {
        SeenIdRepository::new(self.pool.clone(), self.write_lock.clone())
    }

    /// Closes the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    /// Checks if the database is healthy (can execute queries).
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.health_check().await);
    }

    #[tokio::test]
    async fn test_clones_share_write_lock() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let clone = db.clone();

        let _guard = db.write_lock().acquire("test").await;
        assert!(clone.write_lock().is_locked());
    }

    #[test]
    fn test_config_builder() {
        let config = DbConfig::new("/tmp/mirror.db")
            .max_connections(10)
            .min_connections(2)
            .run_migrations(false);

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert!(!config.run_migrations);
        assert!(!config.is_in_memory());
        assert!(DbConfig::in_memory().is_in_memory());
    }
}
