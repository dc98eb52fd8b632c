//! Database module providing connection management, revisions, and queries.

pub mod ingest;
pub mod latest_red;
pub mod revisions;
pub mod transfer;

use std::time::Duration;

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, EntityTrait,
    PaginatorTrait,
};
use tracing::debug;

use crate::config::{self, Config};
use crate::entity::{test_case, test_run};
use crate::error::{AppError, AppResult};

pub use ingest::IngestOutcome;
pub use revisions::{RevisionInfo, RevisionRange};
pub use transfer::TransferSummary;

/// How long a SQLite connection waits on another connection's lock.
pub const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct DbPool {
    conn: DatabaseConnection,
}

/// Row counts of the application tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub runs: u64,
    pub cases: u64,
}

impl DbPool {
    /// Create a new database pool from configuration.
    pub async fn new(config: &Config) -> AppResult<Self> {
        Self::connect(&config.database_url).await
    }

    /// Connect to a normalized database URL.
    ///
    /// SQLite stores get their parent directory created and use a single pooled
    /// connection, so writers in one process serialize. Other processes holding the
    /// file's write lock are waited on for up to [`SQLITE_BUSY_TIMEOUT`].
    pub async fn connect(url: &str) -> AppResult<Self> {
        if let Some(path) = config::sqlite_file_path(url)
            && let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::FileSystem(format!("Failed to create database directory: {}", e))
            })?;
        }

        let mut opts = ConnectOptions::new(url.to_string());
        opts.sqlx_logging(false)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(30));
        if url.starts_with("sqlite:") {
            opts.max_connections(1)
                .min_connections(1)
                .map_sqlx_sqlite_opts(|sqlite| sqlite.busy_timeout(SQLITE_BUSY_TIMEOUT));
        }

        let conn = Database::connect(opts).await.map_err(|e| {
            AppError::StorageUnavailable(format!("Failed to connect to database: {}", e))
        })?;
        debug!(backend = ?conn.get_database_backend(), "Connected to store");

        Ok(DbPool { conn })
    }

    /// Get access to the connection for executing queries.
    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    pub fn backend(&self) -> DatabaseBackend {
        self.conn.get_database_backend()
    }

    /// Count runs and cases.
    pub async fn counts(&self) -> AppResult<StoreCounts> {
        let runs = test_run::Entity::find()
            .count(self.connection())
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to count runs: {}", e)))?;
        let cases = test_case::Entity::find()
            .count(self.connection())
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to count cases: {}", e)))?;

        Ok(StoreCounts { runs, cases })
    }

    /// Close the underlying pool.
    pub async fn close(self) -> AppResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| AppError::StorageUnavailable(format!("Failed to close database: {}", e)))
    }
}
