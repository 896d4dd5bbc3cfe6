//! Storage for the API inventory, events, annotations and control tables.
//!
//! Records live in [`models`]; [`sqlite`] holds one table handle per entity,
//! each exposing only the verbs the backend needs.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::config::{DatabaseConfig, DatabaseDriver};

pub mod filters;
pub mod models;
pub mod schema;
pub mod sqlite;

pub use filters::{Page, SortDir};
pub use models::*;
pub use sqlite::{
    format_hosts, generate_token, ApiAnnotationsTable, ApiEventsFilter, ApiEventsQuery,
    ApiEventsTable, ApiInventoryFilter, ApiInventoryTable, ApiUsageKind, ApiUsagePoint,
    ApprovedPathItem, EventAnnotationsTable, HostGroup, LabelsTable, ReviewsTable,
    TraceSamplingTable, TraceSourcesTable, EXTERNAL_TRACE_SOURCE_NAME, USAGE_BUCKETS,
    WILDCARD_COMPONENT,
};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found")]
    NotFound,

    #[error("unknown sort key: {0}")]
    UnknownSortKey(String),

    #[error("invalid sort direction: {0}")]
    InvalidSortDirection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unsupported database driver: {0}")]
    UnsupportedDriver(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StorageError::NotFound,
            other => StorageError::Database(other.to_string()),
        }
    }
}

/// RFC3339 timestamp format used for every stored time column.
///
/// Fixed precision keeps lexicographic order equal to chronological order,
/// which the `BETWEEN` filters rely on.
pub fn format_time(time: chrono::DateTime<chrono::Utc>) -> String {
    time.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Handle to every table, sharing one pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Wrap an existing pool. Call [`Database::init_schema`] before use.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create tables and the well-known external trace source.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;
        for ddl in schema::CREATE_TABLES {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        self.trace_sources().prepopulate().await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn api_inventory(&self) -> ApiInventoryTable {
        ApiInventoryTable::new(self.pool.clone())
    }

    pub fn api_events(&self) -> ApiEventsTable {
        ApiEventsTable::new(self.pool.clone())
    }

    pub fn event_annotations(&self) -> EventAnnotationsTable {
        EventAnnotationsTable::new(self.pool.clone())
    }

    pub fn api_annotations(&self) -> ApiAnnotationsTable {
        ApiAnnotationsTable::new(self.pool.clone())
    }

    pub fn reviews(&self) -> ReviewsTable {
        ReviewsTable::new(self.pool.clone())
    }

    pub fn trace_sources(&self) -> TraceSourcesTable {
        TraceSourcesTable::new(self.pool.clone())
    }

    pub fn trace_sampling(&self) -> TraceSamplingTable {
        TraceSamplingTable::new(self.pool.clone())
    }

    pub fn labels(&self) -> LabelsTable {
        LabelsTable::new(self.pool.clone())
    }

    /// Single-connection in-memory database with the schema applied.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str(":memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let db = Self::new(pool);
        db.init_schema().await?;
        Ok(db)
    }
}

/// Initialize storage based on configuration.
pub async fn init_storage(config: &DatabaseConfig) -> Result<Database> {
    match config.driver {
        DatabaseDriver::Local => {
            let path = config.sqlite_path();
            info!(path = %path, "storage: sqlite");

            let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_secs(5))
                .foreign_keys(true);

            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?;

            let db = Database::new(pool);
            db.init_schema().await?;
            Ok(db)
        }
        DatabaseDriver::Postgres => Err(StorageError::UnsupportedDriver(format!(
            "postgres ({}@{}:{}/{})",
            config.user, config.host, config.port, config.name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_schema_prepopulates_external_source() {
        let db = Database::in_memory().await.unwrap();
        let source = db
            .trace_sources()
            .get(EXTERNAL_TRACE_SOURCE_ID)
            .await
            .unwrap();
        assert_eq!(source.uid, uuid::Uuid::nil());
    }

    #[tokio::test]
    async fn test_init_schema_is_idempotent() {
        let db = Database::in_memory().await.unwrap();
        db.init_schema().await.unwrap();
    }

    #[tokio::test]
    async fn test_postgres_driver_rejected() {
        let mut config = DatabaseConfig::in_memory();
        config.driver = DatabaseDriver::Postgres;
        assert!(matches!(
            init_storage(&config).await,
            Err(StorageError::UnsupportedDriver(_))
        ));
    }

    #[test]
    fn test_format_time_sorts_lexicographically() {
        let a = chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:09Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let b = a + chrono::Duration::seconds(1);
        assert!(format_time(a) < format_time(b));
    }
}
