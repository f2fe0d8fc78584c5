//! Storage abstraction layer for the crawler.
//!
//! The ingestion and propagation code only talks to the traits in [`traits`];
//! [`sqlite`] binds them to `crawler_db::CrawlerDb`.
//!
//! # Example
//!
//! ```rust,ignore
//! use crawler::storage::{SqliteSampleStore, SqliteWarehouse};
//! use crawler_db::CrawlerDb;
//!
//! let samples = SqliteSampleStore::new(CrawlerDb::open("samples.sqlite3").await?);
//! let warehouse = SqliteWarehouse::new(CrawlerDb::open("warehouse.sqlite3").await?, 15_000);
//! ```

pub mod sqlite;
pub mod traits;

pub use sqlite::{SqliteCherrypickLog, SqlitePlateTracking, SqliteSampleStore, SqliteWarehouse};
pub use traits::{CherrypickLog, PlateTracking, PlateUnit, SampleStore, Warehouse};

use crawler_db::DbError;
use thiserror::Error;

/// Store failures, classified for the ingestion and propagation error paths.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    Connection(String),

    #[error("Archived {archived} history rows for {expected} existing samples")]
    InvariantViolation { expected: usize, archived: usize },

    #[error("Bulk insert stopped after {inserted} rows: {message}")]
    PartialInsert { inserted: usize, message: String },

    #[error("Store error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::ArchiveMismatch { expected, archived } => Self::InvariantViolation { expected, archived },
            DbError::BulkInsertAborted { inserted, source } => Self::PartialInsert {
                inserted,
                message: source.to_string(),
            },
            other if other.is_connection() => Self::Connection(other.to_string()),
            other => Self::Backend(other.to_string()),
        }
    }
}
