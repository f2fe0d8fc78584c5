//! SQLite storage layer for the crawler
//!
//! One `CrawlerDb` type hosts every table the crawler reads or writes. A
//! deployment may point the primary store, the warehouse and the plate tracking
//! store at separate files; each is just a `CrawlerDb` opened on its own path.
//!
//! # Usage
//!
//! ```rust,ignore
//! use crawler_db::{CrawlerDb, Result};
//!
//! let db = CrawlerDb::open("~/.crawler/samples.sqlite3").await?;
//!
//! // Primary store
//! let unprocessed = db.unprocessed_priority_samples().await?;
//!
//! // Warehouse
//! db.upsert_warehouse_samples(&rows, 15_000).await?;
//!
//! // Plate tracking, one transaction per plate
//! let mut plate = db.begin_plate_transaction().await?;
//! let state = plate.get_plate_property("DN123", "state").await?;
//! plate.commit().await?;
//! ```

mod error;
mod schema;
mod types;

// Method implementations organized by domain
mod events;
pub mod plates;
mod samples;
mod warehouse;

pub use error::{DbError, Result};
pub use plates::PlateTransaction;
pub use types::*;

/// Underlying driver error, for callers classifying failures.
pub use sqlx::Error as SqlxError;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

/// Maximum number of bound parameters per `IN (...)` list.
pub(crate) const MAX_IN_PARAMS: usize = 500;

/// Database handle for every crawler store.
#[derive(Clone)]
pub struct CrawlerDb {
    pool: SqlitePool,
}

impl CrawlerDb {
    /// Open or create a database at the given path.
    ///
    /// Creates all tables if they don't exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;

        info!(path = %path.display(), "Database opened");

        Ok(db)
    }
}

// Timestamp utilities
impl CrawlerDb {
    /// Current time as milliseconds since Unix epoch.
    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Convert milliseconds to DateTime.
    pub fn millis_to_datetime(millis: i64) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(millis).unwrap_or_else(chrono::Utc::now)
    }
}

/// Split `items` into `IN (...)`-sized slices.
pub(crate) fn in_chunks<T>(items: &[T]) -> std::slice::Chunks<'_, T> {
    items.chunks(MAX_IN_PARAMS)
}
