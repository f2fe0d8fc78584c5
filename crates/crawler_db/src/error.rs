//! Error types for the database layer.

use thiserror::Error;

/// Database operation result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLx error (connection, query, etc.)
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// IO error (file system operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value could not be decoded into its domain type
    #[error("Decode error: {0}")]
    Decode(String),

    /// The archive step copied a different number of rows than it found.
    #[error("Archived {archived} history rows for {expected} existing samples")]
    ArchiveMismatch { expected: usize, archived: usize },

    /// An unordered bulk insert stopped on a non-duplicate error.
    #[error("Bulk insert aborted after {inserted} rows: {source}")]
    BulkInsertAborted {
        inserted: usize,
        #[source]
        source: sqlx::Error,
    },
}

impl DbError {
    /// Create a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// True when the underlying failure is a lost or refused connection.
    pub fn is_connection(&self) -> bool {
        match self {
            Self::Sqlx(err) => is_connection_error(err),
            Self::BulkInsertAborted { source, .. } => is_connection_error(source),
            Self::Io(_) => true,
            _ => false,
        }
    }
}

fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}
