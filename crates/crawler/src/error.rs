//! Error types for the crawler

use crate::storage::StoreError;
use std::io;
use thiserror::Error;

/// Crawler error type
#[derive(Error, Debug)]
pub enum CrawlerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(#[from] FileError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Migration refused: {0}")]
    MigrationRefused(String),
}

pub type Result<T> = std::result::Result<T, CrawlerError>;

/// A problem recorded against a single result file.
///
/// The `Display` text is what lands in the import record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FileError {
    #[error("{} missing in CSV file", .0.join(", "))]
    MissingRequiredFields(Vec<String>),

    #[error("Cannot read CSV fieldnames")]
    NoHeaders,

    #[error("Cannot parse CSV file: {0}")]
    Unreadable(String),

    #[error("{count} sample barcodes did not match the regex: {regex} for field '{field}'")]
    BarcodeMismatch { count: usize, regex: String, field: String },

    #[error("{count} records with a Result outside the allowed values")]
    DisallowedResult { count: usize },

    #[error("{count} records with a channel Target outside the allowed values")]
    DisallowedChannelTarget { count: usize },

    #[error("{count} records with a channel Result outside the allowed values")]
    DisallowedChannelResult { count: usize },

    #[error("{count} records with a Cq value that is not a number between 0 and 100")]
    InvalidCq { count: usize },

    #[error("{count} records with error code {code}")]
    WriteErrors { count: usize, code: String },

    #[error("Critical error: {0}")]
    Critical(String),
}
