//! Crawler - Core Library
//!
//! Ingests lab result files per centre, archives replaced samples, classifies
//! filtered positives and propagates priority samples to the warehouse and the
//! plate tracking store.

pub mod centre;
pub mod checksum;
pub mod config;
pub mod csv_file;
pub mod error;
pub mod file_state;
pub mod filtered_positive;
pub mod legacy;
pub mod priority;
pub mod reclassify;
pub mod sample_writer;
pub mod storage;
pub mod well;

pub use centre::{run_centres, Centre, CentreFile, CentreRunSummary, FileOutcome};
pub use config::{CentreConfig, CompiledCentre, CrawlerConfig, LegacyConfig};
pub use error::{CrawlerError, FileError, Result};
pub use file_state::FileState;
pub use filtered_positive::{current_identifier, identifier_for, FilteredPositiveIdentifier};
pub use legacy::{CherrypickLookup, LegacyMigration, MigrationReport};
pub use priority::{ErrorKind, ErrorLog, PriorityPipeline, PriorityRunReport, StageReport};
pub use sample_writer::{SampleWriter, WriteReport};
