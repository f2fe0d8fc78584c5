//! Row types shared by every store the crawler touches.
//!
//! These are the storage-level shapes. Domain decisions (result parsing,
//! classification, plate states) live in the `crawler` crate.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Samples
// ============================================================================

/// One PCR channel: target gene, channel result and Cq value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub target: Option<String>,
    pub result: Option<String>,
    pub cq: Option<Decimal>,
}

impl Channel {
    pub fn is_empty(&self) -> bool {
        self.target.is_none() && self.result.is_none() && self.cq.is_none()
    }
}

/// The three classification fields, always written together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredPositive {
    pub positive: bool,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

/// A test result row as held by the primary store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Store-assigned identifier; `None` until inserted.
    pub id: Option<i64>,
    pub root_sample_id: String,
    pub rna_id: String,
    pub plate_barcode: String,
    pub coordinate: String,
    /// Result exactly as the centre wrote it.
    pub result: String,
    pub date_tested: String,
    pub lab_id: String,
    pub channels: [Channel; 4],
    /// Centre name.
    pub source: String,
    pub file_name: String,
    pub line_number: i64,
    pub filtered_positive: Option<FilteredPositive>,
    /// Columns the centre sent that have no dedicated field.
    pub extra: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Sample {
    /// A blank sample stamped with `now`; fields are filled by the caller.
    pub fn new(root_sample_id: impl Into<String>, rna_id: impl Into<String>, result: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            root_sample_id: root_sample_id.into(),
            rna_id: rna_id.into(),
            plate_barcode: String::new(),
            coordinate: String::new(),
            result: result.into(),
            date_tested: String::new(),
            lab_id: String::new(),
            channels: Default::default(),
            source: String::new(),
            file_name: String::new(),
            line_number: 0,
            filtered_positive: None,
            extra: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// `(root_sample_id, rna_id, result)`, unique in the warehouse.
    pub fn unique_key(&self) -> (&str, &str, &str) {
        (&self.root_sample_id, &self.rna_id, &self.result)
    }
}

/// Pre-image of a sample captured before it was replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleHistoryRecord {
    pub id: i64,
    /// Back-reference to the replaced sample's store identifier.
    pub sample_object_id: i64,
    pub archived_at: DateTime<Utc>,
    pub sample: Sample,
}

/// Result of archiving the current versions of a set of root sample ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveOutcome {
    pub candidates: usize,
    pub archived: usize,
    pub deleted: usize,
}

/// A single rejected row from an unordered bulk insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteError {
    /// Position of the row in the submitted batch.
    pub index: usize,
    pub code: String,
    pub message: String,
}

/// Partial-success report of an unordered bulk insert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkInsertOutcome {
    pub inserted: usize,
    pub write_errors: Vec<WriteError>,
}

// ============================================================================
// Imports
// ============================================================================

/// Audit row written once per processed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRecord {
    pub id: Option<i64>,
    pub date: DateTime<Utc>,
    pub centre_name: String,
    pub csv_file_used: String,
    pub number_of_records: i64,
    pub errors: Vec<String>,
}

// ============================================================================
// Priority samples
// ============================================================================

/// Sequencing-priority flags for one root sample id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrioritySample {
    pub id: i64,
    pub root_sample_id: String,
    pub must_sequence: bool,
    pub preferentially_sequence: bool,
    pub processed: bool,
}

/// A priority record joined with its sample. Priority fields win on overlap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrioritisedSample {
    pub priority: PrioritySample,
    pub sample: Sample,
}

// ============================================================================
// Warehouse
// ============================================================================

/// A row of the warehouse `lighthouse_sample` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseSample {
    pub mongodb_id: Option<String>,
    pub sample: Sample,
    /// `sample.date_tested` parsed, when it parses.
    pub date_tested: Option<DateTime<Utc>>,
    pub must_sequence: Option<bool>,
    pub preferentially_sequence: Option<bool>,
}

// ============================================================================
// Event log
// ============================================================================

/// Event types that mark a sample as cherry-picked.
pub const CHERRYPICK_EVENT_TYPES: [&str; 2] = ["cherrypick_layout_set", "lh_beckman_cp_destination_created"];

/// An entry of the cherry-pick event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CherrypickEvent {
    pub root_sample_id: String,
    pub plate_barcode: String,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
}

// ============================================================================
// Plate tracking
// ============================================================================

/// Returned by the plate property getter when the plate does not exist.
pub const PLATE_STATE_NO_PLATE: &str = "NO PLATE";
/// Returned by the plate property getter when the plate lacks the property.
pub const PLATE_STATE_NO_PROP: &str = "NO PROP";
/// Status returned by a successful plate property set.
pub const SET_PROP_STATUS_SUCCESS: i32 = 0;
/// Status returned when setting a property on an unknown plate.
pub const SET_PROP_STATUS_NO_PLATE: i32 = 1;

/// A well-level property row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WellProperty {
    pub well_index: i64,
    pub name: String,
    pub value: String,
}
