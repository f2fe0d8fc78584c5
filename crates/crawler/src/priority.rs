//! Priority sample propagation: primary store -> warehouse -> plate tracking.
//!
//! Each stage returns its own [`StageReport`] carrying an [`ErrorLog`]; the run
//! merges them. Priority records are only marked processed when every
//! requested stage succeeded, so a failed run is retried by simply running
//! again.

use crate::config::CentreConfig;
use crate::csv_file::parse_date_tested;
use crate::storage::{PlateTracking, PlateUnit, SampleStore, StoreError, Warehouse};
use crate::well::{self, PlateState, PLATE_STATE_PENDING, PLATE_STATE_PROPERTY, WELLS_PER_PLATE};
use crawler_db::{PrioritisedSample, WarehouseSample, SET_PROP_STATUS_SUCCESS};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

// ============================================================================
// Error accumulation
// ============================================================================

/// Classes of propagation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    WarehouseInsert,
    WarehouseConnection,
    PlateTracking,
    PlateTrackingConnection,
    PlateGroup,
}

impl ErrorKind {
    /// Stable code used in alerts.
    pub fn code(self) -> &'static str {
        match self {
            Self::WarehouseInsert => "TYPE 28",
            Self::WarehouseConnection => "TYPE 29",
            Self::PlateTracking => "TYPE 30",
            Self::PlateTrackingConnection => "TYPE 31",
            Self::PlateGroup => "TYPE 33",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Errors collected by one stage or one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorLog {
    entries: Vec<LoggedError>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: ErrorKind, message: impl Into<String>) {
        let message = message.into();
        error!(code = kind.code(), "{message}");
        self.entries.push(LoggedError { kind, message });
    }

    pub fn entries(&self) -> &[LoggedError] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, kind: ErrorKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    /// Append `other` after this log's entries.
    pub fn merge(mut self, other: ErrorLog) -> Self {
        self.entries.extend(other.entries);
        self
    }

    /// One line per error kind, in code order.
    pub fn summary(&self) -> Vec<String> {
        let mut grouped: BTreeMap<ErrorKind, Vec<&str>> = BTreeMap::new();
        for entry in &self.entries {
            grouped.entry(entry.kind).or_default().push(&entry.message);
        }
        grouped
            .into_iter()
            .map(|(kind, messages)| format!("{}: {} error(s): {}", kind.code(), messages.len(), messages.join("; ")))
            .collect()
    }
}

/// Outcome of one pipeline stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    pub ok: bool,
    pub errors: ErrorLog,
    /// Plate barcodes whose unit of work was committed.
    pub committed_plates: Vec<String>,
}

impl StageReport {
    fn success() -> Self {
        Self {
            ok: true,
            ..Default::default()
        }
    }
}

/// Outcome of a whole propagation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorityRunReport {
    pub fetched: usize,
    pub warehouse_ok: bool,
    /// `None` when plate tracking was not requested or not reached.
    pub plate_tracking_ok: Option<bool>,
    pub committed_plates: Vec<String>,
    pub marked_processed: usize,
    pub errors: ErrorLog,
}

impl PriorityRunReport {
    pub fn succeeded(&self) -> bool {
        self.warehouse_ok && self.plate_tracking_ok.unwrap_or(true) && self.marked_processed == self.fetched
    }
}

// ============================================================================
// Stages
// ============================================================================

/// Warehouse row for a merged record; priority flags overlay the sample.
pub fn warehouse_row(record: &PrioritisedSample) -> WarehouseSample {
    WarehouseSample {
        mongodb_id: record.sample.id.map(|id| id.to_string()),
        date_tested: parse_date_tested(&record.sample.date_tested),
        must_sequence: Some(record.priority.must_sequence),
        preferentially_sequence: Some(record.priority.preferentially_sequence),
        sample: record.sample.clone(),
    }
}

/// Upsert every merged record into the warehouse. All or nothing as far as the
/// caller is concerned.
pub async fn push_warehouse(warehouse: &dyn Warehouse, records: &[PrioritisedSample]) -> StageReport {
    let rows: Vec<WarehouseSample> = records.iter().map(warehouse_row).collect();

    match warehouse.upsert_samples(&rows).await {
        Ok(written) => {
            info!(written, "Warehouse inserts completed successfully for priority samples");
            StageReport::success()
        }
        Err(e) => {
            let mut report = StageReport::default();
            if e.is_connection() {
                report.errors.add(
                    ErrorKind::WarehouseConnection,
                    format!("Warehouse inserts failed for priority samples, could not connect: {e}"),
                );
            } else {
                report.errors.add(
                    ErrorKind::WarehouseInsert,
                    format!("Warehouse inserts failed for priority samples: {e}"),
                );
            }
            report
        }
    }
}

/// Why a plate group could not be written.
#[derive(Error, Debug)]
pub enum PlateGroupError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("samples have no plate barcode")]
    MissingBarcode,

    #[error("no centre configured with name '{0}'")]
    UnknownCentre(String),

    #[error("unable to set the state of plate {0} to pending")]
    StateNotSet(String),

    #[error("plate {0} should have a state")]
    NoStateProperty(String),

    #[error("unable to determine well index for {root_sample_id} at '{coordinate}' in plate {barcode}")]
    InvalidCoordinate {
        root_sample_id: String,
        coordinate: String,
        barcode: String,
    },
}

/// Group records by plate barcode in order of each barcode's first appearance.
///
/// Records for one plate always land in a single group, even when they are not
/// adjacent in `records`; within a group the input order is kept.
pub fn group_by_plate(records: &[PrioritisedSample]) -> Vec<(String, Vec<&PrioritisedSample>)> {
    let mut groups: Vec<(String, Vec<&PrioritisedSample>)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for record in records {
        let barcode = record.sample.plate_barcode.as_str();
        match index.get(barcode) {
            Some(&i) => groups[i].1.push(record),
            None => {
                index.insert(barcode, groups.len());
                groups.push((barcode.to_string(), vec![record]));
            }
        }
    }
    groups
}

/// Current plate state, creating the plate as pending when it does not exist.
async fn add_plate_if_missing(
    unit: &mut dyn PlateUnit,
    barcode: &str,
    labware_class: &str,
) -> Result<PlateState, PlateGroupError> {
    let state = PlateState::parse(&unit.plate_property(barcode, PLATE_STATE_PROPERTY).await?);

    match state {
        PlateState::NoPlate => {
            unit.add_plate(barcode, labware_class, WELLS_PER_PLATE).await?;
            let status = unit
                .set_plate_property(barcode, PLATE_STATE_PROPERTY, PLATE_STATE_PENDING)
                .await?;
            if status != SET_PROP_STATUS_SUCCESS {
                return Err(PlateGroupError::StateNotSet(barcode.to_string()));
            }
            debug!(barcode, "Plate created");
            Ok(PlateState::Pending)
        }
        PlateState::NoProp => Err(PlateGroupError::NoStateProperty(barcode.to_string())),
        other => Ok(other),
    }
}

async fn write_plate_group(
    unit: &mut dyn PlateUnit,
    barcode: &str,
    records: &[&PrioritisedSample],
    centres: &[CentreConfig],
) -> Result<(), PlateGroupError> {
    if barcode.is_empty() {
        return Err(PlateGroupError::MissingBarcode);
    }

    let source = records.first().map(|r| r.sample.source.as_str()).unwrap_or_default();
    let centre = centres
        .iter()
        .find(|c| c.name == source)
        .ok_or_else(|| PlateGroupError::UnknownCentre(source.to_string()))?;

    let state = add_plate_if_missing(unit, barcode, &centre.biomek_labware_class).await?;
    if !state.accepts_wells() {
        debug!(barcode, ?state, "Plate not pending, wells left untouched");
        return Ok(());
    }

    for record in records {
        let index = well::well_index(&record.sample.coordinate).ok_or_else(|| PlateGroupError::InvalidCoordinate {
            root_sample_id: record.sample.root_sample_id.clone(),
            coordinate: record.sample.coordinate.clone(),
            barcode: barcode.to_string(),
        })?;
        for (name, value) in well::well_properties(record) {
            unit.set_well_property(barcode, index, name, &value).await?;
        }
    }
    Ok(())
}

/// Write plates and wells, one unit of work per plate.
///
/// The first failing group is rolled back and ends the stage; groups committed
/// before it stay committed.
pub async fn push_plate_tracking(
    plate_tracking: &dyn PlateTracking,
    records: &[PrioritisedSample],
    centres: &[CentreConfig],
) -> StageReport {
    let mut report = StageReport::default();

    for (barcode, group) in group_by_plate(records) {
        let mut unit = match plate_tracking.begin().await {
            Ok(unit) => unit,
            Err(e) if e.is_connection() => {
                report.errors.add(
                    ErrorKind::PlateTrackingConnection,
                    format!("Plate tracking inserts failed, could not connect, for priority samples: {e}"),
                );
                return report;
            }
            Err(e) => {
                report.errors.add(
                    ErrorKind::PlateTracking,
                    format!("Plate tracking inserts failed for priority samples: {e}"),
                );
                return report;
            }
        };

        let written = write_plate_group(unit.as_mut(), &barcode, &group, centres).await;
        let outcome = match written {
            Ok(()) => unit.commit().await.map_err(PlateGroupError::from),
            Err(e) => {
                if let Err(rollback_err) = unit.rollback().await {
                    warn!(barcode = %barcode, error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        };

        if let Err(e) = outcome {
            report.errors.add(
                ErrorKind::PlateGroup,
                format!("Plate tracking inserts failed for plate {barcode} in priority samples inserts: {e}"),
            );
            return report;
        }

        debug!(barcode = %barcode, wells = group.len(), "Plate group committed");
        report.committed_plates.push(barcode);
    }

    info!(plates = report.committed_plates.len(), "Plate tracking inserts completed successfully for priority samples");
    report.ok = true;
    report
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct PriorityPipeline<'a> {
    store: &'a dyn SampleStore,
    warehouse: &'a dyn Warehouse,
    plate_tracking: Option<&'a dyn PlateTracking>,
    centres: &'a [CentreConfig],
}

impl<'a> PriorityPipeline<'a> {
    /// `plate_tracking: None` skips the plate tracking stage.
    pub fn new(
        store: &'a dyn SampleStore,
        warehouse: &'a dyn Warehouse,
        plate_tracking: Option<&'a dyn PlateTracking>,
        centres: &'a [CentreConfig],
    ) -> Self {
        Self {
            store,
            warehouse,
            plate_tracking,
            centres,
        }
    }

    /// Fetch, push to the warehouse, push to plate tracking, mark processed.
    ///
    /// Stage failures are reported, not returned. `Err` means the primary store
    /// itself could not be read or updated.
    pub async fn run(&self) -> Result<PriorityRunReport, StoreError> {
        info!("Starting prioritisation of samples");

        let records = self.store.unprocessed_priority_samples().await?;
        let mut report = PriorityRunReport {
            fetched: records.len(),
            ..Default::default()
        };
        if records.is_empty() {
            info!("No unprocessed priority samples");
            report.warehouse_ok = true;
            return Ok(report);
        }
        info!(count = records.len(), "Unprocessed priority samples fetched");

        let warehouse = push_warehouse(self.warehouse, &records).await;
        report.warehouse_ok = warehouse.ok;
        report.errors = report.errors.merge(warehouse.errors);
        if !report.warehouse_ok {
            return Ok(report);
        }

        if let Some(plate_tracking) = self.plate_tracking {
            info!("Adding to plate tracking");
            let plates = push_plate_tracking(plate_tracking, &records, self.centres).await;
            report.plate_tracking_ok = Some(plates.ok);
            report.committed_plates = plates.committed_plates;
            report.errors = report.errors.merge(plates.errors);
            if !plates.ok {
                return Ok(report);
            }
        }

        report.marked_processed = mark_processed(self.store, &records).await?;
        info!(marked = report.marked_processed, "Priority samples marked processed");
        Ok(report)
    }
}

/// One update per record, keyed by the priority record id.
pub async fn mark_processed(store: &dyn SampleStore, records: &[PrioritisedSample]) -> Result<usize, StoreError> {
    for record in records {
        store.mark_priority_sample_processed(record.priority.id).await?;
    }
    Ok(records.len())
}
