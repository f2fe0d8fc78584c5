//! Storage abstraction traits.
//!
//! The primary store, the warehouse, the plate tracking store and the
//! cherry-pick event log are separate systems; each gets its own trait so a
//! run can be wired to any mix of backends, and tests can swap in failing ones.

use super::StoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crawler_db::{
    ArchiveOutcome, BulkInsertOutcome, FilteredPositive, ImportRecord, PrioritisedSample, Sample, WarehouseSample,
};

/// The authoritative store: samples, history, imports and priority records.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Copy every current sample sharing one of `root_sample_ids` into history,
    /// then delete the originals. All or nothing.
    async fn archive_samples(&self, root_sample_ids: &[String], archived_at: DateTime<Utc>)
        -> StoreResult<ArchiveOutcome>;

    /// Unordered insert. Duplicate keys are reported in the outcome; any other
    /// failure is `StoreError::PartialInsert` and keeps the rows already written.
    async fn insert_samples(&self, samples: &[Sample]) -> StoreResult<BulkInsertOutcome>;

    async fn insert_import_record(&self, record: &ImportRecord) -> StoreResult<()>;

    /// Unprocessed priority records that have a sample, merged with it.
    async fn unprocessed_priority_samples(&self) -> StoreResult<Vec<PrioritisedSample>>;

    async fn mark_priority_sample_processed(&self, priority_id: i64) -> StoreResult<()>;

    async fn all_samples(&self) -> StoreResult<Vec<Sample>>;

    async fn samples_created_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> StoreResult<Vec<Sample>>;

    async fn unclassified_samples(&self) -> StoreResult<Vec<Sample>>;

    async fn count_samples_with_version(&self, version: &str) -> StoreResult<i64>;

    async fn update_filtered_positive(&self, ids: &[i64], filtered_positive: &FilteredPositive) -> StoreResult<u64>;
}

/// The reporting warehouse.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Upsert on `(root_sample_id, rna_id, result)`. Returns rows written.
    async fn upsert_samples(&self, rows: &[WarehouseSample]) -> StoreResult<usize>;

    async fn update_filtered_positive(
        &self,
        mongodb_ids: &[String],
        filtered_positive: &FilteredPositive,
    ) -> StoreResult<u64>;
}

/// The plate tracking store. Work happens inside a [`PlateUnit`].
#[async_trait]
pub trait PlateTracking: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn PlateUnit>>;
}

/// One commit/rollback unit of plate tracking work.
#[async_trait]
pub trait PlateUnit: Send {
    /// Property value or one of the `NO PLATE` / `NO PROP` markers.
    async fn plate_property(&mut self, barcode: &str, name: &str) -> StoreResult<String>;

    async fn add_plate(&mut self, barcode: &str, labware_class: &str, num_wells: i64) -> StoreResult<()>;

    /// Status code; zero is success.
    async fn set_plate_property(&mut self, barcode: &str, name: &str, value: &str) -> StoreResult<i32>;

    async fn set_well_property(&mut self, barcode: &str, well_index: i64, name: &str, value: &str)
        -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Read access to cherry-pick events.
#[async_trait]
pub trait CherrypickLog: Send + Sync {
    /// `(root_sample_id, plate_barcode)` pairs cherry-picked in `[start, end)`.
    /// The result may repeat pairs. Callers bound the size of `root_sample_ids`.
    async fn cherrypicked_pairs(
        &self,
        root_sample_ids: &[String],
        start: Option<DateTime<Utc>>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<(String, String)>>;
}
