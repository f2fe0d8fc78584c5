//! SQLite implementations of the storage traits.
//!
//! Each store wraps its own `CrawlerDb`, so the primary store, the warehouse
//! and plate tracking can live in separate database files.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crawler_db::{
    ArchiveOutcome, BulkInsertOutcome, CrawlerDb, FilteredPositive, ImportRecord, PlateTransaction,
    PrioritisedSample, Sample, WarehouseSample,
};

use super::traits::{CherrypickLog, PlateTracking, PlateUnit, SampleStore, Warehouse};
use super::StoreResult;

/// SQLite-backed primary store.
#[derive(Clone)]
pub struct SqliteSampleStore {
    db: CrawlerDb,
}

impl SqliteSampleStore {
    pub fn new(db: CrawlerDb) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &CrawlerDb {
        &self.db
    }
}

#[async_trait]
impl SampleStore for SqliteSampleStore {
    async fn archive_samples(
        &self,
        root_sample_ids: &[String],
        archived_at: DateTime<Utc>,
    ) -> StoreResult<ArchiveOutcome> {
        Ok(self.db.archive_samples(root_sample_ids, archived_at).await?)
    }

    async fn insert_samples(&self, samples: &[Sample]) -> StoreResult<BulkInsertOutcome> {
        Ok(self.db.insert_samples(samples).await?)
    }

    async fn insert_import_record(&self, record: &ImportRecord) -> StoreResult<()> {
        self.db.insert_import_record(record).await?;
        Ok(())
    }

    async fn unprocessed_priority_samples(&self) -> StoreResult<Vec<PrioritisedSample>> {
        Ok(self.db.unprocessed_priority_samples().await?)
    }

    async fn mark_priority_sample_processed(&self, priority_id: i64) -> StoreResult<()> {
        self.db.mark_priority_sample_processed(priority_id).await?;
        Ok(())
    }

    async fn all_samples(&self) -> StoreResult<Vec<Sample>> {
        Ok(self.db.all_samples().await?)
    }

    async fn samples_created_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> StoreResult<Vec<Sample>> {
        Ok(self.db.samples_created_between(start, end).await?)
    }

    async fn unclassified_samples(&self) -> StoreResult<Vec<Sample>> {
        Ok(self.db.samples_without_filtered_positive().await?)
    }

    async fn count_samples_with_version(&self, version: &str) -> StoreResult<i64> {
        Ok(self.db.count_samples_with_version(version).await?)
    }

    async fn update_filtered_positive(&self, ids: &[i64], filtered_positive: &FilteredPositive) -> StoreResult<u64> {
        Ok(self.db.update_filtered_positive(ids, filtered_positive).await?)
    }
}

/// SQLite-backed warehouse writing `batch_size` rows per transaction.
#[derive(Clone)]
pub struct SqliteWarehouse {
    db: CrawlerDb,
    batch_size: usize,
}

impl SqliteWarehouse {
    pub fn new(db: CrawlerDb, batch_size: usize) -> Self {
        Self { db, batch_size }
    }

    pub fn db(&self) -> &CrawlerDb {
        &self.db
    }
}

#[async_trait]
impl Warehouse for SqliteWarehouse {
    async fn upsert_samples(&self, rows: &[WarehouseSample]) -> StoreResult<usize> {
        Ok(self.db.upsert_warehouse_samples(rows, self.batch_size).await?)
    }

    async fn update_filtered_positive(
        &self,
        mongodb_ids: &[String],
        filtered_positive: &FilteredPositive,
    ) -> StoreResult<u64> {
        Ok(self
            .db
            .update_warehouse_filtered_positive(mongodb_ids, filtered_positive)
            .await?)
    }
}

/// SQLite-backed plate tracking store.
#[derive(Clone)]
pub struct SqlitePlateTracking {
    db: CrawlerDb,
}

impl SqlitePlateTracking {
    pub fn new(db: CrawlerDb) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &CrawlerDb {
        &self.db
    }
}

#[async_trait]
impl PlateTracking for SqlitePlateTracking {
    async fn begin(&self) -> StoreResult<Box<dyn PlateUnit>> {
        let tx = self.db.begin_plate_transaction().await?;
        Ok(Box::new(tx))
    }
}

#[async_trait]
impl PlateUnit for PlateTransaction {
    async fn plate_property(&mut self, barcode: &str, name: &str) -> StoreResult<String> {
        Ok(self.get_plate_property(barcode, name).await?)
    }

    async fn add_plate(&mut self, barcode: &str, labware_class: &str, num_wells: i64) -> StoreResult<()> {
        Ok(PlateTransaction::add_plate(self, barcode, labware_class, num_wells).await?)
    }

    async fn set_plate_property(&mut self, barcode: &str, name: &str, value: &str) -> StoreResult<i32> {
        Ok(PlateTransaction::set_plate_property(self, barcode, name, value).await?)
    }

    async fn set_well_property(
        &mut self,
        barcode: &str,
        well_index: i64,
        name: &str,
        value: &str,
    ) -> StoreResult<()> {
        Ok(PlateTransaction::set_well_property(self, barcode, well_index, name, value).await?)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        Ok(PlateTransaction::commit(*self).await?)
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(PlateTransaction::rollback(*self).await?)
    }
}

/// SQLite-backed cherry-pick event log.
#[derive(Clone)]
pub struct SqliteCherrypickLog {
    db: CrawlerDb,
}

impl SqliteCherrypickLog {
    pub fn new(db: CrawlerDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CherrypickLog for SqliteCherrypickLog {
    async fn cherrypicked_pairs(
        &self,
        root_sample_ids: &[String],
        start: Option<DateTime<Utc>>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<(String, String)>> {
        Ok(self.db.cherrypicked_pairs(root_sample_ids, start, end).await?)
    }
}
