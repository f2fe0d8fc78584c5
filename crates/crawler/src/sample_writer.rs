//! Archive-then-replace writes into the primary store.

use crate::error::FileError;
use crate::storage::{SampleStore, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use crawler_db::{ImportRecord, Sample};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// Outcome of writing one file's samples.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Documents the store reports as inserted.
    pub inserted: usize,
    /// Existing samples moved to history.
    pub archived: usize,
    pub errors: Vec<FileError>,
}

impl WriteReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct SampleWriter<'a> {
    store: &'a dyn SampleStore,
}

impl<'a> SampleWriter<'a> {
    pub fn new(store: &'a dyn SampleStore) -> Self {
        Self { store }
    }

    /// Replace the current version of every root sample id in `samples`.
    ///
    /// Existing samples are archived first. If archiving fails the batch is not
    /// inserted. Duplicate keys in the batch are counted per error code; any
    /// other insert failure becomes one critical entry and keeps what was
    /// already inserted.
    pub async fn write_batch(&self, samples: &[Sample], now: DateTime<Utc>) -> WriteReport {
        let mut report = WriteReport::default();
        if samples.is_empty() {
            return report;
        }

        let root_sample_ids: Vec<String> = samples.iter().map(|s| s.root_sample_id.clone()).collect();
        match self.store.archive_samples(&root_sample_ids, now).await {
            Ok(outcome) => {
                report.archived = outcome.archived;
                if outcome.archived > 0 {
                    info!(archived = outcome.archived, "Archived previous versions of samples");
                }
            }
            Err(e) => {
                error!(error = %e, "Archiving existing samples failed, batch not inserted");
                report.errors.push(FileError::Critical(e.to_string()));
                return report;
            }
        }

        debug!(count = samples.len(), "Attempting to insert samples");
        match self.store.insert_samples(samples).await {
            Ok(outcome) => {
                report.inserted = outcome.inserted;
                if !outcome.write_errors.is_empty() {
                    warn!(
                        rejected = outcome.write_errors.len(),
                        "Duplicate samples were not inserted"
                    );
                }
                let mut by_code: BTreeMap<String, usize> = BTreeMap::new();
                for write_error in outcome.write_errors {
                    *by_code.entry(write_error.code).or_default() += 1;
                }
                report
                    .errors
                    .extend(by_code.into_iter().map(|(code, count)| FileError::WriteErrors { count, code }));
            }
            Err(StoreError::PartialInsert { inserted, message }) => {
                error!(inserted, error = %message, "Insert stopped on a critical error");
                report.inserted = inserted;
                report.errors.push(FileError::Critical(message));
            }
            Err(e) => {
                error!(error = %e, "Insert failed");
                report.errors.push(FileError::Critical(e.to_string()));
            }
        }

        report
    }

    /// Write the single import record for a processed file.
    pub async fn record_import(
        &self,
        centre_name: &str,
        file_name: &str,
        inserted: usize,
        errors: &[FileError],
        now: DateTime<Utc>,
    ) -> StoreResult<ImportRecord> {
        let record = ImportRecord {
            id: None,
            date: now,
            centre_name: centre_name.to_string(),
            csv_file_used: file_name.to_string(),
            number_of_records: inserted as i64,
            errors: errors.iter().map(ToString::to_string).collect(),
        };
        self.store.insert_import_record(&record).await?;
        info!(centre = %centre_name, file = %file_name, inserted, "Import record written");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteSampleStore;
    use async_trait::async_trait;
    use crawler_db::{
        ArchiveOutcome, BulkInsertOutcome, CrawlerDb, FilteredPositive, PrioritisedSample,
    };
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn sample(root: &str, rna: &str) -> Sample {
        let mut sample = Sample::new(root, rna, "Positive");
        sample.source = "Alderley".to_string();
        sample
    }

    async fn store(tmp: &TempDir) -> SqliteSampleStore {
        SqliteSampleStore::new(CrawlerDb::open(tmp.path().join("samples.db")).await.unwrap())
    }

    #[tokio::test]
    async fn test_partial_insert_tolerance() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        let writer = SampleWriter::new(&store);

        let mut batch: Vec<Sample> = (0..7).map(|i| sample(&format!("R{i}"), &format!("P_A0{i}"))).collect();
        batch.extend((0..3).map(|i| sample(&format!("R{i}"), &format!("P_A0{i}"))));

        let report = writer.write_batch(&batch, Utc::now()).await;
        assert_eq!(report.inserted, 7);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(&report.errors[0], FileError::WriteErrors { count: 3, .. }));
    }

    #[tokio::test]
    async fn test_replacing_archives_previous_versions() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        let writer = SampleWriter::new(&store);

        writer
            .write_batch(&[sample("R1", "P_A01"), sample("R1", "P_A02")], Utc::now())
            .await;
        let report = writer.write_batch(&[sample("R1", "P_A01")], Utc::now()).await;

        assert_eq!(report.archived, 2);
        assert_eq!(report.inserted, 1);
        assert!(report.is_clean());
        assert_eq!(store.db().sample_history("R1").await.unwrap().len(), 2);
        assert_eq!(store.db().all_samples().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_import_record_always_written() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        let writer = SampleWriter::new(&store);

        let report = writer.write_batch(&[], Utc::now()).await;
        assert_eq!(report, WriteReport::default());

        writer
            .record_import("Alderley", "AP_1.csv", 0, &[FileError::NoHeaders], Utc::now())
            .await
            .unwrap();
        let records = store.db().import_records_for_centre("Alderley").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].number_of_records, 0);
        assert_eq!(records[0].errors, vec!["Cannot read CSV fieldnames".to_string()]);
    }

    /// Fails archiving or inserting on demand.
    #[derive(Default)]
    struct FailingStore {
        fail_archive: bool,
        inserted: Mutex<usize>,
    }

    #[async_trait]
    impl SampleStore for FailingStore {
        async fn archive_samples(&self, _: &[String], _: DateTime<Utc>) -> StoreResult<ArchiveOutcome> {
            if self.fail_archive {
                Err(StoreError::InvariantViolation { expected: 2, archived: 1 })
            } else {
                Ok(ArchiveOutcome::default())
            }
        }

        async fn insert_samples(&self, samples: &[Sample]) -> StoreResult<BulkInsertOutcome> {
            *self.inserted.lock().unwrap() += samples.len();
            Err(StoreError::PartialInsert {
                inserted: 1,
                message: "disk I/O error".to_string(),
            })
        }

        async fn insert_import_record(&self, _: &ImportRecord) -> StoreResult<()> {
            Ok(())
        }

        async fn unprocessed_priority_samples(&self) -> StoreResult<Vec<PrioritisedSample>> {
            Ok(Vec::new())
        }

        async fn mark_priority_sample_processed(&self, _: i64) -> StoreResult<()> {
            Ok(())
        }

        async fn all_samples(&self) -> StoreResult<Vec<Sample>> {
            Ok(Vec::new())
        }

        async fn samples_created_between(&self, _: DateTime<Utc>, _: DateTime<Utc>) -> StoreResult<Vec<Sample>> {
            Ok(Vec::new())
        }

        async fn unclassified_samples(&self) -> StoreResult<Vec<Sample>> {
            Ok(Vec::new())
        }

        async fn count_samples_with_version(&self, _: &str) -> StoreResult<i64> {
            Ok(0)
        }

        async fn update_filtered_positive(&self, _: &[i64], _: &FilteredPositive) -> StoreResult<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_archive_failure_blocks_insert() {
        let store = FailingStore { fail_archive: true, ..Default::default() };
        let writer = SampleWriter::new(&store);

        let report = writer.write_batch(&[sample("R1", "P_A01")], Utc::now()).await;
        assert_eq!(report.inserted, 0);
        assert_eq!(*store.inserted.lock().unwrap(), 0);
        assert_eq!(
            report.errors,
            vec![FileError::Critical("Archived 1 history rows for 2 existing samples".to_string())]
        );
    }

    #[tokio::test]
    async fn test_critical_insert_error_keeps_partial_count() {
        let store = FailingStore::default();
        let writer = SampleWriter::new(&store);

        let report = writer
            .write_batch(&[sample("R1", "P_A01"), sample("R2", "P_A02")], Utc::now())
            .await;
        assert_eq!(report.inserted, 1);
        assert_eq!(report.errors, vec![FileError::Critical("disk I/O error".to_string())]);
        assert_eq!(report.errors[0].to_string(), "Critical error: disk I/O error");
    }
}
