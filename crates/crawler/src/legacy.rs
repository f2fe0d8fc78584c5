//! One-shot backfill of filtered-positive versions for historical samples.
//!
//! A sample cherry-picked before the v0/v1 cutoff was picked under v0 rules,
//! one picked between the cutoffs under v1 rules; everything else gets v2.

use crate::config::LegacyConfig;
use crate::error::{CrawlerError, Result};
use crate::filtered_positive::{
    identifier_for, FILTERED_POSITIVE_VERSION_0, FILTERED_POSITIVE_VERSION_1, FILTERED_POSITIVE_VERSION_2,
};
use crate::reclassify::{write_classification, ClassificationCounts};
use crate::storage::{CherrypickLog, SampleStore, StoreResult, Warehouse};
use chrono::{DateTime, Utc};
use crawler_db::Sample;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

/// Deduplicated `(root_sample_id, plate_barcode)` pairs cherry-picked in a window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CherrypickLookup {
    pairs: HashSet<(String, String)>,
}

impl CherrypickLookup {
    /// Query the event log `chunk_size` root sample ids at a time.
    ///
    /// Any number of ids is accepted; each query carries at most `chunk_size`.
    pub async fn build(
        log: &dyn CherrypickLog,
        root_sample_ids: &[String],
        start: Option<DateTime<Utc>>,
        end: DateTime<Utc>,
        chunk_size: usize,
    ) -> StoreResult<Self> {
        let unique: Vec<String> = root_sample_ids.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        let mut pairs = HashSet::new();

        for (index, chunk) in unique.chunks(chunk_size.max(1)).enumerate() {
            debug!(chunk = index, ids = chunk.len(), "Querying cherry-pick events");
            pairs.extend(log.cherrypicked_pairs(chunk, start, end).await?);
        }
        Ok(Self { pairs })
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            pairs: pairs.into_iter().collect(),
        }
    }

    pub fn contains(&self, root_sample_id: &str, plate_barcode: &str) -> bool {
        self.pairs
            .contains(&(root_sample_id.to_string(), plate_barcode.to_string()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Samples grouped by the rule version that applies to them.
#[derive(Debug, Clone, Default)]
pub struct VersionSplit {
    pub v0: Vec<Sample>,
    pub v1: Vec<Sample>,
    pub v2: Vec<Sample>,
}

/// v0 membership wins over v1; samples in neither set are v2.
pub fn split_by_version(samples: Vec<Sample>, v0: &CherrypickLookup, v1: &CherrypickLookup) -> VersionSplit {
    let mut split = VersionSplit::default();
    for sample in samples {
        if v0.contains(&sample.root_sample_id, &sample.plate_barcode) {
            split.v0.push(sample);
        } else if v1.contains(&sample.root_sample_id, &sample.plate_barcode) {
            split.v1.push(sample);
        } else {
            split.v2.push(sample);
        }
    }
    split
}

/// Per-version outcome of a migration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub versions: Vec<ClassificationCounts>,
}

impl MigrationReport {
    pub fn count(&self, version: &str) -> usize {
        self.versions
            .iter()
            .find(|counts| counts.version == version)
            .map_or(0, |counts| counts.samples)
    }
}

pub struct LegacyMigration<'a> {
    store: &'a dyn SampleStore,
    warehouse: &'a dyn Warehouse,
    events: &'a dyn CherrypickLog,
    config: &'a LegacyConfig,
}

impl<'a> LegacyMigration<'a> {
    pub fn new(
        store: &'a dyn SampleStore,
        warehouse: &'a dyn Warehouse,
        events: &'a dyn CherrypickLog,
        config: &'a LegacyConfig,
    ) -> Self {
        Self {
            store,
            warehouse,
            events,
            config,
        }
    }

    pub async fn run(&self, now: DateTime<Utc>) -> Result<MigrationReport> {
        let existing_v0 = self.store.count_samples_with_version(FILTERED_POSITIVE_VERSION_0).await?;
        if existing_v0 > 0 {
            warn!(existing_v0, "Legacy migration has already been run");
            return Err(CrawlerError::MigrationRefused(format!(
                "{existing_v0} samples already carry version {FILTERED_POSITIVE_VERSION_0}"
            )));
        }

        let v0_v1_cutoff = self
            .config
            .v0_v1_cutoff
            .ok_or_else(|| CrawlerError::Config("legacy.v0_v1_cutoff is not set".to_string()))?;
        let v1_v2_cutoff = self
            .config
            .v1_v2_cutoff
            .ok_or_else(|| CrawlerError::Config("legacy.v1_v2_cutoff is not set".to_string()))?;
        if v0_v1_cutoff > v1_v2_cutoff {
            return Err(CrawlerError::Config(
                "legacy.v0_v1_cutoff must not be after legacy.v1_v2_cutoff".to_string(),
            ));
        }

        info!("Selecting all samples");
        let samples = self.store.all_samples().await?;
        let root_sample_ids: Vec<String> = samples.iter().map(|s| s.root_sample_id.clone()).collect();

        let chunk_size = self.config.chunk_size;
        let v0 = CherrypickLookup::build(self.events, &root_sample_ids, None, v0_v1_cutoff, chunk_size).await?;
        let v1 =
            CherrypickLookup::build(self.events, &root_sample_ids, Some(v0_v1_cutoff), v1_v2_cutoff, chunk_size)
                .await?;
        info!(v0_pairs = v0.len(), v1_pairs = v1.len(), "Cherry-picked pairs loaded");

        let split = split_by_version(samples, &v0, &v1);
        let mut report = MigrationReport::default();
        for (version, group) in [
            (FILTERED_POSITIVE_VERSION_0, &split.v0),
            (FILTERED_POSITIVE_VERSION_1, &split.v1),
            (FILTERED_POSITIVE_VERSION_2, &split.v2),
        ] {
            let identifier = identifier_for(version)
                .ok_or_else(|| CrawlerError::Config(format!("no identifier for version {version}")))?;
            let counts = write_classification(self.store, self.warehouse, group, identifier, now).await?;
            report.versions.push(counts);
        }

        info!(
            v0 = report.count(FILTERED_POSITIVE_VERSION_0),
            v1 = report.count(FILTERED_POSITIVE_VERSION_1),
            v2 = report.count(FILTERED_POSITIVE_VERSION_2),
            "Legacy migration complete"
        );
        Ok(report)
    }
}
