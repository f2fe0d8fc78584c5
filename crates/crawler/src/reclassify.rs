//! Classification pass and warehouse backfill over samples already stored.

use crate::checksum::BACKUP_TIMESTAMP_FORMAT;
use crate::csv_file::parse_date_tested;
use crate::error::{CrawlerError, Result};
use crate::filtered_positive::{current_identifier, FilteredPositiveIdentifier};
use crate::storage::{SampleStore, StoreResult, Warehouse};
use chrono::{DateTime, NaiveDateTime, Utc};
use crawler_db::{FilteredPositive, Sample, WarehouseSample};
use tracing::info;

/// What one classification write changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationCounts {
    pub version: String,
    pub samples: usize,
    pub positive: usize,
    pub store_updated: u64,
    pub warehouse_updated: u64,
}

/// Classify `samples` with `identifier` at `timestamp` and write the three
/// fields to the primary store and the warehouse.
pub async fn write_classification(
    store: &dyn SampleStore,
    warehouse: &dyn Warehouse,
    samples: &[Sample],
    identifier: &dyn FilteredPositiveIdentifier,
    timestamp: DateTime<Utc>,
) -> StoreResult<ClassificationCounts> {
    let mut counts = ClassificationCounts {
        version: identifier.version().to_string(),
        samples: samples.len(),
        ..Default::default()
    };

    let (positive, negative): (Vec<&Sample>, Vec<&Sample>) =
        samples.iter().partition(|sample| identifier.is_positive(sample));
    counts.positive = positive.len();

    for (is_positive, group) in [(true, positive), (false, negative)] {
        let ids: Vec<i64> = group.iter().filter_map(|sample| sample.id).collect();
        if ids.is_empty() {
            continue;
        }
        let filtered_positive = FilteredPositive {
            positive: is_positive,
            version: counts.version.clone(),
            timestamp,
        };
        counts.store_updated += store.update_filtered_positive(&ids, &filtered_positive).await?;

        let mongodb_ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
        counts.warehouse_updated += warehouse
            .update_filtered_positive(&mongodb_ids, &filtered_positive)
            .await?;
    }

    info!(
        version = %counts.version,
        samples = counts.samples,
        positive = counts.positive,
        warehouse_updated = counts.warehouse_updated,
        "Filtered positive fields written"
    );
    Ok(counts)
}

/// Classify every sample without filtered-positive fields using the current rules.
pub async fn classify_unclassified(
    store: &dyn SampleStore,
    warehouse: &dyn Warehouse,
    now: DateTime<Utc>,
) -> StoreResult<ClassificationCounts> {
    let samples = store.unclassified_samples().await?;
    info!(count = samples.len(), "Unclassified samples fetched");
    write_classification(store, warehouse, &samples, current_identifier(), now).await
}

/// Parse a `yymmdd_HHMM` window bound.
pub fn parse_window_bound(value: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, BACKUP_TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| CrawlerError::InvalidArgument(format!("'{value}' is not a yymmdd_HHMM timestamp: {e}")))
}

/// Warehouse row for a stored sample, outside the priority path.
pub fn warehouse_row(sample: &Sample) -> WarehouseSample {
    WarehouseSample {
        mongodb_id: sample.id.map(|id| id.to_string()),
        date_tested: parse_date_tested(&sample.date_tested),
        must_sequence: None,
        preferentially_sequence: None,
        sample: sample.clone(),
    }
}

/// Upsert every sample created in `[start, end]` into the warehouse.
pub async fn backfill_warehouse(
    store: &dyn SampleStore,
    warehouse: &dyn Warehouse,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<usize> {
    if start > end {
        return Err(CrawlerError::InvalidArgument(format!(
            "window start {start} is after end {end}"
        )));
    }

    let samples = store.samples_created_between(start, end).await?;
    info!(count = samples.len(), %start, %end, "Samples selected for warehouse backfill");

    let rows: Vec<WarehouseSample> = samples.iter().map(warehouse_row).collect();
    let written = warehouse.upsert_samples(&rows).await?;
    info!(written, "Warehouse backfill complete");
    Ok(written)
}
