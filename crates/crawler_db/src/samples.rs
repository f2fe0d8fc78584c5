//! Primary store operations: samples, history, imports, priority samples

use crate::error::{DbError, Result};
use crate::types::*;
use crate::{in_chunks, CrawlerDb};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::BTreeSet;
use std::str::FromStr;
use tracing::{debug, warn};

pub(crate) type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Every sample column except `id`, in bind order.
pub(crate) const SAMPLE_COLUMNS: &str = "root_sample_id, rna_id, plate_barcode, coordinate, result, \
    date_tested, lab_id, \
    ch1_target, ch1_result, ch1_cq, ch2_target, ch2_result, ch2_cq, \
    ch3_target, ch3_result, ch3_cq, ch4_target, ch4_result, ch4_cq, \
    source, file_name, line_number, \
    filtered_positive, filtered_positive_version, filtered_positive_timestamp, \
    extra_json, created_at, updated_at";

const SAMPLE_PLACEHOLDERS: &str =
    "?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?";

impl CrawlerDb {
    // ========================================================================
    // Sample Operations
    // ========================================================================

    /// Unordered bulk insert.
    ///
    /// Unique-key violations are reported per row and do not stop the batch.
    /// Any other failure stops the batch; rows inserted before it stay inserted.
    pub async fn insert_samples(&self, samples: &[Sample]) -> Result<BulkInsertOutcome> {
        let sql = format!("INSERT INTO samples ({SAMPLE_COLUMNS}) VALUES ({SAMPLE_PLACEHOLDERS})");
        let mut outcome = BulkInsertOutcome::default();

        for (index, sample) in samples.iter().enumerate() {
            let extra_json = serde_json::to_string(&sample.extra)?;
            let query = bind_sample(sqlx::query(&sql), sample, extra_json);

            match query.execute(&self.pool).await {
                Ok(_) => outcome.inserted += 1,
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    outcome.write_errors.push(WriteError {
                        index,
                        code: db_err
                            .code()
                            .map(|code| code.into_owned())
                            .unwrap_or_else(|| "unique".to_string()),
                        message: db_err.message().to_string(),
                    });
                }
                Err(source) => {
                    warn!(inserted = outcome.inserted, error = %source, "Bulk insert aborted");
                    return Err(DbError::BulkInsertAborted {
                        inserted: outcome.inserted,
                        source,
                    });
                }
            }
        }

        debug!(
            inserted = outcome.inserted,
            rejected = outcome.write_errors.len(),
            "Samples inserted"
        );
        Ok(outcome)
    }

    /// Move every current sample sharing one of `root_sample_ids` into
    /// `samples_history`, then delete the originals.
    ///
    /// Runs in one transaction. If the copy does not produce exactly one history
    /// row per original, nothing is written and `ArchiveMismatch` is returned.
    pub async fn archive_samples(
        &self,
        root_sample_ids: &[String],
        archived_at: DateTime<Utc>,
    ) -> Result<ArchiveOutcome> {
        let unique: Vec<String> = root_sample_ids
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut outcome = ArchiveOutcome::default();
        if unique.is_empty() {
            return Ok(outcome);
        }

        let mut tx = self.pool.begin().await?;

        for chunk in in_chunks(&unique) {
            let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM samples WHERE root_sample_id IN ");
            push_in_list(&mut qb, chunk);
            let count: i64 = qb.build_query_scalar().fetch_one(&mut *tx).await?;
            outcome.candidates += count as usize;
        }

        if outcome.candidates == 0 {
            tx.rollback().await?;
            return Ok(outcome);
        }

        for chunk in in_chunks(&unique) {
            let mut qb = QueryBuilder::<Sqlite>::new(format!(
                "INSERT INTO samples_history (sample_object_id, archived_at, {SAMPLE_COLUMNS}) \
                 SELECT id, "
            ));
            qb.push_bind(archived_at.timestamp_millis());
            qb.push(format!(", {SAMPLE_COLUMNS} FROM samples WHERE root_sample_id IN "));
            push_in_list(&mut qb, chunk);
            let result = qb.build().execute(&mut *tx).await?;
            outcome.archived += result.rows_affected() as usize;
        }

        if outcome.archived != outcome.candidates {
            tx.rollback().await?;
            return Err(DbError::ArchiveMismatch {
                expected: outcome.candidates,
                archived: outcome.archived,
            });
        }

        for chunk in in_chunks(&unique) {
            let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM samples WHERE root_sample_id IN ");
            push_in_list(&mut qb, chunk);
            let result = qb.build().execute(&mut *tx).await?;
            outcome.deleted += result.rows_affected() as usize;
        }

        tx.commit().await?;

        debug!(
            candidates = outcome.candidates,
            archived = outcome.archived,
            "Archived existing samples"
        );
        Ok(outcome)
    }

    /// Current samples for the given root sample ids.
    pub async fn samples_by_root_ids(&self, root_sample_ids: &[String]) -> Result<Vec<Sample>> {
        let mut samples = Vec::new();
        for chunk in in_chunks(root_sample_ids) {
            let mut qb = QueryBuilder::<Sqlite>::new(format!(
                "SELECT id, {SAMPLE_COLUMNS} FROM samples WHERE root_sample_id IN "
            ));
            push_in_list(&mut qb, chunk);
            qb.push(" ORDER BY id");
            let rows = qb.build().fetch_all(&self.pool).await?;
            for row in &rows {
                samples.push(row_to_sample(row)?);
            }
        }
        Ok(samples)
    }

    /// Every current sample.
    pub async fn all_samples(&self) -> Result<Vec<Sample>> {
        let rows = sqlx::query(&format!("SELECT id, {SAMPLE_COLUMNS} FROM samples ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_sample).collect()
    }

    /// Samples created within `[start, end]`.
    pub async fn samples_created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Sample>> {
        let rows = sqlx::query(&format!(
            "SELECT id, {SAMPLE_COLUMNS} FROM samples WHERE created_at >= ? AND created_at <= ? ORDER BY id"
        ))
        .bind(start.timestamp_millis())
        .bind(end.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_sample).collect()
    }

    /// Samples that have never been classified.
    pub async fn samples_without_filtered_positive(&self) -> Result<Vec<Sample>> {
        let rows = sqlx::query(&format!(
            "SELECT id, {SAMPLE_COLUMNS} FROM samples WHERE filtered_positive_version IS NULL ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_sample).collect()
    }

    /// Number of samples classified under `version`.
    pub async fn count_samples_with_version(&self, version: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM samples WHERE filtered_positive_version = ?")
                .bind(version)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Write the classification fields on every sample in `ids`.
    pub async fn update_filtered_positive(
        &self,
        ids: &[i64],
        filtered_positive: &FilteredPositive,
    ) -> Result<u64> {
        let mut updated = 0;
        let mut tx = self.pool.begin().await?;
        for chunk in in_chunks(ids) {
            let mut qb = QueryBuilder::<Sqlite>::new("UPDATE samples SET filtered_positive = ");
            qb.push_bind(filtered_positive.positive);
            qb.push(", filtered_positive_version = ");
            qb.push_bind(filtered_positive.version.clone());
            qb.push(", filtered_positive_timestamp = ");
            qb.push_bind(filtered_positive.timestamp.timestamp_millis());
            qb.push(", updated_at = ");
            qb.push_bind(Self::now_millis());
            qb.push(" WHERE id IN (");
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
            updated += qb.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(updated)
    }

    /// History rows for one root sample id, oldest first.
    pub async fn sample_history(&self, root_sample_id: &str) -> Result<Vec<SampleHistoryRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT id, sample_object_id, archived_at, {SAMPLE_COLUMNS} FROM samples_history \
             WHERE root_sample_id = ? ORDER BY id"
        ))
        .bind(root_sample_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let mut sample = row_to_sample(row)?;
                sample.id = None;
                Ok(SampleHistoryRecord {
                    id: row.try_get("id")?,
                    sample_object_id: row.try_get("sample_object_id")?,
                    archived_at: Self::millis_to_datetime(row.try_get("archived_at")?),
                    sample,
                })
            })
            .collect()
    }

    // ========================================================================
    // Import Records
    // ========================================================================

    /// Append an import record.
    pub async fn insert_import_record(&self, record: &ImportRecord) -> Result<i64> {
        let errors_json = serde_json::to_string(&record.errors)?;
        let result = sqlx::query(
            r#"
            INSERT INTO imports (date, centre_name, csv_file_used, number_of_records, errors_json)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.date.timestamp_millis())
        .bind(&record.centre_name)
        .bind(&record.csv_file_used)
        .bind(record.number_of_records)
        .bind(errors_json)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Import records for a centre, oldest first.
    pub async fn import_records_for_centre(&self, centre_name: &str) -> Result<Vec<ImportRecord>> {
        let rows = sqlx::query(
            "SELECT id, date, centre_name, csv_file_used, number_of_records, errors_json \
             FROM imports WHERE centre_name = ? ORDER BY id",
        )
        .bind(centre_name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let errors_json: String = row.try_get("errors_json")?;
                Ok(ImportRecord {
                    id: Some(row.try_get("id")?),
                    date: Self::millis_to_datetime(row.try_get("date")?),
                    centre_name: row.try_get("centre_name")?,
                    csv_file_used: row.try_get("csv_file_used")?,
                    number_of_records: row.try_get("number_of_records")?,
                    errors: serde_json::from_str(&errors_json)?,
                })
            })
            .collect()
    }

    // ========================================================================
    // Priority Samples
    // ========================================================================

    /// Set the priority flags for a root sample id and mark it unprocessed.
    pub async fn upsert_priority_sample(
        &self,
        root_sample_id: &str,
        must_sequence: bool,
        preferentially_sequence: bool,
    ) -> Result<i64> {
        sqlx::query(
            r#"
            INSERT INTO priority_samples (root_sample_id, must_sequence, preferentially_sequence, processed)
            VALUES (?, ?, ?, 0)
            ON CONFLICT(root_sample_id) DO UPDATE SET
                must_sequence = excluded.must_sequence,
                preferentially_sequence = excluded.preferentially_sequence,
                processed = 0
            "#,
        )
        .bind(root_sample_id)
        .bind(must_sequence)
        .bind(preferentially_sequence)
        .execute(&self.pool)
        .await?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM priority_samples WHERE root_sample_id = ?")
            .bind(root_sample_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    /// Unprocessed priority records that have at least one sample, each merged
    /// with the first sample stored for its root sample id.
    pub async fn unprocessed_priority_samples(&self) -> Result<Vec<PrioritisedSample>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT p.id AS priority_id, p.must_sequence, p.preferentially_sequence, p.processed,
                   s.id, {}
            FROM priority_samples p
            JOIN samples s ON s.id = (
                SELECT MIN(s2.id) FROM samples s2 WHERE s2.root_sample_id = p.root_sample_id
            )
            WHERE p.processed = 0
            ORDER BY p.id
            "#,
            prefixed_sample_columns("s")
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let sample = row_to_sample(row)?;
                Ok(PrioritisedSample {
                    priority: PrioritySample {
                        id: row.try_get("priority_id")?,
                        root_sample_id: sample.root_sample_id.clone(),
                        must_sequence: row.try_get("must_sequence")?,
                        preferentially_sequence: row.try_get("preferentially_sequence")?,
                        processed: row.try_get("processed")?,
                    },
                    sample,
                })
            })
            .collect()
    }

    /// Flag one priority record as processed.
    pub async fn mark_priority_sample_processed(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE priority_samples SET processed = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Every priority record.
    pub async fn priority_samples(&self) -> Result<Vec<PrioritySample>> {
        let rows = sqlx::query(
            "SELECT id, root_sample_id, must_sequence, preferentially_sequence, processed \
             FROM priority_samples ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(PrioritySample {
                    id: row.try_get("id")?,
                    root_sample_id: row.try_get("root_sample_id")?,
                    must_sequence: row.try_get("must_sequence")?,
                    preferentially_sequence: row.try_get("preferentially_sequence")?,
                    processed: row.try_get("processed")?,
                })
            })
            .collect()
    }
}

// ============================================================================
// Row helpers
// ============================================================================

pub(crate) fn push_in_list<'a>(qb: &mut QueryBuilder<'a, Sqlite>, values: &'a [String]) {
    qb.push("(");
    let mut separated = qb.separated(", ");
    for value in values {
        separated.push_bind(value.as_str());
    }
    separated.push_unseparated(")");
}

fn prefixed_sample_columns(alias: &str) -> String {
    SAMPLE_COLUMNS
        .split(',')
        .map(|column| format!("{alias}.{}", column.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Bind a sample in `SAMPLE_COLUMNS` order.
pub(crate) fn bind_sample<'q>(query: SqliteQuery<'q>, sample: &'q Sample, extra_json: String) -> SqliteQuery<'q> {
    let mut query = query
        .bind(&sample.root_sample_id)
        .bind(&sample.rna_id)
        .bind(&sample.plate_barcode)
        .bind(&sample.coordinate)
        .bind(&sample.result)
        .bind(&sample.date_tested)
        .bind(&sample.lab_id);

    for channel in &sample.channels {
        query = query
            .bind(channel.target.as_deref())
            .bind(channel.result.as_deref())
            .bind(channel.cq.map(|cq| cq.to_string()));
    }

    let filtered_positive = sample.filtered_positive.as_ref();
    query
        .bind(&sample.source)
        .bind(&sample.file_name)
        .bind(sample.line_number)
        .bind(filtered_positive.map(|fp| fp.positive))
        .bind(filtered_positive.map(|fp| fp.version.clone()))
        .bind(filtered_positive.map(|fp| fp.timestamp.timestamp_millis()))
        .bind(extra_json)
        .bind(sample.created_at.timestamp_millis())
        .bind(sample.updated_at.timestamp_millis())
}

pub(crate) fn decode_cq(raw: Option<String>) -> Result<Option<Decimal>> {
    raw.map(|value| {
        Decimal::from_str(&value).map_err(|e| DbError::decode(format!("invalid cq '{value}': {e}")))
    })
    .transpose()
}

pub(crate) fn row_to_sample(row: &SqliteRow) -> Result<Sample> {
    let mut channels: [Channel; 4] = Default::default();
    for (index, channel) in channels.iter_mut().enumerate() {
        let n = index + 1;
        channel.target = row.try_get(format!("ch{n}_target").as_str())?;
        channel.result = row.try_get(format!("ch{n}_result").as_str())?;
        channel.cq = decode_cq(row.try_get(format!("ch{n}_cq").as_str())?)?;
    }

    let positive: Option<bool> = row.try_get("filtered_positive")?;
    let version: Option<String> = row.try_get("filtered_positive_version")?;
    let timestamp: Option<i64> = row.try_get("filtered_positive_timestamp")?;
    let filtered_positive = match (positive, version, timestamp) {
        (Some(positive), Some(version), Some(timestamp)) => Some(FilteredPositive {
            positive,
            version,
            timestamp: CrawlerDb::millis_to_datetime(timestamp),
        }),
        _ => None,
    };

    let extra_json: String = row.try_get("extra_json")?;

    Ok(Sample {
        id: Some(row.try_get("id")?),
        root_sample_id: row.try_get("root_sample_id")?,
        rna_id: row.try_get("rna_id")?,
        plate_barcode: row.try_get("plate_barcode")?,
        coordinate: row.try_get("coordinate")?,
        result: row.try_get("result")?,
        date_tested: row.try_get("date_tested")?,
        lab_id: row.try_get("lab_id")?,
        channels,
        source: row.try_get("source")?,
        file_name: row.try_get("file_name")?,
        line_number: row.try_get("line_number")?,
        filtered_positive,
        extra: serde_json::from_str(&extra_json)?,
        created_at: CrawlerDb::millis_to_datetime(row.try_get("created_at")?),
        updated_at: CrawlerDb::millis_to_datetime(row.try_get("updated_at")?),
    })
}
