//! Warehouse operations on the `lighthouse_sample` table

use crate::error::Result;
use crate::samples::{decode_cq, push_in_list};
use crate::types::*;
use crate::{in_chunks, CrawlerDb};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::debug;

const WAREHOUSE_COLUMNS: &str = "mongodb_id, root_sample_id, rna_id, plate_barcode, coordinate, result, \
    date_tested_string, date_tested, source, lab_id, \
    ch1_target, ch1_result, ch1_cq, ch2_target, ch2_result, ch2_cq, \
    ch3_target, ch3_result, ch3_cq, ch4_target, ch4_result, ch4_cq, \
    filtered_positive, filtered_positive_version, filtered_positive_timestamp, \
    must_sequence, preferentially_sequence, created_at, updated_at";

/// Classification columns are only written on insert; an existing row keeps its own.
const WAREHOUSE_UPSERT_SQL: &str = r#"
    INSERT INTO lighthouse_sample (
        mongodb_id, root_sample_id, rna_id, plate_barcode, coordinate, result,
        date_tested_string, date_tested, source, lab_id,
        ch1_target, ch1_result, ch1_cq, ch2_target, ch2_result, ch2_cq,
        ch3_target, ch3_result, ch3_cq, ch4_target, ch4_result, ch4_cq,
        filtered_positive, filtered_positive_version, filtered_positive_timestamp,
        must_sequence, preferentially_sequence, created_at, updated_at
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(root_sample_id, rna_id, result) DO UPDATE SET
        mongodb_id = excluded.mongodb_id,
        plate_barcode = excluded.plate_barcode,
        coordinate = excluded.coordinate,
        date_tested_string = excluded.date_tested_string,
        date_tested = excluded.date_tested,
        source = excluded.source,
        lab_id = excluded.lab_id,
        must_sequence = COALESCE(excluded.must_sequence, lighthouse_sample.must_sequence),
        preferentially_sequence = COALESCE(excluded.preferentially_sequence, lighthouse_sample.preferentially_sequence),
        created_at = excluded.created_at,
        updated_at = excluded.updated_at
"#;

impl CrawlerDb {
    // ========================================================================
    // Warehouse Operations
    // ========================================================================

    /// Upsert rows keyed on `(root_sample_id, rna_id, result)`.
    ///
    /// Rows are written `batch_size` at a time, one transaction per batch.
    /// Returns the number of rows written.
    pub async fn upsert_warehouse_samples(&self, rows: &[WarehouseSample], batch_size: usize) -> Result<usize> {
        let mut written = 0;

        for batch in rows.chunks(batch_size.max(1)) {
            let mut tx = self.pool.begin().await?;
            for row in batch {
                let sample = &row.sample;
                let filtered_positive = sample.filtered_positive.as_ref();

                let mut query = sqlx::query(WAREHOUSE_UPSERT_SQL)
                    .bind(row.mongodb_id.as_deref())
                    .bind(&sample.root_sample_id)
                    .bind(&sample.rna_id)
                    .bind(&sample.plate_barcode)
                    .bind(&sample.coordinate)
                    .bind(&sample.result)
                    .bind(&sample.date_tested)
                    .bind(row.date_tested.map(|d| d.timestamp_millis()))
                    .bind(&sample.source)
                    .bind(&sample.lab_id);
                for channel in &sample.channels {
                    query = query
                        .bind(channel.target.as_deref())
                        .bind(channel.result.as_deref())
                        .bind(channel.cq.map(|cq| cq.to_string()));
                }
                query
                    .bind(filtered_positive.map(|fp| fp.positive))
                    .bind(filtered_positive.map(|fp| fp.version.clone()))
                    .bind(filtered_positive.map(|fp| fp.timestamp.timestamp_millis()))
                    .bind(row.must_sequence)
                    .bind(row.preferentially_sequence)
                    .bind(sample.created_at.timestamp_millis())
                    .bind(sample.updated_at.timestamp_millis())
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            written += batch.len();
            debug!(written, total = rows.len(), "Warehouse batch committed");
        }

        Ok(written)
    }

    /// Write the classification fields on warehouse rows by `mongodb_id`.
    pub async fn update_warehouse_filtered_positive(
        &self,
        mongodb_ids: &[String],
        filtered_positive: &FilteredPositive,
    ) -> Result<u64> {
        let mut updated = 0;
        let mut tx = self.pool.begin().await?;
        for chunk in in_chunks(mongodb_ids) {
            let mut qb = QueryBuilder::<Sqlite>::new("UPDATE lighthouse_sample SET filtered_positive = ");
            qb.push_bind(filtered_positive.positive);
            qb.push(", filtered_positive_version = ");
            qb.push_bind(filtered_positive.version.clone());
            qb.push(", filtered_positive_timestamp = ");
            qb.push_bind(filtered_positive.timestamp.timestamp_millis());
            qb.push(", updated_at = ");
            qb.push_bind(Self::now_millis());
            qb.push(" WHERE mongodb_id IN ");
            push_in_list(&mut qb, chunk);
            updated += qb.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(updated)
    }

    /// Look up one warehouse row by its unique key.
    pub async fn warehouse_sample(
        &self,
        root_sample_id: &str,
        rna_id: &str,
        result: &str,
    ) -> Result<Option<WarehouseSample>> {
        let row = sqlx::query(&format!(
            "SELECT {WAREHOUSE_COLUMNS} FROM lighthouse_sample \
             WHERE root_sample_id = ? AND rna_id = ? AND result = ?"
        ))
        .bind(root_sample_id)
        .bind(rna_id)
        .bind(result)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_warehouse_sample).transpose()
    }

    /// Number of rows in the warehouse table.
    pub async fn warehouse_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM lighthouse_sample")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn row_to_warehouse_sample(row: &SqliteRow) -> Result<WarehouseSample> {
    let mut sample = Sample::new(
        row.try_get::<String, _>("root_sample_id")?,
        row.try_get::<String, _>("rna_id")?,
        row.try_get::<String, _>("result")?,
    );
    sample.plate_barcode = row.try_get::<Option<String>, _>("plate_barcode")?.unwrap_or_default();
    sample.coordinate = row.try_get::<Option<String>, _>("coordinate")?.unwrap_or_default();
    sample.date_tested = row.try_get::<Option<String>, _>("date_tested_string")?.unwrap_or_default();
    sample.source = row.try_get::<Option<String>, _>("source")?.unwrap_or_default();
    sample.lab_id = row.try_get::<Option<String>, _>("lab_id")?.unwrap_or_default();

    for (index, channel) in sample.channels.iter_mut().enumerate() {
        let n = index + 1;
        channel.target = row.try_get(format!("ch{n}_target").as_str())?;
        channel.result = row.try_get(format!("ch{n}_result").as_str())?;
        channel.cq = decode_cq(row.try_get(format!("ch{n}_cq").as_str())?)?;
    }

    let positive: Option<bool> = row.try_get("filtered_positive")?;
    let version: Option<String> = row.try_get("filtered_positive_version")?;
    let timestamp: Option<i64> = row.try_get("filtered_positive_timestamp")?;
    if let (Some(positive), Some(version), Some(timestamp)) = (positive, version, timestamp) {
        sample.filtered_positive = Some(FilteredPositive {
            positive,
            version,
            timestamp: CrawlerDb::millis_to_datetime(timestamp),
        });
    }

    if let Some(created_at) = row.try_get::<Option<i64>, _>("created_at")? {
        sample.created_at = CrawlerDb::millis_to_datetime(created_at);
    }
    if let Some(updated_at) = row.try_get::<Option<i64>, _>("updated_at")? {
        sample.updated_at = CrawlerDb::millis_to_datetime(updated_at);
    }

    Ok(WarehouseSample {
        mongodb_id: row.try_get("mongodb_id")?,
        date_tested: row
            .try_get::<Option<i64>, _>("date_tested")?
            .map(CrawlerDb::millis_to_datetime),
        must_sequence: row.try_get("must_sequence")?,
        preferentially_sequence: row.try_get("preferentially_sequence")?,
        sample,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn row(root: &str, plate: &str) -> WarehouseSample {
        let mut sample = Sample::new(root, format!("{plate}_A01"), "Positive");
        sample.plate_barcode = plate.to_string();
        sample.coordinate = "A01".to_string();
        WarehouseSample {
            mongodb_id: Some("1".to_string()),
            sample,
            date_tested: None,
            must_sequence: None,
            preferentially_sequence: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_refreshes_mutable_fields_only() {
        let tmp = TempDir::new().unwrap();
        let db = CrawlerDb::open(tmp.path().join("mlwh.db")).await.unwrap();

        let mut first = row("R1", "DN1");
        first.sample.filtered_positive = Some(FilteredPositive {
            positive: true,
            version: "v2".to_string(),
            timestamp: Utc::now(),
        });
        first.must_sequence = Some(true);
        db.upsert_warehouse_samples(&[first], 10).await.unwrap();

        let mut second = row("R1", "DN1");
        second.sample.lab_id = "AP".to_string();
        second.sample.filtered_positive = None;
        db.upsert_warehouse_samples(&[second], 10).await.unwrap();

        assert_eq!(db.warehouse_count().await.unwrap(), 1);
        let stored = db.warehouse_sample("R1", "DN1_A01", "Positive").await.unwrap().unwrap();
        assert_eq!(stored.sample.lab_id, "AP");
        assert_eq!(stored.must_sequence, Some(true));
        assert_eq!(stored.sample.filtered_positive.map(|fp| fp.version), Some("v2".to_string()));
    }

    #[tokio::test]
    async fn test_upsert_in_batches() {
        let tmp = TempDir::new().unwrap();
        let db = CrawlerDb::open(tmp.path().join("mlwh.db")).await.unwrap();

        let rows: Vec<_> = (0..5).map(|i| row(&format!("R{i}"), "DN1")).collect();
        assert_eq!(db.upsert_warehouse_samples(&rows, 2).await.unwrap(), 5);
        assert_eq!(db.warehouse_count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_update_filtered_positive_by_mongodb_id() {
        let tmp = TempDir::new().unwrap();
        let db = CrawlerDb::open(tmp.path().join("mlwh.db")).await.unwrap();
        db.upsert_warehouse_samples(&[row("R1", "DN1")], 10).await.unwrap();

        let fp = FilteredPositive { positive: false, version: "v0".to_string(), timestamp: Utc::now() };
        let updated = db.update_warehouse_filtered_positive(&["1".to_string()], &fp).await.unwrap();
        assert_eq!(updated, 1);

        let stored = db.warehouse_sample("R1", "DN1_A01", "Positive").await.unwrap().unwrap();
        assert_eq!(stored.sample.filtered_positive.map(|fp| fp.positive), Some(false));
    }
}
