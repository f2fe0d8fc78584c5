//! Plate tracking operations
//!
//! Plate-level state is read and written through named properties. Well rows
//! are keyed by `(barcode, well_index, name)` so rewriting a well is an upsert.

use crate::error::Result;
use crate::types::*;
use crate::CrawlerDb;
use sqlx::{Row, Sqlite, Transaction};
use tracing::debug;

/// One unit of plate-tracking work. Dropping it without `commit` rolls back.
pub struct PlateTransaction {
    tx: Transaction<'static, Sqlite>,
}

impl PlateTransaction {
    /// Property value, or [`PLATE_STATE_NO_PLATE`] / [`PLATE_STATE_NO_PROP`].
    pub async fn get_plate_property(&mut self, barcode: &str, name: &str) -> Result<String> {
        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM dart_plates WHERE barcode = ?")
            .bind(barcode)
            .fetch_optional(&mut *self.tx)
            .await?;
        if exists.is_none() {
            return Ok(PLATE_STATE_NO_PLATE.to_string());
        }

        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM dart_plate_properties WHERE barcode = ? AND name = ?")
                .bind(barcode)
                .bind(name)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(value.unwrap_or_else(|| PLATE_STATE_NO_PROP.to_string()))
    }

    /// Register a plate. An existing plate is left untouched.
    pub async fn add_plate(&mut self, barcode: &str, labware_class: &str, num_wells: i64) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO dart_plates (barcode, labware_class, num_wells) VALUES (?, ?, ?)")
            .bind(barcode)
            .bind(labware_class)
            .bind(num_wells)
            .execute(&mut *self.tx)
            .await?;
        debug!(barcode, labware_class, "Plate added");
        Ok(())
    }

    /// Set a plate property; returns [`SET_PROP_STATUS_SUCCESS`] or
    /// [`SET_PROP_STATUS_NO_PLATE`].
    pub async fn set_plate_property(&mut self, barcode: &str, name: &str, value: &str) -> Result<i32> {
        let result = sqlx::query(
            r#"
            INSERT INTO dart_plate_properties (barcode, name, value)
            SELECT barcode, ?, ? FROM dart_plates WHERE barcode = ?
            ON CONFLICT(barcode, name) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(name)
        .bind(value)
        .bind(barcode)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            Ok(SET_PROP_STATUS_NO_PLATE)
        } else {
            Ok(SET_PROP_STATUS_SUCCESS)
        }
    }

    /// Upsert one well-level property.
    pub async fn set_well_property(&mut self, barcode: &str, well_index: i64, name: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dart_well_properties (barcode, well_index, name, value)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(barcode, well_index, name) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(barcode)
        .bind(well_index)
        .bind(name)
        .bind(value)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

impl CrawlerDb {
    // ========================================================================
    // Plate Tracking
    // ========================================================================

    /// Start a plate-tracking unit of work.
    pub async fn begin_plate_transaction(&self) -> Result<PlateTransaction> {
        let tx = self.pool.begin().await?;
        Ok(PlateTransaction { tx })
    }

    /// Committed property value, or [`PLATE_STATE_NO_PLATE`] / [`PLATE_STATE_NO_PROP`].
    pub async fn plate_property(&self, barcode: &str, name: &str) -> Result<String> {
        let row = sqlx::query(
            r#"
            SELECT p.barcode, pp.value
            FROM dart_plates p
            LEFT JOIN dart_plate_properties pp ON pp.barcode = p.barcode AND pp.name = ?
            WHERE p.barcode = ?
            "#,
        )
        .bind(name)
        .bind(barcode)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(PLATE_STATE_NO_PLATE.to_string()),
            Some(row) => Ok(row
                .try_get::<Option<String>, _>("value")?
                .unwrap_or_else(|| PLATE_STATE_NO_PROP.to_string())),
        }
    }

    /// Committed well properties of a plate, ordered by well then name.
    pub async fn well_properties(&self, barcode: &str) -> Result<Vec<WellProperty>> {
        let rows = sqlx::query(
            "SELECT well_index, name, value FROM dart_well_properties WHERE barcode = ? ORDER BY well_index, name",
        )
        .bind(barcode)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(WellProperty {
                    well_index: row.try_get("well_index")?,
                    name: row.try_get("name")?,
                    value: row.try_get("value")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_plate_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let db = CrawlerDb::open(tmp.path().join("dart.db")).await.unwrap();

        let mut plate = db.begin_plate_transaction().await.unwrap();
        assert_eq!(plate.get_plate_property("DN1", "state").await.unwrap(), PLATE_STATE_NO_PLATE);
        assert_eq!(
            plate.set_plate_property("DN1", "state", "pending").await.unwrap(),
            SET_PROP_STATUS_NO_PLATE
        );

        plate.add_plate("DN1", "LabwareClass", 96).await.unwrap();
        assert_eq!(plate.get_plate_property("DN1", "state").await.unwrap(), PLATE_STATE_NO_PROP);
        assert_eq!(
            plate.set_plate_property("DN1", "state", "pending").await.unwrap(),
            SET_PROP_STATUS_SUCCESS
        );
        plate.set_well_property("DN1", 1, "state", "pickable").await.unwrap();
        plate.set_well_property("DN1", 1, "state", "pickable").await.unwrap();
        plate.commit().await.unwrap();

        assert_eq!(db.plate_property("DN1", "state").await.unwrap(), "pending");
        assert_eq!(db.well_properties("DN1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_work() {
        let tmp = TempDir::new().unwrap();
        let db = CrawlerDb::open(tmp.path().join("dart.db")).await.unwrap();

        let mut plate = db.begin_plate_transaction().await.unwrap();
        plate.add_plate("DN2", "LabwareClass", 96).await.unwrap();
        plate.rollback().await.unwrap();

        assert_eq!(db.plate_property("DN2", "state").await.unwrap(), PLATE_STATE_NO_PLATE);
    }
}
