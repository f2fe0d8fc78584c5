//! Database schema creation for all crawler tables.
//!
//! All CREATE TABLE statements live here - single source of truth.

use crate::error::Result;
use crate::CrawlerDb;
use tracing::info;

/// Sample columns shared by `samples` and `samples_history`.
const SAMPLE_COLUMNS_DDL: &str = r#"
    root_sample_id TEXT NOT NULL,
    rna_id TEXT NOT NULL,
    plate_barcode TEXT NOT NULL DEFAULT '',
    coordinate TEXT NOT NULL DEFAULT '',
    result TEXT NOT NULL,
    date_tested TEXT NOT NULL DEFAULT '',
    lab_id TEXT NOT NULL DEFAULT '',
    ch1_target TEXT, ch1_result TEXT, ch1_cq TEXT,
    ch2_target TEXT, ch2_result TEXT, ch2_cq TEXT,
    ch3_target TEXT, ch3_result TEXT, ch3_cq TEXT,
    ch4_target TEXT, ch4_result TEXT, ch4_cq TEXT,
    source TEXT NOT NULL DEFAULT '',
    file_name TEXT NOT NULL DEFAULT '',
    line_number INTEGER NOT NULL DEFAULT 0,
    filtered_positive INTEGER,
    filtered_positive_version TEXT,
    filtered_positive_timestamp INTEGER,
    extra_json TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
"#;

impl CrawlerDb {
    /// Ensure all tables exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;

        self.create_sample_tables().await?;
        self.create_warehouse_tables().await?;
        self.create_plate_tables().await?;
        self.create_event_tables().await?;

        info!("Database schema verified");
        Ok(())
    }

    /// Primary store: samples, history, imports, priority samples
    async fn create_sample_tables(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"CREATE TABLE IF NOT EXISTS samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                {SAMPLE_COLUMNS_DDL},
                UNIQUE(root_sample_id, rna_id, result)
            )"#
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            r#"CREATE TABLE IF NOT EXISTS samples_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sample_object_id INTEGER NOT NULL,
                archived_at INTEGER NOT NULL,
                {SAMPLE_COLUMNS_DDL}
            )"#
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS imports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date INTEGER NOT NULL,
                centre_name TEXT NOT NULL,
                csv_file_used TEXT NOT NULL,
                number_of_records INTEGER NOT NULL,
                errors_json TEXT NOT NULL DEFAULT '[]'
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS priority_samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                root_sample_id TEXT NOT NULL UNIQUE,
                must_sequence INTEGER NOT NULL DEFAULT 0,
                preferentially_sequence INTEGER NOT NULL DEFAULT 0,
                processed INTEGER NOT NULL DEFAULT 0
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_samples_root ON samples(root_sample_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_samples_created ON samples(created_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_samples_history_object ON samples_history(sample_object_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_priority_processed ON priority_samples(processed)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Warehouse: lighthouse_sample
    async fn create_warehouse_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS lighthouse_sample (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mongodb_id TEXT,
                root_sample_id TEXT NOT NULL,
                rna_id TEXT NOT NULL,
                plate_barcode TEXT,
                coordinate TEXT,
                result TEXT NOT NULL,
                date_tested_string TEXT,
                date_tested INTEGER,
                source TEXT,
                lab_id TEXT,
                ch1_target TEXT, ch1_result TEXT, ch1_cq TEXT,
                ch2_target TEXT, ch2_result TEXT, ch2_cq TEXT,
                ch3_target TEXT, ch3_result TEXT, ch3_cq TEXT,
                ch4_target TEXT, ch4_result TEXT, ch4_cq TEXT,
                filtered_positive INTEGER,
                filtered_positive_version TEXT,
                filtered_positive_timestamp INTEGER,
                must_sequence INTEGER,
                preferentially_sequence INTEGER,
                created_at INTEGER,
                updated_at INTEGER,
                UNIQUE(root_sample_id, rna_id, result)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_lighthouse_sample_mongodb_id ON lighthouse_sample(mongodb_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_lighthouse_sample_date_tested ON lighthouse_sample(date_tested)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Plate tracking: plates, plate properties, well properties
    async fn create_plate_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS dart_plates (
                barcode TEXT PRIMARY KEY,
                labware_class TEXT NOT NULL,
                num_wells INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS dart_plate_properties (
                barcode TEXT NOT NULL REFERENCES dart_plates(barcode),
                name TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (barcode, name)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS dart_well_properties (
                barcode TEXT NOT NULL REFERENCES dart_plates(barcode),
                well_index INTEGER NOT NULL,
                name TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (barcode, well_index, name)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Event log: cherry-pick events
    async fn create_event_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS cherrypick_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                root_sample_id TEXT NOT NULL,
                plate_barcode TEXT NOT NULL,
                event_type TEXT NOT NULL,
                occurred_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_cherrypick_events_root ON cherrypick_events(root_sample_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
