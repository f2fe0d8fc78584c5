//! Cherry-pick event log

use crate::error::Result;
use crate::samples::push_in_list;
use crate::types::*;
use crate::CrawlerDb;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite};

impl CrawlerDb {
    /// Append an event.
    pub async fn insert_cherrypick_event(&self, event: &CherrypickEvent) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO cherrypick_events (root_sample_id, plate_barcode, event_type, occurred_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&event.root_sample_id)
        .bind(&event.plate_barcode)
        .bind(&event.event_type)
        .bind(event.occurred_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// `(root_sample_id, plate_barcode)` pairs cherry-picked within
    /// `[start, end)` for the given root sample ids. May contain repeats.
    ///
    /// Callers bound `root_sample_ids`; SQLite caps bound parameters per query.
    pub async fn cherrypicked_pairs(
        &self,
        root_sample_ids: &[String],
        start: Option<DateTime<Utc>>,
        end: DateTime<Utc>,
    ) -> Result<Vec<(String, String)>> {
        if root_sample_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT root_sample_id, plate_barcode FROM cherrypick_events WHERE event_type IN (",
        );
        let mut separated = qb.separated(", ");
        for event_type in CHERRYPICK_EVENT_TYPES {
            separated.push_bind(event_type);
        }
        separated.push_unseparated(")");

        qb.push(" AND occurred_at < ");
        qb.push_bind(end.timestamp_millis());
        if let Some(start) = start {
            qb.push(" AND occurred_at >= ");
            qb.push_bind(start.timestamp_millis());
        }
        qb.push(" AND root_sample_id IN ");
        push_in_list(&mut qb, root_sample_ids);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| Ok((row.try_get("root_sample_id")?, row.try_get("plate_barcode")?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn event(root: &str, plate: &str, event_type: &str, day: u32) -> CherrypickEvent {
        CherrypickEvent {
            root_sample_id: root.to_string(),
            plate_barcode: plate.to_string(),
            event_type: event_type.to_string(),
            occurred_at: Utc.with_ymd_and_hms(2020, 10, day, 12, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_pairs_filtered_by_type_and_window() {
        let tmp = TempDir::new().unwrap();
        let db = CrawlerDb::open(tmp.path().join("events.db")).await.unwrap();

        db.insert_cherrypick_event(&event("R1", "P1", "cherrypick_layout_set", 1)).await.unwrap();
        db.insert_cherrypick_event(&event("R1", "P1", "lh_beckman_cp_destination_created", 2)).await.unwrap();
        db.insert_cherrypick_event(&event("R2", "P2", "sample_received", 2)).await.unwrap();
        db.insert_cherrypick_event(&event("R3", "P3", "cherrypick_layout_set", 20)).await.unwrap();

        let ids: Vec<String> = ["R1", "R2", "R3"].iter().map(|s| s.to_string()).collect();
        let cutoff = Utc.with_ymd_and_hms(2020, 10, 10, 0, 0, 0).unwrap();

        let before = db.cherrypicked_pairs(&ids, None, cutoff).await.unwrap();
        assert_eq!(before.len(), 2);
        assert!(before.iter().all(|pair| pair == &("R1".to_string(), "P1".to_string())));

        let after = db
            .cherrypicked_pairs(&ids, Some(cutoff), Utc.with_ymd_and_hms(2020, 11, 1, 0, 0, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(after, vec![("R3".to_string(), "P3".to_string())]);
    }
}
