//! # Record Queue Repository
//!
//! Durable FIFO of instrument instances awaiting upload.
//!
//! ## Queue Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Record Queue                                          │
//! │                                                                         │
//! │  HOST: add instance                                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  INSERT INTO record_queue (id, instance_id, instrument, payload, ...)  │
//! │       │   position = AUTOINCREMENT → enqueue order                     │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            UPLOAD COORDINATOR (one element at a time)           │   │
//! │  │                                                                 │   │
//! │  │  1. SELECT ... ORDER BY position LIMIT 1                       │   │
//! │  │  2. Sequence number assigned? no → allocate, UPDATE payload    │   │
//! │  │  3. Submit                                                     │   │
//! │  │     a. Acknowledged      → DELETE WHERE id = ?                 │   │
//! │  │     b. Rejected forever  → DELETE WHERE id = ?                 │   │
//! │  │     c. Transient failure → leave row, wait for trigger         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • A row is removed only after acknowledgment or permanent rejection   │
//! │  • The assigned sequence number is written back before submission     │
//! │  • Sign-out clears the table                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use courier_core::InstrumentInstance;

/// One row of the record queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedRecord {
    /// Queue element key (distinct from the instance identifier).
    pub key: String,
    /// Enqueue order.
    pub position: i64,
    pub instance: InstrumentInstance,
    pub enqueued_at: DateTime<Utc>,
}

/// Repository for record queue operations.
#[derive(Debug, Clone)]
pub struct RecordQueueRepository {
    pool: SqlitePool,
}

impl RecordQueueRepository {
    /// Creates a new RecordQueueRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RecordQueueRepository { pool }
    }

    /// Appends an instance to the back of the queue.
    pub async fn push(&self, instance: &InstrumentInstance) -> DbResult<QueuedRecord> {
        let key = Uuid::new_v4().to_string();
        let now = Utc::now();
        let payload = serde_json::to_string(instance)?;

        debug!(
            key = %key,
            instance_id = %instance.identifier,
            instrument = %instance.instrument,
            "Queueing record"
        );

        let result = sqlx::query(
            r#"
            INSERT INTO record_queue (id, instance_id, instrument, payload, enqueued_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&key)
        .bind(instance.identifier.to_string())
        .bind(&instance.instrument)
        .bind(&payload)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(QueuedRecord {
            key,
            position: result.last_insert_rowid(),
            instance: instance.clone(),
            enqueued_at: now,
        })
    }

    /// Returns the oldest queued record, if any.
    pub async fn first(&self) -> DbResult<Option<QueuedRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, position, payload, enqueued_at
            FROM record_queue
            ORDER BY position ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| decode_row(&row)).transpose()
    }

    /// Returns every queued record in enqueue order.
    pub async fn all(&self) -> DbResult<Vec<QueuedRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, position, payload, enqueued_at
            FROM record_queue
            ORDER BY position ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_row).collect()
    }

    /// Rewrites the stored instance of a queued record.
    ///
    /// Used to persist a freshly assigned sequence number before submission.
    pub async fn update_instance(&self, key: &str, instance: &InstrumentInstance) -> DbResult<()> {
        let payload = serde_json::to_string(instance)?;

        let result = sqlx::query("UPDATE record_queue SET payload = ?2 WHERE id = ?1")
            .bind(key)
            .bind(&payload)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("QueuedRecord", key));
        }
        Ok(())
    }

    /// Removes a record. Returns false if it was already gone.
    pub async fn remove(&self, key: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM record_queue WHERE id = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        debug!(key = %key, removed = result.rows_affected(), "Removed queued record");
        Ok(result.rows_affected() > 0)
    }

    /// Deletes every queued record. Returns the number removed.
    pub async fn clear(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM record_queue")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Counts queued records.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM record_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn is_empty(&self) -> DbResult<bool> {
        Ok(self.count().await? == 0)
    }
}

fn decode_row(row: &sqlx::sqlite::SqliteRow) -> DbResult<QueuedRecord> {
    let payload: String = row.try_get("payload")?;
    Ok(QueuedRecord {
        key: row.try_get("id")?,
        position: row.try_get("position")?,
        instance: serde_json::from_str(&payload)?,
        enqueued_at: row.try_get("enqueued_at")?,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use courier_core::FieldMap;

    async fn repo() -> (Database, RecordQueueRepository) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.record_queue();
        (db, repo)
    }

    fn instance(instrument: &str) -> InstrumentInstance {
        InstrumentInstance::new(instrument, "1.0", FieldMap::new())
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (_db, repo) = repo().await;
        assert!(repo.is_empty().await.unwrap());

        let a = repo.push(&instance("a")).await.unwrap();
        let b = repo.push(&instance("b")).await.unwrap();
        repo.push(&instance("c")).await.unwrap();
        assert!(a.position < b.position);

        let first = repo.first().await.unwrap().unwrap();
        assert_eq!(first.key, a.key);
        assert_eq!(first.instance.instrument, "a");

        assert!(repo.remove(&a.key).await.unwrap());
        let first = repo.first().await.unwrap().unwrap();
        assert_eq!(first.instance.instrument, "b");

        let order: Vec<_> = repo
            .all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.instance.instrument)
            .collect();
        assert_eq!(order, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_remove_missing_is_false() {
        let (_db, repo) = repo().await;
        assert!(!repo.remove("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_update_instance_persists_sequence_number() {
        let (_db, repo) = repo().await;
        let queued = repo.push(&instance("survey")).await.unwrap();

        let mut updated = queued.instance.clone();
        updated.assign_sequence_number(5).unwrap();
        repo.update_instance(&queued.key, &updated).await.unwrap();

        let first = repo.first().await.unwrap().unwrap();
        assert_eq!(first.instance.sequence_number(), Some(5));
        assert_eq!(first.instance.identifier, queued.instance.identifier);

        let err = repo.update_instance("missing", &updated).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_clear_and_count() {
        let (_db, repo) = repo().await;
        for _ in 0..3 {
            repo.push(&instance("survey")).await.unwrap();
        }
        assert_eq!(repo.count().await.unwrap(), 3);
        assert_eq!(repo.clear().await.unwrap(), 3);
        assert!(repo.first().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        let db = Database::new(DbConfig::new(&path)).await.unwrap();
        let queued = db.record_queue().push(&instance("survey")).await.unwrap();
        db.close().await;

        let db = Database::new(DbConfig::new(&path)).await.unwrap();
        let first = db.record_queue().first().await.unwrap().unwrap();
        assert_eq!(first.key, queued.key);
        assert_eq!(first.instance, queued.instance);
    }
}
