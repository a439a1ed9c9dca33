//! SQLite-backed task queue.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::{Delivery, QueueDepth, QueueError, QueueItem, QueueName, TaskQueue};
use crate::db::{self, from_db_time, to_db_time};

/// Task queue stored next to the manifest.
pub struct SqliteTaskQueue {
    conn: Mutex<Connection>,
    visibility_timeout: chrono::Duration,
}

impl SqliteTaskQueue {
    pub fn new(path: &Path, visibility_timeout: Duration) -> Result<Self, QueueError> {
        let conn = db::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            visibility_timeout: to_chrono(visibility_timeout),
        })
    }

    pub fn in_memory(visibility_timeout: Duration) -> Result<Self, QueueError> {
        let conn = db::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            visibility_timeout: to_chrono(visibility_timeout),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), QueueError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS task_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                queue_name TEXT NOT NULL,
                file_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                enqueued_at TEXT NOT NULL,
                available_at TEXT NOT NULL,
                claim_token TEXT,
                claimed_at TEXT,
                deliveries INTEGER NOT NULL DEFAULT 0,
                UNIQUE(queue_name, file_id)
            );

            CREATE INDEX IF NOT EXISTS idx_task_queue_ready ON task_queue(queue_name, available_at);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, QueueError> {
        self.conn
            .lock()
            .map_err(|_| QueueError::Database("connection lock poisoned".to_string()))
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(5200))
}

impl TaskQueue for SqliteTaskQueue {
    fn push(&self, item: &QueueItem, delay: Duration) -> Result<(), QueueError> {
        let conn = self.conn()?;
        let payload = serde_json::to_string(item)?;
        let now = Utc::now();
        let available_at = now + to_chrono(delay);

        // A waiting item keeps its earliest slot; an in-flight one is
        // rescheduled and its current claim dropped.
        conn.execute(
            r#"
            INSERT INTO task_queue (queue_name, file_id, payload, enqueued_at, available_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(queue_name, file_id) DO UPDATE SET
                payload = excluded.payload,
                available_at = CASE
                    WHEN task_queue.claim_token IS NULL
                        THEN MIN(task_queue.available_at, excluded.available_at)
                    ELSE excluded.available_at
                END,
                claim_token = NULL,
                claimed_at = NULL
            "#,
            params![
                item.queue().as_str(),
                item.file_id(),
                payload,
                to_db_time(&now),
                to_db_time(&available_at),
            ],
        )?;
        Ok(())
    }

    fn pop(&self, queue: QueueName) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let now = Utc::now();
        let claim_expired_before = now - self.visibility_timeout;

        let candidate = tx
            .query_row(
                r#"
                SELECT id, payload, deliveries, enqueued_at FROM task_queue
                WHERE queue_name = ?1
                  AND available_at <= ?2
                  AND (claim_token IS NULL OR claimed_at <= ?3)
                ORDER BY available_at, id
                LIMIT 1
                "#,
                params![
                    queue.as_str(),
                    to_db_time(&now),
                    to_db_time(&claim_expired_before)
                ],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, payload, deliveries, enqueued_at)) = candidate else {
            return Ok(None);
        };

        let token = uuid::Uuid::new_v4().to_string();
        tx.execute(
            "UPDATE task_queue SET claim_token = ?, claimed_at = ?, deliveries = deliveries + 1 WHERE id = ?",
            params![token, to_db_time(&now), id],
        )?;
        tx.commit()?;

        let item: QueueItem = serde_json::from_str(&payload)?;
        Ok(Some(Delivery {
            id,
            token,
            deliveries: deliveries + 1,
            enqueued_at: from_db_time(&enqueued_at)?,
            item,
        }))
    }

    fn ack(&self, delivery: &Delivery) -> Result<bool, QueueError> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM task_queue WHERE id = ? AND claim_token = ?",
            params![delivery.id, delivery.token],
        )?;
        Ok(removed == 1)
    }

    fn depth(&self, queue: QueueName) -> Result<QueueDepth, QueueError> {
        let conn = self.conn()?;
        let now = Utc::now();
        let claim_expired_before = now - self.visibility_timeout;

        let (ready, delayed, in_flight) = conn.query_row(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN (claim_token IS NULL OR claimed_at <= ?3) AND available_at <= ?2 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN claim_token IS NULL AND available_at > ?2 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN claim_token IS NOT NULL AND claimed_at > ?3 THEN 1 ELSE 0 END), 0)
            FROM task_queue
            WHERE queue_name = ?1
            "#,
            params![
                queue.as_str(),
                to_db_time(&now),
                to_db_time(&claim_expired_before)
            ],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?)),
        )?;

        Ok(QueueDepth {
            ready: ready as u64,
            delayed: delayed as u64,
            in_flight: in_flight as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{DownloadTask, ProcessingTask};
    use std::path::PathBuf;

    const VISIBILITY: Duration = Duration::from_secs(600);

    fn create_test_queue() -> SqliteTaskQueue {
        SqliteTaskQueue::in_memory(VISIBILITY).unwrap()
    }

    fn download(file_id: &str) -> QueueItem {
        QueueItem::Download(DownloadTask {
            file_id: file_id.to_string(),
            source_locator: format!("https://data.example.org/{}", file_id),
            timestamp: Utc::now(),
            satellite: "MSG4".to_string(),
            product_type: "HRSEVIRI".to_string(),
        })
    }

    fn processing(file_id: &str) -> QueueItem {
        QueueItem::Processing(ProcessingTask {
            file_id: file_id.to_string(),
            raw_file_path: PathBuf::from(format!("/raw/{}", file_id)),
            timestamp: Utc::now(),
            satellite: "MSG4".to_string(),
            product_type: "HRSEVIRI".to_string(),
        })
    }

    #[test]
    fn test_push_pop_ack() {
        let queue = create_test_queue();
        queue.push(&download("A"), Duration::ZERO).unwrap();

        let delivery = queue.pop(QueueName::Download).unwrap().unwrap();
        assert_eq!(delivery.item.file_id(), "A");
        assert_eq!(delivery.item.queue(), QueueName::Download);
        assert_eq!(delivery.deliveries, 1);

        assert!(queue.pop(QueueName::Download).unwrap().is_none());
        assert!(queue.ack(&delivery).unwrap());
        assert_eq!(queue.depth(QueueName::Download).unwrap().total(), 0);
    }

    #[test]
    fn test_queues_are_separate() {
        let queue = create_test_queue();
        queue.push(&download("A"), Duration::ZERO).unwrap();
        queue.push(&processing("B"), Duration::ZERO).unwrap();

        let d = queue.pop(QueueName::Processing).unwrap().unwrap();
        assert_eq!(d.item.file_id(), "B");
        assert!(queue.pop(QueueName::Processing).unwrap().is_none());
        assert_eq!(queue.depth(QueueName::Download).unwrap().ready, 1);
    }

    #[test]
    fn test_fifo_order() {
        let queue = create_test_queue();
        for id in ["A", "B", "C"] {
            queue.push(&download(id), Duration::ZERO).unwrap();
        }
        let order: Vec<String> = (0..3)
            .map(|_| {
                queue
                    .pop(QueueName::Download)
                    .unwrap()
                    .unwrap()
                    .item
                    .file_id()
                    .to_string()
            })
            .collect();
        assert_eq!(order, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_delayed_item_not_delivered_early() {
        let queue = create_test_queue();
        queue.push(&download("A"), Duration::from_secs(3600)).unwrap();

        assert!(queue.pop(QueueName::Download).unwrap().is_none());
        let depth = queue.depth(QueueName::Download).unwrap();
        assert_eq!(depth.delayed, 1);
        assert_eq!(depth.ready, 0);
    }

    #[test]
    fn test_push_is_idempotent_for_waiting_item() {
        let queue = create_test_queue();
        queue.push(&download("A"), Duration::ZERO).unwrap();
        queue.push(&download("A"), Duration::from_secs(3600)).unwrap();

        // Keeps the earlier slot, and only one copy exists.
        assert_eq!(queue.depth(QueueName::Download).unwrap().ready, 1);
        assert!(queue.pop(QueueName::Download).unwrap().is_some());
        assert!(queue.pop(QueueName::Download).unwrap().is_none());
    }

    #[test]
    fn test_unacked_claim_is_redelivered() {
        let queue = SqliteTaskQueue::in_memory(Duration::ZERO).unwrap();
        queue.push(&download("A"), Duration::ZERO).unwrap();

        let first = queue.pop(QueueName::Download).unwrap().unwrap();
        let second = queue.pop(QueueName::Download).unwrap().unwrap();
        assert_eq!(first.id, second.id);
        assert_ne!(first.token, second.token);
        assert_eq!(second.deliveries, 2);

        // The stale claim cannot remove the item.
        assert!(!queue.ack(&first).unwrap());
        assert!(queue.ack(&second).unwrap());
    }

    #[test]
    fn test_push_while_in_flight_reschedules() {
        let queue = create_test_queue();
        queue.push(&download("A"), Duration::ZERO).unwrap();
        let delivery = queue.pop(QueueName::Download).unwrap().unwrap();

        // Handler schedules a retry before acknowledging.
        queue.push(&download("A"), Duration::from_secs(60)).unwrap();
        assert!(!queue.ack(&delivery).unwrap());

        let depth = queue.depth(QueueName::Download).unwrap();
        assert_eq!(depth.delayed, 1);
        assert_eq!(depth.in_flight, 0);
    }

    #[test]
    fn test_depth_counts_in_flight() {
        let queue = create_test_queue();
        queue.push(&download("A"), Duration::ZERO).unwrap();
        queue.push(&download("B"), Duration::ZERO).unwrap();
        let _claimed = queue.pop(QueueName::Download).unwrap().unwrap();

        let depth = queue.depth(QueueName::Download).unwrap();
        assert_eq!(depth.ready, 1);
        assert_eq!(depth.in_flight, 1);
        assert_eq!(depth.total(), 2);
    }

    #[test]
    fn test_shared_file_between_handles() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("queue.db");

        let producer = SqliteTaskQueue::new(&db_path, VISIBILITY).unwrap();
        let consumer = SqliteTaskQueue::new(&db_path, VISIBILITY).unwrap();

        producer.push(&download("A"), Duration::ZERO).unwrap();
        let delivery = consumer.pop(QueueName::Download).unwrap().unwrap();
        assert_eq!(delivery.item.file_id(), "A");
        assert!(producer.pop(QueueName::Download).unwrap().is_none());
    }
}
