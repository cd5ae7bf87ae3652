//! SQLite-backed queue, usable in-process or behind the HTTP facade.
//!
//! Messages live in one row per message with a `status` column:
//! `pending` (deliverable), `leased` (consumed, awaiting ack), `failed`
//! (quarantined, never redelivered). Acking deletes the row. Expired
//! leases are folded back to `pending` at consume time, so no background
//! sweeper is needed.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::warn;

use crate::repository::{connect, fmt_ts, now_ts, with_retry, RepositoryError};

use super::{AsyncTableQueue, QueueEnvelope, QueueKind, Result};

#[derive(Debug, Clone)]
pub struct SqliteQueue {
    db_path: PathBuf,
    lease_secs: u64,
}

impl SqliteQueue {
    pub fn new(db_path: impl Into<PathBuf>, lease_secs: u64) -> Self {
        Self {
            db_path: db_path.into(),
            lease_secs,
        }
    }

    pub fn init(&self) -> Result<()> {
        let conn = connect(&self.db_path)?;
        for kind in [QueueKind::Requests, QueueKind::Results] {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                     queueMessageId TEXT PRIMARY KEY,
                     payload        TEXT NOT NULL,
                     status         TEXT NOT NULL DEFAULT 'pending',
                     createdAt      TEXT NOT NULL,
                     leaseUntil     TEXT
                 );
                 CREATE INDEX IF NOT EXISTS idx_{table}_status ON {table}(status, createdAt);",
                table = kind.table()
            ))
            .map_err(RepositoryError::from)?;
        }
        Ok(())
    }

    fn publish_sync(&self, kind: QueueKind, payload: &Value) -> Result<String> {
        let message_id = uuid::Uuid::new_v4().to_string();
        let body = serde_json::to_string(payload)?;
        with_retry(|| {
            let conn = connect(&self.db_path)?;
            conn.execute(
                &format!(
                    "INSERT INTO {} (queueMessageId, payload, status, createdAt) \
                     VALUES (?1, ?2, 'pending', ?3)",
                    kind.table()
                ),
                rusqlite::params![message_id, body, now_ts()],
            )?;
            Ok(())
        })?;
        Ok(message_id)
    }

    fn consume_sync(&self, kind: QueueKind, limit: usize) -> Result<Vec<QueueEnvelope>> {
        let leased = with_retry(|| {
            let conn = connect(&self.db_path)?;
            let now = now_ts();
            let lease_until = fmt_ts(Utc::now() + Duration::seconds(self.lease_secs as i64));
            conn.execute_batch("BEGIN IMMEDIATE")?;
            let result = (|| {
                conn.execute(
                    &format!(
                        "UPDATE {} SET status = 'pending', leaseUntil = NULL \
                         WHERE status = 'leased' AND leaseUntil < ?1",
                        kind.table()
                    ),
                    [&now],
                )?;
                let mut stmt = conn.prepare(&format!(
                    "SELECT queueMessageId, payload FROM {} \
                     WHERE status = 'pending' ORDER BY createdAt ASC, rowid ASC LIMIT ?1",
                    kind.table()
                ))?;
                let rows = stmt.query_map([limit as i64], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                let mut picked = Vec::new();
                for row in rows {
                    picked.push(row?);
                }
                for (id, _) in &picked {
                    conn.execute(
                        &format!(
                            "UPDATE {} SET status = 'leased', leaseUntil = ?2 \
                             WHERE queueMessageId = ?1",
                            kind.table()
                        ),
                        rusqlite::params![id, lease_until],
                    )?;
                }
                Ok::<_, RepositoryError>(picked)
            })();
            match result {
                Ok(picked) => {
                    conn.execute_batch("COMMIT")?;
                    Ok(picked)
                }
                Err(err) => {
                    let _ = conn.execute_batch("ROLLBACK");
                    Err(err)
                }
            }
        })?;

        let mut envelopes = Vec::with_capacity(leased.len());
        for (id, body) in leased {
            match serde_json::from_str::<Value>(&body) {
                Ok(payload) => envelopes.push(QueueEnvelope {
                    queue_message_id: id,
                    payload,
                }),
                Err(err) => {
                    warn!(message_id = %id, %err, "quarantining undecodable queue message");
                    self.quarantine(kind, &id)?;
                }
            }
        }
        Ok(envelopes)
    }

    fn quarantine(&self, kind: QueueKind, message_id: &str) -> Result<()> {
        with_retry(|| {
            let conn = connect(&self.db_path)?;
            conn.execute(
                &format!(
                    "UPDATE {} SET status = 'failed', leaseUntil = NULL \
                     WHERE queueMessageId = ?1",
                    kind.table()
                ),
                [message_id],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    fn ack_sync(&self, kind: QueueKind, ids: &[String]) -> Result<()> {
        with_retry(|| {
            let conn = connect(&self.db_path)?;
            for id in ids {
                conn.execute(
                    &format!("DELETE FROM {} WHERE queueMessageId = ?1", kind.table()),
                    [id],
                )?;
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Count of messages currently deliverable or leased.
    pub fn depth(&self, kind: QueueKind) -> Result<u64> {
        let conn = connect(&self.db_path)?;
        let count = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE status IN ('pending', 'leased')",
                kind.table()
            ),
            [],
            |row| row.get(0),
        )
        .map_err(RepositoryError::from)?;
        Ok(count)
    }
}

#[async_trait]
impl AsyncTableQueue for SqliteQueue {
    async fn publish(&self, kind: QueueKind, payload: &Value) -> Result<String> {
        self.publish_sync(kind, payload)
    }

    async fn consume(&self, kind: QueueKind, limit: usize) -> Result<Vec<QueueEnvelope>> {
        self.consume_sync(kind, limit)
    }

    async fn ack(&self, kind: QueueKind, ids: &[String]) -> Result<()> {
        self.ack_sync(kind, ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queue(lease_secs: u64) -> (tempfile::TempDir, SqliteQueue) {
        let dir = tempfile::TempDir::new().unwrap();
        let queue = SqliteQueue::new(dir.path().join("async-queue.db"), lease_secs);
        queue.init().unwrap();
        (dir, queue)
    }

    #[test]
    fn test_init_is_idempotent() {
        let (_dir, queue) = queue(120);
        queue.init().unwrap();
    }

    #[tokio::test]
    async fn test_fifo_lease_and_ack() {
        let (_dir, queue) = queue(120);
        let first = queue
            .publish(QueueKind::Requests, &json!({"n": 1}))
            .await
            .unwrap();
        queue
            .publish(QueueKind::Requests, &json!({"n": 2}))
            .await
            .unwrap();

        let batch = queue.consume(QueueKind::Requests, 1).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].queue_message_id, first);
        assert_eq!(batch[0].payload["n"], 1);

        // leased message is invisible to a second consumer
        let second = queue.consume(QueueKind::Requests, 10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].payload["n"], 2);

        let ids: Vec<String> = [&batch[0], &second[0]]
            .iter()
            .map(|e| e.queue_message_id.clone())
            .collect();
        queue.ack(QueueKind::Requests, &ids).await.unwrap();
        assert_eq!(queue.depth(QueueKind::Requests).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expired_lease_is_redelivered() {
        let (_dir, queue) = queue(0);
        queue
            .publish(QueueKind::Results, &json!({"x": true}))
            .await
            .unwrap();
        let first = queue.consume(QueueKind::Results, 10).await.unwrap();
        assert_eq!(first.len(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let again = queue.consume(QueueKind::Results, 10).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].queue_message_id, first[0].queue_message_id);
    }

    #[tokio::test]
    async fn test_queues_are_isolated() {
        let (_dir, queue) = queue(120);
        queue
            .publish(QueueKind::Requests, &json!({"req": 1}))
            .await
            .unwrap();
        assert!(queue
            .consume(QueueKind::Results, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_quarantined() {
        let (_dir, queue) = queue(120);
        // bypass publish to seed a corrupt payload
        let conn = connect(queue.db_path.as_path()).unwrap();
        conn.execute(
            "INSERT INTO queue_requests (queueMessageId, payload, status, createdAt) \
             VALUES ('m1', '{not json', 'pending', ?1)",
            [now_ts()],
        )
        .unwrap();
        drop(conn);

        assert!(queue
            .consume(QueueKind::Requests, 10)
            .await
            .unwrap()
            .is_empty());
        // quarantined, not redelivered
        assert!(queue
            .consume(QueueKind::Requests, 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(queue.depth(QueueKind::Requests).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ack_unknown_id_is_ignored() {
        let (_dir, queue) = queue(120);
        queue
            .ack(QueueKind::Requests, &["ghost".to_string()])
            .await
            .unwrap();
    }
}
