//! `worker_heartbeats` queries.

use sqlx::Row;

use super::model::{Heartbeat, WorkerStatus};
use super::{Store, now, parse_timestamp};
use crate::Result;

impl Store {
    /// Writes a heartbeat and returns the resulting error count.
    ///
    /// `error` increments the count and `active` resets it; other statuses
    /// leave it alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn heartbeat(&self, worker_id: &str, status: WorkerStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r"
            INSERT INTO worker_heartbeats (worker_id, last_heartbeat, status, error_count)
            VALUES (?1, ?2, ?3, CASE WHEN ?3 = 'error' THEN 1 ELSE 0 END)
            ON CONFLICT(worker_id) DO UPDATE SET
                last_heartbeat = excluded.last_heartbeat,
                status = excluded.status,
                error_count = CASE excluded.status
                    WHEN 'error' THEN worker_heartbeats.error_count + 1
                    WHEN 'active' THEN 0
                    ELSE worker_heartbeats.error_count
                END
            RETURNING error_count
            ",
        )
        .bind(worker_id)
        .bind(now())
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Last heartbeat of a worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_heartbeat(&self, worker_id: &str) -> Result<Option<Heartbeat>> {
        let row = sqlx::query(
            "SELECT worker_id, last_heartbeat, status, error_count FROM worker_heartbeats WHERE worker_id = ?",
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| {
            let status: String = row.get("status");
            Heartbeat {
                worker_id: row.get("worker_id"),
                last_heartbeat: parse_timestamp(row.get("last_heartbeat")),
                status: WorkerStatus::parse(&status),
                error_count: row.get("error_count"),
            }
        }))
    }

    /// Zeroes the error count without touching the status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn reset_heartbeat(&self, worker_id: &str) -> Result<()> {
        sqlx::query("UPDATE worker_heartbeats SET error_count = 0 WHERE worker_id = ?")
            .bind(worker_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
